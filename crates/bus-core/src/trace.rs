//! Access trace hook.

use crate::bus::Width;
use crate::device::Address;

/// Access events emitted by a [`Bus`](crate::Bus) with a sink installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// A primitive access forwarded to a bound device. Split accesses report
    /// each piece separately.
    DeviceAccess {
        /// Registration index of the binding that served the access.
        binding: usize,
        /// Device-local address.
        local: Address,
        /// Width of the primitive that was invoked.
        width: Width,
        /// Value read or written, zero-extended.
        value: u64,
        /// True for writes, false for reads.
        is_write: bool,
    },
    /// An access that no binding covered.
    OpenBus {
        /// Global address of the access.
        address: Address,
        /// Width of the access.
        width: Width,
        /// True for writes, false for reads.
        is_write: bool,
    },
}

/// Sink trait for access tracing.
pub trait TraceSink {
    /// Records an event in dispatch order.
    fn on_event(&mut self, event: TraceEvent);
}
