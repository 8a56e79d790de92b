//! Registered device bindings and their address-range checks.

use crate::bus::split::Width;
use crate::device::{Address, BusDevice};

/// Read-only description of one binding, as reported by [`Bus::bindings`](crate::Bus::bindings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingInfo {
    /// Registration index; lower indices win where ranges overlap.
    pub index: usize,
    /// First global address covered.
    pub start: Address,
    /// One past the last global address covered (wrapping).
    pub end: Address,
}

impl BindingInfo {
    /// Number of bytes covered by the binding.
    #[must_use]
    pub const fn size(&self) -> Address {
        self.end.wrapping_sub(self.start)
    }

    /// Returns `true` when `addr` falls inside the binding.
    #[must_use]
    pub const fn contains(&self, addr: Address) -> bool {
        addr.wrapping_sub(self.start) < self.size()
    }
}

/// One device owned by the bus together with its global range.
pub(crate) struct Binding {
    device: Box<dyn BusDevice>,
    start: Address,
    end: Address,
}

impl Binding {
    /// Binds `device` at `start`; the end is fixed here from the declared size.
    pub(crate) fn new(start: Address, device: Box<dyn BusDevice>) -> Self {
        let end = start.wrapping_add(device.size());
        Self { device, start, end }
    }

    pub(crate) const fn info(&self, index: usize) -> BindingInfo {
        BindingInfo {
            index,
            start: self.start,
            end: self.end,
        }
    }

    pub(crate) const fn local(&self, addr: Address) -> Address {
        addr.wrapping_sub(self.start)
    }

    /// How many bytes of `[addr, addr + len)` fall inside this binding,
    /// counting from `addr`. Zero when `addr` itself is unmapped here.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn coverage(&self, addr: Address, len: u8) -> u8 {
        let span = self.end.wrapping_sub(self.start);
        let offset = self.local(addr);
        if offset >= span {
            return 0;
        }
        let room = span - offset;
        if room >= len as Address {
            len
        } else {
            // room < len <= 8
            room as u8
        }
    }

    pub(crate) fn device(&self) -> &dyn BusDevice {
        self.device.as_ref()
    }

    pub(crate) fn device_mut(&mut self) -> &mut (dyn BusDevice + 'static) {
        self.device.as_mut()
    }

    pub(crate) fn read(&mut self, local: Address, width: Width) -> u64 {
        match width {
            Width::Byte => u64::from(self.device.read8(local)),
            Width::Half => u64::from(self.device.read16(local)),
            Width::Word => u64::from(self.device.read32(local)),
            Width::Double => self.device.read64(local),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn write(&mut self, local: Address, width: Width, value: u64) {
        match width {
            Width::Byte => self.device.write8(local, value as u8),
            Width::Half => self.device.write16(local, value as u16),
            Width::Word => self.device.write32(local, value as u32),
            Width::Double => self.device.write64(local, value),
        }
    }
}
