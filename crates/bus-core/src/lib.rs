//! Address-space dispatcher for memory-mapped hardware simulation.

/// Device capability contract and bus back-references.
pub mod device;
pub use device::{Address, BusDevice, BusId, BusLink};

/// Address-space dispatcher, bindings and width splitting.
pub mod bus;
pub use bus::{
    prefix_chunks, remainder_chunks, BindingInfo, Bus, Chunk, PrefixChunks, RemainderChunks, Width,
};

/// Access trace hook.
pub mod trace;
pub use trace::{TraceEvent, TraceSink};

/// Leaf ROM and RAM devices.
pub mod devices;
pub use devices::{ImageError, Ram, Rom};

/// Declarative memory maps.
pub mod map;
pub use map::{parse_address, MapError, MemoryMap, RegionKind, RegionSpec};

#[cfg(test)]
use proptest as _;
