//! Device capability contract shared by every addressable unit on a bus.
//!
//! A device only has to provide its declared size, its back-reference cell and
//! (usually) the 8-bit primitives. Every wider access has a default body that
//! composes the next-narrower pair of primitives, least-significant part first,
//! so overriding `write16` is picked up by the default `write32` and `write64`.

use std::cell::OnceCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global address type of the composed address space.
pub type Address = u64;

/// Process-unique identity of a [`Bus`](crate::Bus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(u64);

impl BusId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus#{}", self.0)
    }
}

/// Write-once back-reference from a device to the bus that owns it.
///
/// Devices embed a `BusLink` and hand it out through [`BusDevice::link`]. Only
/// the bus can fill it, exactly once, when the device is connected. The link is
/// an identifier, not a handle: it never keeps the bus alive.
#[derive(Debug, Default)]
pub struct BusLink {
    owner: OnceCell<BusId>,
}

impl BusLink {
    /// Creates an unattached link.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            owner: OnceCell::new(),
        }
    }

    /// Returns the owning bus, or `None` before registration.
    #[must_use]
    pub fn get(&self) -> Option<BusId> {
        self.owner.get().copied()
    }

    /// Returns `true` once the device has been connected to a bus.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.owner.get().is_some()
    }

    /// Records `bus` as the owner. Fails with the existing owner when the link
    /// already belongs to a different bus.
    pub(crate) fn attach(&self, bus: BusId) -> Result<(), BusId> {
        let owner = *self.owner.get_or_init(|| bus);
        if owner == bus {
            Ok(())
        } else {
            Err(owner)
        }
    }
}

/// A copied device is a new, unregistered device, so the copy starts detached.
impl Clone for BusLink {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Capability contract every addressable unit implements.
///
/// Addresses passed to the access methods are local: `0` is the first byte of
/// the device regardless of where it is mapped. None of the methods can fail;
/// a device that does not implement an access returns `0` or ignores the write.
pub trait BusDevice {
    /// Declared number of addressable bytes. Must not change after construction.
    fn size(&self) -> Address;

    /// Back-reference cell filled by the bus on connect.
    fn link(&self) -> &BusLink;

    /// Bus this device is attached to, if any.
    fn bus(&self) -> Option<BusId> {
        self.link().get()
    }

    /// Advances the device by one simulation step.
    fn tick(&mut self) {}

    /// Restores the device to its initial state.
    fn reset(&mut self) {}

    /// Reads one byte.
    fn read8(&mut self, _addr: Address) -> u8 {
        0
    }

    /// Writes one byte.
    fn write8(&mut self, _addr: Address, _data: u8) {}

    /// Reads two bytes, low byte at `addr`.
    fn read16(&mut self, addr: Address) -> u16 {
        u16::from(self.read8(addr)) | (u16::from(self.read8(addr.wrapping_add(1))) << 8)
    }

    /// Reads four bytes as two little-endian halves.
    fn read32(&mut self, addr: Address) -> u32 {
        u32::from(self.read16(addr)) | (u32::from(self.read16(addr.wrapping_add(2))) << 16)
    }

    /// Reads eight bytes as two little-endian words.
    fn read64(&mut self, addr: Address) -> u64 {
        u64::from(self.read32(addr)) | (u64::from(self.read32(addr.wrapping_add(4))) << 32)
    }

    /// Writes two bytes, low byte at `addr`.
    fn write16(&mut self, addr: Address, data: u16) {
        let [lo, hi] = data.to_le_bytes();
        self.write8(addr, lo);
        self.write8(addr.wrapping_add(1), hi);
    }

    /// Writes four bytes as two little-endian halves.
    #[allow(clippy::cast_possible_truncation)]
    fn write32(&mut self, addr: Address, data: u32) {
        self.write16(addr, data as u16);
        self.write16(addr.wrapping_add(2), (data >> 16) as u16);
    }

    /// Writes eight bytes as two little-endian words.
    #[allow(clippy::cast_possible_truncation)]
    fn write64(&mut self, addr: Address, data: u64) {
        self.write32(addr, data as u32);
        self.write32(addr.wrapping_add(4), (data >> 32) as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, BusDevice, BusId, BusLink};

    struct ByteCells {
        cells: [u8; 16],
        link: BusLink,
    }

    impl ByteCells {
        fn new() -> Self {
            Self {
                cells: [0; 16],
                link: BusLink::new(),
            }
        }
    }

    impl BusDevice for ByteCells {
        fn size(&self) -> Address {
            16
        }

        fn link(&self) -> &BusLink {
            &self.link
        }

        fn read8(&mut self, addr: Address) -> u8 {
            self.cells[usize::try_from(addr).expect("test address fits usize")]
        }

        fn write8(&mut self, addr: Address, data: u8) {
            self.cells[usize::try_from(addr).expect("test address fits usize")] = data;
        }
    }

    /// Counts 16-bit writes while storing through to byte cells.
    struct HalfCounting {
        inner: ByteCells,
        half_writes: usize,
    }

    impl BusDevice for HalfCounting {
        fn size(&self) -> Address {
            self.inner.size()
        }

        fn link(&self) -> &BusLink {
            self.inner.link()
        }

        fn read8(&mut self, addr: Address) -> u8 {
            self.inner.read8(addr)
        }

        fn write16(&mut self, addr: Address, data: u16) {
            self.half_writes += 1;
            self.inner.write16(addr, data);
        }
    }

    struct Silent {
        link: BusLink,
    }

    impl BusDevice for Silent {
        fn size(&self) -> Address {
            4
        }

        fn link(&self) -> &BusLink {
            &self.link
        }
    }

    #[test]
    fn wide_reads_compose_from_bytes_little_endian() {
        let mut device = ByteCells::new();
        for (index, byte) in [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
            .into_iter()
            .enumerate()
        {
            device.cells[index] = byte;
        }

        assert_eq!(device.read16(0), 0x0708);
        assert_eq!(device.read32(0), 0x0506_0708);
        assert_eq!(device.read64(0), 0x0102_0304_0506_0708);
        assert_eq!(
            device.read16(3),
            u16::from(device.read8(3)) | (u16::from(device.read8(4)) << 8)
        );
    }

    #[test]
    fn wide_writes_decompose_to_bytes_little_endian() {
        let mut device = ByteCells::new();
        device.write64(8, 0x1122_3344_5566_7788);

        assert_eq!(
            &device.cells[8..16],
            &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
    }

    #[test]
    fn overridden_half_write_is_used_by_default_wider_writes() {
        let mut device = HalfCounting {
            inner: ByteCells::new(),
            half_writes: 0,
        };

        device.write32(0, 0xAABB_CCDD);
        assert_eq!(device.half_writes, 2);

        device.write64(4, 0x0102_0304_0506_0708);
        assert_eq!(device.half_writes, 6);
        assert_eq!(device.read32(0), 0xAABB_CCDD);
        assert_eq!(device.read64(4), 0x0102_0304_0506_0708);
    }

    #[test]
    fn unimplemented_primitives_read_zero_and_ignore_writes() {
        let mut device = Silent {
            link: BusLink::new(),
        };
        device.write64(0, u64::MAX);

        assert_eq!(device.read8(0), 0);
        assert_eq!(device.read64(0), 0);
        device.tick();
        device.reset();
    }

    #[test]
    fn link_attaches_once_and_keeps_first_owner() {
        let link = BusLink::new();
        assert!(!link.is_attached());
        assert_eq!(link.get(), None);

        let first = BusId::next();
        let second = BusId::next();
        assert_eq!(link.attach(first), Ok(()));
        assert_eq!(link.attach(second), Err(first));
        assert_eq!(link.get(), Some(first));
    }

    #[test]
    fn reattaching_to_the_owner_is_accepted() {
        let link = BusLink::new();
        let owner = BusId::next();

        assert_eq!(link.attach(owner), Ok(()));
        assert_eq!(link.attach(owner), Ok(()));
        assert_eq!(link.attach(BusId::next()), Err(owner));
        assert_eq!(link.get(), Some(owner));
    }

    #[test]
    fn cloned_link_is_detached() {
        let link = BusLink::new();
        link.attach(BusId::next()).expect("fresh link attaches");

        assert!(!link.clone().is_attached());
    }

    #[test]
    fn bus_ids_are_unique_and_display_with_prefix() {
        let a = BusId::next();
        let b = BusId::next();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), format!("bus#{}", a.get()));
    }
}
