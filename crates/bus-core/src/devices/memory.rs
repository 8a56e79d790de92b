//! Byte-buffer backed ROM and RAM devices.

use std::collections::TryReserveError;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::device::{Address, BusDevice, BusLink};

/// Failure to load a memory image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The image file could not be opened.
    #[error("cannot open image {}: {source}", path.display())]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Reading from the image source failed.
    #[error("cannot read image: {source}")]
    Read {
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Fixed-size byte storage shared by [`Rom`] and [`Ram`].
#[derive(Debug, Clone)]
struct Backing {
    bytes: Box<[u8]>,
    link: BusLink,
}

impl Backing {
    fn zeroed(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    fn try_zeroed(size: usize) -> Result<Self, TryReserveError> {
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size)?;
        bytes.resize(size, 0);
        Ok(Self::from_bytes(bytes))
    }

    fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            link: BusLink::new(),
        }
    }

    fn size(&self) -> Address {
        Address::try_from(self.bytes.len()).unwrap_or(Address::MAX)
    }

    fn range(&self, addr: Address, len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(addr).ok()?;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len()).then_some(start..end)
    }

    fn get(&self, addr: Address) -> u8 {
        self.range(addr, 1).map_or(0, |range| self.bytes[range.start])
    }

    fn set(&mut self, addr: Address, data: u8) {
        if let Some(range) = self.range(addr, 1) {
            self.bytes[range.start] = data;
        }
    }

    fn read_array<const N: usize>(&self, addr: Address) -> [u8; N] {
        let mut out = [0; N];
        if let Some(range) = self.range(addr, N) {
            out.copy_from_slice(&self.bytes[range]);
        } else {
            for (offset, byte) in (0..).zip(out.iter_mut()) {
                *byte = addr.checked_add(offset).map_or(0, |at| self.get(at));
            }
        }
        out
    }

    fn write_array<const N: usize>(&mut self, addr: Address, data: [u8; N]) {
        if let Some(range) = self.range(addr, N) {
            self.bytes[range].copy_from_slice(&data);
        } else {
            for (offset, byte) in (0..).zip(data) {
                if let Some(at) = addr.checked_add(offset) {
                    self.set(at, byte);
                }
            }
        }
    }

    fn load_bytes(&mut self, image: &[u8]) -> usize {
        let count = image.len().min(self.bytes.len());
        self.bytes[..count].copy_from_slice(&image[..count]);
        count
    }

    fn load_reader(&mut self, mut reader: impl Read) -> Result<usize, ImageError> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(ImageError::Read { source }),
            }
        }
        Ok(filled)
    }

    fn load_file(&mut self, path: &Path) -> Result<usize, ImageError> {
        let file = File::open(path).map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let loaded = self.load_reader(file)?;
        log::debug!(
            "loaded {loaded} of {} bytes from {}",
            self.bytes.len(),
            path.display()
        );
        Ok(loaded)
    }
}

/// Read-only memory. Writes through the bus are ignored.
#[derive(Debug, Clone)]
pub struct Rom {
    backing: Backing,
}

impl Rom {
    /// Creates a zero-filled ROM of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            backing: Backing::zeroed(size),
        }
    }

    /// Creates a zero-filled ROM of `size` bytes, failing instead of aborting
    /// when the host cannot allocate it.
    ///
    /// # Errors
    ///
    /// Returns the allocator's [`TryReserveError`].
    pub fn try_new(size: usize) -> Result<Self, TryReserveError> {
        Backing::try_zeroed(size).map(|backing| Self { backing })
    }

    /// Creates a ROM holding exactly `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            backing: Backing::from_bytes(bytes),
        }
    }

    /// ROM contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.backing.bytes
    }

    /// Copies the start of `image` into the ROM and returns the number of
    /// bytes copied, at most the ROM size.
    pub fn load_bytes(&mut self, image: &[u8]) -> usize {
        self.backing.load_bytes(image)
    }

    /// Fills the ROM from `reader` until it is full or the reader is
    /// exhausted, returning the number of bytes loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Read`] when the reader fails.
    pub fn load_reader(&mut self, reader: impl Read) -> Result<usize, ImageError> {
        self.backing.load_reader(reader)
    }

    /// Fills the ROM from the file at `path`, returning the number of bytes
    /// loaded. A file shorter than the ROM is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Open`] when the file cannot be opened and
    /// [`ImageError::Read`] when reading it fails.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, ImageError> {
        self.backing.load_file(path.as_ref())
    }
}

impl BusDevice for Rom {
    fn size(&self) -> Address {
        self.backing.size()
    }

    fn link(&self) -> &BusLink {
        &self.backing.link
    }

    fn read8(&mut self, addr: Address) -> u8 {
        self.backing.get(addr)
    }
}

/// Read-write memory with direct little-endian wide accesses.
#[derive(Debug, Clone)]
pub struct Ram {
    backing: Backing,
}

impl Ram {
    /// Creates a zero-filled RAM of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            backing: Backing::zeroed(size),
        }
    }

    /// Fallible form of [`Ram::new`].
    ///
    /// # Errors
    ///
    /// Returns the allocator's [`TryReserveError`] when `size` bytes cannot be
    /// reserved.
    pub fn try_new(size: usize) -> Result<Self, TryReserveError> {
        Backing::try_zeroed(size).map(|backing| Self { backing })
    }

    /// Creates a RAM initialised with `bytes`.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Box<[u8]>>) -> Self {
        Self {
            backing: Backing::from_bytes(bytes),
        }
    }

    /// RAM contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.backing.bytes
    }

    /// Mutable RAM contents.
    #[must_use]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.backing.bytes
    }

    /// Copies the start of `image` into RAM; see [`Rom::load_bytes`].
    pub fn load_bytes(&mut self, image: &[u8]) -> usize {
        self.backing.load_bytes(image)
    }

    /// Fills RAM from `reader`; see [`Rom::load_reader`].
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Read`] when the reader fails.
    pub fn load_reader(&mut self, reader: impl Read) -> Result<usize, ImageError> {
        self.backing.load_reader(reader)
    }

    /// Fills RAM from the file at `path`; see [`Rom::load_file`].
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Open`] or [`ImageError::Read`].
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<usize, ImageError> {
        self.backing.load_file(path.as_ref())
    }
}

impl BusDevice for Ram {
    fn size(&self) -> Address {
        self.backing.size()
    }

    fn link(&self) -> &BusLink {
        &self.backing.link
    }

    fn read8(&mut self, addr: Address) -> u8 {
        self.backing.get(addr)
    }

    fn write8(&mut self, addr: Address, data: u8) {
        self.backing.set(addr, data);
    }

    fn read16(&mut self, addr: Address) -> u16 {
        u16::from_le_bytes(self.backing.read_array(addr))
    }

    fn read32(&mut self, addr: Address) -> u32 {
        u32::from_le_bytes(self.backing.read_array(addr))
    }

    fn read64(&mut self, addr: Address) -> u64 {
        u64::from_le_bytes(self.backing.read_array(addr))
    }

    fn write16(&mut self, addr: Address, data: u16) {
        self.backing.write_array(addr, data.to_le_bytes());
    }

    fn write32(&mut self, addr: Address, data: u32) {
        self.backing.write_array(addr, data.to_le_bytes());
    }

    fn write64(&mut self, addr: Address, data: u64) {
        self.backing.write_array(addr, data.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};

    use super::{ImageError, Ram, Rom};
    use crate::device::BusDevice;

    struct Trickle<'a> {
        data: &'a [u8],
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some((first, rest)) = self.data.split_first() else {
                return Ok(0);
            };
            if buf.is_empty() {
                return Ok(0);
            }
            buf[0] = *first;
            self.data = rest;
            Ok(1)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device unplugged"))
        }
    }

    #[test]
    fn rom_ignores_writes() {
        let mut rom = Rom::from_bytes(vec![1, 2, 3, 4]);
        rom.write8(0, 0xFF);
        rom.write32(0, 0xFFFF_FFFF);

        assert_eq!(rom.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(rom.read32(0), 0x0403_0201);
    }

    #[test]
    fn ram_wide_accesses_are_little_endian() {
        let mut ram = Ram::new(8);
        ram.write64(0, 0x0102_0304_0506_0708);

        assert_eq!(ram.as_bytes(), &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(ram.read16(2), 0x0506);
        assert_eq!(ram.read32(4), 0x0102_0304);
    }

    #[test]
    fn ram_wide_access_past_end_degrades_per_byte() {
        let mut ram = Ram::new(4);
        ram.write32(2, 0xAABB_CCDD);

        assert_eq!(ram.as_bytes(), &[0, 0, 0xDD, 0xCC]);
        assert_eq!(ram.read32(2), 0x0000_CCDD);
        assert_eq!(ram.read64(u64::MAX), 0);
    }

    #[test]
    fn out_of_range_byte_accesses_are_open() {
        let mut rom = Rom::new(2);
        assert_eq!(rom.read8(2), 0);
        let mut ram = Ram::new(2);
        ram.write8(5, 0x12);
        assert_eq!(ram.as_bytes(), &[0, 0]);
    }

    #[test]
    fn load_bytes_truncates_to_memory_size() {
        let mut ram = Ram::new(3);
        assert_eq!(ram.load_bytes(&[9, 8, 7, 6, 5]), 3);
        assert_eq!(ram.as_bytes(), &[9, 8, 7]);

        let mut rom = Rom::new(4);
        assert_eq!(rom.load_bytes(&[1]), 1);
        assert_eq!(rom.as_bytes(), &[1, 0, 0, 0]);
    }

    #[test]
    fn load_reader_accumulates_short_reads() {
        let mut rom = Rom::new(4);
        let loaded = rom
            .load_reader(Trickle { data: &[5, 6, 7] })
            .expect("trickle reader never fails");

        assert_eq!(loaded, 3);
        assert_eq!(rom.as_bytes(), &[5, 6, 7, 0]);
    }

    #[test]
    fn load_reader_reports_io_failures() {
        let mut ram = Ram::new(4);
        let error = ram.load_reader(Broken).expect_err("broken reader fails");
        assert!(matches!(error, ImageError::Read { .. }));
        assert!(error.to_string().contains("device unplugged"));
    }

    #[test]
    fn load_file_returns_loaded_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("boot.bin");
        std::fs::write(&path, [0xEA, 0xEA, 0x4C]).expect("write image");

        let mut rom = Rom::new(8);
        assert_eq!(rom.load_file(&path).expect("image loads"), 3);
        assert_eq!(&rom.as_bytes()[..4], &[0xEA, 0xEA, 0x4C, 0x00]);

        let mut small = Ram::new(2);
        assert_eq!(small.load_file(&path).expect("image loads"), 2);
    }

    #[test]
    fn load_file_reports_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.bin");

        let error = Rom::new(4)
            .load_file(&missing)
            .expect_err("missing file fails");
        assert!(matches!(error, ImageError::Open { ref path, .. } if *path == missing));
    }

    #[test]
    fn try_new_reports_impossible_sizes() {
        assert!(Ram::try_new(usize::MAX).is_err());
        assert!(Rom::try_new(usize::MAX).is_err());

        let ram = Ram::try_new(16).expect("small ram allocates");
        assert_eq!(ram.as_bytes(), &[0; 16]);
        assert_eq!(Rom::try_new(0).expect("empty rom").size(), 0);
    }

    #[test]
    fn reset_keeps_contents_and_clone_is_detached() {
        let mut ram = Ram::from_bytes(vec![1, 2]);
        ram.reset();
        assert_eq!(ram.as_bytes(), &[1, 2]);

        ram.as_bytes_mut()[0] = 9;
        let copy = ram.clone();
        assert_eq!(copy.as_bytes(), &[9, 2]);
        assert_eq!(copy.bus(), None);
    }
}
