//! Declarative memory maps and bus construction.
//!
//! A [`MemoryMap`] lists regions in registration order; [`MemoryMap::build`]
//! turns it into a populated [`Bus`]. Regions are connected exactly as listed,
//! so overlapping regions resolve the same way direct `connect` calls do.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::bus::Bus;
use crate::device::{Address, BusDevice};
use crate::devices::{ImageError, Ram, Rom};

/// Failure to parse or build a memory map.
#[derive(Debug, Error)]
pub enum MapError {
    /// Region text did not have the `<value>@<base>` shape.
    #[error("region `{text}` is not of the form <value>@<base>")]
    InvalidRegion {
        /// Offending text.
        text: String,
    },
    /// A size or address failed to parse.
    #[error("`{text}` is not a valid number")]
    InvalidNumber {
        /// Offending text.
        text: String,
    },
    /// Neither an explicit size nor an image was given.
    #[error("region {index} has neither a size nor an image")]
    MissingSize {
        /// Region index in the map.
        index: usize,
    },
    /// The region would map zero bytes.
    #[error("region {index} is empty")]
    ZeroSize {
        /// Region index in the map.
        index: usize,
    },
    /// The region is larger than the host can allocate.
    #[error("region {index} size {size:#x} does not fit in host memory")]
    TooLarge {
        /// Region index in the map.
        index: usize,
        /// Requested size.
        size: Address,
    },
    /// The region's image could not be loaded.
    #[error("region {index}: {source}")]
    Image {
        /// Region index in the map.
        index: usize,
        /// Underlying load failure.
        source: ImageError,
    },
}

/// Kind of memory backing a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RegionKind {
    /// Read-only memory.
    Rom,
    /// Read-write memory.
    Ram,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rom => "rom",
            Self::Ram => "ram",
        })
    }
}

/// One region of a memory map.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegionSpec {
    /// Backing memory kind.
    pub kind: RegionKind,
    /// Global start address.
    pub base: Address,
    /// Region size; defaults to the image length when absent.
    #[cfg_attr(feature = "serde", serde(default))]
    pub size: Option<Address>,
    /// Image file loaded into the region at build time.
    #[cfg_attr(feature = "serde", serde(default))]
    pub image: Option<PathBuf>,
}

impl RegionSpec {
    /// A zero-filled RAM region.
    #[must_use]
    pub const fn ram(base: Address, size: Address) -> Self {
        Self {
            kind: RegionKind::Ram,
            base,
            size: Some(size),
            image: None,
        }
    }

    /// A ROM region sized and filled from an image file.
    #[must_use]
    pub fn rom_image(base: Address, image: impl Into<PathBuf>) -> Self {
        Self {
            kind: RegionKind::Rom,
            base,
            size: None,
            image: Some(image.into()),
        }
    }

    /// Parses the command-line region syntax: `<size>@<base>` for RAM and
    /// `<path>@<base>` for ROM.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidRegion`] when `@` is missing or either side
    /// is empty, and [`MapError::InvalidNumber`] for malformed numbers.
    pub fn parse(kind: RegionKind, text: &str) -> Result<Self, MapError> {
        let invalid = || MapError::InvalidRegion {
            text: text.to_string(),
        };
        let (value, base) = text.rsplit_once('@').ok_or_else(invalid)?;
        if value.is_empty() || base.is_empty() {
            return Err(invalid());
        }
        let base = parse_address(base)?;

        Ok(match kind {
            RegionKind::Ram => Self::ram(base, parse_address(value)?),
            RegionKind::Rom => Self::rom_image(base, value),
        })
    }

    fn resolved_size(&self, index: usize) -> Result<Address, MapError> {
        let size = match (self.size, &self.image) {
            (Some(size), _) => size,
            (None, Some(path)) => image_len(path).map_err(|source| MapError::Image { index, source })?,
            (None, None) => return Err(MapError::MissingSize { index }),
        };
        if size == 0 {
            return Err(MapError::ZeroSize { index });
        }
        Ok(size)
    }

    fn instantiate(&self, index: usize) -> Result<Box<dyn BusDevice>, MapError> {
        let requested = self.resolved_size(index)?;
        let too_large = || MapError::TooLarge {
            index,
            size: requested,
        };
        let size = usize::try_from(requested).map_err(|_| too_large())?;
        let load = |result: Result<usize, ImageError>| {
            let loaded = result.map_err(|source| MapError::Image { index, source })?;
            if loaded < size {
                log::info!("region {index}: image filled {loaded} of {size} bytes");
            }
            Ok::<_, MapError>(())
        };

        Ok(match self.kind {
            RegionKind::Rom => {
                let mut rom = Rom::try_new(size).map_err(|_| too_large())?;
                if let Some(path) = &self.image {
                    load(rom.load_file(path))?;
                }
                Box::new(rom)
            }
            RegionKind::Ram => {
                let mut ram = Ram::try_new(size).map_err(|_| too_large())?;
                if let Some(path) = &self.image {
                    load(ram.load_file(path))?;
                }
                Box::new(ram)
            }
        })
    }
}

fn image_len(path: &Path) -> Result<Address, ImageError> {
    fs::metadata(path)
        .map(|meta| meta.len())
        .map_err(|source| ImageError::Open {
            path: path.to_path_buf(),
            source,
        })
}

/// Ordered list of regions describing an address space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MemoryMap {
    /// Regions in registration order.
    pub regions: Vec<RegionSpec>,
}

impl MemoryMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Appends a region.
    pub fn push(&mut self, region: RegionSpec) -> &mut Self {
        self.regions.push(region);
        self
    }

    /// Instantiates every region and connects it, in order, to a new bus.
    ///
    /// # Errors
    ///
    /// Returns the first region error encountered; no bus is produced then.
    pub fn build(&self) -> Result<Bus, MapError> {
        let mut bus = Bus::new();
        for (index, region) in self.regions.iter().enumerate() {
            let device = region.instantiate(index)?;
            log::debug!("region {index}: {} at {:#x}", region.kind, region.base);
            bus.connect_boxed(region.base, device);
        }
        Ok(bus)
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal number; `_` separators are
/// ignored.
///
/// # Errors
///
/// Returns [`MapError::InvalidNumber`] when `text` is not a number.
pub fn parse_address(text: &str) -> Result<Address, MapError> {
    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => Address::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| MapError::InvalidNumber {
        text: text.to_string(),
    })
}
