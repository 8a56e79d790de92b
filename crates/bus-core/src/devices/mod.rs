//! Leaf devices that plug into a [`Bus`](crate::Bus).

/// Byte-buffer backed ROM and RAM with image loading.
pub mod memory;

pub use memory::{ImageError, Ram, Rom};
