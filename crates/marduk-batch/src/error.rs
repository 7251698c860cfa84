//! Recoverable errors.
//!
//! Contract violations (unbalanced frames, format mismatches, incomplete
//! render targets) panic instead; only conditions a caller can react to at
//! runtime are represented here.

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
    #[error("texture {width}x{height} exceeds maximum texture size {max}")]
    TextureTooLarge { width: u32, height: u32, max: u32 },

    #[error("texture data is {actual} bytes, expected {expected} for {width}x{height} RGBA8")]
    TextureDataSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, BatchError>;
