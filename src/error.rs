//! Error types for the MP3 encoder
//!
//! This module defines all error types used throughout the encoder,
//! providing detailed error information for different failure scenarios.

use thiserror::Error;

/// Top-level error type returned by [`crate::engine::FrameEncoder`]'s
/// fallible entry points.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Encoding process errors
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Unsupported sample rate
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    /// Unsupported bitrate
    #[error("Unsupported bitrate: {0} kbps")]
    UnsupportedBitrate(u32),

    /// Invalid channel configuration
    #[error("Invalid channel configuration: {0} (must be 1 or 2)")]
    InvalidChannels(u8),
}

/// Encoding process errors
#[derive(Debug, Error)]
pub enum EncodingError {
    /// Quantization loop failed to converge
    #[error("Quantization loop failed to converge within maximum iterations")]
    QuantizationFailed,

    /// Huffman encoding error
    #[error("Huffman encoding error: {0}")]
    HuffmanError(String),

    /// Bitstream writing error
    #[error("Bitstream writing error: {0}")]
    BitstreamError(String),
}

/// Specialized result types for different modules
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type EncodingResult<T> = std::result::Result<T, EncodingError>;
pub type EncoderResult<T> = std::result::Result<T, EncoderError>;
