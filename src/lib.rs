//! # MP3 Rate/Distortion Engine
//!
//! The inner rate-control loop of an MPEG-1/2/2.5 Layer III encoder:
//! psychoacoustic distortion targets ([`quantization::calc_xmin`]),
//! nonlinear quantization under a global gain
//! ([`quantization::quantize_xrpow`]), Huffman table selection and bit
//! counting ([`huffman`]), and the bit-reservoir-driven outer loop that ties
//! them together ([`reservoir`], [`engine`]).
//!
//! The polyphase filter bank/MDCT front end, the FFT-based psychoacoustic
//! analyzer, and the byte-level frame formatter's header/tag fields are
//! treated as external inputs: callers hand this crate MDCT coefficients and
//! psychoacoustic masking ratios already computed, and [`bitstream`] only
//! serializes the side info and Huffman-coded body this crate itself
//! produces.

pub mod bitstream;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod huffman;
pub mod params;
pub mod quantization;
pub mod reservoir;
pub mod tables;
pub mod types;
