//! Core data model for the Layer III rate/distortion engine.
//!
//! These types replace shine's raw fixed-point `gr_info`/`l3loop_t` pair with
//! the richer per-granule record the quantizer, noise calculator and
//! reservoir need to share: floating-point spectral lines, a scalefactor
//! array that can represent "this band was never coded", and the side-info
//! fields the bit packer ultimately serializes.

use crate::bitstream::BitstreamWriter;

pub const GRANULE_SIZE: usize = 576;
pub const MAX_CHANNELS: usize = 2;
pub const MAX_GRANULES: usize = 2;

/// Long-block scalefactor bands, indices 0..=21 (sfb 21 is the "dummy" band
/// used for the `pretab`/preemphasis tail, per ISO/IEC 11172-3 Table B.8).
pub const SBMAX_L: usize = 22;
/// Short-block scalefactor bands per window, indices 0..=12.
pub const SBMAX_S: usize = 13;
/// Size of the flattened scalefactor/width arrays a granule carries: long
/// blocks use the first `SBMAX_L` slots, short/mixed blocks unroll the three
/// windows so `SBMAX_S * 3` slots are needed instead.
pub const SFBMAX: usize = SBMAX_S * 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivShineWave {
    pub channels: i32,
    pub samplerate: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrivShineMpeg {
    pub version: i32,
    pub layer: i32,
    pub granules_per_frame: i32,
    pub mode: i32,
    pub bitr: i32,
    pub emph: i32,
    pub padding: i32,
    pub bits_per_frame: i32,
    pub bits_per_slot: i32,
    pub frac_slots_per_frame: f64,
    pub slot_lag: f64,
    pub whole_slots_per_frame: i32,
    pub bitrate_index: i32,
    pub samplerate_index: i32,
    pub crc: i32,
    pub ext: i32,
    pub mode_ext: i32,
    pub copyright: i32,
    pub original: i32,
}

/// Block shape for a granule/channel, per ISO/IEC 11172-3 window_switching_flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Long,
    Start,
    Short,
    Stop,
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::Long
    }
}

/// A coded (or not-yet-coded) scalefactor.
///
/// LAME represents "this band carries no energy and was skipped" with the
/// sentinel value `-2` stuffed into an otherwise-numeric array; that overload
/// is load-bearing (SCFSI comparison, `best_scalefac_store` zero-band
/// collapse) so we give it its own variant instead of smuggling it through
/// an `i16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleFac {
    /// A transmitted scalefactor value.
    Value(i16),
    /// Band beyond `max_nonzero_coeff`: carries no energy, not transmitted.
    ZeroBand,
    /// Long-block value reused from granule 0 via SCFSI; carries no bits in
    /// granule 1's part2 but must still report granule 0's value for noise
    /// accounting.
    Reused(i16),
}

impl ScaleFac {
    pub fn value(self) -> i16 {
        match self {
            ScaleFac::Value(v) | ScaleFac::Reused(v) => v,
            ScaleFac::ZeroBand => 0,
        }
    }

    pub fn is_zero_band(self) -> bool {
        matches!(self, ScaleFac::ZeroBand)
    }
}

impl Default for ScaleFac {
    fn default() -> Self {
        ScaleFac::Value(0)
    }
}

/// Per-granule, per-channel rate/distortion state: the spectral line buffer,
/// the working quantized-magnitude buffer, and every side-info field the
/// outer loop and bit packer need. Corresponds to LAME's `gr_info` widened
/// with the floating-point scratch fields `III_psy_xmin`/`calc_noise` share.
#[derive(Debug, Clone)]
pub struct GrInfo {
    /// MDCT coefficients for this granule/channel, supplied by the (out of
    /// scope) filter bank.
    pub xr: [f64; GRANULE_SIZE],
    /// `|xr|^(3/4)`, rebuilt by the quantizer whenever `global_gain` changes.
    pub xrpow: [f64; GRANULE_SIZE],
    pub xrpow_max: f64,
    /// Quantized integer magnitudes (pre-Huffman, sign folded back in by the
    /// bit packer).
    pub l3_enc: [i32; GRANULE_SIZE],
    pub scalefac: [ScaleFac; SFBMAX],
    /// Width, in spectral lines, of each entry in `scalefac`/`width`.
    pub width: [i32; SFBMAX],
    /// Lower bound index into `xr`/`l3_enc` of each scalefactor band.
    pub window: [i32; SFBMAX],
    pub count1: i32,
    pub big_values: i32,
    pub global_gain: i32,
    pub scalefac_compress: i32,
    pub table_select: [i32; 3],
    pub region0_count: i32,
    pub region1_count: i32,
    pub preflag: i32,
    pub scalefac_scale: i32,
    pub count1table_select: i32,
    pub part2_length: i32,
    pub part2_3_length: i32,
    /// Highest coded long-block scalefactor band (mixed blocks: the split
    /// point between the long and short region).
    pub sfb_lmax: i32,
    /// Number of scalefactor bands actually holding distortion targets.
    pub sfbmax: i32,
    /// Number of bands the psychoacoustic front end supplied ratios for.
    pub psymax: i32,
    pub max_nonzero_coeff: i32,
    pub block_type: BlockType,
    pub mixed_block_flag: bool,
    pub subblock_gain: [i32; 3],
}

impl Default for GrInfo {
    fn default() -> Self {
        Self {
            xr: [0.0; GRANULE_SIZE],
            xrpow: [0.0; GRANULE_SIZE],
            xrpow_max: 0.0,
            l3_enc: [0; GRANULE_SIZE],
            scalefac: [ScaleFac::default(); SFBMAX],
            width: [0; SFBMAX],
            window: [0; SFBMAX],
            count1: 0,
            big_values: 0,
            global_gain: 210,
            scalefac_compress: 0,
            table_select: [0, 0, 0],
            region0_count: 0,
            region1_count: 0,
            preflag: 0,
            scalefac_scale: 0,
            count1table_select: 0,
            part2_length: 0,
            part2_3_length: 0,
            sfb_lmax: (SBMAX_L - 1) as i32,
            sfbmax: (SBMAX_L - 1) as i32,
            psymax: (SBMAX_L - 1) as i32,
            max_nonzero_coeff: GRANULE_SIZE as i32 - 1,
            block_type: BlockType::Long,
            mixed_block_flag: false,
            subblock_gain: [0; 3],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GranuleChannel {
    pub tt: GrInfo,
}

#[derive(Debug, Clone, Default)]
pub struct Granule {
    pub ch: [GranuleChannel; MAX_CHANNELS],
}

#[derive(Debug, Clone)]
pub struct ShineSideInfo {
    pub private_bits: u32,
    pub resv_drain: i32,
    pub main_data_begin: i32,
    pub scfsi: [[i32; 4]; MAX_CHANNELS],
    pub gr: [Granule; MAX_GRANULES],
}

impl Default for ShineSideInfo {
    fn default() -> Self {
        Self {
            private_bits: 0,
            resv_drain: 0,
            main_data_begin: 0,
            scfsi: [[0; 4]; MAX_CHANNELS],
            gr: [Granule::default(), Granule::default()],
        }
    }
}

/// Masking ratios handed in by the (out of scope) psychoacoustic model, one
/// per long-block scalefactor band plus the three-window short-block layout.
#[derive(Debug, Clone)]
pub struct ShinePsyRatio {
    pub l: [[[f64; SBMAX_L]; MAX_CHANNELS]; MAX_GRANULES],
    pub s: [[[[f64; 3]; SBMAX_S]; MAX_CHANNELS]; MAX_GRANULES],
}

impl Default for ShinePsyRatio {
    fn default() -> Self {
        Self {
            l: [[[0.0; SBMAX_L]; MAX_CHANNELS]; MAX_GRANULES],
            s: [[[[0.0; 3]; SBMAX_S]; MAX_CHANNELS]; MAX_GRANULES],
        }
    }
}

/// Per-band allowed distortion, derived from `ShinePsyRatio` and the ATH
/// floor by `calc_xmin`.
#[derive(Debug, Clone, Default)]
pub struct PsyXmin {
    pub l: [f64; SBMAX_L],
    pub s: [[f64; 3]; SBMAX_S],
}

/// Top-level mutable encoder state threaded through a frame's encoding:
/// MPEG/stream parameters, the bit writer, side info, and the per-granule
/// rate/distortion working set (`gr_info`, `xmin`, `pe`).
#[derive(Debug)]
pub struct ShineGlobalConfig {
    pub wave: PrivShineWave,
    pub mpeg: PrivShineMpeg,
    pub bs: BitstreamWriter,
    pub side_info: ShineSideInfo,
    pub ratio: ShinePsyRatio,
}

impl ShineGlobalConfig {
    pub fn new() -> Self {
        Self {
            wave: PrivShineWave {
                channels: 2,
                samplerate: 44100,
            },
            mpeg: PrivShineMpeg {
                version: 1,
                layer: 1,
                granules_per_frame: 2,
                mode: 1,
                bitr: 128,
                emph: 0,
                padding: 0,
                bits_per_frame: 0,
                bits_per_slot: 8,
                frac_slots_per_frame: 0.0,
                slot_lag: 0.0,
                whole_slots_per_frame: 0,
                bitrate_index: 9,
                samplerate_index: 0,
                crc: 0,
                ext: 0,
                mode_ext: 0,
                copyright: 0,
                original: 1,
            },
            bs: BitstreamWriter::default(),
            side_info: ShineSideInfo::default(),
            ratio: ShinePsyRatio::default(),
        }
    }
}

impl Default for ShineGlobalConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_match_layer_iii_geometry() {
        assert_eq!(GRANULE_SIZE, 576);
        assert_eq!(MAX_CHANNELS, 2);
        assert_eq!(MAX_GRANULES, 2);
        assert_eq!(SBMAX_L, 22);
        assert_eq!(SBMAX_S, 13);
        assert_eq!(SFBMAX, 39);
    }

    #[test]
    fn scalefac_sentinel_reports_zero_value() {
        assert_eq!(ScaleFac::ZeroBand.value(), 0);
        assert!(ScaleFac::ZeroBand.is_zero_band());
        assert!(!ScaleFac::Value(7).is_zero_band());
    }

    #[test]
    fn gr_info_default_matches_empty_granule() {
        let gi = GrInfo::default();
        assert_eq!(gi.global_gain, 210);
        assert_eq!(gi.sfb_lmax, 21);
        assert_eq!(gi.max_nonzero_coeff, GRANULE_SIZE as i32 - 1);
    }
}
