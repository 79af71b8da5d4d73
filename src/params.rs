//! Encoder parameter negotiation: MPEG version/bitrate/samplerate selection
//! and the quality-level feature table.
//!
//! The quality ladder is a direct port of LAME's `lame_init_qval`
//! (`lame.c`): quality 0 (best/slowest) through 9 (worst/fastest) each pick
//! a fixed bundle of algorithmic switches. Shine has no notion of a quality
//! dial at all — its single fixed pipeline is equivalent to roughly quality
//! 5 below — so this module is new rather than adapted.

use crate::error::{ConfigError, ConfigResult};
use crate::tables::{BITRATES, SAMPLE_RATES};

pub const MPEG_I: i32 = 3;
pub const MPEG_II: i32 = 2;
pub const MPEG_25: i32 = 0;
pub const LAYER_III: i32 = 1;

pub const GRANULES_PER_FRAME: [i32; 4] = [1, 1, 2, 2];

/// Feature bundle selected by encoder quality, mirroring `lame_init_qval`'s
/// switch over `gfp->quality`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualitySettings {
    pub quality: i32,
    /// Whether the outer loop performs the full noise-shaping search
    /// (`best_huffman_divide` exhaustive region search) or a fast
    /// approximation.
    pub full_outer_loop: bool,
    /// Number of `global_gain` increments per outer loop step; higher
    /// quality steps by 1, lower quality skips ahead.
    pub gain_step: i32,
    pub use_best_huffman: bool,
    pub noise_shaping_amp: i32,
}

/// Port of `lame_init_qval`'s quality-to-feature-bundle table.
pub fn quality_settings(quality: i32) -> QualitySettings {
    let quality = quality.clamp(0, 9);
    match quality {
        0 | 1 => QualitySettings { quality, full_outer_loop: true, gain_step: 1, use_best_huffman: true, noise_shaping_amp: 2 },
        2..=4 => QualitySettings { quality, full_outer_loop: true, gain_step: 1, use_best_huffman: true, noise_shaping_amp: 1 },
        5..=6 => QualitySettings { quality, full_outer_loop: false, gain_step: 1, use_best_huffman: true, noise_shaping_amp: 0 },
        _ => QualitySettings { quality, full_outer_loop: false, gain_step: 2, use_best_huffman: false, noise_shaping_amp: 0 },
    }
}

pub fn mpeg_version(sample_rate: u32) -> i32 {
    if sample_rate >= 32000 {
        MPEG_I
    } else if sample_rate >= 16000 {
        MPEG_II
    } else {
        MPEG_25
    }
}

pub fn find_samplerate_index(sample_rate: u32) -> ConfigResult<usize> {
    for row in SAMPLE_RATES.iter() {
        if let Some(idx) = row.iter().position(|&r| r == sample_rate) {
            return Ok(idx);
        }
    }
    Err(ConfigError::UnsupportedSampleRate(sample_rate))
}

pub fn find_bitrate_index(bitrate: u32, version: i32) -> ConfigResult<usize> {
    let row = if version == MPEG_I { 0 } else { 1 };
    BITRATES[row][LAYER_III as usize]
        .iter()
        .position(|&b| b == bitrate)
        .ok_or(ConfigError::UnsupportedBitrate(bitrate))
}

/// `sfBandIndex`/`slen` table row selector: MPEG-1 uses rows 0-2, MPEG-2
/// rows 3-5, MPEG-2.5 rows 6-8, ordered by `find_samplerate_index`.
pub fn sf_band_index_row(version: i32, samplerate_index: usize) -> usize {
    let base = match version {
        MPEG_I => 0,
        MPEG_II => 3,
        _ => 6,
    };
    base + samplerate_index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_table_is_monotonic_in_strictness() {
        let best = quality_settings(0);
        let worst = quality_settings(9);
        assert!(best.full_outer_loop && !worst.full_outer_loop);
        assert!(best.gain_step <= worst.gain_step);
    }

    #[test]
    fn mpeg_version_buckets_by_sample_rate() {
        assert_eq!(mpeg_version(44100), MPEG_I);
        assert_eq!(mpeg_version(22050), MPEG_II);
        assert_eq!(mpeg_version(8000), MPEG_25);
    }

    #[test]
    fn bitrate_lookup_rejects_unknown_value() {
        assert!(find_bitrate_index(333, MPEG_I).is_err());
        assert!(find_bitrate_index(128, MPEG_I).is_ok());
    }
}
