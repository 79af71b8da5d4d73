//! Precomputed constant tables for the rate/distortion engine.
//!
//! Sample-rate/bitrate tables are shine's original lookups. Everything below
//! them is new, ported from LAME's `quantize_pvt.c`/`tables.c` (scalefactor
//! band boundaries, quantizer power tables) and `takehiro.c` (scalefactor
//! length and region-split partition tables) — shine's own `tables.rs` never
//! grew past a placeholder comment for any of this.

use lazy_static::lazy_static;

use crate::types::{SBMAX_L, SBMAX_S};

/// Sample rate table for different MPEG versions
pub const SAMPLE_RATES: [[u32; 3]; 4] = [
    [44100, 48000, 32000], // MPEG-1
    [22050, 24000, 16000], // MPEG-2
    [11025, 12000, 8000],  // MPEG-2.5
    [0, 0, 0],              // Reserved
];

/// Bitrate table for different MPEG versions and layers
pub const BITRATES: [[[u32; 15]; 3]; 4] = [
    // MPEG-1
    [
        [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448], // Layer I
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],    // Layer II
        [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],     // Layer III
    ],
    // MPEG-2
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256], // Layer I
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],      // Layer II
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],      // Layer III
    ],
    // MPEG-2.5 (same as MPEG-2)
    [
        [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256], // Layer I
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],      // Layer II
        [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],      // Layer III
    ],
    // Reserved
    [[0; 15], [0; 15], [0; 15]],
];

/// Scalefactor band boundaries for long and short blocks, one row per
/// (version, sample-rate-index) combination in `sfBandIndex[9]` order:
/// 0-2 MPEG-1 (44.1/48/32 kHz), 3-5 MPEG-2 (22.05/24/16 kHz), 6-8 MPEG-2.5
/// (11.025/12/8 kHz).
pub struct SfBandIndex {
    pub l: [i32; SBMAX_L + 1],
    pub s: [i32; SBMAX_S + 1],
}

pub const SF_BAND_INDEX: [SfBandIndex; 9] = [
    // MPEG-1, 44.1 kHz
    SfBandIndex {
        l: [0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 52, 62, 74, 90, 110, 134, 162, 196, 238, 288, 342, 418, 576],
        s: [0, 4, 8, 12, 16, 22, 30, 40, 52, 66, 84, 106, 136, 192],
    },
    // MPEG-1, 48 kHz
    SfBandIndex {
        l: [0, 4, 8, 12, 16, 20, 24, 30, 36, 42, 50, 60, 72, 88, 106, 128, 156, 190, 230, 276, 330, 384, 576],
        s: [0, 4, 8, 12, 16, 22, 28, 38, 50, 64, 80, 100, 126, 192],
    },
    // MPEG-1, 32 kHz
    SfBandIndex {
        l: [0, 4, 8, 12, 16, 20, 24, 30, 36, 44, 54, 66, 82, 102, 126, 156, 194, 240, 296, 364, 448, 550, 576],
        s: [0, 4, 8, 12, 16, 22, 30, 42, 58, 78, 104, 138, 180, 192],
    },
    // MPEG-2, 22.05 kHz
    SfBandIndex {
        l: [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
        s: [0, 4, 8, 12, 18, 24, 32, 42, 56, 74, 100, 132, 174, 192],
    },
    // MPEG-2, 24 kHz
    SfBandIndex {
        l: [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 114, 136, 162, 194, 232, 278, 332, 394, 464, 540, 576],
        s: [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 136, 180, 192],
    },
    // MPEG-2, 16 kHz
    SfBandIndex {
        l: [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
        s: [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    },
    // MPEG-2.5, 11.025 kHz
    SfBandIndex {
        l: [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
        s: [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    },
    // MPEG-2.5, 12 kHz
    SfBandIndex {
        l: [0, 6, 12, 18, 24, 30, 36, 44, 54, 66, 80, 96, 116, 140, 168, 200, 238, 284, 336, 396, 464, 522, 576],
        s: [0, 4, 8, 12, 18, 26, 36, 48, 62, 80, 104, 134, 174, 192],
    },
    // MPEG-2.5, 8 kHz
    SfBandIndex {
        l: [0, 12, 24, 36, 48, 60, 72, 88, 108, 132, 160, 192, 232, 280, 336, 400, 476, 566, 568, 570, 572, 574, 576],
        s: [0, 8, 16, 24, 36, 52, 72, 96, 124, 160, 162, 164, 166, 192],
    },
];

/// `scalefac_compress` decode table for bands 0-10 (`slen1_tab` in
/// `takehiro.c`): number of bits used per scalefactor.
pub const SLEN1_TAB: [i32; 16] = [0, 0, 0, 0, 3, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4];
/// Companion table for bands 11-20 (`slen2_tab`).
pub const SLEN2_TAB: [i32; 16] = [0, 1, 2, 3, 0, 1, 2, 3, 1, 2, 3, 1, 2, 3, 2, 3];

/// Preemphasis table applied when `preflag` is set (`pretab` in
/// `quantize_pvt.c`); only the long-block region carries preemphasis.
pub const PRETAB: [i32; SBMAX_L] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 3, 3, 3, 2, 0, 0];

/// `nr_of_sfb_block[psymodel_block_type][block_type_class][0..4]`: number of
/// scalefactor bands per `scalefac_compress` partition, from `takehiro.c`.
pub const NR_OF_SFB_BLOCK: [[[i32; 4]; 3]; 6] = [
    [[6, 5, 5, 5], [9, 9, 9, 9], [6, 9, 9, 9]],
    [[6, 5, 7, 3], [9, 9, 12, 6], [6, 9, 12, 6]],
    [[11, 10, 0, 0], [18, 18, 0, 0], [15, 18, 0, 0]],
    [[7, 7, 7, 0], [12, 12, 12, 0], [6, 15, 12, 0]],
    [[6, 6, 6, 3], [12, 9, 9, 6], [6, 12, 9, 6]],
    [[8, 8, 5, 0], [15, 12, 9, 0], [6, 18, 9, 0]],
];

/// Bounds `best_huffman_divide`'s search for the region0/region1 boundary
/// around `big_values` (`subdv_table` in `takehiro.c`).
pub const SUBDV_TABLE: [[i32; 2]; 23] = [
    [0, 0], [0, 0], [0, 0], [0, 0], [0, 0], [0, 1], [1, 1], [1, 1], [1, 2], [2, 2], [2, 3], [2, 3],
    [3, 4], [3, 4], [3, 4], [4, 5], [4, 5], [4, 6], [5, 6], [5, 6], [5, 7], [6, 7], [6, 7],
];

/// `linbits[32]`: extra bits for the escaped (ESC) Huffman tables, from
/// ISO/IEC 11172-3 Table B.7. Entries 4 and 14 are reserved/unused.
pub const LINBITS: [i32; 32] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 6, 8, 10, 13, 4, 5, 6, 7, 8, 9, 11, 13,
];

lazy_static! {
    /// `pow(i, 4.0/3.0)` for the quantizer's inverse-power lookup
    /// (`pow43` in `quantize_pvt.c`'s `iteration_init`).
    pub static ref POW43: Vec<f64> = {
        const PRECALC_SIZE: usize = 8207;
        let mut t = vec![0.0f64; PRECALC_SIZE];
        for (i, slot) in t.iter_mut().enumerate() {
            *slot = (i as f64).powf(4.0 / 3.0);
        }
        t
    };

    /// `2^(-0.25 * (i - 210))`: per-quarter-step gain table used when
    /// rebuilding `xrpow` after a `global_gain` change (`ipow20`).
    pub static ref IPOW20: Vec<f64> = {
        const Q_MAX: usize = 8 * 4 + 210 + 1;
        (0..Q_MAX).map(|i| 2f64.powf(-0.25 * (i as f64 - 210.0))).collect()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sf_band_index_is_monotonic_and_spans_granule() {
        for row in SF_BAND_INDEX.iter() {
            assert_eq!(row.l[0], 0);
            assert_eq!(row.l[SBMAX_L], 576);
            assert_eq!(row.s[0], 0);
            assert_eq!(row.s[SBMAX_S], 192);
            for w in row.l.windows(2) {
                assert!(w[0] <= w[1]);
            }
            for w in row.s.windows(2) {
                assert!(w[0] <= w[1]);
            }
        }
    }

    #[test]
    fn pow43_matches_direct_computation() {
        assert!((POW43[8] - 8f64.powf(4.0 / 3.0)).abs() < 1e-9);
        assert_eq!(POW43[0], 0.0);
    }

    #[test]
    fn linbits_reserved_entries_are_zero() {
        assert_eq!(LINBITS[4], 0);
        assert_eq!(LINBITS[14], 0);
        assert_eq!(LINBITS[31], 13);
    }
}
