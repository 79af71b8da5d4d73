//! Bit reservoir and frame-level rate control.
//!
//! Mirrors LAME's `ResvMaxBits`/`ResvAdjust`/`ResvFrameEnd` (`reservoir.c`)
//! and the perceptual-entropy driven bit split of `on_pe`/`reduce_side`
//! (`quantize_pvt.c`), adapted from shine's simpler reservoir (which only
//! tracked `reservoir_size` and never modeled `main_data_begin` or PE-driven
//! allocation at all).

use crate::types::{ShineSideInfo, MAX_CHANNELS, MAX_GRANULES};

/// Tracks how many bits of future frames the encoder has already borrowed,
/// and the running byte offset (`main_data_begin`) the bitstream writer must
/// stamp into each frame's side info so a decoder can locate its main data.
#[derive(Debug)]
pub struct BitReservoir {
    pub reservoir_size: i32,
    pub reservoir_max: i32,
    pub mean_bits: i32,
    /// Running count of bytes written to the main-data stream that have not
    /// yet been "claimed" by a frame header; becomes the next frame's
    /// `main_data_begin`.
    main_data_bytes: i32,
}

impl BitReservoir {
    /// `reservoir_max` follows LAME's 11-bit (MPEG-1) / 8-bit (MPEG-2/2.5)
    /// `main_data_begin` field widths: 4088 bits (511 bytes) when
    /// `sample_rate >= 32000` (MPEG-1), else 2040 bits (255 bytes).
    pub fn new(bitrate: u32, sample_rate: u32, _channels: u8) -> Self {
        let samples_per_frame = if sample_rate >= 32000 { 1152 } else { 576 };
        let mean_bits = (bitrate * 1000 * samples_per_frame) / sample_rate;
        let reservoir_max = if sample_rate >= 32000 { 4088 } else { 2040 };

        Self {
            reservoir_size: 0,
            reservoir_max,
            mean_bits: mean_bits as i32,
            main_data_bytes: 0,
        }
    }

    /// Port of `ResvMaxBits`: the bit budget available to the current
    /// granule, blending the nominal per-granule mean with a PE-driven
    /// top-up and an overflow correction when the reservoir is unusually full.
    pub fn max_reservoir_bits(&self, perceptual_entropy: f64, channels: u8) -> i32 {
        let mean_bits = self.mean_bits / channels as i32;
        let mut max_bits = mean_bits.min(4095);

        if self.reservoir_max == 0 {
            return max_bits;
        }

        let more_bits = (perceptual_entropy * 3.1) as i32 - mean_bits;
        let mut add_bits = 0;

        if more_bits > 100 {
            let frac = (self.reservoir_size * 6) / 10;
            add_bits = frac.min(more_bits);
        }

        let over_bits = self.reservoir_size - ((self.reservoir_max << 3) / 10) - add_bits;
        if over_bits > 0 {
            add_bits += over_bits;
        }

        max_bits = (max_bits + add_bits).min(4095);
        max_bits
    }

    /// Port of `ResvAdjust`.
    pub fn adjust_reservoir(&mut self, bits_used: i32, channels: u8) {
        self.reservoir_size += (self.mean_bits / channels as i32) - bits_used;
    }

    /// Port of `ResvFrameEnd`: pads the reservoir to a byte boundary and
    /// distributes any resulting stuffing bits into granule `part2_3_length`
    /// fields (Plan A: all into granule 0; Plan B: spread across granules
    /// when a single granule can't absorb it without exceeding the 12-bit
    /// `part2_3_length` field).
    pub fn frame_end(&mut self, side_info: &mut ShineSideInfo, channels: u8) -> i32 {
        let ancillary_pad = 0;

        if channels == 2 && (self.mean_bits & 1) != 0 {
            self.reservoir_size += 1;
        }

        let mut over_bits = self.reservoir_size - self.reservoir_max;
        if over_bits < 0 {
            over_bits = 0;
        }
        self.reservoir_size -= over_bits;

        let mut stuffing_bits = over_bits + ancillary_pad;

        let alignment_bits = self.reservoir_size % 8;
        if alignment_bits != 0 {
            stuffing_bits += alignment_bits;
            self.reservoir_size -= alignment_bits;
        }

        if stuffing_bits > 0 {
            let first = &mut side_info.gr[0].ch[0].tt;
            if first.part2_3_length + stuffing_bits < 4095 {
                first.part2_3_length += stuffing_bits;
                stuffing_bits = 0;
            } else {
                'outer: for gr in &mut side_info.gr {
                    for ch in &mut gr.ch {
                        if stuffing_bits == 0 {
                            break 'outer;
                        }
                        let extra_bits = 4095 - ch.tt.part2_3_length;
                        let bits_this_gr = extra_bits.min(stuffing_bits);
                        ch.tt.part2_3_length += bits_this_gr;
                        stuffing_bits -= bits_this_gr;
                    }
                }
            }
        }

        self.main_data_bytes += (self.mean_bits / 8) - (stuffing_bits / 8).max(0);
        side_info.main_data_begin = self.main_data_bytes.clamp(0, self.reservoir_max / 8);

        stuffing_bits
    }

    pub fn main_data_begin(&self) -> i32 {
        self.main_data_bytes.clamp(0, self.reservoir_max / 8)
    }
}

/// Port of LAME's `on_pe`: spend the reservoir against each granule's
/// perceptual entropy to get a target `part2_3_length` bit budget, floor
/// short blocks to at least `mean_bits`, and return `ResvMaxBits`' leftover
/// so the caller can reduce the budget asymmetrically across stereo channels
/// (see `reduce_side`).
pub fn on_pe(
    reservoir: &BitReservoir,
    pe: &[[f64; MAX_GRANULES]; MAX_CHANNELS],
    targ_bits: &mut [[i32; MAX_GRANULES]; MAX_CHANNELS],
    mean_bits_per_frame: i32,
    channels: usize,
    short_block: &[[bool; MAX_GRANULES]; MAX_CHANNELS],
) -> i32 {
    let mut extra_bits = 0;
    let mean_bits_per_gr = mean_bits_per_frame / (channels as i32 * MAX_GRANULES as i32);

    for gr in 0..MAX_GRANULES {
        for ch in 0..channels {
            let mut tbits = reservoir.max_reservoir_bits(pe[ch][gr], channels as u8);
            if short_block[ch][gr] && tbits < mean_bits_per_gr {
                tbits = mean_bits_per_gr;
            }
            targ_bits[ch][gr] = tbits;
            extra_bits += tbits - mean_bits_per_gr;
        }
    }

    extra_bits
}

/// Side channel's minimum transmittable `part2_3_length`: below this, a side
/// granule can no longer carry even a degenerate scalefactor/Huffman body,
/// so `reduce_side` never steals past it (LAME's `reduce_side` floor).
const MIN_SIDE_BITS: i32 = 125;

/// Port of LAME's `reduce_side`: when the encoder runs low on bits, steal
/// part of the side (right) channel's budget and hand it to mid, since
/// perceptually side-channel detail is cheaper to degrade. Never takes the
/// side channel below [`MIN_SIDE_BITS`].
pub fn reduce_side(targ_bits: &mut [i32; 2], ms_ener_ratio: f64, mean_bits: i32, max_bits: i32) {
    let mut fac = 0.33 * (0.5 - ms_ener_ratio) / 0.5;
    if fac < 0.0 {
        fac = 0.0;
    }
    if fac > 0.5 {
        fac = 0.5;
    }

    let move_bits = ((targ_bits[0] + targ_bits[1]) as f64 * fac * 0.5) as i32;
    let mut move_bits = move_bits.min(mean_bits / 4).max(0);
    move_bits = move_bits.min((targ_bits[1] - MIN_SIDE_BITS).max(0));

    targ_bits[1] -= move_bits;
    targ_bits[0] += move_bits;

    if targ_bits[0] > max_bits {
        targ_bits[1] += targ_bits[0] - max_bits;
        targ_bits[0] = max_bits;
    }
    if targ_bits[1] > max_bits {
        targ_bits[0] += targ_bits[1] - max_bits;
        targ_bits[1] = max_bits;
    }
    if targ_bits[1] < MIN_SIDE_BITS && targ_bits[0] >= MIN_SIDE_BITS {
        let shortfall = MIN_SIDE_BITS - targ_bits[1];
        targ_bits[1] += shortfall;
        targ_bits[0] -= shortfall;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 100,
            verbose: 0,
            max_shrink_iters: 0,
            failure_persistence: None,
            ..ProptestConfig::default()
        })]

        #[test]
        fn reservoir_initialization(
            bitrate in 32u32..=320,
            sample_rate in prop::sample::select(&[44100u32, 48000, 32000, 22050, 24000, 16000]),
            channels in 1u8..=2,
        ) {
            let reservoir = BitReservoir::new(bitrate, sample_rate, channels);

            prop_assert!(reservoir.mean_bits > 0);
            prop_assert!(reservoir.reservoir_max > 0);
            prop_assert_eq!(reservoir.reservoir_size, 0);

            if sample_rate >= 32000 {
                prop_assert_eq!(reservoir.reservoir_max, 4088);
            } else {
                prop_assert_eq!(reservoir.reservoir_max, 2040);
            }
        }

        #[test]
        fn max_reservoir_bits_bounds(
            bitrate in 32u32..=320,
            sample_rate in prop::sample::select(&[44100u32, 48000, 32000, 22050, 24000, 16000]),
            channels in 1u8..=2,
            pe in 0.0f64..=1000.0,
        ) {
            let reservoir = BitReservoir::new(bitrate, sample_rate, channels);
            let max_bits = reservoir.max_reservoir_bits(pe, channels);

            prop_assert!(max_bits > 0);
            prop_assert!(max_bits <= 4095);
        }

        #[test]
        fn reservoir_adjustment_matches_formula(
            bitrate in 32u32..=320,
            sample_rate in prop::sample::select(&[44100u32, 48000, 32000, 22050, 24000, 16000]),
            channels in 1u8..=2,
            bits_used in 0i32..=4095,
        ) {
            let mut reservoir = BitReservoir::new(bitrate, sample_rate, channels);
            let initial_size = reservoir.reservoir_size;

            reservoir.adjust_reservoir(bits_used, channels);

            let expected_change = (reservoir.mean_bits / channels as i32) - bits_used;
            prop_assert_eq!(reservoir.reservoir_size, initial_size + expected_change);
        }
    }

    #[test]
    fn main_data_begin_never_exceeds_reservoir_capacity() {
        let mut reservoir = BitReservoir::new(320, 44100, 2);
        let mut side_info = ShineSideInfo::default();
        for gr in &mut side_info.gr {
            gr.ch[0].tt.part2_3_length = 900;
            gr.ch[1].tt.part2_3_length = 900;
        }
        for _ in 0..50 {
            reservoir.frame_end(&mut side_info, 2);
            assert!(side_info.main_data_begin * 8 <= reservoir.reservoir_max);
        }
    }

    #[test]
    fn reduce_side_never_exceeds_max_bits() {
        let mut targ = [3000, 3000];
        reduce_side(&mut targ, 0.1, 2000, 4095);
        assert!(targ[0] <= 4095 && targ[1] <= 4095);
        assert_eq!(targ[0] + targ[1], 6000);
    }

    #[test]
    fn reduce_side_never_takes_side_below_floor() {
        let mut targ = [200, 200];
        reduce_side(&mut targ, 0.0, 2000, 4095);
        assert!(targ[1] >= MIN_SIDE_BITS);
    }
}
