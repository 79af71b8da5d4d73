//! Per-frame driver: wires the psychoacoustic distortion targets, the
//! quantization outer loop, scalefactor sharing, bit-reservoir accounting and
//! the bitstream writer into one `encode_frame` call.
//!
//! Ported from the granule loop in LAME's `lame_encode_mp3_frame`
//! (`lame.c`): compute `xmin` for every granule/channel, split the frame's
//! bit budget with `on_pe`/`reduce_side`, run `outer_loop` per
//! granule/channel, collapse scalefactors with `best_scalefac_store`, then
//! hand the finished granules to the bit packer. Shine's own `encoder.rs`
//! drove an analogous loop over its fixed-point `L3Loop`/`mdct`/`subband`
//! pipeline; this module replaces that loop's body while keeping its overall
//! shape (PE accounting, then quantize, then bitstream) since the front end
//! it orchestrated is out of scope here.

use log::debug;

use crate::bitstream::format_bitstream;
use crate::error::{ConfigError, EncoderResult};
use crate::params::{find_bitrate_index, find_samplerate_index, mpeg_version, quality_settings, sf_band_index_row, QualitySettings, MPEG_I};
use crate::quantization::{best_scalefac_store, calc_xmin, outer_loop, validate_granule};
use crate::reservoir::{on_pe, reduce_side, BitReservoir};
use crate::types::{PsyXmin, ShineGlobalConfig, MAX_CHANNELS, MAX_GRANULES, SBMAX_L};

/// Owns the bit reservoir across frames and the scratch config a single
/// frame's encode works through. Callers populate `config.side_info.gr[..]
/// .ch[..].tt.xr`, `config.ratio` and `config.mpeg`/`config.wave` before
/// calling [`FrameEncoder::encode_frame`].
pub struct FrameEncoder {
    pub config: ShineGlobalConfig,
    reservoir: BitReservoir,
    quality: QualitySettings,
    /// Previous granule's settled `global_gain` per channel/granule slot,
    /// seeding the next `outer_loop` call instead of always restarting from
    /// a fixed value (LAME's cross-granule `OldValue` gain continuity).
    prev_gain: [[i32; MAX_GRANULES]; MAX_CHANNELS],
}

impl FrameEncoder {
    /// `quality` follows LAME's 0 (best/slowest) .. 9 (worst/fastest) scale
    /// (see [`crate::params::quality_settings`]); out-of-range values clamp.
    pub fn new(sample_rate: u32, bitrate: u32, channels: u8, quality: i32) -> EncoderResult<Self> {
        if !(1..=2).contains(&channels) {
            return Err(ConfigError::InvalidChannels(channels).into());
        }

        let version = mpeg_version(sample_rate);
        let samplerate_index = find_samplerate_index(sample_rate)?;
        let bitrate_index = find_bitrate_index(bitrate, version)?;

        let mut config = ShineGlobalConfig::new();
        config.wave.samplerate = sample_rate as i32;
        config.wave.channels = channels as i32;
        config.mpeg.version = version;
        config.mpeg.granules_per_frame = if version == MPEG_I { 2 } else { 1 };
        config.mpeg.samplerate_index = samplerate_index as i32;
        config.mpeg.bitrate_index = bitrate_index as i32;
        config.mpeg.mode = if channels == 2 { 1 } else { 3 };

        Ok(Self {
            config,
            reservoir: BitReservoir::new(bitrate, sample_rate, channels),
            quality: quality_settings(quality),
            prev_gain: [[210; MAX_GRANULES]; MAX_CHANNELS],
        })
    }

    /// Encodes one frame's worth of granules already staged in
    /// `self.config.side_info` and `self.config.ratio`, returning the packed
    /// frame bytes (side info plus Huffman-coded main data; no ID3/Xing
    /// header and no byte-aligned outer frame sync beyond what
    /// [`crate::bitstream::encode_side_info`] already writes).
    pub fn encode_frame(&mut self) -> EncoderResult<Vec<u8>> {
        let channels = self.config.wave.channels as usize;
        let granules = self.config.mpeg.granules_per_frame as usize;
        let mpeg1 = self.config.mpeg.version == MPEG_I;
        let sfb_row = sf_band_index_row(self.config.mpeg.version, self.config.mpeg.samplerate_index as usize);

        let mut xmin = vec![vec![PsyXmin::default(); granules]; channels];
        for ch in 0..channels {
            for gr in 0..granules {
                let ratio_l: [f64; SBMAX_L] = self.config.ratio.l[gr][ch];
                xmin[ch][gr] = calc_xmin(&ratio_l, self.config.wave.samplerate as u32, sfb_row);
            }
        }

        let mut pe = [[0.0f64; MAX_GRANULES]; MAX_CHANNELS];
        let mut short_block = [[false; MAX_GRANULES]; MAX_CHANNELS];
        for ch in 0..channels {
            for gr in 0..granules {
                let gi = &self.config.side_info.gr[gr].ch[ch].tt;
                pe[ch][gr] = gi.xr.iter().map(|v| v.abs()).sum::<f64>().max(1.0).ln() * 100.0;
                short_block[ch][gr] = gi.block_type == crate::types::BlockType::Short;
            }
        }

        let mut targ_bits = [[0i32; MAX_GRANULES]; MAX_CHANNELS];
        let mean_bits_per_frame = self.reservoir.mean_bits;
        on_pe(&self.reservoir, &pe, &mut targ_bits, mean_bits_per_frame, channels, &short_block);

        if channels == 2 {
            for gr in 0..granules {
                let mut pair = [targ_bits[0][gr], targ_bits[1][gr]];
                reduce_side(&mut pair, 0.5, mean_bits_per_frame / MAX_GRANULES as i32, 4095);
                targ_bits[0][gr] = pair[0];
                targ_bits[1][gr] = pair[1];
            }
        }

        #[cfg(feature = "diagnostics")]
        let mut granule_diagnostics = Vec::new();

        for gr in 0..granules {
            for ch in 0..channels {
                let gi = &mut self.config.side_info.gr[gr].ch[ch].tt;
                let seed_gain = self.prev_gain[ch][gr];
                let report = outer_loop(gi, &xmin[ch][gr], targ_bits[ch][gr], sfb_row, self.quality, seed_gain, mpeg1);
                self.prev_gain[ch][gr] = gi.global_gain;
                validate_granule(gi)?;
                debug!(
                    "gr={gr} ch={ch} part2_3_length={} global_gain={} over_count={}",
                    gi.part2_3_length, gi.global_gain, report.over_count
                );
                #[cfg(feature = "diagnostics")]
                granule_diagnostics.push(crate::diagnostics::GranuleDiagnostics {
                    channel: ch,
                    granule: gr,
                    global_gain: gi.global_gain,
                    part2_3_length: gi.part2_3_length,
                    over_count: report.over_count,
                });
            }

            if mpeg1 && channels == 2 && gr == 1 {
                let (gr0, gr1) = self.config.side_info.gr.split_at_mut(1);
                let scfsi = best_scalefac_store(&mut gr0[0].ch[0].tt, &mut gr1[0].ch[0].tt, mpeg1);
                self.config.side_info.scfsi[0] = scfsi.map(|b| b as i32);
                let scfsi_r = best_scalefac_store(&mut gr0[0].ch[1].tt, &mut gr1[0].ch[1].tt, mpeg1);
                self.config.side_info.scfsi[1] = scfsi_r.map(|b| b as i32);
            }
        }

        let mut bits_used = 0i32;
        for gr in 0..granules {
            for ch in 0..channels {
                bits_used += self.config.side_info.gr[gr].ch[ch].tt.part2_3_length;
            }
        }
        self.reservoir.adjust_reservoir(bits_used, channels as u8);
        self.reservoir.frame_end(&mut self.config.side_info, channels as u8);

        #[cfg(feature = "diagnostics")]
        {
            let diag = crate::diagnostics::FrameDiagnostics {
                captured_at: chrono::Utc::now(),
                bits_used,
                main_data_begin: self.config.side_info.main_data_begin,
                granules: granule_diagnostics,
            };
            if let Ok(json) = diag.to_json() {
                debug!("frame diagnostics: {json}");
            }
        }

        self.config.bs = crate::bitstream::BitstreamWriter::default();
        format_bitstream(&mut self.config)?;
        self.config.bs.byte_align()?;

        Ok(self.config.bs.get_data().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GRANULE_SIZE;

    fn init_logger() {
        let _ = env_logger::try_init();
    }

    fn stage_tone(encoder: &mut FrameEncoder, amp: f64) {
        let sfb_row = sf_band_index_row(encoder.config.mpeg.version, encoder.config.mpeg.samplerate_index as usize);
        let bands = crate::tables::SF_BAND_INDEX[sfb_row].l;
        let granules = encoder.config.mpeg.granules_per_frame as usize;
        let channels = encoder.config.wave.channels as usize;

        for gr in 0..granules {
            for ch in 0..channels {
                let gi = &mut encoder.config.side_info.gr[gr].ch[ch].tt;
                gi.xr = [amp; GRANULE_SIZE];
                for sfb in 0..SBMAX_L {
                    gi.width[sfb] = bands[sfb + 1] - bands[sfb];
                }
                gi.sfbmax = SBMAX_L as i32 - 1;
                encoder.config.ratio.l[gr][ch] = [0.0; SBMAX_L];
            }
        }
    }

    #[test]
    fn encode_frame_produces_nonempty_bytes_for_a_tone() {
        init_logger();
        let mut encoder = FrameEncoder::new(44100, 128, 2, 2).expect("valid config should construct");
        stage_tone(&mut encoder, 400.0);
        let bytes = encoder.encode_frame().expect("encode should succeed");
        assert!(!bytes.is_empty());
    }

    #[test]
    fn encode_frame_handles_silence() {
        init_logger();
        let mut encoder = FrameEncoder::new(44100, 128, 1, 5).expect("valid config should construct");
        stage_tone(&mut encoder, 0.0);
        let bytes = encoder.encode_frame().expect("silent frame should still encode");
        assert!(!bytes.is_empty());
    }

    #[test]
    fn encode_frame_runs_at_every_quality_level() {
        init_logger();
        for quality in [0, 5, 9] {
            let mut encoder = FrameEncoder::new(44100, 192, 2, quality).expect("valid config should construct");
            stage_tone(&mut encoder, 600.0);
            let bytes = encoder.encode_frame().expect("encode should succeed");
            assert!(!bytes.is_empty());
        }
    }

    #[test]
    fn new_rejects_invalid_channel_count() {
        assert!(FrameEncoder::new(44100, 128, 0, 5).is_err());
        assert!(FrameEncoder::new(44100, 128, 3, 5).is_err());
    }

    #[test]
    fn new_rejects_unsupported_sample_rate() {
        assert!(FrameEncoder::new(12345, 128, 2, 5).is_err());
    }

    #[test]
    fn new_rejects_unsupported_bitrate() {
        assert!(FrameEncoder::new(44100, 333, 2, 5).is_err());
    }
}
