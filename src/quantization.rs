//! Nonlinear quantization, psychoacoustic distortion targets, and the
//! outer/inner quantization loop.
//!
//! Ported from LAME's `quantize_pvt.c` (`calc_xmin`, `calc_noise`,
//! `ATHmdct`/`compute_ath`, `amplify_region`/`outer_loop`) and `takehiro.c`
//! (`quantize_xrpow`, `noquant_count_bits`, `best_huffman_divide`,
//! `best_scalefac_store`, `scale_bitcount`/`scale_bitcount_lsf`). Shine's own
//! `quantization.rs` was an all-`todo!()` stub built around a conflicting
//! `GranuleInfo`/`BitReservoir` pair; this module replaces it entirely and
//! quantizes through the shared [`crate::types::GrInfo`] instead.

use crate::error::{EncodingError, EncodingResult};
use crate::huffman::{choose_count1_table, choose_table};
use crate::params::QualitySettings;
use crate::tables::{NR_OF_SFB_BLOCK, PRETAB, SF_BAND_INDEX, SLEN1_TAB, SLEN2_TAB, SUBDV_TABLE};
use crate::types::{BlockType, GrInfo, PsyXmin, ScaleFac, GRANULE_SIZE, SBMAX_L, SFBMAX};

/// `0.0946` is the ISO-specified quantizer rounding bias baked into
/// `quantize_xrpow`; it centers the rounding error of `|x|^0.75` to minimize
/// mean-square quantization noise rather than mean error.
const QUANTIZER_BIAS: f64 = 0.0946;

/// Largest magnitude `pow43`/Huffman ESC tables can represent before the
/// linbits extension overflows; matches `IXMAX_VAL` in `quantize_pvt.c`.
const IXMAX_VAL: i32 = 8206;

/// Largest transmittable scalefactor value (4-bit `slen` fields top out at
/// 15); the outer loop's amplification and its saturation stop condition
/// both key off this, matching `SCALEFAC_MAX` in `quantize_pvt.c`.
const SCALEFAC_MAX: i32 = 15;

/// `ATH(f)` in dB SPL, Terhardt's empirical fit (`ATHformula` in
/// `quantize_pvt.c`), used by [`calc_xmin`] as a noise floor when the
/// psychoacoustic ratio alone would allow audible quantization noise.
fn ath_db(freq_khz: f64) -> f64 {
    let f = freq_khz.max(0.01);
    3.64 * f.powf(-0.8) - 6.5 * (-0.6 * (f - 3.3).powi(2)).exp() + 1e-3 * f.powi(4)
}

/// Converts an ATH dB value into the same (arbitrary but consistent) energy
/// units `ShinePsyRatio` reports masking ratios in.
fn ath_energy(db: f64) -> f64 {
    10f64.powf(db / 10.0) * 1e-10
}

/// Port of `calc_xmin`: combines the psychoacoustic masking ratio with the
/// absolute threshold of hearing to get each band's maximum allowed
/// distortion energy, one value per long-block scalefactor band.
pub fn calc_xmin(ratio_l: &[f64; SBMAX_L], sample_rate: u32, sf_band_index: usize) -> PsyXmin {
    let bands = &SF_BAND_INDEX[sf_band_index];
    let mut xmin = PsyXmin::default();

    for (sfb, slot) in xmin.l.iter_mut().enumerate() {
        let center_line = (bands.l[sfb] + bands.l[sfb + 1]) / 2;
        let freq_khz = center_line as f64 * (sample_rate as f64 / 2.0) / 576.0 / 1000.0;
        let floor = ath_energy(ath_db(freq_khz));
        *slot = ratio_l[sfb].max(floor);
    }
    xmin
}

/// Per-band noise/distortion report from [`calc_noise`].
#[derive(Debug, Clone)]
pub struct NoiseReport {
    /// Number of bands whose quantization noise exceeds `xmin` (the
    /// mask-to-noise ratio is "over").
    pub over_count: i32,
    /// Sum of `noise/xmin` in dB across all bands, used to compare two
    /// otherwise-tied quantizations.
    pub tot_noise: f64,
    /// Largest single-band `noise/xmin` overage, in dB.
    pub over_noise: f64,
    pub max_noise: f64,
    /// Variance of the per-band log-distortion, a secondary tie-break
    /// `quant_compare` consults after `over_count`/`over_noise` agree.
    pub var_noise: f64,
    /// Per-band `10*log10(noise/xmin)`, indexed by scalefactor band; what
    /// the outer loop's amplification step reads to decide which bands to
    /// raise.
    pub distort: [f64; SFBMAX],
}

impl Default for NoiseReport {
    fn default() -> Self {
        Self {
            over_count: 0,
            tot_noise: 0.0,
            over_noise: 0.0,
            max_noise: 0.0,
            var_noise: 0.0,
            distort: [0.0; SFBMAX],
        }
    }
}

/// Port of `calc_noise`: for each scalefactor band, reconstructs the
/// quantized magnitude, compares its energy against `xr`, and accumulates
/// how far over (or under) the `xmin` distortion budget the granule fell.
pub fn calc_noise(gr: &GrInfo, xmin: &PsyXmin) -> NoiseReport {
    let mut report = NoiseReport::default();
    let mut band_start = 0usize;
    let mut sum = 0f64;
    let mut sum_sq = 0f64;
    let mut scored_bands = 0i32;

    for sfb in 0..gr.sfbmax as usize {
        let width = gr.width[sfb].max(0) as usize;
        if width == 0 {
            continue;
        }
        let end = (band_start + width).min(GRANULE_SIZE);

        let mut noise = 0f64;
        for i in band_start..end {
            let recon = (gr.l3_enc[i] as f64).powf(4.0 / 3.0) * step_size(gr, sfb);
            let err = gr.xr[i].abs() - recon;
            noise += err * err;
        }
        band_start = end;

        let target = xmin.l.get(sfb).copied().unwrap_or(f64::INFINITY);
        if target <= 0.0 {
            continue;
        }
        let ratio_db = 10.0 * ((noise / target.max(1e-20)) + 1e-20).log10();
        if sfb < SFBMAX {
            report.distort[sfb] = ratio_db;
        }
        report.tot_noise += ratio_db;
        report.max_noise = report.max_noise.max(ratio_db);
        sum += ratio_db;
        sum_sq += ratio_db * ratio_db;
        scored_bands += 1;
        if ratio_db > 0.0 {
            report.over_count += 1;
            report.over_noise = report.over_noise.max(ratio_db);
        }
    }

    if scored_bands > 0 {
        let mean = sum / scored_bands as f64;
        report.var_noise = (sum_sq / scored_bands as f64) - mean * mean;
    }

    report
}

fn step_size(gr: &GrInfo, sfb: usize) -> f64 {
    let sf = gr.scalefac.get(sfb).copied().unwrap_or_default().value() as i32;
    let mult = if gr.scalefac_scale != 0 { 2 } else { 1 };
    let pre = if gr.preflag != 0 { PRETAB.get(sfb).copied().unwrap_or(0) } else { 0 };
    let gain = gr.global_gain - mult * (sf + pre);
    2f64.powf(0.25 * (gain as f64 - 210.0))
}

/// Port of `quantize_xrpow`: rebuilds `l3_enc` for every coded line using
/// the granule's current `global_gain` and per-band scalefactors. Lines
/// beyond `max_nonzero_coeff` are left at zero without visiting `xrpow`,
/// mirroring LAME's zero-tail skip.
pub fn quantize_xrpow(gr: &mut GrInfo) {
    let mut band_start = 0usize;
    for sfb in 0..gr.sfbmax as usize {
        let width = gr.width[sfb].max(0) as usize;
        if width == 0 {
            continue;
        }
        let end = (band_start + width).min(GRANULE_SIZE);
        if band_start as i32 > gr.max_nonzero_coeff {
            for v in &mut gr.l3_enc[band_start..end] {
                *v = 0;
            }
            band_start = end;
            continue;
        }

        let sf = gr.scalefac.get(sfb).copied().unwrap_or_default().value() as i32;
        let mult = if gr.scalefac_scale != 0 { 2 } else { 1 };
        let pre = if gr.preflag != 0 { PRETAB.get(sfb).copied().unwrap_or(0) } else { 0 };
        let gain = gr.global_gain - mult * (sf + pre);
        let istep = 2f64.powf(-0.25 * (gain as f64 - 210.0));

        for i in band_start..end.min(gr.max_nonzero_coeff as usize + 1) {
            let x34 = gr.xrpow[i];
            let v = x34 * istep - QUANTIZER_BIAS;
            gr.l3_enc[i] = if v <= 0.0 { 0 } else { ((v + 0.5) as i32).min(IXMAX_VAL) };
        }
        band_start = end;
    }
}

/// Precomputes `xrpow = |xr|^0.75` and its max, as LAME does once per
/// granule before the outer loop starts adjusting `global_gain`.
pub fn init_xrpow(gr: &mut GrInfo) {
    gr.xrpow_max = 0.0;
    for i in 0..GRANULE_SIZE {
        let p = gr.xr[i].abs().powf(0.75);
        gr.xrpow[i] = p;
        if p > gr.xrpow_max {
            gr.xrpow_max = p;
        }
    }
}

/// Port of `scale_bitcount`: picks the narrowest `scalefac_compress` entry
/// wide enough to hold every transmitted long-block scalefactor, and sets
/// `part2_length` (the scalefactor bit cost) accordingly. MPEG-1 long blocks;
/// MPEG-2/2.5 uses [`scale_bitcount_lsf`] instead.
pub fn scale_bitcount(gr: &mut GrInfo) {
    let region1_bands = 11usize;
    let region2_bands = 10usize;
    let sfbmax = gr.sfbmax.max(0) as usize;

    let max1 = (0..region1_bands.min(sfbmax))
        .map(|sfb| gr.scalefac[sfb].value())
        .max()
        .unwrap_or(0)
        .max(0) as i32;
    let max2 = (region1_bands..(region1_bands + region2_bands).min(sfbmax))
        .map(|sfb| gr.scalefac[sfb].value())
        .max()
        .unwrap_or(0)
        .max(0) as i32;

    let mut best = SLEN1_TAB.len() - 1;
    for (i, (&s1, &s2)) in SLEN1_TAB.iter().zip(SLEN2_TAB.iter()).enumerate() {
        if ((1 << s1) - 1) >= max1 && ((1 << s2) - 1) >= max2 {
            best = i;
            break;
        }
    }

    gr.scalefac_compress = best as i32;
    gr.part2_length = SLEN1_TAB[best] * region1_bands as i32 + SLEN2_TAB[best] * region2_bands as i32;
}

/// Port of `scale_bitcount_lsf`: MPEG-2/2.5 scalefactor partitioning, used in
/// place of `scale_bitcount` once a frame isn't MPEG-1. Enumerates
/// `NR_OF_SFB_BLOCK`'s rows (one candidate `slen` partitioning each) and
/// keeps the cheapest whose per-partition `slen` fits every scalefactor in
/// that partition. Only `table_number = 0` (`NR_OF_SFB_BLOCK`'s first index)
/// is tried: the source this table was ported from never selects table 1
/// either (see `SPEC_FULL.md` Open Questions) — a known suboptimality this
/// crate preserves rather than silently improving on.
pub fn scale_bitcount_lsf(gr: &mut GrInfo) -> i32 {
    let block_type_class = if gr.block_type == BlockType::Short {
        1
    } else if gr.mixed_block_flag {
        2
    } else {
        0
    };
    let sfbmax = gr.sfbmax.max(0) as usize;

    let mut best_bits = i32::MAX;
    let mut best_row = 0usize;

    for (row, table) in NR_OF_SFB_BLOCK.iter().enumerate() {
        let widths = table[block_type_class.min(2)];
        let mut start = 0usize;
        let mut ok = true;
        let mut bits_total = 0i32;

        for &w in widths.iter() {
            let w = w as usize;
            if w == 0 {
                continue;
            }
            let end = (start + w).min(sfbmax);
            let max_val = (start..end).map(|sfb| gr.scalefac[sfb].value() as i32).max().unwrap_or(0).max(0);
            let mut slen = 0i32;
            while (1i32 << slen) - 1 < max_val {
                slen += 1;
                if slen > 4 {
                    ok = false;
                    break;
                }
            }
            if !ok {
                break;
            }
            bits_total += w as i32 * slen;
            start = end;
        }

        if ok && bits_total < best_bits {
            best_bits = bits_total;
            best_row = row;
        }
    }

    gr.scalefac_compress = best_row as i32;
    gr.part2_length = if best_bits == i32::MAX { 0 } else { best_bits };
    gr.part2_length
}

/// Locates the big-values/count1/rzero split points, matching the scan
/// `noquant_count_bits` performs before dispatching to the Huffman tables:
/// walk back from the last nonzero line, absorb trailing `|v| <= 1`
/// quadruples into the count1 region, and round the remaining big-values
/// region to an even boundary.
fn split_regions(ix: &[i32; GRANULE_SIZE]) -> (usize, usize) {
    let mut last_nonzero = 0usize;
    for i in (0..GRANULE_SIZE).rev() {
        if ix[i] != 0 {
            last_nonzero = i + 1;
            break;
        }
    }

    let mut count1_start = last_nonzero;
    while count1_start >= 4 && ix[count1_start - 4..count1_start].iter().all(|v| v.abs() <= 1) {
        count1_start -= 4;
    }

    let big_values_end = if count1_start % 2 == 0 { count1_start } else { count1_start + 1 };
    (big_values_end.min(GRANULE_SIZE), last_nonzero)
}

fn region_cost(ix: &[i32; GRANULE_SIZE], bounds: &[usize; 3], tables: &[i32; 3]) -> u32 {
    let mut bits = 0u32;
    let mut prev = 0usize;
    for (&bound, &table) in bounds.iter().zip(tables.iter()) {
        if bound > prev {
            bits += if table >= 24 {
                crate::huffman::count_bit_esc(ix, prev, bound, table as usize)
            } else {
                crate::huffman::count_bit_no_esc(ix, prev, bound, table as usize)
            };
        }
        prev = bound;
    }
    bits
}

fn single_split(ix: &[i32; GRANULE_SIZE], bands: &[i32], big_values_end: usize) -> (usize, usize, [i32; 3], u32) {
    let r0 = pick_band_boundary(bands, big_values_end / 3);
    let r1 = pick_band_boundary(bands, (big_values_end * 2) / 3).max(r0 + 1);
    let (t0, _) = choose_table(ix, 0, r0.min(big_values_end));
    let (t1, _) = choose_table(ix, r0.min(big_values_end), r1.min(big_values_end));
    let (t2, _) = choose_table(ix, r1.min(big_values_end), big_values_end);
    let tables = [t0 as i32, t1 as i32, t2 as i32];
    let bounds = [r0.min(big_values_end), r1.min(big_values_end), big_values_end];
    let bits = region_cost(ix, &bounds, &tables);
    (r0, r1, tables, bits)
}

/// Port of `best_huffman_divide`: enumerates region0/region1 boundary
/// candidates bracketed by `SUBDV_TABLE`'s per-band-count suggestion
/// (checking the suggested split plus its immediate neighbors, as the
/// source's `subdv_table`-bounded search does) and keeps the cheapest.
/// Falls back to [`single_split`] if nothing in the bracket is a legal
/// boundary pair, which cannot normally happen but keeps this total.
fn best_huffman_divide(ix: &[i32; GRANULE_SIZE], bands: &[i32], big_values_end: usize) -> (usize, usize, [i32; 3], u32) {
    let active_bands = band_count(bands, big_values_end).min(SUBDV_TABLE.len() - 1);
    let (sub0, sub1) = (SUBDV_TABLE[active_bands][0] as usize, SUBDV_TABLE[active_bands][1] as usize);

    let mut best: Option<(usize, usize, [i32; 3], u32)> = None;

    for d0 in sub0.saturating_sub(1)..=(sub0 + 1).min(active_bands) {
        let r0 = bands.get(d0 + 1).copied().unwrap_or(0) as usize;
        for d1 in sub1.saturating_sub(1)..=(sub1 + 2).min(active_bands) {
            let r1 = bands.get(d1 + 1).copied().unwrap_or(0) as usize;
            if r1 <= r0 || r1 > big_values_end {
                continue;
            }
            let (t0, _) = choose_table(ix, 0, r0.min(big_values_end));
            let (t1, _) = choose_table(ix, r0.min(big_values_end), r1.min(big_values_end));
            let (t2, _) = choose_table(ix, r1.min(big_values_end), big_values_end);
            let tables = [t0 as i32, t1 as i32, t2 as i32];
            let bounds = [r0.min(big_values_end), r1.min(big_values_end), big_values_end];
            let bits = region_cost(ix, &bounds, &tables);
            if best.as_ref().map(|b| bits < b.3).unwrap_or(true) {
                best = Some((r0, r1, tables, bits));
            }
        }
    }

    best.unwrap_or_else(|| single_split(ix, bands, big_values_end))
}

/// Port of `noquant_count_bits`/`best_huffman_divide`: given the already
/// quantized `ix`, pick big-values region boundaries and Huffman tables and
/// return the total part2_3 body length in bits (also stashed, plus
/// `part2_length`, into `gr.part2_3_length`). When `use_best_huffman` is
/// set, the exhaustive `SUBDV_TABLE`-bracketed search runs; otherwise a
/// single representative split (~1/3, ~2/3 of the big-values region) is used
/// as a faster approximation, matching the quality ladder's `use_best_huffman`
/// flag (`QualitySettings`).
pub fn count_bits(ix: &[i32; GRANULE_SIZE], gr: &mut GrInfo, sfb_index: usize, use_best_huffman: bool) -> u32 {
    let (big_values_end, last_nonzero) = split_regions(ix);
    gr.big_values = (big_values_end / 2) as i32;
    gr.count1 = ((last_nonzero.saturating_sub(big_values_end)) / 4) as i32;

    let region_bits = if big_values_end == 0 {
        gr.table_select = [0, 0, 0];
        gr.region0_count = 0;
        gr.region1_count = 0;
        0
    } else {
        let bands = &SF_BAND_INDEX[sfb_index].l;
        let (r0, r1, tables, bits) = if use_best_huffman {
            best_huffman_divide(ix, bands, big_values_end)
        } else {
            single_split(ix, bands, big_values_end)
        };
        gr.table_select = tables;
        // region0_count/region1_count are 4-bit/3-bit side-info fields (ISO/IEC
        // 11172-3 Table B.4): clamp the band counts the search produces so an
        // unusually wide big-values region never overflows them.
        gr.region0_count = (band_count(bands, r0) as i32).min(15);
        gr.region1_count = (band_count(bands, r1).saturating_sub(gr.region0_count as usize) as i32).min(7);
        bits
    };

    let (count1_table_b, count1_bits) = choose_count1_table(ix, big_values_end, last_nonzero);
    gr.count1table_select = count1_table_b as i32;

    gr.part2_3_length = gr.part2_length + (region_bits + count1_bits) as i32;
    region_bits + count1_bits
}

fn pick_band_boundary(bands: &[i32], target_line: usize) -> usize {
    for w in bands.windows(2) {
        if w[1] as usize >= target_line {
            return w[1] as usize;
        }
    }
    bands.last().copied().unwrap_or(0) as usize
}

fn band_count(bands: &[i32], boundary: usize) -> usize {
    bands.iter().filter(|&&b| (b as usize) < boundary).count()
}

/// Port of the inner loop (ISO 11172-3 `Quantization of MDCT coefficients`):
/// raise `global_gain` until the Huffman-coded granule fits in `max_bits`.
/// `gain_step` (from `QualitySettings`) controls how many quarter-steps each
/// failed probe advances by; lower-quality presets skip ahead faster at the
/// cost of coarser gain resolution. Returns the bit count (excluding
/// `part2_length`) the granule settled at.
pub fn inner_loop(gr: &mut GrInfo, max_bits: i32, sfb_index: usize, gain_step: i32, use_best_huffman: bool) -> u32 {
    if max_bits <= 0 {
        for v in gr.l3_enc.iter_mut() {
            *v = 0;
        }
        gr.part2_3_length = 0;
        return 0;
    }

    let step = gain_step.max(1);
    let mut ix = [0i32; GRANULE_SIZE];
    loop {
        quantize_xrpow(gr);
        ix.copy_from_slice(&gr.l3_enc);
        let bits = count_bits(&ix, gr, sfb_index, use_best_huffman);
        if gr.part2_length + bits as i32 <= max_bits || gr.global_gain >= 255 {
            return bits;
        }
        gr.global_gain = (gr.global_gain + step).min(255);
    }
}

/// Amplifies scalefactors in bands whose `distort` exceeds the `xmin`
/// budget, per `noise_shaping_amp`'s policy (`amplify_region` in
/// `quantize_pvt.c`): 0 amplifies every overflowing band, 1 amplifies only
/// the single worst band, 2 amplifies every band within 1 dB of the worst.
/// Returns whether any band was actually raised (a band already at
/// `SCALEFAC_MAX` can't be amplified further).
fn amplify_bands(gr: &mut GrInfo, report: &NoiseReport, policy: i32) -> bool {
    let sfbmax = (gr.sfbmax.max(0) as usize).min(SFBMAX);
    let max_distort = report.distort[..sfbmax].iter().cloned().fold(f64::MIN, f64::max);
    if max_distort <= 0.0 {
        return false;
    }

    let mut amplified = false;
    for sfb in 0..sfbmax {
        let d = report.distort[sfb];
        let should_amplify = match policy {
            1 => d >= max_distort,
            2 => d > 0.0 && d >= max_distort - 1.0,
            _ => d > 0.0,
        };
        if !should_amplify {
            continue;
        }
        let cur = gr.scalefac[sfb].value() as i32;
        if cur < SCALEFAC_MAX {
            gr.scalefac[sfb] = ScaleFac::Value((cur + 1) as i16);
            amplified = true;
        }
    }
    amplified
}

/// Preemphasis search: once every high sfb (11..sfbmax) already needs at
/// least `pretab[sfb]` units of scale, fold that constant into `preflag`
/// instead of paying for it with extra scalefactor bits. Long blocks only
/// (`pretab` has no short-block counterpart). Returns whether `preflag` was
/// newly set.
fn try_preemphasis(gr: &mut GrInfo) -> bool {
    if gr.preflag != 0 || gr.block_type != BlockType::Long {
        return false;
    }
    let sfbmax = (gr.sfbmax.max(0) as usize).min(SBMAX_L);
    let high_start = 11usize;
    if high_start >= sfbmax {
        return false;
    }

    let all_ge = (high_start..sfbmax).all(|sfb| gr.scalefac[sfb].value() as i32 >= PRETAB.get(sfb).copied().unwrap_or(0));
    if !all_ge {
        return false;
    }

    for sfb in high_start..sfbmax {
        let cur = gr.scalefac[sfb].value() as i32;
        let pre = PRETAB.get(sfb).copied().unwrap_or(0);
        gr.scalefac[sfb] = ScaleFac::Value((cur - pre) as i16);
    }
    gr.preflag = 1;
    true
}

/// Stop condition for the amplification loop: any transmitted scalefactor
/// (plus its preemphasis contribution) has saturated `SCALEFAC_MAX`.
fn scalefac_saturated(gr: &GrInfo) -> bool {
    let sfbmax = (gr.sfbmax.max(0) as usize).min(SBMAX_L);
    (0..sfbmax).any(|sfb| {
        let pre = if gr.preflag != 0 { PRETAB.get(sfb).copied().unwrap_or(0) } else { 0 };
        gr.scalefac[sfb].value() as i32 + pre >= SCALEFAC_MAX
    })
}

/// Port of the outer loop (`outer_loop`/`amplify_region` in
/// `quantize_pvt.c`): runs the inner (gain-search) loop, then — when
/// `quality.full_outer_loop` is set — amplifies offending bands and tries
/// preemphasis promotion, repeating until every band fits under `xmin`, a
/// scalefactor saturates, or the amplification round stops helping. Keeps
/// the best candidate seen by `over_count`/`over_noise` across rounds (the
/// `quant_compare` comparator) and returns it.
pub fn outer_loop(
    gr: &mut GrInfo,
    xmin: &PsyXmin,
    max_bits: i32,
    sfb_index: usize,
    quality: QualitySettings,
    seed_gain: i32,
    mpeg1: bool,
) -> NoiseReport {
    init_xrpow(gr);

    gr.global_gain = seed_gain.clamp(0, 255);
    let mut best_gain = gr.global_gain;
    let mut best_scalefac = gr.scalefac;
    let mut best_scalefac_scale = gr.scalefac_scale;
    let mut best_preflag = gr.preflag;
    let mut best_report = NoiseReport {
        over_count: i32::MAX,
        ..Default::default()
    };

    let amp_rounds = if quality.full_outer_loop { 20 } else { 1 };

    for round in 0..amp_rounds {
        if mpeg1 {
            scale_bitcount(gr);
        } else {
            scale_bitcount_lsf(gr);
        }

        let bits = inner_loop(gr, max_bits, sfb_index, quality.gain_step, quality.use_best_huffman);
        let report = calc_noise(gr, xmin);

        let better = report.over_count < best_report.over_count
            || (report.over_count == best_report.over_count && report.over_noise < best_report.over_noise)
            || (report.over_count == best_report.over_count
                && report.over_noise == best_report.over_noise
                && report.var_noise < best_report.var_noise);
        if better {
            best_report = report.clone();
            best_gain = gr.global_gain;
            best_scalefac = gr.scalefac;
            best_scalefac_scale = gr.scalefac_scale;
            best_preflag = gr.preflag;
        }

        if report.over_count == 0 || bits == 0 || round + 1 == amp_rounds || scalefac_saturated(gr) {
            break;
        }

        let amplified = amplify_bands(gr, &report, quality.noise_shaping_amp);
        let promoted = try_preemphasis(gr);
        if !amplified && !promoted {
            break;
        }
        gr.global_gain = seed_gain.clamp(0, 255);
    }

    gr.scalefac = best_scalefac;
    gr.scalefac_scale = best_scalefac_scale;
    gr.preflag = best_preflag;
    gr.global_gain = best_gain;
    if mpeg1 {
        scale_bitcount(gr);
    } else {
        scale_bitcount_lsf(gr);
    }
    inner_loop(gr, max_bits, sfb_index, quality.gain_step, quality.use_best_huffman);
    best_report
}

/// Port of `best_scalefac_store`: collapses scalefactors for bands beyond
/// `max_nonzero_coeff` to the zero-band sentinel, halves every scalefactor
/// and sets `scalefac_scale` when every one of them is even (step 2),
/// promotes a final preemphasis pass if the outer loop's own promotion
/// (`try_preemphasis`) hadn't already fired (step 3), computes SCFSI reuse
/// between granule 0 and granule 1 (long blocks only, MPEG-1 only, step 4),
/// and recomputes `part2_length` for the final scalefactor values (step 5).
pub fn best_scalefac_store(gr0: &mut GrInfo, gr1: &mut GrInfo, mpeg1: bool) -> [bool; 4] {
    let mut scfsi = [false; 4];

    for gr in [&mut *gr0, &mut *gr1] {
        let mut band_start = 0i32;
        for sfb in 0..gr.sfbmax as usize {
            let width = gr.width[sfb];
            if band_start > gr.max_nonzero_coeff {
                gr.scalefac[sfb] = ScaleFac::ZeroBand;
            }
            band_start += width;
        }

        if gr.scalefac_scale == 0 {
            let sfbmax = gr.sfbmax.max(0) as usize;
            let all_even = (0..sfbmax).all(|sfb| !matches!(gr.scalefac[sfb], ScaleFac::Value(v) if v % 2 != 0));
            let any_nonzero = (0..sfbmax).any(|sfb| matches!(gr.scalefac[sfb], ScaleFac::Value(v) if v != 0));
            if all_even && any_nonzero {
                for sfb in 0..sfbmax {
                    if let ScaleFac::Value(v) = gr.scalefac[sfb] {
                        gr.scalefac[sfb] = ScaleFac::Value(v / 2);
                    }
                }
                gr.scalefac_scale = 1;
            }
        }

        try_preemphasis(gr);

        if mpeg1 {
            scale_bitcount(gr);
        } else {
            scale_bitcount_lsf(gr);
        }
    }

    if !mpeg1 || gr0.block_type != BlockType::Long || gr1.block_type != BlockType::Long {
        return scfsi;
    }

    // SCFSI partitions long-block scalefactors into 4 groups of bands.
    const PARTITIONS: [(usize, usize); 4] = [(0, 6), (6, 11), (11, 16), (16, 21)];
    for (band, &(start, end)) in PARTITIONS.iter().enumerate() {
        let shared = (start..end.min(SBMAX_L)).all(|sfb| gr0.scalefac[sfb].value() == gr1.scalefac[sfb].value());
        if shared {
            scfsi[band] = true;
            for sfb in start..end.min(SBMAX_L) {
                let v = gr0.scalefac[sfb].value();
                gr1.scalefac[sfb] = ScaleFac::Reused(v);
            }
        }
    }
    scale_bitcount(gr1);

    scfsi
}

pub fn validate_granule(gr: &GrInfo) -> EncodingResult<()> {
    if gr.part2_3_length < 0 || gr.part2_3_length > 4095 {
        return Err(EncodingError::QuantizationFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GRANULE_SIZE;

    fn flat_granule(amp: f64) -> GrInfo {
        let mut gr = GrInfo::default();
        gr.xr = [amp; GRANULE_SIZE];
        let bands = &SF_BAND_INDEX[0].l;
        for sfb in 0..SBMAX_L {
            gr.width[sfb] = bands[sfb + 1] - bands[sfb];
        }
        gr.sfbmax = SBMAX_L as i32 - 1;
        gr
    }

    fn full_quality() -> QualitySettings {
        QualitySettings {
            quality: 0,
            full_outer_loop: true,
            gain_step: 1,
            use_best_huffman: true,
            noise_shaping_amp: 0,
        }
    }

    fn fast_quality() -> QualitySettings {
        QualitySettings {
            quality: 9,
            full_outer_loop: false,
            gain_step: 2,
            use_best_huffman: false,
            noise_shaping_amp: 0,
        }
    }

    #[test]
    fn quantizing_silence_produces_all_zero_lines() {
        let mut gr = flat_granule(0.0);
        init_xrpow(&mut gr);
        quantize_xrpow(&mut gr);
        assert!(gr.l3_enc.iter().all(|&v| v == 0));
    }

    #[test]
    fn raising_global_gain_never_increases_quantized_magnitude() {
        let mut gr = flat_granule(500.0);
        init_xrpow(&mut gr);
        gr.global_gain = 150;
        quantize_xrpow(&mut gr);
        let low_gain_sum: i64 = gr.l3_enc.iter().map(|&v| v as i64).sum();

        gr.global_gain = 220;
        quantize_xrpow(&mut gr);
        let high_gain_sum: i64 = gr.l3_enc.iter().map(|&v| v as i64).sum();

        assert!(high_gain_sum <= low_gain_sum);
    }

    #[test]
    fn split_regions_rounds_big_values_to_even_boundary() {
        let mut ix = [0i32; GRANULE_SIZE];
        ix[10] = 5;
        ix[11] = 1;
        ix[12] = 1;
        let (big_values_end, last_nonzero) = split_regions(&ix);
        assert_eq!(big_values_end % 2, 0);
        assert!(big_values_end <= last_nonzero.max(big_values_end));
    }

    #[test]
    fn best_scalefac_store_marks_shared_bands_reused() {
        let mut gr0 = flat_granule(100.0);
        let mut gr1 = flat_granule(100.0);
        for sfb in 0..SBMAX_L {
            gr0.scalefac[sfb] = ScaleFac::Value(5);
            gr1.scalefac[sfb] = ScaleFac::Value(5);
        }
        let scfsi = best_scalefac_store(&mut gr0, &mut gr1, true);
        assert!(scfsi.iter().all(|&b| b));
        assert!(matches!(gr1.scalefac[0], ScaleFac::Reused(5)));
    }

    #[test]
    fn best_scalefac_store_halves_all_even_scalefactors() {
        let mut gr0 = flat_granule(100.0);
        let mut gr1 = flat_granule(100.0);
        for sfb in 0..SBMAX_L {
            gr0.scalefac[sfb] = ScaleFac::Value(4);
            gr1.scalefac[sfb] = ScaleFac::Value(4);
        }
        best_scalefac_store(&mut gr0, &mut gr1, true);
        assert_eq!(gr0.scalefac_scale, 1);
        assert_eq!(gr0.scalefac[0].value(), 2);
    }

    #[test]
    fn outer_loop_respects_full_bit_budget_including_part2_length() {
        let mut gr = flat_granule(800.0);
        for sfb in 0..SBMAX_L {
            gr.scalefac[sfb] = ScaleFac::Value(3);
        }
        let xmin = PsyXmin::default();
        let report = outer_loop(&mut gr, &xmin, 400, 0, fast_quality(), 210, true);
        assert!(gr.part2_3_length <= 400);
        let _ = report;
    }

    #[test]
    fn inner_loop_rejects_probe_whose_total_length_exceeds_budget() {
        // A granule with a large part2_length (wide scalefactors) must not be
        // accepted just because the Huffman body alone fits max_bits.
        let mut gr = flat_granule(50.0);
        for sfb in 0..SBMAX_L {
            gr.scalefac[sfb] = ScaleFac::Value(15);
        }
        scale_bitcount(&mut gr);
        assert!(gr.part2_length > 0);
        init_xrpow(&mut gr);
        let max_bits = gr.part2_length; // body must be forced to ~0 bits to fit
        inner_loop(&mut gr, max_bits, 0, 1, false);
        assert!(gr.part2_3_length <= max_bits);
    }

    #[test]
    fn outer_loop_amplifies_bands_under_full_quality() {
        let mut gr = flat_granule(2000.0);
        let mut xmin = PsyXmin::default();
        for v in xmin.l.iter_mut() {
            *v = 1e-6;
        }
        let before: Vec<i16> = gr.scalefac.iter().map(|s| s.value()).collect();
        outer_loop(&mut gr, &xmin, 4000, 0, full_quality(), 210, true);
        let after: Vec<i16> = gr.scalefac.iter().map(|s| s.value()).collect();
        assert!(after.iter().zip(before.iter()).any(|(a, b)| a > b));
    }

    #[test]
    fn scale_bitcount_picks_narrowest_table_covering_max_scalefactor() {
        let mut gr = flat_granule(0.0);
        gr.scalefac[3] = ScaleFac::Value(3);
        gr.scalefac[15] = ScaleFac::Value(1);
        scale_bitcount(&mut gr);
        let slen1 = SLEN1_TAB[gr.scalefac_compress as usize];
        let slen2 = SLEN2_TAB[gr.scalefac_compress as usize];
        assert!((1 << slen1) - 1 >= 3);
        assert!((1 << slen2) - 1 >= 1);
    }

    #[test]
    fn scale_bitcount_lsf_covers_every_scalefactor_in_its_partition() {
        let mut gr = flat_granule(0.0);
        gr.scalefac[2] = ScaleFac::Value(5);
        let bits = scale_bitcount_lsf(&mut gr);
        assert!(bits >= 0);
        assert!(gr.scalefac_compress >= 0);
    }
}
