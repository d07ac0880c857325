// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline orchestrator (C8 §4.8): derives per-level alignment parameters
//! from `Config`, drives the prepare → pyramid → align → warp → merge →
//! exposure pipeline frame by frame, and reports progress/cancellation.

use crate::align::{self, AlignmentField, LevelConfig};
use crate::config::{Config, MergingAlgorithm, OutputBitDepth};
use crate::errors::ErrorKind;
use crate::exposure;
use crate::gpu::GpuContext;
use crate::io::{Burst, CancelToken, FrameMeta, MergedRaw};
use crate::merge::frequency::{self, FrequencyMergeConfig};
use crate::merge::spatial;
use crate::pyramid;
use crate::texture::{self, GpuTexture};

/// Fraction of total progress spent preparing/aligning frames vs. running
/// the merge engine vs. exposure normalization. Purely cosmetic weighting
/// for the progress callback.
const ALIGN_PHASE_SHARE: f32 = 0.55;
const MERGE_PHASE_SHARE: f32 = 0.4;

/// Run the full align-and-merge pipeline on `burst`, returning the merged
/// raw frame. `progress` receives a monotonically increasing fraction in
/// `[0, 1]`. `cancel` is polled between frames and between major stages.
#[tracing::instrument(skip(burst, progress))]
pub fn process(
    burst: Burst,
    config: Config,
    cancel: CancelToken,
    mut progress: impl FnMut(f32),
) -> Result<MergedRaw, ErrorKind> {
    burst.validate()?;
    config.validate()?;

    let ctx = pollster::block_on(GpuContext::new())?;
    tracing::info!(adapter = %ctx.info.adapter_name, "GPU context ready");

    let reference = &burst.frames[burst.reference_index];
    let reference_meta = &burst.metas[burst.reference_index];
    let cfa_width = reference.cfa_width;
    let uniform_exposure = burst.is_uniform_exposure();
    let tile_factor = config.tile_size.pixels();
    let white_level = if reference_meta.white_level > 0.0 {
        reference_meta.white_level
    } else {
        (1u32 << 14) as f32 - 1.0
    };
    let black_level_mean =
        reference_meta.black_level.iter().sum::<f32>() / reference_meta.black_level.len().max(1) as f32;

    let comparison_count = burst.frames.len() - 1;

    // §8 invariant 4: a single-frame "Fast" burst is exposure-corrected
    // reference only, no alignment or merge engine involved.
    if burst.frames.len() == 1 && config.merging_algorithm == MergingAlgorithm::Fast {
        tracing::info!("single-frame burst, Fast mode: bypassing align/merge");
        let prepared = prepare(&ctx, reference, reference_meta, cfa_width, 1.0, tile_factor)?;
        let cropped = texture::crop(&ctx, &prepared, 0, 0, reference.width, reference.height)?;
        progress(ALIGN_PHASE_SHARE + MERGE_PHASE_SHARE);
        return finish(&ctx, &cropped, &burst, reference_meta, white_level, config, &mut progress);
    }

    tracing::info!(frames = burst.frames.len(), %cfa_width, "preparing reference frame");
    let ref_prepared = prepare(&ctx, reference, reference_meta, cfa_width, 1.0, tile_factor)?;
    let ref_pyramid = pyramid::build(
        &ctx,
        &ref_prepared,
        cfa_width,
        reference_meta.color_factors,
        black_level_mean,
        config.search_distance.coarsest_dimension(),
    )?;
    let level_configs = derive_level_configs(ref_pyramid.len(), tile_factor, config.search_distance.search_radius());

    let mut aligned: Vec<(GpuTexture, f32)> = Vec::with_capacity(comparison_count);
    for (i, (frame, meta)) in burst.frames.iter().zip(burst.metas.iter()).enumerate() {
        if i == burst.reference_index {
            continue;
        }
        if cancel.is_cancelled() {
            tracing::info!("cancellation observed during alignment");
            return Err(ErrorKind::Cancelled);
        }

        let exposure_factor = 2f32.powf((reference_meta.exposure_bias - meta.exposure_bias) as f32 / 100.0);
        let prepared = prepare(&ctx, frame, meta, cfa_width, exposure_factor, tile_factor)?;
        let cmp_pyramid = pyramid::build(
            &ctx,
            &prepared,
            cfa_width,
            meta.color_factors,
            black_level_mean,
            config.search_distance.coarsest_dimension(),
        )?;
        let field: AlignmentField = align::align(&ctx, &ref_pyramid, &cmp_pyramid, &level_configs, uniform_exposure)?;
        let warped = align::warp(&ctx, &prepared, &field, tile_factor)?;
        tracing::info!(frame_index = i, "frame aligned");

        aligned.push((warped, exposure_factor));
        progress(ALIGN_PHASE_SHARE * (aligned.len() as f32 / comparison_count.max(1) as f32));
    }

    if cancel.is_cancelled() {
        return Err(ErrorKind::Cancelled);
    }

    tracing::info!(algorithm = ?config.merging_algorithm, "running merge engine");
    let merged_padded = match config.merging_algorithm {
        MergingAlgorithm::Fast => {
            let just_textures: Vec<GpuTexture> = aligned.into_iter().map(|(t, _)| t).collect();
            spatial::merge(&ctx, &ref_prepared, &just_textures, cfa_width, config.robustness(), |i, n| {
                progress(ALIGN_PHASE_SHARE + MERGE_PHASE_SHARE * (i as f32 / n.max(1) as f32));
            })?
        }
        MergingAlgorithm::HigherQuality => {
            let freq_cfg = FrequencyMergeConfig {
                tile_size: frequency::tile_size_for(cfa_width, tile_factor),
                robustness_norm: config.robustness().max(0.05),
                ..FrequencyMergeConfig::default()
            };
            frequency::merge(&ctx, &ref_prepared, &aligned, &freq_cfg, uniform_exposure, white_level, |i, n| {
                progress(ALIGN_PHASE_SHARE + MERGE_PHASE_SHARE * (i as f32 / n.max(1) as f32));
            })?
        }
    };

    if cancel.is_cancelled() {
        return Err(ErrorKind::Cancelled);
    }

    let merged = texture::crop(&ctx, &merged_padded, 0, 0, reference.width, reference.height)?;
    finish(&ctx, &merged, &burst, reference_meta, white_level, config, &mut progress)
}

fn prepare(
    ctx: &GpuContext,
    frame: &crate::io::Frame,
    meta: &FrameMeta,
    cfa_width: u32,
    exposure_factor: f32,
    tile_factor: u32,
) -> Result<GpuTexture, ErrorKind> {
    let raw_f32: Vec<f32> = frame.samples.iter().map(|&s| s as f32).collect();
    let raw_tex = GpuTexture::from_host(ctx, "raw-frame", frame.width, frame.height, 1, &raw_f32)?;

    let hp_data = if meta.hot_pixel_weights.is_empty() {
        vec![0.0f32; raw_f32.len()]
    } else {
        meta.hot_pixel_weights.clone()
    };
    let hp_tex = GpuTexture::from_host(ctx, "hot-pixel-weights", frame.width, frame.height, 1, &hp_data)?;

    texture::prepare_frame(ctx, &raw_tex, &hp_tex, cfa_width, exposure_factor, &meta.black_level, tile_factor)
}

/// Alignment tile sizes halve per level (finest first), clamped at 8; the
/// finest level alone uses the stricter L2 cost (§4.8 derivation).
fn derive_level_configs(num_levels: usize, finest_tile_size: u32, search_dist: i32) -> Vec<LevelConfig> {
    let mut tile_size = finest_tile_size;
    let mut configs = Vec::with_capacity(num_levels);
    for level in 0..num_levels {
        configs.push(LevelConfig { tile_size, search_dist, use_l2: level == 0 });
        tile_size = (tile_size / 2).max(8);
    }
    configs
}

fn finish(
    ctx: &GpuContext,
    merged: &GpuTexture,
    burst: &Burst,
    reference_meta: &FrameMeta,
    white_level: f32,
    config: Config,
    progress: &mut impl FnMut(f32),
) -> Result<MergedRaw, ErrorKind> {
    let black_min = burst
        .metas
        .iter()
        .flat_map(|m| m.black_level.iter().copied())
        .fold(f32::INFINITY, f32::min);

    tracing::info!(mode = ?config.exposure_control, "normalizing exposure");
    let (normalized, applied_gain) = exposure::normalize(
        ctx,
        merged,
        burst.frames[burst.reference_index].cfa_width,
        config.exposure_control,
        black_min,
        white_level,
        reference_meta.color_factors,
    )?;

    let mut samples = normalized.read_to_host(ctx)?;
    quantize(&mut samples, config.output_bit_depth);
    progress(1.0);

    let black_level = elementwise_min(&burst.metas);
    Ok(MergedRaw {
        width: normalized.width,
        height: normalized.height,
        samples,
        meta: FrameMeta {
            exposure_bias: reference_meta.exposure_bias,
            black_level,
            white_level: reference_meta.white_level,
            color_factors: reference_meta.color_factors,
            hot_pixel_weights: Vec::new(),
        },
        applied_gain,
    })
}

/// Quantization rule at emit (§6 Config surface: `output_bit_depth`).
/// `Native` leaves the merged float32 samples as-is, at whatever precision
/// the sensor's original bit depth implied; `SixteenBit` rounds every
/// sample to the nearest integer representable in an unsigned 16-bit plane,
/// clamping to `[0, 65535]` so a caller writing straight to a 16-bit buffer
/// never overflows.
fn quantize(samples: &mut [f32], mode: OutputBitDepth) {
    if mode == OutputBitDepth::SixteenBit {
        for s in samples.iter_mut() {
            *s = s.round().clamp(0.0, u16::MAX as f32);
        }
    }
}

/// Elementwise minimum black level across the burst (§6: "preserved as the
/// minimum across the burst").
fn elementwise_min(metas: &[FrameMeta]) -> Vec<f32> {
    let mut out = metas[0].black_level.clone();
    for meta in metas.iter().skip(1) {
        for (o, &v) in out.iter_mut().zip(meta.black_level.iter()) {
            *o = o.min(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_configs_halve_and_clamp_at_eight() {
        let configs = derive_level_configs(4, 32, 2);
        assert_eq!(configs.iter().map(|c| c.tile_size).collect::<Vec<_>>(), vec![32, 16, 8, 8]);
        assert!(configs[0].use_l2);
        assert!(!configs[1].use_l2);
    }

    #[test]
    fn quantize_native_leaves_samples_untouched() {
        let mut samples = vec![-1.0, 1000.25, 70000.0];
        quantize(&mut samples, OutputBitDepth::Native);
        assert_eq!(samples, vec![-1.0, 1000.25, 70000.0]);
    }

    #[test]
    fn quantize_sixteen_bit_rounds_and_clamps() {
        let mut samples = vec![-5.0, 1000.4, 1000.6, 70000.0];
        quantize(&mut samples, OutputBitDepth::SixteenBit);
        assert_eq!(samples, vec![0.0, 1000.0, 1001.0, u16::MAX as f32]);
    }

    #[test]
    fn elementwise_min_takes_the_smaller_black_level_per_cell() {
        let metas = vec![
            FrameMeta { exposure_bias: 0, black_level: vec![64.0, 70.0], white_level: 1023.0, color_factors: [1.0; 3], hot_pixel_weights: vec![] },
            FrameMeta { exposure_bias: 0, black_level: vec![60.0, 80.0], white_level: 1023.0, color_factors: [1.0; 3], hot_pixel_weights: vec![] },
        ];
        assert_eq!(elementwise_min(&metas), vec![60.0, 70.0]);
    }
}
