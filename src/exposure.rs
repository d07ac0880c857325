// SPDX-License-Identifier: GPL-3.0-only

//! Exposure normalizer (C7 §4.7): `texture_max` reduction followed by a
//! linear or locally-adaptive tone-mapped gain, applied post-merge.

use crate::config::ExposureControl;
use crate::errors::ErrorKind;
use crate::gpu::GpuContext;
use crate::gpu::helpers::BindingKind;
use crate::params::ExposureParams;
use crate::texture::{self, GpuTexture};

const EXPOSURE_SHADER: &str = include_str!("shaders/exposure.wgsl");

/// Guards `max - black_min` from collapsing to (near) zero on a degenerate
/// (e.g. all-black) merged frame.
const DENOM_EPSILON: f32 = 1e-4;

/// Normalize `merged`'s exposure per `mode`, returning the corrected texture
/// and the scalar gain actually applied (reported back via `MergedRaw`).
pub fn normalize(
    ctx: &GpuContext,
    merged: &GpuTexture,
    cfa_width: u32,
    mode: ExposureControl,
    black_min: f32,
    white_level: f32,
    color_factors: [f32; 3],
) -> Result<(GpuTexture, f32), ErrorKind> {
    if mode == ExposureControl::Off {
        let passthrough =
            GpuTexture::from_host(ctx, "exposure-passthrough", merged.width, merged.height, merged.channels, &merged.read_to_host(ctx)?)?;
        return Ok((passthrough, 1.0));
    }

    let max_value = texture::texture_max(ctx, merged)?;
    let raw_denom = max_value - black_min;
    if raw_denom < DENOM_EPSILON {
        tracing::warn!(raw_denom, "max - black_min near zero, clamping to epsilon");
    }
    let denom = raw_denom.max(DENOM_EPSILON);
    let tone_mapped = mode.is_tone_mapped();

    let luma = if tone_mapped {
        let support = if cfa_width == 6 { 1 } else { 2 };
        texture::binomial_blur(ctx, merged, cfa_width, support)?
    } else {
        GpuTexture::zeroed(ctx, "exposure-luma-dummy", merged.width, merged.height, merged.channels)?
    };

    // For linear modes, `scale` is the multiplicative gain directly. For
    // tone-mapped modes, `scale` is the target mid-tone luminance the local
    // gain solves for (18% gray at 0 EV, doubled at +1 EV).
    let (scale, cap_2x) = match mode {
        ExposureControl::Off => unreachable!("handled above"),
        ExposureControl::Linear2X => ((white_level - black_min) / denom, true),
        ExposureControl::LinearFullRange => ((white_level - black_min) / denom, false),
        ExposureControl::Curve0EV => (white_level * 0.18, false),
        ExposureControl::Curve1EV => (white_level * 0.36, false),
    };

    let dst = GpuTexture::zeroed(ctx, "exposure-out", merged.width, merged.height, merged.channels)?;
    let params = ExposureParams {
        width: merged.width,
        height: merged.height,
        cfa_width,
        tone_mapped: tone_mapped as u32,
        black_min,
        white_level,
        scale,
        cap_2x: cap_2x as u32,
        color_factors: [color_factors[0], color_factors[1], color_factors[2], 0.0],
    };
    let params_buf = texture::uniform_buffer(ctx, "exposure-params", &params);
    texture::dispatch_2d(
        ctx,
        "exposure_main",
        EXPOSURE_SHADER,
        "exposure_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&merged.buffer, &luma.buffer, &dst.buffer, &params_buf],
        merged.width,
        merged.height,
    )?;

    let applied_gain = if tone_mapped { scale / white_level.max(DENOM_EPSILON) } else { scale.min(if cap_2x { 2.0 } else { f32::INFINITY }) };
    Ok((dst, applied_gain))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_shader_is_valid() {
        let module = naga::front::wgsl::parse_str(EXPOSURE_SHADER).expect("shader should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("shader should validate");
    }

    #[test]
    fn linear_scale_matches_white_minus_black_over_range() {
        let black_min = 64.0;
        let white_level = 1023.0;
        let max_value = 900.0;
        let denom = (max_value - black_min).max(DENOM_EPSILON);
        let scale = (white_level - black_min) / denom;
        assert!(scale > 1.0, "a merged max below white level should brighten");
    }

    #[test]
    fn denom_guard_prevents_division_by_near_zero() {
        let black_min = 64.0;
        let max_value = 64.0 + 1e-9;
        let denom = (max_value - black_min).max(DENOM_EPSILON);
        assert!(denom >= DENOM_EPSILON);
    }
}
