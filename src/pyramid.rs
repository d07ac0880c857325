// SPDX-License-Identifier: GPL-3.0-only

//! Multi-resolution pyramid builder (C3).
//!
//! Level 0 collapses the CFA mosaic to single-channel luminance (factor
//! `cfa_width`, color-factor-weighted, black-level-mean-subtracted); every
//! level after that is a plain 2x area average. Level count is the smallest
//! `L` such that `min(W,H) / product(factors) <= search_distance`.

use crate::errors::ErrorKind;
use crate::gpu::GpuContext;
use crate::gpu::helpers::BindingKind;
use crate::params::PyramidParams;
use crate::texture::{self, GpuTexture};

const PYRAMID_SHADER: &str = include_str!("shaders/pyramid.wgsl");

/// Ordered list of single-channel textures, level 0 = finest.
#[derive(Debug)]
pub struct Pyramid {
    pub levels: Vec<GpuTexture>,
}

impl Pyramid {
    pub fn finest(&self) -> &GpuTexture {
        &self.levels[0]
    }

    pub fn coarsest(&self) -> &GpuTexture {
        self.levels.last().expect("pyramid always has >= 1 level")
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Level downscale factors: `[cfa_width, 2, 2, ...]`, one entry per level,
/// stopping once `min(dim) / product <= search_distance`.
fn level_factors(width: u32, height: u32, cfa_width: u32, search_distance: u32) -> Vec<u32> {
    let mut factors = vec![cfa_width];
    let mut product = cfa_width;
    loop {
        let min_dim = width.min(height) / product;
        if min_dim <= search_distance.max(1) {
            break;
        }
        factors.push(2);
        product *= 2;
    }
    factors
}

#[allow(clippy::too_many_arguments)]
fn dispatch_level(
    ctx: &GpuContext,
    entry_point: &'static str,
    src: &GpuTexture,
    dst_width: u32,
    dst_height: u32,
    factor: u32,
    collapse_cfa: bool,
    black_level_mean: f32,
    color_factors: [f32; 3],
) -> Result<GpuTexture, ErrorKind> {
    let dst = GpuTexture::zeroed(ctx, entry_point, dst_width, dst_height, 1)?;
    let params = PyramidParams {
        src_width: src.width,
        src_height: src.height,
        dst_width,
        dst_height,
        factor,
        collapse_cfa: collapse_cfa as u32,
        black_level_mean,
        _padding0: 0,
        color_factors: [color_factors[0], color_factors[1], color_factors[2], 0.0],
    };
    let params_buf = texture::uniform_buffer(ctx, "pyramid-params", &params);
    texture::dispatch_2d(
        ctx,
        entry_point,
        PYRAMID_SHADER,
        entry_point,
        &[
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&src.buffer, &dst.buffer, &params_buf],
        dst_width,
        dst_height,
    )?;
    Ok(dst)
}

/// Build a pyramid from a prepared (black-level-subtracted, padded) texture.
#[allow(clippy::too_many_arguments)]
pub fn build(
    ctx: &GpuContext,
    prepared: &GpuTexture,
    cfa_width: u32,
    color_factors: [f32; 3],
    black_level_mean: f32,
    search_distance: u32,
) -> Result<Pyramid, ErrorKind> {
    if cfa_width == 0 {
        return Err(ErrorKind::InvalidArgument("cfa_width must be > 0".into()));
    }
    let factors = level_factors(prepared.width, prepared.height, cfa_width, search_distance);

    let mut levels: Vec<GpuTexture> = Vec::with_capacity(factors.len());
    let mut current = prepared;

    for (i, &factor) in factors.iter().enumerate() {
        let dst_width = current.width.div_ceil(factor).max(1);
        let dst_height = current.height.div_ceil(factor).max(1);
        let collapse = i == 0;
        let level = dispatch_level(
            ctx,
            if collapse { "collapse_main" } else { "downsample_main" },
            current,
            dst_width,
            dst_height,
            factor,
            collapse,
            black_level_mean,
            color_factors,
        )?;
        levels.push(level);
        current = levels.last().unwrap();
    }

    Ok(Pyramid { levels })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_factors_stop_at_search_distance() {
        let factors = level_factors(4096, 3072, 2, 2);
        assert_eq!(factors[0], 2);
        assert!(factors.iter().skip(1).all(|&f| f == 2));
        let product: u32 = factors.iter().product();
        assert!(3072 / product <= 2);
        assert!(3072 / (product / factors.last().unwrap()) > 2 || factors.len() == 1);
    }

    #[test]
    fn level_factors_xtrans_starts_at_six() {
        let factors = level_factors(1200, 1200, 6, 2);
        assert_eq!(factors[0], 6);
    }

    #[test]
    fn level_factors_small_frame_yields_single_level() {
        let factors = level_factors(8, 8, 2, 4);
        assert_eq!(factors, vec![2]);
    }

    #[test]
    fn pyramid_shader_is_valid() {
        let module = naga::front::wgsl::parse_str(PYRAMID_SHADER).expect("shader should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("shader should validate");
    }
}
