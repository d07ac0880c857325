// SPDX-License-Identifier: GPL-3.0-only

//! Hierarchical aligner (C4): coarse-to-fine tile matching across the
//! pyramid, producing one motion vector per level-0 tile.

use crate::errors::ErrorKind;
use crate::gpu::GpuContext;
use crate::gpu::helpers::BindingKind;
use crate::params::{AlignParams, WarpTileParams};
use crate::pyramid::Pyramid;
use crate::texture::{self, GpuTexture};

const ALIGN_TILE_SHADER: &str = include_str!("../shaders/align_tile.wgsl");
const ALIGN_WARP_SHADER: &str = include_str!("../shaders/align_warp.wgsl");

/// One motion vector per level-0 tile, row-major, even-integer pixel units.
#[derive(Debug, Clone)]
pub struct AlignmentField {
    pub n_tiles_x: u32,
    pub n_tiles_y: u32,
    pub offsets: Vec<(i32, i32)>,
}

impl AlignmentField {
    pub fn get(&self, tx: u32, ty: u32) -> (i32, i32) {
        self.offsets[(ty * self.n_tiles_x + tx) as usize]
    }
}

/// Per-level alignment configuration, one entry per pyramid level, coarsest
/// last (matching `Pyramid::levels`' finest-first ordering read in reverse).
#[derive(Debug, Clone, Copy)]
pub struct LevelConfig {
    pub tile_size: u32,
    pub search_dist: i32,
    pub use_l2: bool,
}

fn dispatch_level(
    ctx: &GpuContext,
    ref_tex: &GpuTexture,
    cmp_tex: &GpuTexture,
    prev_offsets: &GpuTexture,
    cfg: LevelConfig,
    upsample_factor: u32,
    prev_n_tiles_x: u32,
    prev_n_tiles_y: u32,
    uniform_exposure: bool,
    finest_level: bool,
) -> Result<GpuTexture, ErrorKind> {
    if ref_tex.width % cfg.tile_size != 0 || ref_tex.height % cfg.tile_size != 0 {
        return Err(ErrorKind::InvalidArgument(format!(
            "pyramid level {}x{} is not a multiple of tile_size {}",
            ref_tex.width, ref_tex.height, cfg.tile_size
        )));
    }
    let n_tiles_x = ref_tex.width / cfg.tile_size;
    let n_tiles_y = ref_tex.height / cfg.tile_size;

    // 3 floats per tile: (x, y, cost). The cost rides along so the next
    // finer level can pick its upsample candidates by actual matching cost
    // rather than a fixed neighbor direction (§4.4 step 4).
    let out = GpuTexture::zeroed(ctx, "align-out", n_tiles_x, n_tiles_y, 3)?;
    let params = AlignParams {
        ref_width: ref_tex.width,
        ref_height: ref_tex.height,
        cmp_width: cmp_tex.width,
        cmp_height: cmp_tex.height,
        tile_size: cfg.tile_size,
        n_tiles_x,
        n_tiles_y,
        search_dist: cfg.search_dist,
        upsample_factor,
        prev_n_tiles_x,
        prev_n_tiles_y,
        use_l2: cfg.use_l2 as u32,
        uniform_exposure: uniform_exposure as u32,
        finest_level: finest_level as u32,
        _padding0: 0,
        _padding1: 0,
    };
    let params_buf = texture::uniform_buffer(ctx, "align-params", &params);
    texture::dispatch_2d(
        ctx,
        "align_tile_main",
        ALIGN_TILE_SHADER,
        "align_tile_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[
            &ref_tex.buffer,
            &cmp_tex.buffer,
            &prev_offsets.buffer,
            &out.buffer,
            &params_buf,
        ],
        n_tiles_x,
        n_tiles_y,
    )?;
    Ok(out)
}

fn validate_level_configs(
    ref_levels: usize,
    cmp_levels: usize,
    num_configs: usize,
) -> Result<(), ErrorKind> {
    if num_configs != ref_levels || ref_levels != cmp_levels {
        return Err(ErrorKind::InvalidArgument(
            "level_configs must have one entry per pyramid level".into(),
        ));
    }
    Ok(())
}

/// Align `cmp_pyramid` onto `ref_pyramid`, coarse to fine. `level_configs`
/// is indexed the same way as `Pyramid::levels` (finest first); the walk
/// itself runs coarsest to finest.
pub fn align(
    ctx: &GpuContext,
    ref_pyramid: &Pyramid,
    cmp_pyramid: &Pyramid,
    level_configs: &[LevelConfig],
    uniform_exposure: bool,
) -> Result<AlignmentField, ErrorKind> {
    validate_level_configs(ref_pyramid.len(), cmp_pyramid.len(), level_configs.len())?;

    let num_levels = ref_pyramid.len();
    let dummy_prev = GpuTexture::zeroed(ctx, "align-dummy-prev", 1, 1, 3)?;

    let mut prev: Option<(GpuTexture, u32, u32)> = None;

    for level in (0..num_levels).rev() {
        let finest = level == 0;
        let cfg = level_configs[level];
        let (prev_offsets, upsample_factor, prev_n_tiles_x, prev_n_tiles_y) = match &prev {
            None => (&dummy_prev, 0u32, 0u32, 0u32),
            Some((tex, ntx, nty)) => (tex, 2u32, *ntx, *nty),
        };

        let out = dispatch_level(
            ctx,
            &ref_pyramid.levels[level],
            &cmp_pyramid.levels[level],
            prev_offsets,
            cfg,
            upsample_factor,
            prev_n_tiles_x,
            prev_n_tiles_y,
            uniform_exposure,
            finest,
        )?;

        let n_tiles_x = ref_pyramid.levels[level].width / cfg.tile_size;
        let n_tiles_y = ref_pyramid.levels[level].height / cfg.tile_size;
        prev = Some((out, n_tiles_x, n_tiles_y));
    }

    let (finest_tex, n_tiles_x, n_tiles_y) = prev.expect("at least one pyramid level");
    let raw = finest_tex.read_to_host(ctx)?;
    // Each tile is (x, y, cost); the cost only matters for feeding the next
    // finer level's candidate selection, so it's dropped from the field the
    // merge engines consume.
    let offsets = raw
        .chunks_exact(3)
        .map(|triple| (triple[0].round() as i32, triple[1].round() as i32))
        .collect();

    Ok(AlignmentField {
        n_tiles_x,
        n_tiles_y,
        offsets,
    })
}

/// Resample `cmp` onto the reference's coordinate system using `field`
/// (§4.5/§4.6 "align the comparison texture", consumed by both merge
/// engines). Offsets are even integers, so a nearest-pixel shift suffices.
pub fn warp(
    ctx: &GpuContext,
    cmp: &GpuTexture,
    field: &AlignmentField,
    tile_size: u32,
) -> Result<GpuTexture, ErrorKind> {
    let mut flat = Vec::with_capacity(field.offsets.len() * 2);
    for &(x, y) in &field.offsets {
        flat.push(x as f32);
        flat.push(y as f32);
    }
    let offsets_tex = GpuTexture::from_host(
        ctx,
        "align-warp-offsets",
        field.n_tiles_x,
        field.n_tiles_y,
        2,
        &flat,
    )?;
    let dst = GpuTexture::zeroed(ctx, "align-warp-dst", cmp.width, cmp.height, cmp.channels)?;
    let params = WarpTileParams {
        width: cmp.width,
        height: cmp.height,
        tile_size,
        n_tiles_x: field.n_tiles_x,
        n_tiles_y: field.n_tiles_y,
        _padding0: 0,
        _padding1: 0,
        _padding2: 0,
    };
    let params_buf = texture::uniform_buffer(ctx, "align-warp-params", &params);
    texture::dispatch_2d(
        ctx,
        "warp_main",
        ALIGN_WARP_SHADER,
        "warp_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&cmp.buffer, &offsets_tex.buffer, &dst.buffer, &params_buf],
        cmp.width,
        cmp.height,
    )?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_warp_shader_is_valid() {
        let module = naga::front::wgsl::parse_str(ALIGN_WARP_SHADER).expect("shader should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("shader should validate");
    }

    #[test]
    fn align_tile_shader_is_valid() {
        let module = naga::front::wgsl::parse_str(ALIGN_TILE_SHADER).expect("shader should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("shader should validate");
    }

    #[test]
    fn alignment_field_indexes_row_major() {
        let field = AlignmentField {
            n_tiles_x: 3,
            n_tiles_y: 2,
            offsets: vec![(0, 0), (2, 0), (4, 0), (0, 2), (2, 2), (4, 2)],
        };
        assert_eq!(field.get(2, 1), (4, 2));
    }

    #[test]
    fn align_rejects_mismatched_level_configs() {
        assert!(validate_level_configs(1, 1, 2).is_err());
        assert!(validate_level_configs(3, 2, 3).is_err());
        assert!(validate_level_configs(3, 3, 3).is_ok());
    }
}
