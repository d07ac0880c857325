// SPDX-License-Identifier: GPL-3.0-only
//
// Consolidated GPU parameter structs passed to WGSL shaders.
//
// All #[repr(C)] structs shared with shader code live here: single source
// of truth for layouts, and a place to hang size assertions that catch
// WGSL/Rust mismatches at compile time.

/// Parameters for the pad/crop shaders (C2 `pad`/`crop`).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PadCropParams {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    pub pad_left: i32,
    pub pad_top: i32,
    pub _padding0: u32,
    pub _padding1: u32,
}

/// Parameters for the separable binomial-blur shader (C2 `binomial_blur`).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BinomialBlurParams {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    /// Filter support (16 for spatial-merge noise blur, 2 for tone-map luma).
    pub support: u32,
    /// 0 = horizontal pass, 1 = vertical pass.
    pub horizontal: u32,
    pub _padding0: u32,
    pub _padding1: u32,
    pub _padding2: u32,
}

/// Parameters for bilinear/bicubic upsample (C2 `upsample`).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct UpsampleParams {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    /// 0 = bilinear, 1 = bicubic.
    pub bicubic: u32,
    pub _padding0: u32,
    pub _padding1: u32,
    pub _padding2: u32,
}

/// Parameters for hot-pixel correction (C2 `hot_pixel_correct`).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HotPixelParams {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    pub _padding0: u32,
}

/// Parameters for `prepare_frame` (C2): black-level subtraction, exposure
/// equalization, hot-pixel correction baked into one pass ahead of padding.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrepareFrameParams {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    /// `2^((ref_bias - this_bias) / 100)`.
    pub exposure_factor: f32,
    /// Per-CFA-cell black level, up to 6x6=36 cells; only the first
    /// `cfa_width * cfa_width` entries are read by the shader.
    pub black_level: [f32; 36],
}

/// Parameters for `weighted_add` (C2).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WeightedAddParams {
    pub width: u32,
    pub height: u32,
    pub weight_width: u32,
    pub weight_height: u32,
}

/// Parameters for `texture_mean`/`texture_max`/`color_difference` reductions
/// (C2). `color_difference` reads `a`/`b` and ignores `max`-only fields.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ReduceParams {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    pub per_sub_pixel: u32,
}

/// Parameters for the pyramid-level downsample shader (C3).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PyramidParams {
    pub src_width: u32,
    pub src_height: u32,
    pub dst_width: u32,
    pub dst_height: u32,
    /// Downscale factor for this stage: `cfa_width` at level 0, else 2.
    pub factor: u32,
    /// 1 for the CFA-collapse stage (uses `color_factors`), 0 otherwise.
    pub collapse_cfa: u32,
    pub black_level_mean: f32,
    pub _padding0: u32,
    pub color_factors: [f32; 4],
}

/// Parameters for the tile matching-cost + upsample kernel (C4).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AlignParams {
    pub ref_width: u32,
    pub ref_height: u32,
    pub cmp_width: u32,
    pub cmp_height: u32,
    pub tile_size: u32,
    pub n_tiles_x: u32,
    pub n_tiles_y: u32,
    pub search_dist: i32,
    /// Upsample factor from the coarser level that produced `prev_offsets`
    /// (0 at the coarsest level: start from zero).
    pub upsample_factor: u32,
    pub prev_n_tiles_x: u32,
    pub prev_n_tiles_y: u32,
    pub use_l2: u32,
    pub uniform_exposure: u32,
    pub finest_level: u32,
    pub _padding0: u32,
    pub _padding1: u32,
}

/// Parameters for warping a texture by a per-tile integer alignment field
/// (C4 `warp`, consumed by both merge engines' "align the comparison
/// texture" step).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct WarpTileParams {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub n_tiles_x: u32,
    pub n_tiles_y: u32,
    pub _padding0: u32,
    pub _padding1: u32,
    pub _padding2: u32,
}

/// Parameters for the exposure-normalization shader (C7).
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ExposureParams {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    pub tone_mapped: u32,
    pub black_min: f32,
    pub white_level: f32,
    pub scale: f32,
    pub cap_2x: u32,
    pub color_factors: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<PadCropParams>() == 32);
const _: () = assert!(std::mem::size_of::<BinomialBlurParams>() == 32);
const _: () = assert!(std::mem::size_of::<UpsampleParams>() == 32);
const _: () = assert!(std::mem::size_of::<HotPixelParams>() == 16);
const _: () = assert!(std::mem::size_of::<PrepareFrameParams>() == 160);
const _: () = assert!(std::mem::size_of::<WeightedAddParams>() == 16);
const _: () = assert!(std::mem::size_of::<ReduceParams>() == 16);
const _: () = assert!(std::mem::size_of::<PyramidParams>() == 48);
const _: () = assert!(std::mem::size_of::<AlignParams>() == 64);
const _: () = assert!(std::mem::size_of::<WarpTileParams>() == 32);
const _: () = assert!(std::mem::size_of::<ExposureParams>() == 48);
