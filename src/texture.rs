// SPDX-License-Identifier: GPL-3.0-only

//! Texture primitives (C2).
//!
//! Raw sensor data is float32, not natively representable in a filterable
//! texture format, so — like `burst_mode`'s frame/tile buffers — a
//! "texture" here is a GPU storage buffer of `width * height * channels`
//! `f32`s plus its shape; kernels do their own bilinear/bicubic math instead
//! of relying on hardware texture sampling.

use crate::errors::ErrorKind;
use crate::gpu::helpers::{self, BindingKind};
use crate::gpu::{GpuContext, wgpu};
use crate::params::{
    BinomialBlurParams, HotPixelParams, PadCropParams, PrepareFrameParams, ReduceParams,
    UpsampleParams, WeightedAddParams,
};

const PAD_CROP_SHADER: &str = include_str!("shaders/pad_crop.wgsl");
const BINOMIAL_BLUR_SHADER: &str = include_str!("shaders/binomial_blur.wgsl");
const UPSAMPLE_SHADER: &str = include_str!("shaders/upsample.wgsl");
const HOT_PIXEL_SHADER: &str = include_str!("shaders/hot_pixel.wgsl");
const PREPARE_FRAME_SHADER: &str = include_str!("shaders/prepare_frame.wgsl");
const WEIGHTED_ADD_SHADER: &str = include_str!("shaders/weighted_add.wgsl");
const REDUCE_SHADER: &str = include_str!("shaders/reduce.wgsl");
const COLOR_DIFFERENCE_SHADER: &str = include_str!("shaders/color_difference.wgsl");

/// A GPU-resident float32 plane: one or more channels, `width * height` each.
#[derive(Debug)]
pub struct GpuTexture {
    pub buffer: wgpu::Buffer,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl GpuTexture {
    pub fn element_count(&self) -> usize {
        (self.width * self.height * self.channels) as usize
    }

    /// Upload host-side data as a new GPU texture.
    pub fn from_host(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        channels: u32,
        data: &[f32],
    ) -> Result<Self, ErrorKind> {
        use wgpu::util::DeviceExt;
        if data.len() != (width * height * channels) as usize {
            return Err(ErrorKind::Internal(format!(
                "host data length {} does not match {width}x{height}x{channels}",
                data.len()
            )));
        }
        let buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        Ok(Self {
            buffer,
            width,
            height,
            channels,
        })
    }

    /// Allocate a zero-initialized texture of the given shape.
    pub fn zeroed(
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        channels: u32,
    ) -> Result<Self, ErrorKind> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(ErrorKind::Internal(format!(
                "attempted to allocate zero-sized texture {width}x{height}x{channels}"
            )));
        }
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (width as u64 * height as u64 * channels as u64) * std::mem::size_of::<f32>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Self {
            buffer,
            width,
            height,
            channels,
        })
    }

    pub fn read_to_host(&self, ctx: &GpuContext) -> Result<Vec<f32>, ErrorKind> {
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-staging"),
            size: self.buffer.size(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, self.buffer.size());
        ctx.submit_and_wait(encoder)?;
        ctx.read_f32_buffer(&staging, self.element_count())
    }
}

pub(crate) fn uniform_buffer<T: bytemuck::Pod>(ctx: &GpuContext, label: &str, params: &T) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        })
}

pub(crate) fn dispatch_2d(
    ctx: &GpuContext,
    kernel_name: &'static str,
    shader_src: &'static str,
    entry_point: &str,
    bindings: &[BindingKind],
    buffers: &[&wgpu::Buffer],
    width: u32,
    height: u32,
) -> Result<(), ErrorKind> {
    let cached = ctx.pipeline_for(kernel_name, |device| {
        let layout = helpers::create_layout(device, kernel_name, bindings);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel_name),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let module = helpers::create_shader_module(device, kernel_name, shader_src);
        let pipeline = helpers::create_pipeline(device, kernel_name, &pipeline_layout, &module, entry_point);
        Ok(crate::gpu::CachedPipeline {
            pipeline: std::sync::Arc::new(pipeline),
            bind_group_layout: std::sync::Arc::new(layout),
        })
    })?;

    let entries: Vec<wgpu::BindGroupEntry> = buffers
        .iter()
        .enumerate()
        .map(|(i, b)| wgpu::BindGroupEntry {
            binding: i as u32,
            resource: b.as_entire_binding(),
        })
        .collect();
    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(kernel_name),
        layout: &cached.bind_group_layout,
        entries: &entries,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(kernel_name) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel_name),
            timestamp_writes: None,
        });
        pass.set_pipeline(&cached.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(crate::gpu::dispatch_size(width, 8), crate::gpu::dispatch_size(height, 8), 1);
    }
    ctx.submit_and_wait(encoder)
}

/// `pad(tex, px0,px1,py0,py1)` → texture of the enlarged size, zero fill in
/// the pad.
pub fn pad(
    ctx: &GpuContext,
    src: &GpuTexture,
    left: u32,
    right: u32,
    top: u32,
    bottom: u32,
) -> Result<GpuTexture, ErrorKind> {
    let dst_width = src.width + left + right;
    let dst_height = src.height + top + bottom;
    let dst = GpuTexture::zeroed(ctx, "pad-dst", dst_width, dst_height, src.channels)?;
    let params = PadCropParams {
        src_width: src.width,
        src_height: src.height,
        dst_width,
        dst_height,
        pad_left: left as i32,
        pad_top: top as i32,
        _padding0: 0,
        _padding1: 0,
    };
    let params_buf = uniform_buffer(ctx, "pad-params", &params);
    dispatch_2d(
        ctx,
        "pad",
        PAD_CROP_SHADER,
        "pad_main",
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

/// `crop(tex, …)` → inverse of `pad`.
pub fn crop(
    ctx: &GpuContext,
    src: &GpuTexture,
    left: u32,
    top: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<GpuTexture, ErrorKind> {
    let dst = GpuTexture::zeroed(ctx, "crop-dst", dst_width, dst_height, src.channels)?;
    let params = PadCropParams {
        src_width: src.width,
        src_height: src.height,
        dst_width,
        dst_height,
        pad_left: -(left as i32),
        pad_top: -(top as i32),
        _padding0: 0,
        _padding1: 0,
    };
    let params_buf = uniform_buffer(ctx, "crop-params", &params);
    dispatch_2d(
        ctx,
        "crop",
        PAD_CROP_SHADER,
        "crop_main",
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

/// `binomial_blur(tex, cfa_width, k)`: separable binomial filter of support
/// `k`, applied independently per CFA cell, reflect at edges.
pub fn binomial_blur(
    ctx: &GpuContext,
    src: &GpuTexture,
    cfa_width: u32,
    support: u32,
) -> Result<GpuTexture, ErrorKind> {
    let horizontal_pass = GpuTexture::zeroed(ctx, "blur-h", src.width, src.height, src.channels)?;
    let params_h = BinomialBlurParams {
        width: src.width,
        height: src.height,
        cfa_width,
        support,
        horizontal: 1,
        _padding0: 0,
        _padding1: 0,
        _padding2: 0,
    };
    let buf_h = uniform_buffer(ctx, "blur-h-params", &params_h);
    dispatch_2d(
        ctx,
        "binomial_blur",
        BINOMIAL_BLUR_SHADER,
        "blur_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&src.buffer, &horizontal_pass.buffer, &buf_h],
        src.width,
        src.height,
    )?;

    let vertical_pass = GpuTexture::zeroed(ctx, "blur-v", src.width, src.height, src.channels)?;
    let params_v = BinomialBlurParams {
        horizontal: 0,
        ..params_h
    };
    let buf_v = uniform_buffer(ctx, "blur-v-params", &params_v);
    dispatch_2d(
        ctx,
        "binomial_blur",
        BINOMIAL_BLUR_SHADER,
        "blur_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&horizontal_pass.buffer, &vertical_pass.buffer, &buf_v],
        src.width,
        src.height,
    )?;
    Ok(vertical_pass)
}

/// `upsample(tex, w, h, mode)` → bilinear or bicubic.
pub fn upsample(
    ctx: &GpuContext,
    src: &GpuTexture,
    dst_width: u32,
    dst_height: u32,
    bicubic: bool,
) -> Result<GpuTexture, ErrorKind> {
    let dst = GpuTexture::zeroed(ctx, "upsample-dst", dst_width, dst_height, src.channels)?;
    let params = UpsampleParams {
        src_width: src.width,
        src_height: src.height,
        dst_width,
        dst_height,
        bicubic: bicubic as u32,
        _padding0: 0,
        _padding1: 0,
        _padding2: 0,
    };
    let params_buf = uniform_buffer(ctx, "upsample-params", &params);
    dispatch_2d(
        ctx,
        "upsample",
        UPSAMPLE_SHADER,
        "upsample_main",
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

/// `hot_pixel_correct(tex, weight_map)`: replaces outliers using neighbors;
/// idempotent when `weight_map` is all zero.
pub fn hot_pixel_correct(
    ctx: &GpuContext,
    src: &GpuTexture,
    weights: &GpuTexture,
    cfa_width: u32,
) -> Result<GpuTexture, ErrorKind> {
    let dst = GpuTexture::zeroed(ctx, "hotpixel-dst", src.width, src.height, src.channels)?;
    let params = HotPixelParams {
        width: src.width,
        height: src.height,
        cfa_width,
        _padding0: 0,
    };
    let params_buf = uniform_buffer(ctx, "hotpixel-params", &params);
    dispatch_2d(
        ctx,
        "hot_pixel_correct",
        HOT_PIXEL_SHADER,
        "hot_pixel_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&src.buffer, &weights.buffer, &dst.buffer, &params_buf],
        src.width,
        src.height,
    )?;
    Ok(dst)
}

/// `prepare_frame(raw, hp_weights, pad, ΔEV, black_level, cfa)`: hot-pixel
/// correct, subtract black level, multiply by `2^ΔEV`, then symmetrically
/// pad. Used by both the aligner and the merger.
#[allow(clippy::too_many_arguments)]
pub fn prepare_frame(
    ctx: &GpuContext,
    raw: &GpuTexture,
    hp_weights: &GpuTexture,
    cfa_width: u32,
    exposure_factor: f32,
    black_level: &[f32],
    tile_factor: u32,
) -> Result<GpuTexture, ErrorKind> {
    let corrected = hot_pixel_correct(ctx, raw, hp_weights, cfa_width)?;

    let mut black = [0.0f32; 36];
    black[..black_level.len()].copy_from_slice(black_level);
    let params = PrepareFrameParams {
        width: corrected.width,
        height: corrected.height,
        cfa_width,
        exposure_factor,
        black_level: black,
    };
    let params_buf = uniform_buffer(ctx, "prepare-frame-params", &params);
    let adjusted = GpuTexture::zeroed(ctx, "prepare-frame-dst", corrected.width, corrected.height, corrected.channels)?;
    dispatch_2d(
        ctx,
        "prepare_frame",
        PREPARE_FRAME_SHADER,
        "prepare_frame_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&corrected.buffer, &adjusted.buffer, &params_buf],
        corrected.width,
        corrected.height,
    )?;

    let padded_width = adjusted.width.div_ceil(tile_factor) * tile_factor;
    let padded_height = adjusted.height.div_ceil(tile_factor) * tile_factor;
    let pad_x = padded_width - adjusted.width;
    let pad_y = padded_height - adjusted.height;
    let left = pad_x / 2;
    let top = pad_y / 2;
    pad(ctx, &adjusted, left, pad_x - left, top, pad_y - top)
}

/// `weighted_add(a, b, w)` → `a*(1-w) + b*w`; `w` is bilinearly sampled if
/// coarser than `a`/`b`.
pub fn weighted_add(
    ctx: &GpuContext,
    a: &GpuTexture,
    b: &GpuTexture,
    weight: &GpuTexture,
) -> Result<GpuTexture, ErrorKind> {
    if a.width != b.width || a.height != b.height {
        return Err(ErrorKind::Internal(
            "weighted_add operands must share shape".into(),
        ));
    }
    let dst = GpuTexture::zeroed(ctx, "weighted-add-dst", a.width, a.height, a.channels)?;
    let params = WeightedAddParams {
        width: a.width,
        height: a.height,
        weight_width: weight.width,
        weight_height: weight.height,
    };
    let params_buf = uniform_buffer(ctx, "weighted-add-params", &params);
    dispatch_2d(
        ctx,
        "weighted_add",
        WEIGHTED_ADD_SHADER,
        "weighted_add_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&a.buffer, &b.buffer, &weight.buffer, &dst.buffer, &params_buf],
        a.width,
        a.height,
    )?;
    Ok(dst)
}

/// `texture_mean(tex, per_sub_pixel, cfa)` → buffer of means, two-pass
/// (columns then row).
pub fn texture_mean(
    ctx: &GpuContext,
    src: &GpuTexture,
    cfa_width: u32,
    per_sub_pixel: bool,
) -> Result<Vec<f32>, ErrorKind> {
    reduce(ctx, src, cfa_width, per_sub_pixel, "mean_columns_main", "mean_combine_main")
}

/// `texture_max(tex)` → single-float buffer, two-pass (max along y, then max
/// along x).
pub fn texture_max(ctx: &GpuContext, src: &GpuTexture) -> Result<f32, ErrorKind> {
    let result = reduce(ctx, src, 1, false, "max_columns_main", "max_combine_main")?;
    Ok(result[0])
}

/// Two-dispatch column reduction: `columns_entry` runs in parallel (one
/// invocation per column) writing `column_pass`, then `combine_entry` runs
/// as exactly one workgroup of size 1 that folds `column_pass` (or, for the
/// per-CFA-cell mean, `src_a` directly) into `output`. WGSL has no
/// cross-workgroup synchronization within a dispatch, so the combine step
/// cannot safely be folded into the same dispatch as the column pass — the
/// `submit_and_wait` inside each `dispatch_2d` call is the fence that makes
/// the column writes visible before the combine pass reads them (§4.2 / §9
/// open question: "must use a single-thread dispatch... to be correct").
fn reduce(
    ctx: &GpuContext,
    src: &GpuTexture,
    cfa_width: u32,
    per_sub_pixel: bool,
    columns_entry: &'static str,
    combine_entry: &'static str,
) -> Result<Vec<f32>, ErrorKind> {
    let out_len = if per_sub_pixel {
        (cfa_width * cfa_width) as usize
    } else {
        1
    };
    let column_pass = ctx.alloc_f32_buffer(
        "reduce-columns",
        src.width as usize,
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
    );
    let output = ctx.alloc_f32_buffer(
        "reduce-output",
        out_len.max(1),
        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
    );
    let params = ReduceParams {
        width: src.width,
        height: src.height,
        cfa_width,
        per_sub_pixel: per_sub_pixel as u32,
    };
    let params_buf = uniform_buffer(ctx, "reduce-params", &params);
    let bindings = [
        BindingKind::StorageRead,
        BindingKind::StorageReadWrite,
        BindingKind::StorageReadWrite,
        BindingKind::Uniform,
    ];
    let buffers: [&wgpu::Buffer; 4] = [&src.buffer, &column_pass, &output, &params_buf];

    dispatch_2d(ctx, columns_entry, REDUCE_SHADER, columns_entry, &bindings, &buffers, src.width.max(1), 1)?;
    // Exactly one workgroup of one invocation: `combine_entry` is declared
    // `@workgroup_size(1, 1, 1)`, so dispatching a 1x1 workgroup grid here
    // yields a single thread total, not "thread 0 of a parallel dispatch".
    dispatch_2d(ctx, combine_entry, REDUCE_SHADER, combine_entry, &bindings, &buffers, 1, 1)?;

    ctx.read_f32_buffer(&output, out_len)
}

/// `color_difference(a,b,cfa)` → sum of per-channel `|a-b|` per CFA
/// super-pixel, returned as a buffer of one scalar per super-pixel.
pub fn color_difference(
    ctx: &GpuContext,
    a: &GpuTexture,
    b: &GpuTexture,
    cfa_width: u32,
) -> Result<GpuTexture, ErrorKind> {
    if a.width != b.width || a.height != b.height {
        return Err(ErrorKind::Internal(
            "color_difference operands must share shape".into(),
        ));
    }
    let dst_width = a.width / cfa_width;
    let dst_height = a.height / cfa_width;
    let dst = GpuTexture::zeroed(ctx, "color-diff-dst", dst_width.max(1), dst_height.max(1), 1)?;
    let params = ReduceParams {
        width: a.width,
        height: a.height,
        cfa_width,
        per_sub_pixel: 0,
    };
    let params_buf = uniform_buffer(ctx, "color-diff-params", &params);
    dispatch_2d(
        ctx,
        "color_difference",
        COLOR_DIFFERENCE_SHADER,
        "color_difference_main",
        &[
            BindingKind::StorageRead,
            BindingKind::StorageRead,
            BindingKind::StorageReadWrite,
            BindingKind::Uniform,
        ],
        &[&a.buffer, &b.buffer, &dst.buffer, &params_buf],
        dst_width.max(1),
        dst_height.max(1),
    )?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate_shader(source: &str) {
        let module = naga::front::wgsl::parse_str(source).expect("shader should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("shader should validate");
    }

    #[test]
    fn pad_crop_shader_is_valid() {
        validate_shader(PAD_CROP_SHADER);
    }

    #[test]
    fn binomial_blur_shader_is_valid() {
        validate_shader(BINOMIAL_BLUR_SHADER);
    }

    #[test]
    fn upsample_shader_is_valid() {
        validate_shader(UPSAMPLE_SHADER);
    }

    #[test]
    fn hot_pixel_shader_is_valid() {
        validate_shader(HOT_PIXEL_SHADER);
    }

    #[test]
    fn prepare_frame_shader_is_valid() {
        validate_shader(PREPARE_FRAME_SHADER);
    }

    #[test]
    fn weighted_add_shader_is_valid() {
        validate_shader(WEIGHTED_ADD_SHADER);
    }

    #[test]
    fn reduce_shader_is_valid() {
        validate_shader(REDUCE_SHADER);
    }

    #[test]
    fn color_difference_shader_is_valid() {
        validate_shader(COLOR_DIFFERENCE_SHADER);
    }
}
