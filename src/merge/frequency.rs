// SPDX-License-Identifier: GPL-3.0-only

//! Frequency merge engine (C6 §4.6): per-tile real FFT, Wiener-style pairwise
//! merge with Fourier-shift subpixel refinement, mismatch/highlights/motion
//! norms, deconvolution, and raised-cosine overlap-add reconstruction.
//!
//! Tiles are defined in *per-channel* units: a `t x t` FFT tile covers a
//! `2t x 2t` raw-pixel footprint, sampled at one of four CFA parities
//! `(x % 2, y % 2)` — this is the documented X-Trans simplification from
//! `DESIGN.md` extended uniformly to Bayer, since both only need four
//! interleaved color planes for the Wiener math regardless of the true CFA
//! period. Like `fft.rs`, the per-tile spectral work runs host-side; `merge`
//! reads the (already GPU-aligned) textures back once per frame and returns
//! a freshly uploaded `GpuTexture` holding the merged raw plane.

use crate::errors::ErrorKind;
use crate::gpu::GpuContext;
use crate::texture::GpuTexture;

use super::fft::{self, Complex32, TileSpectrum};

/// X-Trans bursts force `T = 8` regardless of the caller's tile_size (§9
/// open question); Bayer bursts use whatever `tile_size` derives to.
pub fn tile_size_for(cfa_width: u32, requested: u32) -> u32 {
    if cfa_width == 6 { 8 } else { requested }
}

/// Burst-level state machine for the frequency engine (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    PreparedRef,
    Accumulating,
    Deconvolved,
    Inverted,
    BordersCleaned,
    Emitted,
}

impl MergeState {
    fn advance(self, to: MergeState) -> MergeState {
        debug_assert!(
            matches!(
                (self, to),
                (MergeState::Idle, MergeState::PreparedRef)
                    | (MergeState::PreparedRef, MergeState::Accumulating)
                    | (MergeState::Accumulating, MergeState::Accumulating)
                    | (MergeState::Accumulating, MergeState::Deconvolved)
                    | (MergeState::Deconvolved, MergeState::Inverted)
                    | (MergeState::Inverted, MergeState::BordersCleaned)
                    | (MergeState::BordersCleaned, MergeState::Emitted)
            ),
            "illegal frequency-engine state transition {self:?} -> {to:?}"
        );
        to
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrequencyMergeConfig {
    pub tile_size: u32,
    pub robustness_norm: f32,
    pub read_noise: f32,
    pub max_motion_norm: f32,
}

impl Default for FrequencyMergeConfig {
    fn default() -> Self {
        Self {
            tile_size: 16,
            robustness_norm: 1.0,
            read_noise: 5.0,
            max_motion_norm: 8.0,
        }
    }
}

/// The four CFA-parity "channels" a tile is decomposed into.
const CHANNEL_PARITIES: [(usize, usize); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

struct TileGrid {
    t: usize,
    channel_w: usize,
    channel_h: usize,
    step: usize,
    n_tiles_x: usize,
    n_tiles_y: usize,
}

impl TileGrid {
    fn new(channel_w: usize, channel_h: usize, t: usize) -> Self {
        let step = (t / 2).max(1);
        let n_tiles_x = if channel_w <= t { 1 } else { (channel_w - t) / step + 1 };
        let n_tiles_y = if channel_h <= t { 1 } else { (channel_h - t) / step + 1 };
        Self { t, channel_w, channel_h, step, n_tiles_x, n_tiles_y }
    }

    /// Channel-grid-space origin of tile `(tx, ty)`, clamped so every tile
    /// fits entirely inside the channel plane (§3 invariant: aligned reads
    /// fit within the frame after clamping).
    fn origin(&self, tx: usize, ty: usize) -> (usize, usize) {
        let ox = (tx * self.step).min(self.channel_w.saturating_sub(self.t));
        let oy = (ty * self.step).min(self.channel_h.saturating_sub(self.t));
        (ox, oy)
    }
}

fn extract_tile(
    plane: &[f32],
    width: usize,
    height: usize,
    origin: (usize, usize),
    parity: (usize, usize),
    t: usize,
) -> Vec<f32> {
    let mut out = vec![0.0f32; t * t];
    for j in 0..t {
        let ry = (origin.1 + j) * 2 + parity.1;
        for i in 0..t {
            let rx = (origin.0 + i) * 2 + parity.0;
            out[j * t + i] = if rx < width && ry < height { plane[ry * width + rx] } else { 0.0 };
        }
    }
    out
}

fn tile_rms(tile: &[f32]) -> f32 {
    (tile.iter().map(|&v| v * v).sum::<f32>() / tile.len().max(1) as f32).sqrt()
}

fn raised_cosine_1d(t: usize) -> Vec<f32> {
    (0..t)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * (i as f32 + 0.5) / t as f32).cos()))
        .collect()
}

fn window_2d(t: usize) -> Vec<f32> {
    let w = raised_cosine_1d(t);
    let mut out = vec![0.0f32; t * t];
    for j in 0..t {
        for i in 0..t {
            out[j * t + i] = w[i] * w[j];
        }
    }
    out
}

/// Precomputed tile-size-specific deconvolution gain table (§4.6 step 7,
/// `cw[]`). The exact coefficients aren't otherwise specified; this uses a
/// monotone ramp across spatial frequency index, peaking at the Nyquist bin,
/// which is the qualitative shape the step describes ("gain table" indexed
/// by frequency distance).
fn deconvolution_gain_table(t: usize) -> Vec<f32> {
    (0..=t / 2).map(|d| d as f32 / (t as f32 / 2.0)).collect()
}

/// Highlights norm for a non-uniform-exposure tile (§4.6 step 5): the
/// fraction of the tile's `t x t` spatial positions whose *maximum* CFA-
/// parity channel, de-equalized, exceeds 50% of white level, transformed by
/// `clamp((1 - frac)^2, 0.04/min(exposure_factor, 4), 1)`. Uniform-exposure
/// bursts skip this entirely and always use `1.0` (handled by the caller).
fn highlights_norm(cmp_tiles: &[Vec<f32>; 4], t: usize, exposure_factor: f32, white_level: f32) -> f32 {
    let threshold = 0.5 * white_level;
    let clipped_positions = (0..t * t)
        .filter(|&p| {
            let max_channel = (0..4).map(|c| cmp_tiles[c][p]).fold(f32::NEG_INFINITY, f32::max);
            max_channel / exposure_factor.max(1e-6) > threshold
        })
        .count() as f32;
    let frac = clipped_positions / (t * t) as f32;
    let floor = (0.04 / exposure_factor.max(1e-6).min(4.0)).min(1.0);
    (1.0 - frac).powi(2).clamp(floor, 1.0)
}

/// Mean absolute difference over the `2t x 2t` window centered on a tile,
/// raised-cosine weighted, used by the mismatch computation (§4.6 step 4).
fn windowed_abs_diff(
    ref_plane: &[f32],
    cmp_plane: &[f32],
    width: usize,
    height: usize,
    origin: (usize, usize),
    parity: (usize, usize),
    t: usize,
) -> f32 {
    let span = 2 * t;
    let window = raised_cosine_1d(span);
    let cx = origin.0.saturating_sub(t / 2);
    let cy = origin.1.saturating_sub(t / 2);
    let mut sum = 0.0f32;
    let mut weight_sum = 0.0f32;
    for j in 0..span {
        let ry = (cy + j) * 2 + parity.1;
        if ry >= height {
            continue;
        }
        for i in 0..span {
            let rx = (cx + i) * 2 + parity.0;
            if rx >= width {
                continue;
            }
            let w = window[i] * window[j];
            let diff = (ref_plane[ry * width + rx] - cmp_plane[ry * width + rx]).abs();
            sum += diff * w;
            weight_sum += w;
        }
    }
    sum / weight_sum.max(1e-6)
}

/// Per-tile accumulator state: one raw packed-half buffer per CFA-parity
/// channel. Plain `Vec<Complex32>` rather than `TileSpectrum` so per-bin
/// accumulation across frames doesn't reallocate the whole tile each time.
struct TileAccumulator {
    t: usize,
    unique_cols: usize,
    channels: [Vec<Complex32>; 4],
}

impl TileAccumulator {
    fn seed(t: usize, spectra: &[TileSpectrum; 4]) -> Self {
        let unique_cols = t / 2 + 1;
        let channels = std::array::from_fn(|c| {
            let mut data = Vec::with_capacity(t * unique_cols);
            for u in 0..t {
                for v in 0..unique_cols {
                    data.push(spectra[c].get(u, v));
                }
            }
            data
        });
        Self { t, unique_cols, channels }
    }

    fn get(&self, c: usize, u: usize, v: usize) -> Complex32 {
        self.channels[c][u * self.unique_cols + v]
    }

    fn add(&mut self, c: usize, u: usize, v: usize, value: Complex32) {
        let idx = u * self.unique_cols + v;
        self.channels[c][idx] = self.channels[c][idx] + value;
    }

    fn scale_bin(&mut self, c: usize, u: usize, v: usize, s: f32) {
        let idx = u * self.unique_cols + v;
        self.channels[c][idx] = self.channels[c][idx].scale(s);
    }

    fn into_spectrum(&self, c: usize) -> TileSpectrum {
        TileSpectrum::from_unique(self.t, self.channels[c].clone())
    }
}

/// Host-side merge of `aligned_frames` (already warped onto the reference's
/// coordinate system) into `reference`, following §4.6 steps 1-8.
pub fn merge(
    ctx: &GpuContext,
    reference: &GpuTexture,
    aligned_frames: &[(GpuTexture, f32)],
    cfg: &FrequencyMergeConfig,
    uniform_exposure: bool,
    white_level: f32,
    mut progress: impl FnMut(usize, usize),
) -> Result<GpuTexture, ErrorKind> {
    let mut state = MergeState::Idle;
    let t = cfg.tile_size as usize;
    let width = reference.width as usize;
    let height = reference.height as usize;
    let channel_w = width / 2;
    let channel_h = height / 2;
    let grid = TileGrid::new(channel_w, channel_h, t);

    let ref_host = reference.read_to_host(ctx)?;
    state = state.advance(MergeState::PreparedRef);

    let frame_count = aligned_frames.len() as f32 + 1.0;
    let gain_table = deconvolution_gain_table(t);

    // One accumulator + one mismatch value per tile, seeded with the
    // reference's own spectrum at unit weight (§3 invariant).
    let mut accumulators: Vec<TileAccumulator> = Vec::with_capacity(grid.n_tiles_x * grid.n_tiles_y);
    let mut tile_mismatch: Vec<f32> = vec![0.0; grid.n_tiles_x * grid.n_tiles_y];
    for ty in 0..grid.n_tiles_y {
        for tx in 0..grid.n_tiles_x {
            let origin = grid.origin(tx, ty);
            let channels = std::array::from_fn(|c| {
                let parity = CHANNEL_PARITIES[c];
                let tile = extract_tile(&ref_host, width, height, origin, parity, t);
                fft::forward_real(&tile, t)
            });
            accumulators.push(TileAccumulator::seed(t, &channels));
        }
    }
    state = state.advance(MergeState::Accumulating);

    let total = aligned_frames.len();
    for (frame_idx, (aligned_tex, exposure_factor)) in aligned_frames.iter().enumerate() {
        let cmp_host = aligned_tex.read_to_host(ctx)?;
        let abs_diff_mean_pretile: Vec<f32> = (0..grid.n_tiles_y)
            .flat_map(|ty| (0..grid.n_tiles_x).map(move |tx| (tx, ty)))
            .map(|(tx, ty)| {
                let origin = grid.origin(tx, ty);
                windowed_abs_diff(&ref_host, &cmp_host, width, height, origin, (0, 0), t)
            })
            .collect();
        let mean_abs_diff = abs_diff_mean_pretile.iter().sum::<f32>() / abs_diff_mean_pretile.len().max(1) as f32;

        for ty in 0..grid.n_tiles_y {
            for tx in 0..grid.n_tiles_x {
                let idx = ty * grid.n_tiles_x + tx;
                let origin = grid.origin(tx, ty);

                let ref_tiles: [Vec<f32>; 4] =
                    std::array::from_fn(|c| extract_tile(&ref_host, width, height, origin, CHANNEL_PARITIES[c], t));
                let cmp_tiles: [Vec<f32>; 4] =
                    std::array::from_fn(|c| extract_tile(&cmp_host, width, height, origin, CHANNEL_PARITIES[c], t));

                let sigma_ref = ref_tiles.iter().map(|ch| tile_rms(ch)).sum::<f32>() / 4.0;
                let raw_mismatch = windowed_abs_diff(&ref_host, &cmp_host, width, height, origin, (0, 0), t)
                    / (0.5 * sigma_ref * sigma_ref + 0.5 * sigma_ref * sigma_ref / exposure_factor.max(1e-6) + 1.0)
                        .sqrt();
                // Renormalize so the frame-wide mean mismatch sits at ~0.12 (§4.6 step 4).
                let mismatch = raw_mismatch * (0.12 / mean_abs_diff.max(1e-6));
                tile_mismatch[idx] = mismatch;

                let rms = ref_tiles.iter().map(|ch| tile_rms(ch)).sum::<f32>() / 4.0;
                let noise_norm = (rms + cfg.read_noise) * (t * t) as f32 * cfg.robustness_norm;
                let motion_norm = (cfg.max_motion_norm
                    - (mismatch - 0.02) * (cfg.max_motion_norm - 1.0) / 0.15)
                    .clamp(1.0, cfg.max_motion_norm);

                let highlights_norm = if uniform_exposure {
                    1.0
                } else {
                    highlights_norm(&cmp_tiles, t, *exposure_factor, white_level)
                };

                let ref_spectra: [TileSpectrum; 4] = std::array::from_fn(|c| fft::forward_real(&ref_tiles[c], t));
                let cmp_spectra: [TileSpectrum; 4] = std::array::from_fn(|c| fft::forward_real(&cmp_tiles[c], t));

                // Subpixel search (step 6a): a single shared (dx, dy) per
                // tile, found by summing the squared residual magnitude
                // across all four channels.
                let mut best_shift = (0.0f32, 0.0f32);
                let mut best_cost = f32::INFINITY;
                for k in 0..7 {
                    let dx = -0.5 + k as f32 / 6.0;
                    for l in 0..7 {
                        let dy = -0.5 + l as f32 / 6.0;
                        let mut cost = 0.0f32;
                        for c in 0..4 {
                            let shifted = fft::shift_spectrum(&cmp_spectra[c], dx, dy);
                            for u in 0..t {
                                for v in 0..=t / 2 {
                                    let residual = ref_spectra[c].get(u, v) - shifted.get(u, v);
                                    cost += residual.norm_sqr();
                                }
                            }
                        }
                        if cost < best_cost {
                            best_cost = cost;
                            best_shift = (dx, dy);
                        }
                    }
                }

                let shifted_spectra: [TileSpectrum; 4] =
                    std::array::from_fn(|c| fft::shift_spectrum(&cmp_spectra[c], best_shift.0, best_shift.1));

                for u in 0..t {
                    for v in 0..=t / 2 {
                        let mut channel_weights = [0.0f32; 4];
                        for c in 0..4 {
                            let r = ref_spectra[c].get(u, v);
                            let a = shifted_spectra[c].get(u, v);
                            let d2 = (r - a).norm_sqr();
                            let is_dc = u == 0 && v == 0;
                            let magnitude_norm = if is_dc || mismatch >= 0.3 || !uniform_exposure {
                                1.0
                            } else {
                                let mismatch_weight = (1.0 - 10.0 * (mismatch - 0.2)).clamp(0.0, 1.0);
                                (a.norm() / r.norm().max(1e-6)).powi(4).clamp(0.5, 3.0) * mismatch_weight
                            };
                            channel_weights[c] =
                                d2 / (d2 + magnitude_norm * motion_norm * noise_norm * highlights_norm).max(1e-12);
                        }
                        let mut sorted = channel_weights;
                        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                        let scalar_w = ((sorted[1] + sorted[2]) / 2.0).clamp(0.0, 1.0);

                        for c in 0..4 {
                            let r = ref_spectra[c].get(u, v);
                            let a = shifted_spectra[c].get(u, v);
                            let contribution = a.scale(1.0 - scalar_w) + r.scale(scalar_w);
                            accumulators[idx].add(c, u, v, contribution);
                        }
                    }
                }
            }
        }
        state = state.advance(MergeState::Accumulating);
        tracing::debug!(frame_idx, tiles = grid.n_tiles_x * grid.n_tiles_y, mean_abs_diff, "frame tiles merged");
        progress(frame_idx + 1, total);
    }

    // Deconvolution (step 7).
    state = state.advance(MergeState::Deconvolved);
    for ty in 0..grid.n_tiles_y {
        for tx in 0..grid.n_tiles_x {
            let idx = ty * grid.n_tiles_x + tx;
            let mismatch = tile_mismatch[idx];
            if mismatch >= 0.3 {
                continue;
            }
            let w_global = (1.0 - mismatch / 0.3).clamp(0.0, 1.0);
            for c in 0..4 {
                let dc = accumulators[idx].get(c, 0, 0).norm().max(1e-6);
                for u in 0..t {
                    for v in 0..=t / 2 {
                        if u == 0 && v == 0 {
                            continue;
                        }
                        let value = accumulators[idx].get(c, u, v);
                        let ratio = (value.norm() / dc).clamp(0.0, 1.0);
                        let w = w_global * ratio;
                        let dm = gain_table[u.min(t - u)];
                        let dn = gain_table[v.min(t - v)];
                        accumulators[idx].scale_bin(c, u, v, (1.0 + w * dm) * (1.0 + w * dn));
                    }
                }
            }
        }
    }

    // Inverse DFT + normalization by frame count (step 8, first half).
    state = state.advance(MergeState::Inverted);
    let window = window_2d(t);
    let mut channel_planes: [Vec<f32>; 4] = std::array::from_fn(|_| vec![0.0f32; width * height]);
    let mut weight_sum: [Vec<f32>; 4] = std::array::from_fn(|_| vec![0.0f32; width * height]);

    for ty in 0..grid.n_tiles_y {
        for tx in 0..grid.n_tiles_x {
            let idx = ty * grid.n_tiles_x + tx;
            let origin = grid.origin(tx, ty);
            for c in 0..4 {
                let parity = CHANNEL_PARITIES[c];
                let mut tile_out = fft::inverse_real(&accumulators[idx].into_spectrum(c));
                for v in tile_out.iter_mut() {
                    *v = (*v / frame_count).max(0.0);
                }
                for j in 0..t {
                    let ry = (origin.1 + j) * 2 + parity.1;
                    if ry >= height {
                        continue;
                    }
                    for i in 0..t {
                        let rx = (origin.0 + i) * 2 + parity.0;
                        if rx >= width {
                            continue;
                        }
                        let mut value = tile_out[j * t + i];
                        let on_border = i == 0 || j == 0 || i == t - 1 || j == t - 1;
                        if on_border {
                            value = 0.5 * value + 0.5 * ref_host[ry * width + rx];
                        }
                        let w = window[j * t + i];
                        channel_planes[c][ry * width + rx] += value * w;
                        weight_sum[c][ry * width + rx] += w;
                    }
                }
            }
        }
    }
    state = state.advance(MergeState::BordersCleaned);

    let mut out = ref_host.clone();
    for c in 0..4 {
        let parity = CHANNEL_PARITIES[c];
        for cy in 0..channel_h {
            let ry = cy * 2 + parity.1;
            if ry >= height {
                continue;
            }
            for cx in 0..channel_w {
                let rx = cx * 2 + parity.0;
                if rx >= width {
                    continue;
                }
                let i = ry * width + rx;
                let denom = weight_sum[c][i];
                if denom > 1e-6 {
                    out[i] = channel_planes[c][i] / denom;
                }
            }
        }
    }

    let result = GpuTexture::from_host(ctx, "frequency-merge-out", reference.width, reference.height, 1, &out)?;
    let _ = state.advance(MergeState::Emitted);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_size_forces_eight_for_xtrans() {
        assert_eq!(tile_size_for(6, 32), 8);
        assert_eq!(tile_size_for(2, 32), 32);
    }

    #[test]
    fn highlights_norm_counts_each_position_once_not_once_per_channel() {
        let t = 4;
        // All 4 channels clipped at every position: counting per spatial
        // position (the correct behavior) caps `frac` at 1.0, driving the
        // norm down to the suppression floor. Counting every channel
        // sample independently (the old bug) would push `frac` to 4.0 and
        // clamp `(1-frac)^2` up to 1.0 instead -- the opposite of the
        // intended highlight suppression.
        let white_level = 1000.0;
        let clipped = vec![600.0; t * t];
        let cmp_tiles = [clipped.clone(), clipped.clone(), clipped.clone(), clipped];
        let norm = highlights_norm(&cmp_tiles, t, 1.0, white_level);
        let floor = (0.04 / 1.0f32.max(1e-6).min(4.0)).min(1.0);
        assert!((norm - floor).abs() < 1e-6, "norm={norm} floor={floor}");
        assert!(norm < 0.5, "a fully-clipped tile must not end up near unit weight");
    }

    #[test]
    fn highlights_norm_is_one_when_nothing_is_clipped() {
        let t = 4;
        let clear = vec![10.0; t * t];
        let cmp_tiles = [clear.clone(), clear.clone(), clear.clone(), clear];
        let norm = highlights_norm(&cmp_tiles, t, 1.0, 1000.0);
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tile_grid_covers_whole_plane_with_overlap() {
        let grid = TileGrid::new(64, 64, 16);
        assert!(grid.n_tiles_x >= 1 && grid.n_tiles_y >= 1);
        let (ox, oy) = grid.origin(grid.n_tiles_x - 1, grid.n_tiles_y - 1);
        assert!(ox + grid.t <= grid.channel_w);
        assert!(oy + grid.t <= grid.channel_h);
    }

    #[test]
    fn window_is_zero_at_tile_edges_and_peaks_at_center() {
        let w = raised_cosine_1d(16);
        assert!(w[0] < w[8]);
        assert!(w[15] < w[8]);
    }

    #[test]
    fn deconvolution_gain_table_is_monotone() {
        let table = deconvolution_gain_table(16);
        for pair in table.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn state_machine_rejects_skipped_transitions() {
        let result = std::panic::catch_unwind(|| MergeState::Idle.advance(MergeState::Accumulating));
        assert!(result.is_err(), "Idle -> Accumulating should skip PreparedRef and panic in debug");
    }
}
