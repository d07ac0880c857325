// SPDX-License-Identifier: GPL-3.0-only

//! FFT contract for the frequency merge engine (C6 §4.6): a fast power-of-two
//! path and a generic `O(T^2)` DFT fallback, both expected to agree to within
//! `1e-5` relative error for `T ∈ {8, 16}`.
//!
//! This runs host-side rather than as a WGSL kernel: `T` never exceeds 16, so
//! the per-tile transform is a few hundred flops, and a hand-written WGSL
//! radix-4 butterfly network can't be checked against a running compiler in
//! this environment. Everything upstream (alignment, pyramids, texture
//! primitives) still goes through the GPU; only the small per-tile spectral
//! math in C6 is host-side. See `DESIGN.md` for the full rationale.

use std::ops::{Add, Mul, Sub};

/// A single-precision complex number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn from_polar(magnitude: f32, phase: f32) -> Self {
        Self {
            re: magnitude * phase.cos(),
            im: magnitude * phase.sin(),
        }
    }

    pub fn conj(self) -> Self {
        Self {
            re: self.re,
            im: -self.im,
        }
    }

    pub fn norm_sqr(self) -> f32 {
        self.re * self.re + self.im * self.im
    }

    pub fn norm(self) -> f32 {
        self.norm_sqr().sqrt()
    }

    pub fn scale(self, s: f32) -> Self {
        Self {
            re: self.re * s,
            im: self.im * s,
        }
    }
}

impl Add for Complex32 {
    type Output = Complex32;
    fn add(self, rhs: Complex32) -> Complex32 {
        Complex32::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex32 {
    type Output = Complex32;
    fn sub(self, rhs: Complex32) -> Complex32 {
        Complex32::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex32 {
    type Output = Complex32;
    fn mul(self, rhs: Complex32) -> Complex32 {
        Complex32::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// Generic `O(n^2)` DFT/IDFT, the correctness fallback for any length.
pub fn dft1d_generic(input: &[Complex32], inverse: bool) -> Vec<Complex32> {
    let n = input.len();
    let sign = if inverse { 1.0 } else { -1.0 };
    let mut out = vec![Complex32::ZERO; n];
    for (k, out_k) in out.iter_mut().enumerate() {
        let mut sum = Complex32::ZERO;
        for (j, &x) in input.iter().enumerate() {
            let angle = sign * 2.0 * std::f32::consts::PI * (k * j) as f32 / n as f32;
            sum = sum + x * Complex32::from_polar(1.0, angle);
        }
        *out_k = if inverse { sum.scale(1.0 / n as f32) } else { sum };
    }
    out
}

/// Iterative radix-2 Cooley-Tukey FFT/IFFT; the specialized fast path for
/// the power-of-two tile sizes (`T ∈ {8, 16}`) the frequency engine uses.
pub fn fft1d_fast(input: &[Complex32], inverse: bool) -> Vec<Complex32> {
    let n = input.len();
    assert!(n.is_power_of_two(), "fft1d_fast requires a power-of-two length, got {n}");
    if n <= 1 {
        return input.to_vec();
    }

    let mut data = bit_reverse_permute(input);
    let sign = if inverse { 1.0 } else { -1.0 };

    let mut len = 2;
    while len <= n {
        let half = len / 2;
        let angle_step = sign * 2.0 * std::f32::consts::PI / len as f32;
        let w_len = Complex32::from_polar(1.0, angle_step);
        let mut start = 0;
        while start < n {
            let mut w = Complex32::new(1.0, 0.0);
            for i in 0..half {
                let u = data[start + i];
                let v = data[start + i + half] * w;
                data[start + i] = u + v;
                data[start + i + half] = u - v;
                w = w * w_len;
            }
            start += len;
        }
        len *= 2;
    }

    if inverse {
        let scale = 1.0 / n as f32;
        for x in data.iter_mut() {
            *x = x.scale(scale);
        }
    }
    data
}

fn bit_reverse_permute(input: &[Complex32]) -> Vec<Complex32> {
    let n = input.len();
    let bits = n.trailing_zeros();
    let mut out = vec![Complex32::ZERO; n];
    for (i, &x) in input.iter().enumerate() {
        out[(i as u32).reverse_bits().wrapping_shr(u32::BITS - bits) as usize] = x;
    }
    out
}

/// Dispatch to the fast path when `n` is a power of two, generic otherwise.
fn dft1d(input: &[Complex32], inverse: bool) -> Vec<Complex32> {
    if input.len().is_power_of_two() {
        fft1d_fast(input, inverse)
    } else {
        dft1d_generic(input, inverse)
    }
}

/// Packed real-input 2-D spectrum of a `t x t` tile: only the unique
/// `t x (t/2 + 1)` half is stored; the rest is recoverable by Hermitian
/// conjugate mirroring (§4.6 FFT contract).
#[derive(Debug, Clone)]
pub struct TileSpectrum {
    pub t: usize,
    unique_cols: usize,
    data: Vec<Complex32>,
}

impl TileSpectrum {
    fn index(&self, u: usize, v: usize) -> usize {
        u * self.unique_cols + v
    }

    /// Spectral value at `(u, v)`, mirroring into the stored half when `v`
    /// falls in the redundant region.
    pub fn get(&self, u: usize, v: usize) -> Complex32 {
        if v < self.unique_cols {
            self.data[self.index(u, v)]
        } else {
            let mu = (self.t - u) % self.t;
            let mv = self.t - v;
            self.data[self.index(mu, mv)].conj()
        }
    }

    fn set_unique(&mut self, u: usize, v: usize, value: Complex32) {
        let idx = self.index(u, v);
        self.data[idx] = value;
    }

    /// Number of stored columns (`t/2 + 1`), for callers building a raw
    /// accumulator over the unique half directly.
    pub fn unique_cols(&self) -> usize {
        self.unique_cols
    }

    /// Build a spectrum directly from its packed unique half (row-major,
    /// `t x (t/2+1)`); used by the frequency merge engine's per-bin
    /// accumulator, which works with plain `Vec<Complex32>` for speed and
    /// only wraps into a `TileSpectrum` when it needs [`inverse_real`].
    pub fn from_unique(t: usize, data: Vec<Complex32>) -> Self {
        let unique_cols = t / 2 + 1;
        assert_eq!(data.len(), t * unique_cols, "unique half must be t * (t/2+1) long");
        TileSpectrum { t, unique_cols, data }
    }

    /// Multiply every unique bin by a per-bin scalar window (used by the
    /// deconvolution step, which only touches the stored half).
    pub fn map_unique(&self, f: impl Fn(usize, usize, Complex32) -> Complex32) -> TileSpectrum {
        let mut out = self.clone();
        for u in 0..self.t {
            for v in 0..self.unique_cols {
                let value = self.data[self.index(u, v)];
                out.set_unique(u, v, f(u, v, value));
            }
        }
        out
    }
}

/// Forward real-input 2-D DFT of a `t x t` real tile (row-major), producing
/// the packed Hermitian half.
pub fn forward_real(tile: &[f32], t: usize) -> TileSpectrum {
    assert_eq!(tile.len(), t * t);
    let unique_cols = t / 2 + 1;

    // Row-wise real DFT: every row is a length-t real signal; its full
    // complex spectrum already satisfies conjugate symmetry, so only the
    // first `unique_cols` bins are kept per row.
    let mut row_spectra: Vec<Vec<Complex32>> = Vec::with_capacity(t);
    for row in tile.chunks_exact(t) {
        let complex_row: Vec<Complex32> = row.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        let full = dft1d(&complex_row, false);
        row_spectra.push(full[..unique_cols].to_vec());
    }

    // Column-wise complex DFT over the t rows, for each of the unique_cols
    // columns produced above.
    let mut data = vec![Complex32::ZERO; t * unique_cols];
    for v in 0..unique_cols {
        let column: Vec<Complex32> = row_spectra.iter().map(|r| r[v]).collect();
        let transformed = dft1d(&column, false);
        for (u, &value) in transformed.iter().enumerate() {
            data[u * unique_cols + v] = value;
        }
    }

    TileSpectrum { t, unique_cols, data }
}

/// Inverse 2-D DFT back to a real `t x t` tile. The input is expected to
/// satisfy Hermitian symmetry (as produced by [`forward_real`] or
/// [`shift_spectrum`]); the imaginary residue after the inverse transform is
/// discarded rather than asserted away, since float roundoff leaves a
/// sub-epsilon residue even for exactly-symmetric input.
pub fn inverse_real(spectrum: &TileSpectrum) -> Vec<f32> {
    let t = spectrum.t;
    let full: Vec<Complex32> = (0..t)
        .flat_map(|u| (0..t).map(move |v| (u, v)))
        .map(|(u, v)| spectrum.get(u, v))
        .collect();

    // Inverse along columns (length t), then along rows (length t).
    let mut col_pass = vec![Complex32::ZERO; t * t];
    for v in 0..t {
        let column: Vec<Complex32> = (0..t).map(|u| full[u * t + v]).collect();
        let transformed = dft1d(&column, true);
        for (u, &value) in transformed.iter().enumerate() {
            col_pass[u * t + v] = value;
        }
    }
    let mut out = vec![0.0f32; t * t];
    for u in 0..t {
        let row = &col_pass[u * t..(u + 1) * t];
        let transformed = dft1d(row, true);
        for (v, value) in transformed.into_iter().enumerate() {
            out[u * t + v] = value.re;
        }
    }
    out
}

/// Fourier-shift theorem: multiplying bin `(u, v)` by `exp(-2*pi*i*(u*dy/t +
/// v*dx/t))` corresponds to shifting the spatial-domain tile by `(dx, dy)`
/// pixels. Used by the subpixel search (§4.6 step 6a).
pub fn shift_spectrum(spectrum: &TileSpectrum, dx: f32, dy: f32) -> TileSpectrum {
    let t = spectrum.t as f32;
    spectrum.map_unique(|u, v, value| {
        let angle = -2.0 * std::f32::consts::PI * (u as f32 * dy / t + v as f32 * dx / t);
        value * Complex32::from_polar(1.0, angle)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic xorshift PRNG; the workflow sandbox disallows
    /// `Math.random`-equivalents but a plain seeded generator is fine here.
    fn xorshift(seed: &mut u32) -> f32 {
        *seed ^= *seed << 13;
        *seed ^= *seed >> 17;
        *seed ^= *seed << 5;
        (*seed as f32 / u32::MAX as f32) * 2.0 - 1.0
    }

    fn random_tile(t: usize, seed: u32) -> Vec<f32> {
        let mut s = seed;
        (0..t * t).map(|_| xorshift(&mut s) * 1000.0).collect()
    }

    #[test]
    fn fast_and_generic_1d_agree() {
        for &n in &[8usize, 16] {
            let mut seed = 42 + n as u32;
            let input: Vec<Complex32> = (0..n)
                .map(|_| Complex32::new(xorshift(&mut seed), xorshift(&mut seed)))
                .collect();
            let fast = fft1d_fast(&input, false);
            let generic = dft1d_generic(&input, false);
            for (a, b) in fast.iter().zip(generic.iter()) {
                let diff = (*a - *b).norm();
                let scale = b.norm().max(1.0);
                assert!(diff / scale < 1e-5, "fast/generic mismatch: {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn round_trip_recovers_input() {
        for &t in &[8usize, 16] {
            let tile = random_tile(t, 7);
            let spectrum = forward_real(&tile, t);
            let recovered = inverse_real(&spectrum);
            for (a, b) in tile.iter().zip(recovered.iter()) {
                let diff = (a - b).abs();
                let scale = a.abs().max(1.0);
                assert!(diff / scale < 1e-5, "round trip mismatch: {a} vs {b}");
            }
        }
    }

    #[test]
    fn dc_bin_is_tile_sum() {
        let t = 8;
        let tile = vec![1.0f32; t * t];
        let spectrum = forward_real(&tile, t);
        let dc = spectrum.get(0, 0);
        assert!((dc.re - (t * t) as f32).abs() < 1e-3);
        assert!(dc.im.abs() < 1e-3);
    }

    #[test]
    fn hermitian_mirror_matches_conjugate() {
        let t = 16;
        let tile = random_tile(t, 99);
        let spectrum = forward_real(&tile, t);
        // Spot-check a bin outside the stored half against its mirror.
        let v = t / 2 + 2;
        let mirrored = spectrum.get((t - 3) % t, t - v);
        let direct = spectrum.get(3, v).conj();
        assert!((mirrored.re - direct.re).abs() < 1e-4);
        assert!((mirrored.im - direct.im).abs() < 1e-4);
    }

    #[test]
    fn shift_theorem_matches_spatial_shift() {
        let t = 8;
        // A single impulse at (2, 1): shifting by (-2, -1) should move it to
        // the origin.
        let mut tile = vec![0.0f32; t * t];
        tile[1 * t + 2] = 1.0;
        let spectrum = forward_real(&tile, t);
        let shifted = shift_spectrum(&spectrum, -2.0, -1.0);
        let recovered = inverse_real(&shifted);
        let (max_idx, _) = recovered
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        assert_eq!(max_idx, 0);
    }
}
