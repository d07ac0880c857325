// SPDX-License-Identifier: GPL-3.0-only

//! I/O adapter (C9): boundary types translating decoded raw pixel planes and
//! metadata into the core's inputs, and the core's output back to a plain
//! pixel plane. No codec or filesystem access lives here — that is the
//! caller's concern (§1).

use crate::errors::ErrorKind;

/// A single raw sensor exposure: a planar array of 14- or 16-bit samples in
/// a repeating CFA pattern of width `cfa_width` (2 = Bayer, 6 = X-Trans).
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub cfa_width: u32,
    pub samples: Vec<u16>,
}

impl Frame {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Per-frame metadata (§3 FrameMeta).
#[derive(Debug, Clone)]
pub struct FrameMeta {
    /// Exposure bias in 1/100-EV units.
    pub exposure_bias: i32,
    /// Per-CFA-cell black level, length `cfa_width * cfa_width`.
    pub black_level: Vec<f32>,
    /// Shared white level, or `-1.0` if unknown.
    pub white_level: f32,
    /// Per-channel (R, G, B) color-correction factors collapsed from CFA.
    pub color_factors: [f32; 3],
    /// Hot-pixel weight map, same shape as the frame (0 = healthy pixel).
    pub hot_pixel_weights: Vec<f32>,
}

/// An ordered burst of frames sharing dimensions, CFA width, and white level.
#[derive(Debug, Clone)]
pub struct Burst {
    pub frames: Vec<Frame>,
    pub metas: Vec<FrameMeta>,
    /// Index into `frames`/`metas` of the reference frame. Not reordered.
    pub reference_index: usize,
}

impl Burst {
    /// True iff every frame shares the same exposure bias (§3).
    pub fn is_uniform_exposure(&self) -> bool {
        match self.metas.first() {
            Some(first) => self
                .metas
                .iter()
                .all(|m| m.exposure_bias == first.exposure_bias),
            None => true,
        }
    }

    /// Validate the §3 Burst invariants at the `InvalidArgument` boundary,
    /// before any GPU work is performed (§7).
    pub fn validate(&self) -> Result<(), ErrorKind> {
        if self.frames.is_empty() {
            return Err(ErrorKind::invalid_argument("burst is empty"));
        }
        if self.frames.len() != self.metas.len() {
            return Err(ErrorKind::invalid_argument(format!(
                "frame count ({}) does not match metadata count ({})",
                self.frames.len(),
                self.metas.len()
            )));
        }
        if self.reference_index >= self.frames.len() {
            return Err(ErrorKind::invalid_argument(format!(
                "reference_index {} out of range for burst of {} frames",
                self.reference_index,
                self.frames.len()
            )));
        }

        let reference = &self.frames[0];
        if reference.cfa_width != 2 && reference.cfa_width != 6 {
            return Err(ErrorKind::invalid_argument(format!(
                "unsupported CFA width {} (must be 2 or 6)",
                reference.cfa_width
            )));
        }

        for (i, frame) in self.frames.iter().enumerate() {
            if frame.width != reference.width || frame.height != reference.height {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} has dimensions {}x{}, expected {}x{}",
                    frame.width, frame.height, reference.width, reference.height
                )));
            }
            if frame.cfa_width != reference.cfa_width {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} has CFA width {}, expected {}",
                    frame.cfa_width, reference.cfa_width
                )));
            }
            if frame.samples.len() != (frame.width * frame.height) as usize {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} sample buffer length {} does not match {}x{}",
                    frame.samples.len(),
                    frame.width,
                    frame.height
                )));
            }
        }

        let expected_black_len = (reference.cfa_width * reference.cfa_width) as usize;
        for (i, meta) in self.metas.iter().enumerate() {
            if meta.black_level.len() != expected_black_len {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} black_level has length {}, expected {expected_black_len}",
                    meta.black_level.len()
                )));
            }
            if !meta.hot_pixel_weights.is_empty()
                && meta.hot_pixel_weights.len() != self.frames[i].samples.len()
            {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} hot_pixel_weights length does not match frame shape"
                )));
            }
        }

        let white_level = reference_white_level(&self.metas[0]);
        for (i, meta) in self.metas.iter().enumerate().skip(1) {
            if reference_white_level(meta) != white_level {
                return Err(ErrorKind::invalid_argument(format!(
                    "frame {i} white level does not match the burst's white level"
                )));
            }
        }

        Ok(())
    }
}

fn reference_white_level(meta: &FrameMeta) -> f32 {
    meta.white_level
}

/// The core's output: a merged raw plane with the reference frame's
/// dimensions, updated metadata, and the post-exposure gain actually
/// applied (§6).
#[derive(Debug, Clone)]
pub struct MergedRaw {
    pub width: u32,
    pub height: u32,
    pub samples: Vec<f32>,
    pub meta: FrameMeta,
    pub applied_gain: f32,
}

/// A cooperative cancellation handle. Cheap to clone; the orchestrator polls
/// `is_cancelled()` between frames and between major stages (§5).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(width: u32, height: u32, cfa_width: u32, value: u16) -> Frame {
        Frame {
            width,
            height,
            cfa_width,
            samples: vec![value; (width * height) as usize],
        }
    }

    fn make_meta(cfa_width: u32) -> FrameMeta {
        FrameMeta {
            exposure_bias: 0,
            black_level: vec![64.0; (cfa_width * cfa_width) as usize],
            white_level: 16383.0,
            color_factors: [1.0, 1.0, 1.0],
            hot_pixel_weights: Vec::new(),
        }
    }

    #[test]
    fn empty_burst_is_invalid() {
        let burst = Burst {
            frames: Vec::new(),
            metas: Vec::new(),
            reference_index: 0,
        };
        assert!(matches!(
            burst.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn mismatched_dimensions_are_invalid() {
        let burst = Burst {
            frames: vec![
                make_frame(16, 16, 2, 1000),
                make_frame(8, 8, 2, 1000),
            ],
            metas: vec![make_meta(2), make_meta(2)],
            reference_index: 0,
        };
        assert!(matches!(
            burst.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn ref_idx_out_of_range_is_invalid() {
        let burst = Burst {
            frames: vec![make_frame(16, 16, 2, 1000)],
            metas: vec![make_meta(2)],
            reference_index: 5,
        };
        assert!(matches!(
            burst.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn unsupported_cfa_width_is_invalid() {
        let burst = Burst {
            frames: vec![make_frame(16, 16, 3, 1000)],
            metas: vec![make_meta(3)],
            reference_index: 0,
        };
        assert!(matches!(
            burst.validate(),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn well_formed_burst_is_valid() {
        let burst = Burst {
            frames: vec![make_frame(16, 16, 2, 1000), make_frame(16, 16, 2, 1010)],
            metas: vec![make_meta(2), make_meta(2)],
            reference_index: 0,
        };
        assert!(burst.validate().is_ok());
    }

    #[test]
    fn uniform_exposure_detection() {
        let mut burst = Burst {
            frames: vec![make_frame(4, 4, 2, 0), make_frame(4, 4, 2, 0)],
            metas: vec![make_meta(2), make_meta(2)],
            reference_index: 0,
        };
        assert!(burst.is_uniform_exposure());
        burst.metas[1].exposure_bias = 100;
        assert!(!burst.is_uniform_exposure());
    }

    #[test]
    fn cancel_token_reflects_cancellation() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled(), "clones share the same flag");
    }
}
