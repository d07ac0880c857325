// SPDX-License-Identifier: GPL-3.0-only

//! `hdrplus-core` — GPU-accelerated align-and-merge core for burst
//! computational photography, implementing the Google HDR+ pipeline: pyramid
//! alignment across a burst of raw frames followed by one of two merge
//! engines (spatial or frequency domain), finished with exposure
//! normalization.
//!
//! This crate has no codec, file-format, or UI surface (§1): callers decode
//! their own raw frames into [`Frame`]/[`FrameMeta`] and re-encode
//! [`MergedRaw`] however they like.
//!
//! # Architecture
//!
//! - [`io`]: boundary types (`Burst`, `Frame`, `FrameMeta`, `MergedRaw`,
//!   `CancelToken`) and their validation (C9)
//! - [`config`]: the pipeline's tunable surface (C0)
//! - [`gpu`]: device/queue/pipeline-cache facade (C1)
//! - [`texture`]: GPU storage-buffer primitives shared by every stage (C2)
//! - [`pyramid`]: multi-resolution pyramid builder (C3)
//! - [`align`]: hierarchical tile aligner (C4)
//! - [`merge`]: spatial and frequency merge engines (C5/C6)
//! - [`exposure`]: post-merge exposure normalizer (C7)
//! - [`orchestrator`]: the [`process`] entry point tying the above together (C8)
//!
//! # Example
//!
//! ```ignore
//! let merged = hdrplus_core::process(burst, config, CancelToken::new(), |_| {})?;
//! ```

pub mod align;
pub mod config;
pub mod errors;
pub mod exposure;
pub mod gpu;
pub mod io;
pub mod merge;
pub mod orchestrator;
pub mod params;
pub mod pyramid;
pub mod texture;

pub use config::{
    Config, ExposureControl, MergingAlgorithm, OutputBitDepth, SearchDistance, TileSize,
};
pub use errors::ErrorKind;
pub use io::{Burst, CancelToken, Frame, FrameMeta, MergedRaw};
pub use orchestrator::process;
