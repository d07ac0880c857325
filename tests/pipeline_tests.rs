// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the `hdrplus-core` public API surface. The full
//! GPU pipeline needs a device, so these follow the same skip-if-no-GPU
//! pattern as `gpu::tests::create_gpu_context_or_skip` rather than failing
//! CI on a headless runner.

use hdrplus_core::{
    Burst, CancelToken, Config, ErrorKind, Frame, FrameMeta, MergingAlgorithm,
};

fn make_frame(width: u32, height: u32, cfa_width: u32, value: u16) -> Frame {
    Frame {
        width,
        height,
        cfa_width,
        samples: vec![value; (width * height) as usize],
    }
}

fn make_meta(cfa_width: u32, exposure_bias: i32) -> FrameMeta {
    FrameMeta {
        exposure_bias,
        black_level: vec![64.0; (cfa_width * cfa_width) as usize],
        white_level: 16383.0,
        color_factors: [1.0, 1.0, 1.0],
        hot_pixel_weights: Vec::new(),
    }
}

#[test]
fn process_rejects_invalid_config_before_touching_the_gpu() {
    let burst = Burst {
        frames: vec![make_frame(32, 32, 2, 1000)],
        metas: vec![make_meta(2, 0)],
        reference_index: 0,
    };
    let mut config = Config::default();
    config.noise_reduction = 0;

    let result = hdrplus_core::process(burst, config, CancelToken::new(), |_| {});
    assert!(matches!(result, Err(ErrorKind::InvalidArgument(_))));
}

#[test]
fn process_rejects_malformed_burst_before_touching_the_gpu() {
    let burst = Burst {
        frames: Vec::new(),
        metas: Vec::new(),
        reference_index: 0,
    };
    let result = hdrplus_core::process(burst, Config::default(), CancelToken::new(), |_| {});
    assert!(matches!(result, Err(ErrorKind::InvalidArgument(_))));
}

#[test]
fn process_single_frame_fast_burst_bypasses_align_and_merge() {
    let burst = Burst {
        frames: vec![make_frame(64, 64, 2, 2000)],
        metas: vec![make_meta(2, 0)],
        reference_index: 0,
    };
    let config = Config {
        merging_algorithm: MergingAlgorithm::Fast,
        ..Config::default()
    };

    let mut last_progress = 0.0f32;
    let result = hdrplus_core::process(burst, config, CancelToken::new(), |p| last_progress = p);
    match result {
        Ok(merged) => {
            assert_eq!(merged.width, 64);
            assert_eq!(merged.height, 64);
            assert_eq!(last_progress, 1.0);
            // Default exposure control is Off, so the only transform applied
            // is black-level subtraction (2000 - 64), no gain.
            assert!(merged.samples.iter().all(|&s| (s - 1936.0).abs() < 1e-3));
            assert_eq!(merged.applied_gain, 1.0);
        }
        Err(e) => println!("skipping GPU-backed assertions (no adapter available): {e}"),
    }
}

#[test]
fn process_honors_pre_tripped_cancellation() {
    let burst = Burst {
        frames: vec![
            make_frame(64, 64, 2, 1000),
            make_frame(64, 64, 2, 1010),
            make_frame(64, 64, 2, 990),
        ],
        metas: vec![make_meta(2, 0), make_meta(2, 0), make_meta(2, 0)],
        reference_index: 0,
    };
    let cancel = CancelToken::new();
    cancel.cancel();

    match hdrplus_core::process(burst, Config::default(), cancel, |_| {}) {
        Err(ErrorKind::Cancelled) => {}
        Err(e) => println!("skipping (no GPU to reach the cancellation check): {e}"),
        Ok(_) => panic!("a pre-cancelled token must not produce output"),
    }
}
