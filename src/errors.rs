// SPDX-License-Identifier: GPL-3.0-only

//! Error taxonomy for the HDR+ align-and-merge core.

use std::fmt;

/// Result type alias using [`ErrorKind`].
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// The core's error taxonomy. Every fallible operation in this crate
/// returns one of these kinds; the core never panics on input-data issues.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// Bad input caught at the boundary before any GPU work: empty burst,
    /// inconsistent dimensions, unsupported CFA width, out-of-range config,
    /// `ref_idx` out of range, metadata length mismatches.
    InvalidArgument(String),
    /// Kernel compile or pipeline-state creation failure. Fatal; the
    /// `GpuContext` that produced it is unusable until re-initialized.
    Pipeline(String),
    /// The GPU command queue reported a lost device after a submit-and-wait.
    /// Recoverable by re-initializing the `GpuContext`.
    DeviceLost(String),
    /// Texture or buffer allocation failed.
    OutOfMemory(String),
    /// The caller's `CancelToken` was observed tripped between frames or
    /// stages. No partial output is produced.
    Cancelled,
    /// A §3 data-model invariant was violated. Indicates a bug in the core,
    /// not in caller input.
    Internal(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            ErrorKind::Pipeline(msg) => write!(f, "pipeline error: {msg}"),
            ErrorKind::DeviceLost(msg) => write!(f, "device lost: {msg}"),
            ErrorKind::OutOfMemory(msg) => write!(f, "out of memory: {msg}"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ErrorKind {}

impl From<wgpu::RequestDeviceError> for ErrorKind {
    fn from(err: wgpu::RequestDeviceError) -> Self {
        ErrorKind::Pipeline(err.to_string())
    }
}

impl ErrorKind {
    /// Classify an async `wgpu::Error` surfaced through the device's error
    /// scope / uncaptured-error callback into the right taxonomy kind.
    pub fn from_wgpu_error(err: wgpu::Error) -> Self {
        match err {
            wgpu::Error::OutOfMemory { .. } => ErrorKind::OutOfMemory(err.to_string()),
            wgpu::Error::Validation { .. } => ErrorKind::Pipeline(err.to_string()),
            _ => ErrorKind::Internal(err.to_string()),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ErrorKind::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_include_payload() {
        let err = ErrorKind::InvalidArgument("burst is empty".to_string());
        assert_eq!(err.to_string(), "invalid argument: burst is empty");
    }

    #[test]
    fn cancelled_has_no_payload() {
        assert_eq!(ErrorKind::Cancelled.to_string(), "cancelled");
    }
}
