//! Error types for the terrain core.
//!
//! Only recoverable-at-the-boundary failures live here: bad configuration,
//! GPU allocation failures during init, and fence waits that blow through the
//! diagnostic timeout. Broken invariants inside the update loop are asserts.

use std::time::Duration;

use crate::gpu::QueueKind;

#[derive(thiserror::Error, Debug)]
pub enum GpuError {
    #[error("failed to allocate {what}: {reason}")]
    Allocation { what: String, reason: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("fence {value} on {queue:?} queue not reached after {waited:?}")]
    FenceTimeout {
        queue: QueueKind,
        value: u64,
        waited: Duration,
    },

    #[error("device lost")]
    DeviceLost,
}

impl GpuError {
    pub fn allocation<W: ToString, R: ToString>(what: W, reason: R) -> Self {
        GpuError::Allocation {
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TerrainError {
    #[error("invalid terrain config: {0}")]
    InvalidConfig(String),

    #[error("gpu: {0}")]
    Gpu(#[from] GpuError),

    #[error("terrain used before init()")]
    NotInitialized,
}
