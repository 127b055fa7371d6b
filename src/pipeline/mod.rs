//! Processing pipeline: stage steps, worker pools, and recovery.

pub mod steps;
pub mod sweeper;
pub mod traits;
pub mod worker_pool;

pub use steps::{DownloadStep, ResolutionStep, StageStep, TranscriptionStep};
pub use sweeper::{RecoverySweeper, SweepSummary, SweeperConfig};
pub use traits::{MediaFetcher, StageError, StreamResolver, Transcriber, TranscriptData};
pub use worker_pool::{StageWorkerPool, StageWorkerPoolConfig};
