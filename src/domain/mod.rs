//! Domain layer.

pub mod video;

pub use video::{IN_PROGRESS_STAGES, RawDescriptor, Source, Stage, video_id};
