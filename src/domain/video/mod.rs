//! Video domain types: identity, descriptors, and the stage state machine.

pub mod descriptor;
pub mod stage;

pub use descriptor::{RawDescriptor, video_id};
pub use stage::{IN_PROGRESS_STAGES, Source, Stage};
