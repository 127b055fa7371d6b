//! Database models.
//!
//! These models map directly to the database schema and handle
//! serialization of JSON blob fields.

pub mod transcript;
pub mod video;

pub use transcript::*;
pub use video::*;
