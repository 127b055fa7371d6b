//! Repository layer for database access.
//!
//! Repositories abstract all database interactions behind traits so the
//! pipeline and tests can swap implementations.

pub mod transcript;
pub mod video;

pub use transcript::*;
pub use video::*;
