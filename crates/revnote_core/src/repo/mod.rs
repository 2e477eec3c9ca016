//! Persistence boundary for the revision subsystem.
//!
//! # Responsibility
//! - Keep SQL details behind repository traits.
//! - Guarantee that head writes and version-log appends are atomic.

pub mod note_repo;
