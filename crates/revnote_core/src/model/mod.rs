//! Domain model for the note revision subsystem.
//!
//! # Responsibility
//! - Define the mutable note head and its immutable version snapshots.
//! - Define the partial-update patch shape shared by all editing surfaces.
//!
//! # Invariants
//! - Every note and version is identified by a stable UUID.
//! - History entries are immutable once produced; only the head mutates.

pub mod note;
