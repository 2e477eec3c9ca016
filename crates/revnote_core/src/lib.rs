//! Note revision and optimistic-concurrency core.
//!
//! Editing surfaces (quick capture, list view, detail editor) hold stale
//! copies of notes and mutate them only through version-gated updates; this
//! crate owns that compare-and-swap path, the append-only version log, diff
//! and restore over the log, and the client-side autosave coordinator that
//! batches edits into gated writes.

pub mod autosave;
pub mod db;
pub mod diff;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use autosave::{
    AutosaveCoordinator, BufferSideChannel, DraftSideChannel, FlushCompletion, FlushRequest,
    FlushResult, FlushState, SideChannelError, DEFAULT_DEBOUNCE,
};
pub use diff::{compute_line_diff, DiffLine, DiffTag};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::note::{
    ChangeType, Note, NoteId, NotePatch, NoteVersion, PatchValidationError, VersionId,
};
pub use repo::note_repo::{
    ChangeRecord, CommitOutcome, HeadState, NoteRepository, RepoError, RepoResult,
    SqliteNoteRepository, VersionPage,
};
pub use service::revision_service::{
    Accepted, DiffReport, RestoreOutcome, RevisionError, RevisionResult, RevisionService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
