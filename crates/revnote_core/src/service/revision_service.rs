//! Revision service: optimistic-concurrency controller and restore pipeline.
//!
//! # Responsibility
//! - Enforce compare-and-swap semantics over `Note.version` for every write.
//! - Route restores through the same CAS path as regular updates.
//! - Serve the version-history read surface (list, detail, diff).
//!
//! # Invariants
//! - Accepted versions per note are exactly `1, 2, 3, ...` with no gaps.
//! - A conflicted write applies nothing and consumes no version.
//! - Validation runs before any transaction is opened.
//! - Conflicts always carry the authoritative current snapshot.

use crate::diff::{compute_line_diff, DiffLine};
use crate::model::note::{
    ChangeType, Note, NoteId, NotePatch, NoteVersion, PatchValidationError, VersionId,
};
use crate::repo::note_repo::{
    ChangeRecord, CommitOutcome, HeadState, NoteRepository, RepoError, VersionPage,
};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Page size bounds for version-history listing.
const PAGE_SIZE_MIN: u32 = 1;
const PAGE_SIZE_MAX: u32 = 100;

/// Error taxonomy of the revision subsystem.
#[derive(Debug)]
pub enum RevisionError {
    /// The expected version no longer matches the stored one. Recoverable;
    /// always carries the current snapshot so the caller can resolve.
    VersionConflict { current: Box<Note> },
    /// The note id does not exist. Terminal for the request.
    NoteNotFound(NoteId),
    /// The version id does not exist under this note. Terminal.
    VersionNotFound {
        note_id: NoteId,
        version_id: VersionId,
    },
    /// Malformed request, rejected before any lock is acquired. Terminal.
    Validation(PatchValidationError),
    /// Underlying persistence failure. Opaque and safe to retry: the CAS
    /// attempt never applied.
    Repo(RepoError),
}

impl Display for RevisionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VersionConflict { current } => write!(
                f,
                "version conflict on note {}: current version is {}",
                current.id, current.version
            ),
            Self::NoteNotFound(id) => write!(f, "note not found: {id}"),
            Self::VersionNotFound {
                note_id,
                version_id,
            } => write!(f, "version {version_id} not found for note {note_id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RevisionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PatchValidationError> for RevisionError {
    fn from(value: PatchValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for RevisionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NoteNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Successful update receipt, mirroring the external update response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub note_id: NoteId,
    /// The new head version produced by this write.
    pub version: i64,
    pub updated_at: i64,
}

/// Successful restore receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub new_version: i64,
    /// Version number the content was restored from.
    pub restored_from: i64,
    pub note: Note,
}

/// Diff between two snapshots of one note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffReport {
    pub from_version: i64,
    pub to_version: i64,
    pub lines: Vec<DiffLine>,
}

/// Concurrency controller and history facade over a snapshot store.
pub struct RevisionService<R: NoteRepository> {
    repo: R,
}

impl<R: NoteRepository> RevisionService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Reads the current head of one note.
    pub fn get_note(&self, note_id: NoteId) -> Result<Note, RevisionError> {
        self.repo
            .get_note(note_id)?
            .ok_or(RevisionError::NoteNotFound(note_id))
    }

    /// Version-gated partial update.
    ///
    /// Creation of a brand-new note is modeled as an update against
    /// `expected_version = 0`; its log entry gets `change_type = create`.
    ///
    /// # Errors
    /// - `Validation` when the expected version is negative or the patch is
    ///   malformed, checked before any transaction.
    /// - `VersionConflict` when the stored version differs; the patch is not
    ///   applied and no version is consumed.
    /// - `NoteNotFound` when the note is missing and `expected_version != 0`.
    pub fn update(
        &mut self,
        note_id: NoteId,
        expected_version: i64,
        patch: &NotePatch,
    ) -> Result<Accepted, RevisionError> {
        let note = self.apply_gated_write(note_id, expected_version, patch)?;
        Ok(Accepted {
            note_id: note.id,
            version: note.version,
            updated_at: note.updated_at,
        })
    }

    /// Re-applies a historical snapshot as a new head version.
    ///
    /// Routes through the same CAS commit as `update`, so it conflicts when
    /// the note changed between the read here and the commit. Never deletes
    /// or rewrites existing history.
    ///
    /// The snapshot fields replace the head wholesale: a snapshot without a
    /// structured document restores the head to no structured document,
    /// which is why this path does not go through `NotePatch` (where an
    /// absent field means "unchanged").
    pub fn restore(
        &mut self,
        note_id: NoteId,
        version_id: VersionId,
    ) -> Result<RestoreOutcome, RevisionError> {
        let target = self
            .repo
            .get_version(note_id, version_id)?
            .ok_or(RevisionError::VersionNotFound {
                note_id,
                version_id,
            })?;
        let head = self.get_note(note_id)?;

        let fields = HeadState {
            title: target.title.clone(),
            content: target.content.clone(),
            structured_content: target.structured_content.clone(),
            is_pinned: head.is_pinned,
        };
        let change = ChangeRecord::with_summary(
            ChangeType::Restore,
            format!("restored from version {}", target.version),
        );
        let note = self.commit_existing(note_id, head.version, &fields, &change)?;

        info!(
            "event=restore_applied module=revision note_id={} restored_from={} new_version={}",
            note_id, target.version, note.version
        );
        Ok(RestoreOutcome {
            new_version: note.version,
            restored_from: target.version,
            note,
        })
    }

    /// Lists the version log newest first.
    ///
    /// `page` is 1-based; `page_size` is clamped to 1..=100.
    pub fn list_versions(
        &self,
        note_id: NoteId,
        page: u32,
        page_size: u32,
    ) -> Result<VersionPage, RevisionError> {
        // Existence check first so a missing note is NotFound, not an empty page.
        self.get_note(note_id)?;
        let page = page.max(1);
        let page_size = page_size.clamp(PAGE_SIZE_MIN, PAGE_SIZE_MAX);
        Ok(self.repo.list_versions(note_id, page, page_size)?)
    }

    /// Reads one version in full.
    pub fn get_version(
        &self,
        note_id: NoteId,
        version_id: VersionId,
    ) -> Result<NoteVersion, RevisionError> {
        self.repo
            .get_version(note_id, version_id)?
            .ok_or(RevisionError::VersionNotFound {
                note_id,
                version_id,
            })
    }

    /// Diffs a historical version against the current head content.
    pub fn diff_with_head(
        &self,
        note_id: NoteId,
        version_id: VersionId,
    ) -> Result<DiffReport, RevisionError> {
        let head = self.get_note(note_id)?;
        let target = self.get_version(note_id, version_id)?;
        Ok(DiffReport {
            from_version: target.version,
            to_version: head.version,
            lines: compute_line_diff(&target.content, &head.content),
        })
    }

    /// Diffs two historical versions of the same note, oldest role first.
    pub fn compare_versions(
        &self,
        note_id: NoteId,
        from_id: VersionId,
        to_id: VersionId,
    ) -> Result<DiffReport, RevisionError> {
        let from = self.get_version(note_id, from_id)?;
        let to = self.get_version(note_id, to_id)?;
        Ok(DiffReport {
            from_version: from.version,
            to_version: to.version,
            lines: compute_line_diff(&from.content, &to.content),
        })
    }

    /// Read-compare-merge-commit step behind `update`.
    fn apply_gated_write(
        &mut self,
        note_id: NoteId,
        expected_version: i64,
        patch: &NotePatch,
    ) -> Result<Note, RevisionError> {
        if expected_version < 0 {
            return Err(PatchValidationError::NegativeExpectedVersion(expected_version).into());
        }
        patch.validate()?;

        match self.repo.get_note(note_id)? {
            None => {
                if expected_version != 0 {
                    return Err(RevisionError::NoteNotFound(note_id));
                }
                let fields = initial_head_state(patch);
                let change = ChangeRecord::new(ChangeType::Create);
                match self.repo.commit_create(note_id, &fields, &change)? {
                    CommitOutcome::Committed(note) => {
                        self.log_accepted(&note);
                        Ok(note)
                    }
                    CommitOutcome::StaleVersion => self.conflict(note_id, expected_version),
                }
            }
            Some(current) => {
                if current.version != expected_version {
                    warn!(
                        "event=cas_conflict module=revision note_id={} expected={} current={}",
                        note_id, expected_version, current.version
                    );
                    return Err(RevisionError::VersionConflict {
                        current: Box::new(current),
                    });
                }

                let merged = current.apply_patch(patch);
                self.commit_existing(
                    note_id,
                    expected_version,
                    &HeadState::from(&merged),
                    &ChangeRecord::new(ChangeType::Update),
                )
            }
        }
    }

    /// Conditional commit against an existing head, shared by update and
    /// restore.
    fn commit_existing(
        &mut self,
        note_id: NoteId,
        expected_version: i64,
        fields: &HeadState,
        change: &ChangeRecord,
    ) -> Result<Note, RevisionError> {
        match self
            .repo
            .commit_update(note_id, expected_version, fields, change)?
        {
            CommitOutcome::Committed(note) => {
                self.log_accepted(&note);
                Ok(note)
            }
            // Lost the race between the caller's read and this commit;
            // surface it exactly like a fast-path conflict.
            CommitOutcome::StaleVersion => self.conflict(note_id, expected_version),
        }
    }

    fn conflict(&self, note_id: NoteId, expected_version: i64) -> Result<Note, RevisionError> {
        let current = self
            .repo
            .get_note(note_id)?
            .ok_or(RevisionError::NoteNotFound(note_id))?;
        warn!(
            "event=cas_conflict module=revision note_id={} expected={} current={}",
            note_id, expected_version, current.version
        );
        Err(RevisionError::VersionConflict {
            current: Box::new(current),
        })
    }

    fn log_accepted(&self, note: &Note) {
        info!(
            "event=cas_accepted module=revision note_id={} version={}",
            note.id, note.version
        );
    }
}

/// Head fields for a first write: patch merged into empty defaults.
fn initial_head_state(patch: &NotePatch) -> HeadState {
    HeadState {
        title: patch.title.clone().unwrap_or_default(),
        content: patch.content.clone().unwrap_or_default(),
        structured_content: patch.structured_content.clone(),
        is_pinned: patch.is_pinned.unwrap_or(false),
    }
}

pub type RevisionResult<T> = Result<T, RevisionError>;
