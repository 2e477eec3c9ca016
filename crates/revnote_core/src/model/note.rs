//! Note head and version-snapshot models.
//!
//! # Responsibility
//! - Define `Note` (mutable head) and `NoteVersion` (immutable history row).
//! - Define `NotePatch` partial-update semantics and its validation rules.
//!
//! # Invariants
//! - `Note.version` is a positive integer, strictly monotonic per note.
//! - `NoteVersion.version` matches the head version at the moment the entry
//!   was produced; entries are never mutated afterwards.
//! - `structured_content` is an opaque serialized blob; core code never
//!   interprets it.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a note head.
pub type NoteId = Uuid;

/// Stable identifier of one history entry.
pub type VersionId = Uuid;

/// Maximum accepted title length, matching the storage column width.
pub const MAX_TITLE_CHARS: usize = 500;

/// Maximum accepted change-summary length, matching the storage column width.
pub const MAX_SUMMARY_CHARS: usize = 500;

/// Kind of write that produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// First accepted write of a note (version 1).
    Create,
    /// Regular version-gated edit.
    Update,
    /// Re-application of a historical snapshot as a new version.
    Restore,
}

impl ChangeType {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Restore => "restore",
        }
    }

    pub(crate) fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "restore" => Some(Self::Restore),
            _ => None,
        }
    }
}

/// Mutable note head.
///
/// Editing surfaces hold read-only, possibly stale copies of this shape; the
/// only way to mutate the stored head is a version-gated update through the
/// revision service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Stable note id.
    pub id: NoteId,
    /// Display title. Empty string when never set.
    pub title: String,
    /// Plain-text projection of the document body.
    pub content: String,
    /// Opaque serialized rich-text document, owned by the editor collaborator.
    pub structured_content: Option<String>,
    /// Pin flag for list ordering surfaces.
    pub is_pinned: bool,
    /// Optimistic-concurrency token. Positive and gap-free per note.
    pub version: i64,
    /// Creation timestamp, unix epoch milliseconds.
    pub created_at: i64,
    /// Last accepted write timestamp, unix epoch milliseconds.
    pub updated_at: i64,
}

/// Immutable history entry: the full head state at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteVersion {
    /// Stable id of this history entry.
    pub id: VersionId,
    /// Parent note id.
    pub note_id: NoteId,
    /// Head version number at the moment this entry was produced.
    pub version: i64,
    /// Title snapshot.
    pub title: String,
    /// Plain-text content snapshot.
    pub content: String,
    /// Opaque structured-document snapshot.
    pub structured_content: Option<String>,
    /// Kind of write that produced this entry.
    pub change_type: ChangeType,
    /// Optional human-readable description of the change.
    pub change_summary: Option<String>,
    /// Entry timestamp, unix epoch milliseconds.
    pub created_at: i64,
}

/// Partial update applied to a note head.
///
/// Fields left as `None` are unchanged by the write. There is no way to
/// clear `structured_content` back to absent through a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub structured_content: Option<String>,
    pub is_pinned: Option<bool>,
}

/// Validation failure for a patch or update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValidationError {
    /// The patch sets no field at all.
    EmptyPatch,
    /// The presented expected version is negative.
    NegativeExpectedVersion(i64),
    /// Title exceeds the storage column width.
    TitleTooLong { chars: usize },
}

impl Display for PatchValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPatch => write!(f, "patch must set at least one field"),
            Self::NegativeExpectedVersion(version) => {
                write!(f, "expected version must be >= 0, got {version}")
            }
            Self::TitleTooLong { chars } => {
                write!(f, "title of {chars} chars exceeds limit of {MAX_TITLE_CHARS}")
            }
        }
    }
}

impl Error for PatchValidationError {}

impl NotePatch {
    /// Creates a patch that only changes the title.
    pub fn title(value: impl Into<String>) -> Self {
        Self {
            title: Some(value.into()),
            ..Self::default()
        }
    }

    /// Creates a patch that only changes the plain-text content.
    pub fn content(value: impl Into<String>) -> Self {
        Self {
            content: Some(value.into()),
            ..Self::default()
        }
    }

    /// Returns whether the patch sets no field.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.structured_content.is_none()
            && self.is_pinned.is_none()
    }

    /// Checks field-level constraints shared by every write path.
    pub fn validate(&self) -> Result<(), PatchValidationError> {
        if self.is_empty() {
            return Err(PatchValidationError::EmptyPatch);
        }
        if let Some(title) = self.title.as_deref() {
            let chars = title.chars().count();
            if chars > MAX_TITLE_CHARS {
                return Err(PatchValidationError::TitleTooLong { chars });
            }
        }
        Ok(())
    }

    /// Folds a later patch into this one. Later values win per field.
    pub fn merge(&mut self, later: NotePatch) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.structured_content.is_some() {
            self.structured_content = later.structured_content;
        }
        if later.is_pinned.is_some() {
            self.is_pinned = later.is_pinned;
        }
    }
}

impl Note {
    /// Applies partial-update semantics, returning the would-be next head
    /// fields without touching `version` or timestamps.
    pub fn apply_patch(&self, patch: &NotePatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = patch.title.clone() {
            next.title = title;
        }
        if let Some(content) = patch.content.clone() {
            next.content = content;
        }
        if let Some(blob) = patch.structured_content.clone() {
            next.structured_content = Some(blob);
        }
        if let Some(pinned) = patch.is_pinned {
            next.is_pinned = pinned;
        }
        next
    }
}
