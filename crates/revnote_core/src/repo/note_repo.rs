//! Snapshot store: note heads plus their append-only version log.
//!
//! # Responsibility
//! - Own the `notes` and `note_versions` tables exclusively.
//! - Provide the conditional-commit primitive the concurrency controller
//!   builds its compare-and-swap on.
//!
//! # Invariants
//! - A head write and its version-log append happen in one IMMEDIATE
//!   transaction: both or neither.
//! - `commit_update` only applies when the stored version still equals the
//!   expected version (`UPDATE ... WHERE version = ?`).
//! - Version listing is newest first and restartable via page number.

use crate::db::DbError;
use crate::model::note::{ChangeType, Note, NoteId, NoteVersion, VersionId};
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    title,
    content,
    structured_content,
    is_pinned,
    version,
    created_at,
    updated_at
FROM notes";

const VERSION_SELECT_SQL: &str = "SELECT
    id,
    note_id,
    version,
    title,
    content,
    structured_content,
    change_type,
    change_summary,
    created_at
FROM note_versions";

pub type RepoResult<T> = Result<T, RepoError>;

/// Generic repository error for revision persistence operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(NoteId),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Merged head fields for a pending write, version and timestamps excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadState {
    pub title: String,
    pub content: String,
    pub structured_content: Option<String>,
    pub is_pinned: bool,
}

impl From<&Note> for HeadState {
    fn from(note: &Note) -> Self {
        Self {
            title: note.title.clone(),
            content: note.content.clone(),
            structured_content: note.structured_content.clone(),
            is_pinned: note.is_pinned,
        }
    }
}

/// Provenance recorded on the version row a commit appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub change_type: ChangeType,
    pub change_summary: Option<String>,
}

impl ChangeRecord {
    pub fn new(change_type: ChangeType) -> Self {
        Self {
            change_type,
            change_summary: None,
        }
    }

    pub fn with_summary(change_type: ChangeType, summary: impl Into<String>) -> Self {
        Self {
            change_type,
            change_summary: Some(summary.into()),
        }
    }
}

/// Result of a conditional commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write applied; carries the new head as stored.
    Committed(Note),
    /// The stored version no longer matches the expected one (or, for a
    /// create, the id already exists). Nothing was written.
    StaleVersion,
}

/// One page of the version log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPage {
    pub items: Vec<NoteVersion>,
    pub total: u64,
}

/// Repository interface for note heads and their version log.
pub trait NoteRepository {
    /// Reads the current head, if the note exists.
    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>>;
    /// Creates a note at version 1 together with its `create` log entry.
    /// Returns `StaleVersion` when the id already exists.
    fn commit_create(
        &mut self,
        id: NoteId,
        fields: &HeadState,
        change: &ChangeRecord,
    ) -> RepoResult<CommitOutcome>;
    /// Applies a head write guarded by the expected version, appending one
    /// log entry at `expected_version + 1`.
    fn commit_update(
        &mut self,
        id: NoteId,
        expected_version: i64,
        fields: &HeadState,
        change: &ChangeRecord,
    ) -> RepoResult<CommitOutcome>;
    /// Lists log entries newest first. `page` is 1-based.
    fn list_versions(&self, id: NoteId, page: u32, page_size: u32) -> RepoResult<VersionPage>;
    /// Reads one log entry by its id, scoped to the parent note.
    fn get_version(
        &self,
        note_id: NoteId,
        version_id: VersionId,
    ) -> RepoResult<Option<NoteVersion>>;
    /// Reads one log entry by its version number.
    fn find_version_by_number(
        &self,
        note_id: NoteId,
        version: i64,
    ) -> RepoResult<Option<NoteVersion>>;
}

/// SQLite-backed snapshot store.
pub struct SqliteNoteRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteNoteRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{NOTE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_note_row(row)?));
        }
        Ok(None)
    }

    fn commit_create(
        &mut self,
        id: NoteId,
        fields: &HeadState,
        change: &ChangeRecord,
    ) -> RepoResult<CommitOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id_text = id.to_string();

        if head_exists_in_tx(&tx, id_text.as_str())? {
            return Ok(CommitOutcome::StaleVersion);
        }

        tx.execute(
            "INSERT INTO notes (
                id,
                title,
                content,
                structured_content,
                is_pinned,
                version,
                created_at,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, 1,
                (strftime('%s', 'now') * 1000),
                (strftime('%s', 'now') * 1000)
            );",
            params![
                id_text.as_str(),
                fields.title.as_str(),
                fields.content.as_str(),
                fields.structured_content.as_deref(),
                bool_to_int(fields.is_pinned),
            ],
        )?;

        append_version_in_tx(&tx, id_text.as_str(), 1, fields, change)?;
        let note = read_head_in_tx(&tx, id_text.as_str(), id)?;
        tx.commit()?;
        Ok(CommitOutcome::Committed(note))
    }

    fn commit_update(
        &mut self,
        id: NoteId,
        expected_version: i64,
        fields: &HeadState,
        change: &ChangeRecord,
    ) -> RepoResult<CommitOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let id_text = id.to_string();

        let changed = tx.execute(
            "UPDATE notes
             SET
                title = ?3,
                content = ?4,
                structured_content = ?5,
                is_pinned = ?6,
                version = version + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND version = ?2;",
            params![
                id_text.as_str(),
                expected_version,
                fields.title.as_str(),
                fields.content.as_str(),
                fields.structured_content.as_deref(),
                bool_to_int(fields.is_pinned),
            ],
        )?;

        if changed == 0 {
            if head_exists_in_tx(&tx, id_text.as_str())? {
                return Ok(CommitOutcome::StaleVersion);
            }
            return Err(RepoError::NotFound(id));
        }

        append_version_in_tx(&tx, id_text.as_str(), expected_version + 1, fields, change)?;
        let note = read_head_in_tx(&tx, id_text.as_str(), id)?;
        tx.commit()?;
        Ok(CommitOutcome::Committed(note))
    }

    fn list_versions(&self, id: NoteId, page: u32, page_size: u32) -> RepoResult<VersionPage> {
        let id_text = id.to_string();
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM note_versions WHERE note_id = ?1;",
            [id_text.as_str()],
            |row| row.get(0),
        )?;

        let offset = i64::from(page.saturating_sub(1)) * i64::from(page_size);
        let mut stmt = self.conn.prepare(&format!(
            "{VERSION_SELECT_SQL}
             WHERE note_id = ?1
             ORDER BY version DESC
             LIMIT ?2 OFFSET ?3;"
        ))?;
        let mut rows = stmt.query(params![id_text.as_str(), i64::from(page_size), offset])?;

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_version_row(row)?);
        }

        Ok(VersionPage {
            items,
            total: total as u64,
        })
    }

    fn get_version(
        &self,
        note_id: NoteId,
        version_id: VersionId,
    ) -> RepoResult<Option<NoteVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VERSION_SELECT_SQL} WHERE id = ?1 AND note_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![version_id.to_string(), note_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_version_row(row)?));
        }
        Ok(None)
    }

    fn find_version_by_number(
        &self,
        note_id: NoteId,
        version: i64,
    ) -> RepoResult<Option<NoteVersion>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VERSION_SELECT_SQL} WHERE note_id = ?1 AND version = ?2;"
        ))?;
        let mut rows = stmt.query(params![note_id.to_string(), version])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_version_row(row)?));
        }
        Ok(None)
    }
}

fn append_version_in_tx(
    tx: &Transaction<'_>,
    note_id: &str,
    version: i64,
    fields: &HeadState,
    change: &ChangeRecord,
) -> RepoResult<()> {
    tx.execute(
        "INSERT INTO note_versions (
            id,
            note_id,
            version,
            title,
            content,
            structured_content,
            change_type,
            change_summary,
            created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
            (strftime('%s', 'now') * 1000)
        );",
        params![
            Uuid::new_v4().to_string(),
            note_id,
            version,
            fields.title.as_str(),
            fields.content.as_str(),
            fields.structured_content.as_deref(),
            change.change_type.as_db_str(),
            change.change_summary.as_deref(),
        ],
    )?;
    Ok(())
}

fn read_head_in_tx(tx: &Transaction<'_>, id_text: &str, id: NoteId) -> RepoResult<Note> {
    let mut stmt = tx.prepare(&format!("{NOTE_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id_text])?;
    match rows.next()? {
        Some(row) => parse_note_row(row),
        None => Err(RepoError::NotFound(id)),
    }
}

fn head_exists_in_tx(tx: &Transaction<'_>, id_text: &str) -> RepoResult<bool> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM notes WHERE id = ?1);",
        [id_text],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_note_row(row: &Row<'_>) -> RepoResult<Note> {
    let id_text: String = row.get("id")?;
    let id = parse_uuid(&id_text, "notes.id")?;

    let version: i64 = row.get("version")?;
    if version < 1 {
        return Err(RepoError::InvalidData(format!(
            "invalid version value `{version}` in notes.version"
        )));
    }

    Ok(Note {
        id,
        title: row.get("title")?,
        content: row.get("content")?,
        structured_content: row.get("structured_content")?,
        is_pinned: int_to_bool(row.get("is_pinned")?, "notes.is_pinned")?,
        version,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_version_row(row: &Row<'_>) -> RepoResult<NoteVersion> {
    let id_text: String = row.get("id")?;
    let note_id_text: String = row.get("note_id")?;
    let change_type_text: String = row.get("change_type")?;

    let change_type = ChangeType::from_db_str(&change_type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid change type `{change_type_text}` in note_versions.change_type"
        ))
    })?;

    Ok(NoteVersion {
        id: parse_uuid(&id_text, "note_versions.id")?,
        note_id: parse_uuid(&note_id_text, "note_versions.note_id")?,
        version: row.get("version")?,
        title: row.get("title")?,
        content: row.get("content")?,
        structured_content: row.get("structured_content")?,
        change_type,
        change_summary: row.get("change_summary")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
