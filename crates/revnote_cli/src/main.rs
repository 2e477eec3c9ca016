//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `revnote_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

use revnote_core::db::open_db_in_memory;
use revnote_core::{NotePatch, RevisionService, SqliteNoteRepository};
use uuid::Uuid;

fn main() {
    println!("revnote_core version={}", revnote_core::core_version());

    let mut conn = match open_db_in_memory() {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to open in-memory database: {err}");
            std::process::exit(1);
        }
    };

    let repo = SqliteNoteRepository::new(&mut conn);
    let mut service = RevisionService::new(repo);
    let note_id = Uuid::new_v4();

    match service.update(note_id, 0, &NotePatch::title("smoke note")) {
        Ok(accepted) => println!("created note {note_id} at version {}", accepted.version),
        Err(err) => {
            eprintln!("smoke create failed: {err}");
            std::process::exit(1);
        }
    }
}
