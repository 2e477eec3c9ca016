use revnote_core::db::open_db_in_memory;
use revnote_core::{
    AutosaveCoordinator, BufferSideChannel, DraftSideChannel, FlushCompletion, FlushRequest,
    FlushResult, FlushState, NoteId, NotePatch, RevisionError, RevisionService,
    SideChannelError, SqliteNoteRepository,
};
use std::time::{Duration, Instant};
use uuid::Uuid;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Runs a flush request against the real revision service the way an
/// editing surface would.
fn perform(
    service: &mut RevisionService<SqliteNoteRepository<'_>>,
    request: &FlushRequest,
) -> FlushResult {
    match service.update(request.note_id, request.base_version, &request.patch) {
        Ok(accepted) => FlushResult::Accepted {
            version: accepted.version,
        },
        Err(RevisionError::VersionConflict { current }) => FlushResult::Conflict { current },
        Err(other) => panic!("unexpected update error: {other}"),
    }
}

struct FailingChannel;

impl DraftSideChannel for FailingChannel {
    fn preserve_draft(
        &mut self,
        _note_id: NoteId,
        _draft: &NotePatch,
    ) -> Result<(), SideChannelError> {
        Err(SideChannelError("clipboard unavailable".to_string()))
    }
}

#[test]
fn rapid_edits_coalesce_into_one_gated_write() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::title("draft")).unwrap();

    let mut coord =
        AutosaveCoordinator::new(note_id, 1, DEBOUNCE, BufferSideChannel::new());
    let t0 = Instant::now();
    coord.record_edit(NotePatch::title("draft v2"), t0);
    coord.record_edit(NotePatch::content("typed fast"), t0 + Duration::from_millis(50));
    coord.record_edit(NotePatch::content("typed faster"), t0 + Duration::from_millis(100));

    let request = coord
        .due_flush(t0 + Duration::from_millis(100) + DEBOUNCE)
        .expect("one merged flush should be due");
    assert_eq!(request.base_version, 1);
    assert_eq!(request.patch.title.as_deref(), Some("draft v2"));
    assert_eq!(request.patch.content.as_deref(), Some("typed faster"));

    let result = perform(&mut service, &request);
    assert_eq!(coord.complete_flush(result), FlushCompletion::Settled);
    assert_eq!(coord.state(), FlushState::Idle);
    assert_eq!(coord.known_version(), 2);

    // Three local edits, exactly one version consumed.
    let head = service.get_note(note_id).unwrap();
    assert_eq!(head.version, 2);
    assert_eq!(head.title, "draft v2");
    assert_eq!(head.content, "typed faster");
}

#[test]
fn edits_during_inflight_reflush_at_the_new_version() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::title("t")).unwrap();

    let mut coord =
        AutosaveCoordinator::new(note_id, 1, DEBOUNCE, BufferSideChannel::new());
    let t0 = Instant::now();
    coord.record_edit(NotePatch::content("first burst"), t0);
    let first = coord.due_flush(t0 + DEBOUNCE).unwrap();

    // More typing lands while the request is on the wire.
    coord.record_edit(NotePatch::content("second burst"), t0 + DEBOUNCE);
    assert_eq!(coord.state(), FlushState::InFlight);

    let result = perform(&mut service, &first);
    let follow_up = match coord.complete_flush(result) {
        FlushCompletion::FollowUp(request) => request,
        other => panic!("expected immediate follow-up flush, got {other:?}"),
    };
    // The follow-up is gated on the version the server just reported, never
    // the stale pre-request one.
    assert_eq!(follow_up.base_version, 2);
    assert_eq!(follow_up.patch.content.as_deref(), Some("second burst"));

    let result = perform(&mut service, &follow_up);
    assert_eq!(coord.complete_flush(result), FlushCompletion::Settled);
    assert_eq!(coord.known_version(), 3);
    assert_eq!(service.get_note(note_id).unwrap().content, "second burst");
}

#[test]
fn conflict_preserves_unsent_edits_and_surfaces_server_snapshot() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::title("shared")).unwrap();

    // Another device edits the note first.
    service
        .update(note_id, 1, &NotePatch::content("other device"))
        .unwrap();

    let mut coord =
        AutosaveCoordinator::new(note_id, 1, DEBOUNCE, BufferSideChannel::new());
    let t0 = Instant::now();
    coord.record_edit(NotePatch::content("local work"), t0);
    let request = coord.due_flush(t0 + DEBOUNCE).unwrap();
    // Typing continues while the doomed request is in flight.
    coord.record_edit(NotePatch::title("local title"), t0 + DEBOUNCE);

    let result = perform(&mut service, &request);
    let completion = coord.complete_flush(result);
    assert_eq!(
        completion,
        FlushCompletion::ConflictDetected {
            side_channel_degraded: false
        }
    );
    assert_eq!(coord.state(), FlushState::ConflictPending);

    let snapshot = coord.server_snapshot().expect("conflict carries snapshot");
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.content, "other device");

    // Both the in-flight and the still-pending edits are preserved.
    let draft = coord.unsent_draft().unwrap();
    assert_eq!(draft.content.as_deref(), Some("local work"));
    assert_eq!(draft.title.as_deref(), Some("local title"));

    // And the side channel received the same merged draft.
    let preserved = coord.side_channel().drafts();
    assert_eq!(preserved.len(), 1);
    assert_eq!(preserved[0].0, note_id);
    assert_eq!(preserved[0].1, *draft);

    // Nothing local leaked into the store.
    let head = service.get_note(note_id).unwrap();
    assert_eq!(head.version, 2);
    assert_eq!(head.content, "other device");
}

#[test]
fn failing_side_channel_degrades_to_a_warning() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::title("shared")).unwrap();
    service.update(note_id, 1, &NotePatch::title("moved on")).unwrap();

    let mut coord = AutosaveCoordinator::new(note_id, 1, DEBOUNCE, FailingChannel);
    let t0 = Instant::now();
    coord.record_edit(NotePatch::content("local"), t0);
    let request = coord.due_flush(t0 + DEBOUNCE).unwrap();

    let result = perform(&mut service, &request);
    let completion = coord.complete_flush(result);
    assert_eq!(
        completion,
        FlushCompletion::ConflictDetected {
            side_channel_degraded: true
        }
    );
    // The conflict choice is still fully presentable.
    assert!(coord.server_snapshot().is_some());
    assert!(coord.unsent_draft().is_some());
}

#[test]
fn retry_local_wins_a_fresh_cas() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::content("base")).unwrap();
    service.update(note_id, 1, &NotePatch::content("other device")).unwrap();

    let t0 = Instant::now();
    let mut coord =
        AutosaveCoordinator::new(note_id, 1, DEBOUNCE, BufferSideChannel::new());
    coord.record_edit(NotePatch::content("mine"), t0);
    let request = coord.due_flush(t0 + DEBOUNCE).unwrap();
    let result = perform(&mut service, &request);
    coord.complete_flush(result);

    let retry = coord.retry_local().expect("retry from conflict");
    assert_eq!(retry.base_version, 2);
    assert_eq!(retry.patch.content.as_deref(), Some("mine"));

    let result = perform(&mut service, &retry);
    assert_eq!(coord.complete_flush(result), FlushCompletion::Settled);
    assert_eq!(coord.known_version(), 3);
    assert_eq!(service.get_note(note_id).unwrap().content, "mine");
}

#[test]
fn adopt_server_discards_local_edits_and_resumes_idle() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();
    service.update(note_id, 0, &NotePatch::content("base")).unwrap();
    service.update(note_id, 1, &NotePatch::content("server wins")).unwrap();

    let mut coord =
        AutosaveCoordinator::new(note_id, 1, DEBOUNCE, BufferSideChannel::new());
    let t0 = Instant::now();
    coord.record_edit(NotePatch::content("local loses"), t0);
    let request = coord.due_flush(t0 + DEBOUNCE).unwrap();
    let result = perform(&mut service, &request);
    coord.complete_flush(result);

    let adopted = coord.adopt_server().expect("snapshot to adopt");
    assert_eq!(adopted.content, "server wins");
    assert_eq!(coord.state(), FlushState::Idle);
    assert_eq!(coord.known_version(), 2);

    // Editing resumes at the server's version.
    let t1 = t0 + Duration::from_secs(10);
    coord.record_edit(NotePatch::content("fresh start"), t1);
    let request = coord.due_flush(t1 + DEBOUNCE).unwrap();
    assert_eq!(request.base_version, 2);
    let result = perform(&mut service, &request);
    assert_eq!(coord.complete_flush(result), FlushCompletion::Settled);
    assert_eq!(service.get_note(note_id).unwrap().version, 3);
}

#[test]
fn quick_capture_creates_note_via_version_zero() {
    let mut conn = open_db_in_memory().unwrap();
    let mut service = RevisionService::new(SqliteNoteRepository::new(&mut conn));
    let note_id = Uuid::new_v4();

    // A quick-capture box starts from a note that does not exist yet.
    let mut coord =
        AutosaveCoordinator::new(note_id, 0, DEBOUNCE, BufferSideChannel::new());
    let t0 = Instant::now();
    coord.record_edit(NotePatch::content("captured thought"), t0);
    let request = coord.due_flush(t0 + DEBOUNCE).unwrap();
    assert_eq!(request.base_version, 0);

    let result = perform(&mut service, &request);
    assert_eq!(coord.complete_flush(result), FlushCompletion::Settled);
    assert_eq!(coord.known_version(), 1);
    assert_eq!(service.get_note(note_id).unwrap().content, "captured thought");
}
