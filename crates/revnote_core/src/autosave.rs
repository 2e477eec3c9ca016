//! Client-side autosave coordinator.
//!
//! # Responsibility
//! - Coalesce rapid local edits into a minimal number of version-gated
//!   update calls.
//! - Reconcile conflicts without silently losing unsent edits.
//!
//! # Invariants
//! - One coalescing deadline per note, never per field.
//! - Every flush uses the most recently known-accepted version, never a
//!   stale pre-request one.
//! - A conflict is always surfaced for an explicit user choice; the
//!   coordinator never retries on its own.
//! - Side-channel failure degrades to a warning; it never blocks the
//!   conflict flow.
//!
//! The coordinator is deterministic: callers supply `Instant`s instead of
//! the coordinator owning a timer, which keeps it runtime-free and testable
//! without sleeping.

use crate::model::note::{Note, NoteId, NotePatch};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Default coalescing window between the last local edit and the flush.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Failure writing the conflict-recovery draft copy. Soft: logged and
/// reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideChannelError(pub String);

impl Display for SideChannelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "draft side channel failed: {}", self.0)
    }
}

impl Error for SideChannelError {}

/// Best-effort external copy of unsent local edits, used only as a
/// conflict-recovery aid. Clipboard in a browser, a scratch buffer or file
/// elsewhere.
pub trait DraftSideChannel {
    fn preserve_draft(&mut self, note_id: NoteId, draft: &NotePatch)
        -> Result<(), SideChannelError>;
}

/// In-memory side channel. The default for non-browser targets and tests.
#[derive(Debug, Default)]
pub struct BufferSideChannel {
    drafts: Vec<(NoteId, NotePatch)>,
}

impl BufferSideChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns preserved drafts, newest last.
    pub fn drafts(&self) -> &[(NoteId, NotePatch)] {
        &self.drafts
    }
}

impl DraftSideChannel for BufferSideChannel {
    fn preserve_draft(
        &mut self,
        note_id: NoteId,
        draft: &NotePatch,
    ) -> Result<(), SideChannelError> {
        self.drafts.push((note_id, draft.clone()));
        Ok(())
    }
}

/// Coordinator state per open note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// No local edits outstanding.
    Idle,
    /// Edits accumulated, coalescing deadline running.
    PendingFlush,
    /// One update call outstanding.
    InFlight,
    /// The last flush conflicted; waiting for an explicit user choice.
    ConflictPending,
}

/// One outgoing version-gated update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequest {
    pub note_id: NoteId,
    /// Last known-accepted version the CAS is gated on.
    pub base_version: i64,
    /// All edits accumulated since the last accepted write, merged.
    pub patch: NotePatch,
}

/// Outcome of the update call the editing surface performed for a
/// `FlushRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushResult {
    Accepted { version: i64 },
    Conflict { current: Box<Note> },
}

/// What the coordinator decided after a flush completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushCompletion {
    /// Nothing left to send.
    Settled,
    /// Edits arrived while the request was in flight; send this immediately.
    FollowUp(FlushRequest),
    /// The write conflicted; present the server snapshot to the user.
    ConflictDetected {
        /// True when the draft copy could not be preserved externally.
        side_channel_degraded: bool,
    },
}

#[derive(Debug)]
struct ConflictState {
    server: Note,
    unsent: NotePatch,
    side_channel_degraded: bool,
}

/// Single-note autosave state machine.
pub struct AutosaveCoordinator<C: DraftSideChannel> {
    note_id: NoteId,
    known_version: i64,
    debounce: Duration,
    state: FlushState,
    pending: Option<NotePatch>,
    in_flight: Option<NotePatch>,
    deadline: Option<Instant>,
    conflict: Option<ConflictState>,
    side_channel: C,
}

impl<C: DraftSideChannel> AutosaveCoordinator<C> {
    /// Creates a coordinator for a note loaded at `known_version`.
    /// `known_version = 0` means the note does not exist yet; the first
    /// flush will create it.
    pub fn new(note_id: NoteId, known_version: i64, debounce: Duration, side_channel: C) -> Self {
        Self {
            note_id,
            known_version,
            debounce,
            state: FlushState::Idle,
            pending: None,
            in_flight: None,
            deadline: None,
            conflict: None,
            side_channel,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    /// Version of the last write the server accepted from this coordinator.
    pub fn known_version(&self) -> i64 {
        self.known_version
    }

    /// Records one local edit and resets the coalescing deadline. Title,
    /// content, structural, and pin changes all flow through the same queue.
    pub fn record_edit(&mut self, patch: NotePatch, now: Instant) {
        match self.state {
            FlushState::Idle | FlushState::PendingFlush => {
                merge_into(&mut self.pending, patch);
                self.deadline = Some(now + self.debounce);
                self.state = FlushState::PendingFlush;
            }
            FlushState::InFlight => {
                // Accumulates into the second pending patch; it flushes
                // immediately once the in-flight response lands.
                merge_into(&mut self.pending, patch);
            }
            FlushState::ConflictPending => {
                // The user kept typing while the conflict dialog is up; the
                // edits join the unsent draft so neither resolution path
                // loses them.
                if let Some(conflict) = self.conflict.as_mut() {
                    conflict.unsent.merge(patch);
                }
            }
        }
    }

    /// Returns the merged flush to send when the coalescing deadline passed
    /// and no request is in flight.
    pub fn due_flush(&mut self, now: Instant) -> Option<FlushRequest> {
        if self.state != FlushState::PendingFlush {
            return None;
        }
        let due = self.deadline.is_some_and(|deadline| now >= deadline);
        if !due {
            return None;
        }

        let patch = self.pending.take()?;
        self.deadline = None;
        self.in_flight = Some(patch.clone());
        self.state = FlushState::InFlight;
        Some(FlushRequest {
            note_id: self.note_id,
            base_version: self.known_version,
            patch,
        })
    }

    /// Feeds back the result of the in-flight update call.
    pub fn complete_flush(&mut self, result: FlushResult) -> FlushCompletion {
        if self.state != FlushState::InFlight {
            return FlushCompletion::Settled;
        }

        match result {
            FlushResult::Accepted { version } => {
                self.known_version = version;
                self.in_flight = None;

                match self.pending.take() {
                    Some(patch) => {
                        // Flush accumulated edits right away, gated on the
                        // version the server just reported.
                        self.in_flight = Some(patch.clone());
                        FlushCompletion::FollowUp(FlushRequest {
                            note_id: self.note_id,
                            base_version: self.known_version,
                            patch,
                        })
                    }
                    None => {
                        self.state = FlushState::Idle;
                        FlushCompletion::Settled
                    }
                }
            }
            FlushResult::Conflict { current } => {
                let mut unsent = self.in_flight.take().unwrap_or_default();
                if let Some(pending) = self.pending.take() {
                    unsent.merge(pending);
                }
                self.deadline = None;

                let side_channel_degraded =
                    match self.side_channel.preserve_draft(self.note_id, &unsent) {
                        Ok(()) => false,
                        Err(err) => {
                            warn!(
                                "event=draft_preserve_failed module=autosave note_id={} error={}",
                                self.note_id, err
                            );
                            true
                        }
                    };

                self.conflict = Some(ConflictState {
                    server: *current,
                    unsent,
                    side_channel_degraded,
                });
                self.state = FlushState::ConflictPending;
                FlushCompletion::ConflictDetected {
                    side_channel_degraded,
                }
            }
        }
    }

    /// Read access to the side channel, e.g. to offer the preserved draft
    /// back to the user.
    pub fn side_channel(&self) -> &C {
        &self.side_channel
    }

    /// The authoritative snapshot carried by the pending conflict.
    pub fn server_snapshot(&self) -> Option<&Note> {
        self.conflict.as_ref().map(|c| &c.server)
    }

    /// The local edits that were not accepted, merged.
    pub fn unsent_draft(&self) -> Option<&NotePatch> {
        self.conflict.as_ref().map(|c| &c.unsent)
    }

    /// Resolves the conflict by discarding local edits and adopting the
    /// server snapshot. Returns the snapshot for the surface to re-render.
    pub fn adopt_server(&mut self) -> Option<Note> {
        let conflict = self.conflict.take()?;
        self.known_version = conflict.server.version;
        self.state = FlushState::Idle;
        Some(conflict.server)
    }

    /// Resolves the conflict by keeping the local edits: bumps the known
    /// version to the server's and re-issues the merged patch as a normal
    /// CAS retry.
    pub fn retry_local(&mut self) -> Option<FlushRequest> {
        let conflict = self.conflict.take()?;
        self.known_version = conflict.server.version;
        self.in_flight = Some(conflict.unsent.clone());
        self.state = FlushState::InFlight;
        Some(FlushRequest {
            note_id: self.note_id,
            base_version: self.known_version,
            patch: conflict.unsent,
        })
    }
}

fn merge_into(slot: &mut Option<NotePatch>, patch: NotePatch) {
    match slot {
        Some(existing) => existing.merge(patch),
        None => *slot = Some(patch),
    }
}
