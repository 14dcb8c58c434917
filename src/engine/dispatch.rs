#![forbid(unsafe_code)]

// Inbound dispatch and one-shot continuation chains

use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use super::Engine;
use crate::protocol::envelope::{self, Frame, Inbound};
use crate::protocol::payloads::{
    self, Accessibility, CommentPayload, DirListing, FeedbackList, FeedbackPayload, FileEvent,
    RosterSnapshot,
};
use crate::protocol::EventKind;

/// Follow-up step of the initialization sequence, run when the next event of
/// the kind it was registered against is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// After INIT_LESSON: roster, accessibility and directory listing
    RequestWorkspace,
    /// After DIR_INFO: create a file if the tree is empty, else open one
    OpenInitialFile,
    /// After FILE_CREATE: open the file just created
    ReadCreatedFile(String),
    /// After FILE_READ: start random actions
    MarkReady,
}

/// Pending continuations per event kind, fired FIFO and at most once.
#[derive(Debug, Default)]
pub struct ChainRegistry {
    pending: HashMap<EventKind, VecDeque<Continuation>>,
}

impl ChainRegistry {
    pub fn register(&mut self, kind: EventKind, continuation: Continuation) {
        self.pending.entry(kind).or_default().push_back(continuation);
    }

    /// Removes and returns everything queued for `kind`. Continuations
    /// registered while these run wait for the next event.
    pub fn take(&mut self, kind: EventKind) -> VecDeque<Continuation> {
        self.pending.remove(&kind).unwrap_or_default()
    }

    pub fn pending(&self, kind: EventKind) -> usize {
        self.pending.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(VecDeque::is_empty)
    }
}

impl Engine {
    /// Entry point for every inbound text frame. Never fails: malformed input
    /// is logged and dropped.
    pub fn handle_text(&mut self, text: &str) {
        match envelope::decode(text) {
            Ok(Inbound::Probe) => self.send_frame(Frame::Ping),
            Ok(Inbound::Control { tag, body }) => {
                tracing::debug!("{}: control frame {}{}", self.client_id(), tag, body);
            }
            Ok(Inbound::Event { name, mut payload, .. }) => {
                if let Some(ack) = envelope::timestamp_ack(&mut payload, envelope::now_millis()) {
                    self.emit(EventKind::TimestampAck, ack, None);
                }
                self.dispatch(&name, payload);
            }
            Err(e) => {
                tracing::warn!("{}: dropping frame: {}", self.client_id(), e);
                self.metrics.record_malformed_frame();
            }
        }
    }

    /// Routes a decoded event: log, handler, then pending chains.
    pub fn dispatch(&mut self, name: &str, payload: Value) {
        let kind = match name.parse::<EventKind>() {
            Ok(kind) if kind.is_inbound() => kind,
            _ => {
                tracing::warn!("{}: no handler for {}", self.client_id(), name);
                self.metrics.record_unknown_event();
                return;
            }
        };

        tracing::debug!("{}: recv {} ({})", self.client_id(), kind, self.log.len());
        self.metrics.record_event_received(kind);
        if let Some(delay) = envelope::delivery_delay_ms(&payload) {
            self.metrics.record_delivery_delay(kind, delay);
        }

        self.handle_event(kind, &payload);
        self.log.push(payload);

        let pending = self.chains.take(kind);
        for continuation in pending {
            self.run_continuation(continuation);
        }
    }

    fn handle_event(&mut self, kind: EventKind, payload: &Value) {
        let client_id = self.metrics.client_id().to_string();
        let applied = match kind {
            EventKind::DirInfo => decode::<DirListing>(&client_id, kind, payload)
                .map(|listing| self.world.apply_dir_listing(&listing) > 0),
            EventKind::FileRead => decode::<FileEvent>(&client_id, kind, payload)
                .map(|event| self.world.apply_file_read(&event)),
            EventKind::FileCreate => decode::<FileEvent>(&client_id, kind, payload)
                .map(|event| self.world.apply_file_create(&event)),
            EventKind::FileUpdate => decode::<FileEvent>(&client_id, kind, payload)
                .map(|event| self.world.apply_file_rename(&event)),
            EventKind::FileDelete => decode::<FileEvent>(&client_id, kind, payload)
                .map(|event| self.world.apply_file_delete(&event)),
            EventKind::FeedbackAdd => decode::<FeedbackPayload>(&client_id, kind, payload)
                .map(|feedback| self.world.apply_feedback(&feedback)),
            EventKind::FeedbackComment => decode::<CommentPayload>(&client_id, kind, payload)
                .map(|comment| self.world.apply_comment(&comment)),
            EventKind::FeedbackList => decode::<FeedbackList>(&client_id, kind, payload)
                .map(|list| self.world.apply_feedback_list(&list) > 0),
            EventKind::AllParticipant => decode::<RosterSnapshot>(&client_id, kind, payload)
                .map(|snapshot| {
                    self.world.apply_roster_snapshot(&snapshot);
                    true
                }),
            EventKind::ParticipantStatus => Some(
                payload
                    .as_object()
                    .is_some_and(|patch| self.world.apply_status_patch(patch)),
            ),
            EventKind::ProjectAccessible => decode::<Accessibility>(&client_id, kind, payload)
                .map(|access| {
                    self.world.apply_accessibility(&access);
                    true
                }),
            EventKind::TimeSyncAck => {
                self.answer_time_sync(payload);
                Some(true)
            }
            // Other participants' edits and acknowledgements of ours
            EventKind::CursorMove
            | EventKind::FileMod
            | EventKind::FileSave
            | EventKind::Echo
            | EventKind::InitLesson => Some(false),
            // Outbound only
            EventKind::ActivityPing | EventKind::TimeSync | EventKind::TimestampAck => None,
        };

        if applied == Some(true) {
            tracing::debug!("{}: {} applied", client_id, kind);
        }
    }

    /// Echoes the clock-sync acknowledgement back with our receive time.
    fn answer_time_sync(&mut self, payload: &Value) {
        let mut reply = match payload {
            Value::Object(map) => map.clone(),
            _ => return,
        };
        reply.insert("ts2".to_string(), Value::from(envelope::now_millis()));
        self.emit(EventKind::TimeSyncAck, Value::Object(reply), None);
    }

    fn run_continuation(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::RequestWorkspace => {
                let lesson_id = self.lesson.lesson_id;
                let owner_id = self.world.target_id();
                self.emit(
                    EventKind::AllParticipant,
                    serde_json::json!({ "lesson_id": lesson_id }),
                    None,
                );
                self.emit(
                    EventKind::ProjectAccessible,
                    serde_json::json!({ "owner_id": owner_id }),
                    None,
                );
                self.emit_dir_info(Some(Continuation::OpenInitialFile));
            }
            Continuation::OpenInitialFile => {
                if self.world.files().is_empty() {
                    let name = super::corpus::random_file_name(&mut self.rng);
                    self.create_named(name.clone(), Some(Continuation::ReadCreatedFile(name)));
                } else {
                    self.emit_random_read(Some(Continuation::MarkReady));
                }
            }
            Continuation::ReadCreatedFile(name) => {
                self.emit_file_read(name, Some(Continuation::MarkReady));
            }
            Continuation::MarkReady => self.mark_ready(),
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        if self.ready {
            return;
        }
        self.ready = true;
        self.metrics.mark_ready();
        tracing::info!("{}: workspace ready, starting random actions", self.client_id());
    }
}

/// Decodes a payload model, logging and skipping on a shape mismatch.
fn decode<T>(client_id: &str, kind: EventKind, payload: &Value) -> Option<T>
where
    T: for<'de> serde::Deserialize<'de> + Default,
{
    match payloads::parse::<T>(payload) {
        Ok(model) => Some(model),
        Err(e) => {
            tracing::warn!("{}: malformed {} payload: {}", client_id, kind, e);
            None
        }
    }
}
