#![forbid(unsafe_code)]

// Action emitters. Each reads the world state, applies its own effect locally
// (the server never echoes our writes back), and queues one frame. A `false`
// return means the precondition failed and nothing was sent.

use serde_json::{json, Value};

use super::corpus;
use super::dispatch::Continuation;
use super::typing::apply_keystrokes;
use super::world::{Comment, CursorPosition};
use super::Engine;
use crate::protocol::envelope::{self, Frame};
use crate::protocol::payloads::FILE_TYPE;
use crate::protocol::EventKind;

impl Engine {
    /// Stamps, encodes and queues an event, registering `then` to run on the
    /// next inbound event of the same kind.
    pub(crate) fn emit(&mut self, kind: EventKind, payload: Value, then: Option<Continuation>) {
        let payload = envelope::stamp(kind, payload, envelope::now_millis());
        self.outbox.push_back(Frame::event(kind, payload).encode());
        self.metrics.record_event_sent(kind);
        if let Some(continuation) = then {
            self.chains.register(kind, continuation);
        }
    }

    pub(crate) fn send_frame(&mut self, frame: Frame) {
        self.outbox.push_back(frame.encode());
        self.metrics.record_frame_sent();
    }

    fn target(&self) -> i64 {
        self.world.target_id()
    }

    // ── Session emitters ────────────────────────────────────────────

    /// Credential, clock sync, then the lesson init that starts the chain.
    pub fn on_open(&mut self) {
        let token = self.identity.token.clone();
        self.send_frame(Frame::authorization(&token));
        self.emit(
            EventKind::TimeSync,
            json!({ "ts1": envelope::now_millis() }),
            None,
        );
        self.emit(
            EventKind::InitLesson,
            json!({ "course_id": self.lesson.course_id, "lesson_id": self.lesson.lesson_id }),
            Some(Continuation::RequestWorkspace),
        );
    }

    /// Liveness ping, echo and feedback refresh
    pub fn housekeeping(&mut self) {
        let owner_id = self.target();
        self.emit(EventKind::ActivityPing, json!({ "owner_id": owner_id }), None);
        self.emit(EventKind::Echo, json!({ "ping": "pong" }), None);
        self.emit(EventKind::FeedbackList, json!({ "owner_id": owner_id }), None);
    }

    /// Periodic file creation, only once ready.
    pub fn spawn_file(&mut self) -> bool {
        self.ready && self.emit_file_create(None)
    }

    /// Sends the graceful-stop disconnect frame
    pub fn disconnect(&mut self) {
        self.send_frame(Frame::Disconnect);
    }

    // ── Action emitters ─────────────────────────────────────────────

    pub(crate) fn emit_dir_info(&mut self, then: Option<Continuation>) -> bool {
        let owner_id = self.target();
        self.emit(EventKind::DirInfo, json!({ "owner_id": owner_id }), then);
        true
    }

    pub(crate) fn emit_file_read(&mut self, file: String, then: Option<Continuation>) {
        let owner_id = self.target();
        self.emit(EventKind::FileRead, json!({ "owner_id": owner_id, "file": file }), then);
    }

    pub(crate) fn emit_random_read(&mut self, then: Option<Continuation>) -> bool {
        let Some(file) = self.world.random_file(&mut self.rng).map(|f| f.name.clone()) else {
            return false;
        };
        self.emit_file_read(file, then);
        true
    }

    pub(crate) fn emit_cursor_move(&mut self) -> bool {
        let Some(open) = self.world.open_file() else {
            return false;
        };
        let cursor = CursorPosition::random_in(&open.content, &mut self.rng);
        let payload = json!({ "owner_id": self.target(), "file": open.name, "cursor": cursor });
        self.emit(EventKind::CursorMove, payload, None);
        true
    }

    /// Types the next corpus window at the end of the open file.
    pub(crate) fn emit_file_mod(&mut self) -> bool {
        let owner_id = self.target();
        let Some(open) = self.world.open_file_mut() else {
            return false;
        };
        let change = self.typing.next_chunk(&mut self.rng);
        if change.is_empty() {
            return false;
        }
        let cursor = CursorPosition::end_of(&open.content);
        apply_keystrokes(&mut open.content, &change);
        let payload = json!({
            "owner_id": owner_id,
            "file": open.name,
            "cursor": { "row": cursor.row, "col": cursor.col },
            "change": change,
        });
        self.emit(EventKind::FileMod, payload, None);
        true
    }

    pub(crate) fn emit_file_save(&mut self) -> bool {
        let Some(open) = self.world.open_file() else {
            return false;
        };
        let payload = json!({ "owner_id": self.target(), "file": open.name, "content": open.content });
        self.emit(EventKind::FileSave, payload, None);
        true
    }

    /// Opens a thread on a random line of the open file. The thread is only
    /// tracked once the server assigns its id.
    pub(crate) fn emit_feedback_add(&mut self) -> bool {
        let Some(open) = self.world.open_file() else {
            return false;
        };
        let line = CursorPosition::random_in(&open.content, &mut self.rng).row;
        let mut acl = vec![self.identity.id];
        if self.target() != self.identity.id {
            acl.push(self.target());
        }
        let payload = json!({
            "owner_id": self.target(),
            "file": open.name,
            "line": line,
            "acl": acl,
            "comment": corpus::random_words(&mut self.rng, None),
        });
        self.emit(EventKind::FeedbackAdd, payload, None);
        true
    }

    pub(crate) fn emit_feedback_comment(&mut self) -> bool {
        let Some(feedback_id) = self.world.random_feedback(&mut self.rng).map(|t| t.id) else {
            return false;
        };
        let content = corpus::random_words(&mut self.rng, None);
        self.world.append_comment(
            feedback_id,
            Comment {
                id: None,
                author: Some(self.identity.id),
                content: content.clone(),
            },
        );
        self.emit(
            EventKind::FeedbackComment,
            json!({ "feedback_id": feedback_id, "content": content }),
            None,
        );
        true
    }

    pub(crate) fn emit_file_create(&mut self, then: Option<Continuation>) -> bool {
        let name = corpus::random_file_name(&mut self.rng);
        self.create_named(name, then)
    }

    pub(crate) fn create_named(&mut self, name: String, then: Option<Continuation>) -> bool {
        if !self.world.insert_file(&name) {
            return false;
        }
        let payload = json!({ "owner_id": self.target(), "file": name, "type": FILE_TYPE });
        self.emit(EventKind::FileCreate, payload, then);
        true
    }

    pub(crate) fn emit_file_update(&mut self) -> bool {
        let Some(old) = self.world.random_file(&mut self.rng).map(|f| f.name.clone()) else {
            return false;
        };
        let new = corpus::random_file_name(&mut self.rng);
        if self.world.file(&new).is_some() || !self.world.rename_file(&old, &new) {
            return false;
        }
        let payload = json!({
            "owner_id": self.target(),
            "file": old,
            "new_file": new,
            "type": FILE_TYPE,
        });
        self.emit(EventKind::FileUpdate, payload, None);
        true
    }

    /// Never deletes the open file.
    pub(crate) fn emit_file_delete(&mut self) -> bool {
        let Some(name) = self.world.random_file(&mut self.rng).map(|f| f.name.clone()) else {
            return false;
        };
        if !self.world.remove_file(&name) {
            return false;
        }
        let payload = json!({ "owner_id": self.target(), "file": name, "type": FILE_TYPE });
        self.emit(EventKind::FileDelete, payload, None);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::typing::BACKSPACE;
    use crate::protocol::envelope::{CORRELATION_ID, TS_SENT};
    use serde_json::json;

    fn open(engine: &mut super::Engine, name: &str, content: &str) {
        engine.handle_text(&event(
            "FILE_READ",
            json!({"owner_id": TARGET_ID, "file": name, "content": content}),
        ));
    }

    #[test]
    fn test_on_open_order() {
        let mut engine = engine(1);
        engine.on_open();
        let frames = engine.drain_outbox();
        assert_eq!(frames[0], r#"40{"Authorization":"Bearer tok"}"#);
        assert_eq!(frame_names(&frames), vec!["40", "TIME_SYNC", "INIT_LESSON"]);
        let init = frame_payload(&frames[2]);
        assert_eq!(init["course_id"], json!(1));
        assert_eq!(init["lesson_id"], json!(2));
        assert!(init[TS_SENT].is_i64());
        assert!(init[CORRELATION_ID].is_string());
    }

    #[test]
    fn test_preconditions_skip_silently() {
        let mut engine = engine(1);
        assert!(!engine.emit_random_read(None));
        assert!(!engine.emit_cursor_move());
        assert!(!engine.emit_file_mod());
        assert!(!engine.emit_file_save());
        assert!(!engine.emit_feedback_add());
        assert!(!engine.emit_feedback_comment());
        assert!(!engine.emit_file_update());
        assert!(!engine.emit_file_delete());
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_delete_refuses_open_file() {
        let mut engine = engine(1);
        open(&mut engine, "main.py", "print(1)\n");
        let before = engine.world().clone();
        for _ in 0..20 {
            assert!(!engine.emit_file_delete());
        }
        assert!(engine.drain_outbox().is_empty());
        assert_eq!(engine.world(), &before);
    }

    #[test]
    fn test_delete_other_file_applies_locally() {
        let mut engine = engine(4);
        open(&mut engine, "main.py", "");
        engine.create_named("b/other.py".to_string(), None);
        engine.drain_outbox();
        let mut deleted = false;
        for _ in 0..50 {
            if engine.emit_file_delete() {
                deleted = true;
                break;
            }
        }
        assert!(deleted);
        assert!(engine.world().file("b/other.py").is_none());
        let frames = engine.drain_outbox();
        let payload = frame_payload(&frames[0]);
        assert_eq!(payload["file"], json!("b/other.py"));
        assert_eq!(payload["type"], json!("file"));
    }

    #[test]
    fn test_file_mod_keeps_local_content_in_sync() {
        let mut engine = engine(9);
        open(&mut engine, "main.py", "");
        let mut replayed = String::new();
        let mut saw_backspace = false;
        for _ in 0..200 {
            assert!(engine.emit_file_mod());
            let frames = engine.drain_outbox();
            let payload = frame_payload(&frames[0]);
            let change = payload["change"].as_str().unwrap();
            saw_backspace |= change.contains(BACKSPACE);
            super::apply_keystrokes(&mut replayed, change);
        }
        assert!(saw_backspace);
        assert_eq!(engine.world().open_file().unwrap().content, replayed);
    }

    #[test]
    fn test_file_mod_cursor_is_end_of_content() {
        let mut engine = engine(2);
        open(&mut engine, "main.py", "ab\ncde");
        engine.emit_file_mod();
        let payload = frame_payload(&engine.drain_outbox()[0]);
        assert_eq!(payload["cursor"], json!({"row": 1, "col": 3}));
    }

    #[test]
    fn test_rename_moves_open_file() {
        let mut engine = engine(5);
        open(&mut engine, "main.py", "x = 1\n");
        assert!(engine.emit_file_update());
        let payload = frame_payload(&engine.drain_outbox()[0]);
        let new = payload["new_file"].as_str().unwrap();
        assert_eq!(payload["file"], json!("main.py"));
        assert!(engine.world().file("main.py").is_none());
        assert_eq!(engine.world().open_file().unwrap().name, new);
        assert_eq!(engine.world().open_file().unwrap().content, "x = 1\n");
    }

    #[test]
    fn test_feedback_comment_appends_locally() {
        let mut engine = engine(6);
        engine.handle_text(&event(
            "FEEDBACK_ADD",
            json!({"id": 30, "owner_id": TARGET_ID, "file": "a.py", "line": 0, "acl": [SELF_ID]}),
        ));
        assert!(engine.emit_feedback_comment());
        let payload = frame_payload(&engine.drain_outbox()[0]);
        assert_eq!(payload["feedback_id"], json!(30));
        let thread = &engine.world().feedbacks()[&30];
        assert_eq!(thread.comments.len(), 1);
        assert_eq!(thread.comments[0].author, Some(SELF_ID));
        assert_eq!(json!(thread.comments[0].content), payload["content"]);
    }

    #[test]
    fn test_feedback_add_payload() {
        let mut engine = engine(8);
        open(&mut engine, "main.py", "a\nb\nc");
        assert!(engine.emit_feedback_add());
        let payload = frame_payload(&engine.drain_outbox()[0]);
        assert_eq!(payload["acl"], json!([SELF_ID, TARGET_ID]));
        assert!(payload["line"].as_u64().unwrap() < 3);
        assert!(payload["comment"].as_str().unwrap().split(' ').count() >= 5);
    }

    #[test]
    fn test_housekeeping_frames() {
        let mut engine = engine(1);
        engine.housekeeping();
        let frames = engine.drain_outbox();
        assert_eq!(frame_names(&frames), vec!["ACTIVITY_PING", "echo", "FEEDBACK_LIST"]);
        assert_eq!(frame_payload(&frames[1])["ping"], json!("pong"));
        assert!(!engine.spawn_file());
    }

    #[test]
    fn test_cursor_move_within_content() {
        let mut engine = engine(12);
        open(&mut engine, "main.py", "one\ntwo");
        for _ in 0..20 {
            assert!(engine.emit_cursor_move());
        }
        for frame in engine.drain_outbox() {
            let cursor = &frame_payload(&frame)["cursor"];
            assert_eq!(cursor["line_count"], json!(2));
            assert!(cursor["row"].as_u64().unwrap() < 2);
            assert!(cursor["col"].as_u64().unwrap() <= 3);
        }
    }
}
