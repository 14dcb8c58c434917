#![forbid(unsafe_code)]

// Simulated-participant protocol engine
//
// The engine is sans-IO: emitters and the inbound dispatcher push encoded
// frames into an outbox which the session loop drains onto the transport.
// All state is owned by one engine per virtual user and mutated from a single
// task, so no locking is needed.

pub mod corpus;
pub mod dispatch;
pub mod emitters;
pub mod selector;
pub mod typing;
pub mod world;

pub use dispatch::{ChainRegistry, Continuation};
pub use selector::WeightedSelector;
pub use typing::TypingSynth;
pub use world::{CursorPosition, FileEntry, WorldState};

use rand::rngs::StdRng;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{LessonContext, ParticipantIdentity};
use crate::metrics::MetricsCollector;
use crate::protocol::{Action, DEFAULT_WEIGHTS};

pub struct Engine {
    identity: ParticipantIdentity,
    lesson: LessonContext,
    world: WorldState,
    chains: ChainRegistry,
    typing: TypingSynth,
    selector: WeightedSelector<Action>,
    rng: StdRng,
    outbox: VecDeque<String>,
    /// Every dispatched inbound payload, in arrival order
    log: Vec<Value>,
    ready: bool,
    metrics: Arc<MetricsCollector>,
}

impl Engine {
    pub fn new(
        identity: ParticipantIdentity,
        lesson: LessonContext,
        rng: StdRng,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let world = WorldState::new(identity.target_participant_id);
        Self {
            identity,
            lesson,
            world,
            chains: ChainRegistry::default(),
            typing: TypingSynth::default(),
            selector: WeightedSelector::new(DEFAULT_WEIGHTS),
            rng,
            outbox: VecDeque::new(),
            log: Vec::new(),
            ready: false,
            metrics,
        }
    }

    /// Replaces the action weight table
    pub fn with_weights(mut self, weights: impl IntoIterator<Item = (Action, f64)>) -> Self {
        self.selector = WeightedSelector::new(weights);
        self
    }

    pub fn client_id(&self) -> &str {
        self.metrics.client_id()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    /// Set once the initialization chain completes
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn log(&self) -> &[Value] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.log)
    }

    /// Encoded frames waiting to be written, oldest first
    pub fn drain_outbox(&mut self) -> Vec<String> {
        self.outbox.drain(..).collect()
    }

    /// Picks a weighted-random action and runs its emitter.
    ///
    /// Returns `None` before the session is ready. The flag is `false` when the
    /// emitter's precondition failed and nothing was sent.
    pub fn tick_action(&mut self) -> Option<(Action, bool)> {
        if !self.ready {
            return None;
        }
        let action = self.selector.select(&mut self.rng)?;
        let emitted = self.run_action(action);
        Some((action, emitted))
    }

    pub fn run_action(&mut self, action: Action) -> bool {
        match action {
            Action::DirInfo => self.emit_dir_info(None),
            Action::FileRead => self.emit_random_read(None),
            Action::CursorMove => self.emit_cursor_move(),
            Action::FileMod => self.emit_file_mod(),
            Action::FileSave => self.emit_file_save(),
            Action::FeedbackAdd => self.emit_feedback_add(),
            Action::FeedbackComment => self.emit_feedback_comment(),
            Action::FileCreate => self.emit_file_create(None),
            Action::FileUpdate => self.emit_file_update(),
            Action::FileDelete => self.emit_file_delete(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_actions_before_ready() {
        let mut engine = engine(1);
        assert_eq!(engine.tick_action(), None);
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_zero_weights_disable_actions() {
        let mut engine = engine(1).with_weights([(Action::DirInfo, 0.0)]);
        engine.handle_text(&event("FILE_READ", json!({"owner_id": TARGET_ID, "file": "a.py", "content": ""})));
        engine.mark_ready();
        assert_eq!(engine.tick_action(), None);
    }

    #[test]
    fn test_ready_engine_emits_actions() {
        let mut engine = engine(3);
        engine.handle_text(&event("FILE_READ", json!({"owner_id": TARGET_ID, "file": "a.py", "content": "x = 1\n"})));
        engine.mark_ready();
        let mut emitted = 0;
        for _ in 0..50 {
            if let Some((_, true)) = engine.tick_action() {
                emitted += 1;
            }
        }
        assert!(emitted > 40);
        assert_eq!(engine.drain_outbox().len(), emitted);
    }
}
