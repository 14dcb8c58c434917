#![forbid(unsafe_code)]

// World state - this participant's local mirror of the target's project
//
// Inbound updates are idempotent and order-tolerant: the server may replay a
// listing, acknowledge an edit we already applied locally, or deliver a comment
// before the feedback thread it belongs to.

use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::payloads::{
    participant_id, Accessibility, CommentPayload, DirListing, FeedbackList, FeedbackPayload,
    FileEvent, RosterSnapshot,
};

/// Listing entries ending with this marker are placeholders, not files
pub const PLACEHOLDER_SUFFIX: &str = ".keep";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub content: String,
}

impl FileEntry {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: String::new(),
        }
    }
}

/// Cursor location inside a file's content. Always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorPosition {
    pub line_count: usize,
    pub row: usize,
    pub col: usize,
}

impl CursorPosition {
    /// Random row, then a random column within that row.
    pub fn random_in<R: Rng + ?Sized>(content: &str, rng: &mut R) -> Self {
        let lines: Vec<&str> = content.split('\n').collect();
        let row = rng.gen_range(0..lines.len());
        let col = rng.gen_range(0..=lines[row].chars().count());
        Self {
            line_count: lines.len(),
            row,
            col,
        }
    }

    /// Position just past the last character.
    pub fn end_of(content: &str) -> Self {
        let line_count = content.matches('\n').count() + 1;
        let col = content
            .rsplit('\n')
            .next()
            .map(|line| line.chars().count())
            .unwrap_or_default();
        Self {
            line_count,
            row: line_count - 1,
            col,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackRef {
    pub owner_id: i64,
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: Option<i64>,
    pub author: Option<i64>,
    pub content: String,
}

impl From<&CommentPayload> for Comment {
    fn from(payload: &CommentPayload) -> Self {
        Self {
            id: payload.id,
            author: payload.ptc_id,
            content: payload.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackThread {
    pub id: i64,
    /// `None` while the thread is a shell created by an early comment
    pub reference: Option<FeedbackRef>,
    pub acl: BTreeSet<i64>,
    pub comments: Vec<Comment>,
}

impl FeedbackThread {
    fn shell(id: i64) -> Self {
        Self {
            id,
            reference: None,
            acl: BTreeSet::new(),
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldState {
    target_id: i64,
    files: BTreeMap<String, FileEntry>,
    open_file: Option<String>,
    roster: BTreeMap<i64, Map<String, Value>>,
    accessible_to: Vec<i64>,
    accessible_from: Vec<i64>,
    feedbacks: BTreeMap<i64, FeedbackThread>,
}

impl WorldState {
    pub fn new(target_id: i64) -> Self {
        Self {
            target_id,
            files: BTreeMap::new(),
            open_file: None,
            roster: BTreeMap::new(),
            accessible_to: Vec::new(),
            accessible_from: Vec::new(),
            feedbacks: BTreeMap::new(),
        }
    }

    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.get(name)
    }

    pub fn open_file(&self) -> Option<&FileEntry> {
        self.open_file.as_deref().and_then(|name| self.files.get(name))
    }

    pub fn open_file_mut(&mut self) -> Option<&mut FileEntry> {
        let name = self.open_file.as_deref()?;
        self.files.get_mut(name)
    }

    pub fn roster(&self) -> &BTreeMap<i64, Map<String, Value>> {
        &self.roster
    }

    pub fn accessible_to(&self) -> &[i64] {
        &self.accessible_to
    }

    pub fn accessible_from(&self) -> &[i64] {
        &self.accessible_from
    }

    pub fn feedbacks(&self) -> &BTreeMap<i64, FeedbackThread> {
        &self.feedbacks
    }

    pub fn random_file<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&FileEntry> {
        if self.files.is_empty() {
            return None;
        }
        self.files.values().nth(rng.gen_range(0..self.files.len()))
    }

    pub fn random_feedback<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&FeedbackThread> {
        if self.feedbacks.is_empty() {
            return None;
        }
        self.feedbacks.values().nth(rng.gen_range(0..self.feedbacks.len()))
    }

    fn owned_by_target(&self, owner_id: Option<i64>) -> bool {
        owner_id == Some(self.target_id)
    }

    // ── Inbound updates ─────────────────────────────────────────────

    /// Inserts unseen entries as empty files; existing content is never replaced.
    /// Returns the number of files added.
    pub fn apply_dir_listing(&mut self, listing: &DirListing) -> usize {
        if listing.owner_id.is_some_and(|owner| owner != self.target_id) {
            return 0;
        }
        let mut added = 0;
        for entry in &listing.files {
            let name = entry.name();
            if name.is_empty() || entry.is_directory() || name.ends_with(PLACEHOLDER_SUFFIX) {
                continue;
            }
            if !self.files.contains_key(name) {
                self.files.insert(name.to_string(), FileEntry::empty(name));
                added += 1;
            }
        }
        added
    }

    pub fn apply_file_read(&mut self, event: &FileEvent) -> bool {
        if !self.owned_by_target(event.owner_id) {
            return false;
        }
        let Some(name) = event.file.as_deref() else {
            return false;
        };
        let content = event.content.clone().unwrap_or_default();
        self.files
            .entry(name.to_string())
            .and_modify(|entry| entry.content = content.clone())
            .or_insert_with(|| FileEntry {
                name: name.to_string(),
                content,
            });
        self.open_file = Some(name.to_string());
        true
    }

    pub fn apply_file_create(&mut self, event: &FileEvent) -> bool {
        if event.outcome.is_error() || !self.owned_by_target(event.owner_id) || event.is_directory() {
            return false;
        }
        match event.file.as_deref() {
            Some(name) => self.insert_file(name),
            None => false,
        }
    }

    pub fn apply_file_delete(&mut self, event: &FileEvent) -> bool {
        if event.outcome.is_error() || !self.owned_by_target(event.owner_id) {
            return false;
        }
        let Some(name) = event.file.as_deref() else {
            return false;
        };
        if self.open_file.as_deref() == Some(name) {
            self.open_file = None;
        }
        self.files.remove(name).is_some()
    }

    pub fn apply_file_rename(&mut self, event: &FileEvent) -> bool {
        if event.outcome.is_error() || !self.owned_by_target(event.owner_id) || event.is_directory() {
            return false;
        }
        match (event.file.as_deref(), event.new_file.as_deref()) {
            (Some(old), Some(new)) => self.rename_file(old, new),
            _ => false,
        }
    }

    /// Per-participant replace; participants absent from the snapshot are kept.
    pub fn apply_roster_snapshot(&mut self, snapshot: &RosterSnapshot) {
        for record in &snapshot.participants {
            if let Some(id) = participant_id(record) {
                self.roster.insert(id, record.clone());
            }
        }
    }

    /// Merges a partial status record into the participant's last known record.
    pub fn apply_status_patch(&mut self, patch: &Map<String, Value>) -> bool {
        let Some(id) = participant_id(patch) else {
            return false;
        };
        let record = self.roster.entry(id).or_default();
        for (key, value) in patch {
            record.insert(key.clone(), value.clone());
        }
        true
    }

    pub fn apply_accessibility(&mut self, access: &Accessibility) {
        self.accessible_to = access.accessible_to.clone();
        self.accessible_from = access.accessible_from.clone();
    }

    /// Creates the thread on first sighting, or backfills a shell left by an
    /// early comment. Comments already collected are kept.
    pub fn apply_feedback(&mut self, feedback: &FeedbackPayload) -> bool {
        if feedback.outcome.is_error() {
            return false;
        }
        let Some(id) = feedback.id else {
            return false;
        };
        let reference = match (feedback.owner_id, feedback.file.as_ref()) {
            (Some(owner_id), Some(file)) => Some(FeedbackRef {
                owner_id,
                file: file.clone(),
                line: feedback.line.unwrap_or_default(),
            }),
            _ => None,
        };

        match self.feedbacks.get_mut(&id) {
            Some(thread) => {
                if thread.reference.is_none() {
                    thread.reference = reference;
                }
                thread.acl.extend(feedback.acl.iter().copied());
                if thread.comments.is_empty() {
                    thread.comments = feedback.comments.iter().map(Comment::from).collect();
                }
            }
            None => {
                self.feedbacks.insert(
                    id,
                    FeedbackThread {
                        id,
                        reference,
                        acl: feedback.acl.iter().copied().collect(),
                        comments: feedback.comments.iter().map(Comment::from).collect(),
                    },
                );
            }
        }
        true
    }

    pub fn apply_feedback_list(&mut self, list: &FeedbackList) -> usize {
        list.feedbacks
            .iter()
            .filter(|feedback| self.apply_feedback(feedback))
            .count()
    }

    pub fn apply_comment(&mut self, comment: &CommentPayload) -> bool {
        let Some(feedback_id) = comment.feedback_id else {
            return false;
        };
        self.append_comment(feedback_id, Comment::from(comment));
        true
    }

    // ── Local edits made by emitters ────────────────────────────────

    /// Inserts an empty file unless the name is taken.
    pub fn insert_file(&mut self, name: &str) -> bool {
        if self.files.contains_key(name) {
            return false;
        }
        self.files.insert(name.to_string(), FileEntry::empty(name));
        true
    }

    /// Moves an entry to a new key, keeping its content and the open-file marker.
    pub fn rename_file(&mut self, old: &str, new: &str) -> bool {
        if old == new {
            return false;
        }
        let Some(mut entry) = self.files.remove(old) else {
            return false;
        };
        entry.name = new.to_string();
        self.files.insert(new.to_string(), entry);
        if self.open_file.as_deref() == Some(old) {
            self.open_file = Some(new.to_string());
        }
        true
    }

    /// Removes a file. The open file is never removed this way.
    pub fn remove_file(&mut self, name: &str) -> bool {
        if self.open_file.as_deref() == Some(name) {
            return false;
        }
        self.files.remove(name).is_some()
    }

    pub fn append_comment(&mut self, feedback_id: i64, comment: Comment) {
        self.feedbacks
            .entry(feedback_id)
            .or_insert_with(|| FeedbackThread::shell(feedback_id))
            .comments
            .push(comment);
    }
}
