#![forbid(unsafe_code)]

// Event catalog - wire names exchanged with the classroom IDE server

use std::fmt;
use std::str::FromStr;

/// Every named event this client emits or understands.
///
/// Wire spellings are fixed by the server and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    DirInfo,
    FileRead,
    FileCreate,
    FileUpdate,
    FileDelete,
    CursorMove,
    FileMod,
    FileSave,
    FeedbackAdd,
    FeedbackComment,
    FeedbackList,
    AllParticipant,
    ParticipantStatus,
    ProjectAccessible,
    ActivityPing,
    Echo,
    InitLesson,
    TimeSync,
    TimeSyncAck,
    TimestampAck,
}

impl EventKind {
    pub const ALL: [EventKind; 20] = [
        EventKind::DirInfo,
        EventKind::FileRead,
        EventKind::FileCreate,
        EventKind::FileUpdate,
        EventKind::FileDelete,
        EventKind::CursorMove,
        EventKind::FileMod,
        EventKind::FileSave,
        EventKind::FeedbackAdd,
        EventKind::FeedbackComment,
        EventKind::FeedbackList,
        EventKind::AllParticipant,
        EventKind::ParticipantStatus,
        EventKind::ProjectAccessible,
        EventKind::ActivityPing,
        EventKind::Echo,
        EventKind::InitLesson,
        EventKind::TimeSync,
        EventKind::TimeSyncAck,
        EventKind::TimestampAck,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            EventKind::DirInfo => "DIR_INFO",
            EventKind::FileRead => "FILE_READ",
            EventKind::FileCreate => "FILE_CREATE",
            EventKind::FileUpdate => "FILE_UPDATE",
            EventKind::FileDelete => "FILE_DELETE",
            EventKind::CursorMove => "CURSOR_MOVE",
            EventKind::FileMod => "FILE_MOD",
            EventKind::FileSave => "FILE_SAVE",
            EventKind::FeedbackAdd => "FEEDBACK_ADD",
            EventKind::FeedbackComment => "FEEDBACK_COMMENT",
            EventKind::FeedbackList => "FEEDBACK_LIST",
            EventKind::AllParticipant => "ALL_PARTICIPANT",
            EventKind::ParticipantStatus => "PARTICIPANT_STATUS",
            EventKind::ProjectAccessible => "PROJECT_ACCESSIBLE",
            EventKind::ActivityPing => "ACTIVITY_PING",
            EventKind::Echo => "echo",
            EventKind::InitLesson => "INIT_LESSON",
            EventKind::TimeSync => "TIME_SYNC",
            EventKind::TimeSyncAck => "TIME_SYNC_ACK",
            EventKind::TimestampAck => "TIMESTAMP_ACK",
        }
    }

    /// Whether the server ever pushes this event to a client.
    pub fn is_inbound(&self) -> bool {
        match self {
            EventKind::DirInfo
            | EventKind::FileRead
            | EventKind::FileCreate
            | EventKind::FileUpdate
            | EventKind::FileDelete
            | EventKind::CursorMove
            | EventKind::FileMod
            | EventKind::FileSave
            | EventKind::FeedbackAdd
            | EventKind::FeedbackComment
            | EventKind::FeedbackList
            | EventKind::AllParticipant
            | EventKind::ParticipantStatus
            | EventKind::ProjectAccessible
            | EventKind::Echo
            | EventKind::InitLesson
            | EventKind::TimeSyncAck => true,
            EventKind::ActivityPing | EventKind::TimeSync | EventKind::TimestampAck => false,
        }
    }

    /// Acknowledgements carry the original timestamps verbatim and are never re-stamped.
    pub fn is_acknowledgement(&self) -> bool {
        matches!(self, EventKind::TimeSyncAck | EventKind::TimestampAck)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.wire_name() == s)
            .ok_or(())
    }
}

/// Actions the random-action timer may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    DirInfo,
    FileRead,
    CursorMove,
    FileMod,
    FileSave,
    FeedbackAdd,
    FeedbackComment,
    FileCreate,
    FileUpdate,
    FileDelete,
}

impl Action {
    pub fn event(&self) -> EventKind {
        match self {
            Action::DirInfo => EventKind::DirInfo,
            Action::FileRead => EventKind::FileRead,
            Action::CursorMove => EventKind::CursorMove,
            Action::FileMod => EventKind::FileMod,
            Action::FileSave => EventKind::FileSave,
            Action::FeedbackAdd => EventKind::FeedbackAdd,
            Action::FeedbackComment => EventKind::FeedbackComment,
            Action::FileCreate => EventKind::FileCreate,
            Action::FileUpdate => EventKind::FileUpdate,
            Action::FileDelete => EventKind::FileDelete,
        }
    }
}

/// Default action mix (relative weights, not percentages)
pub const DEFAULT_WEIGHTS: [(Action, f64); 10] = [
    (Action::DirInfo, 7.0),
    (Action::FileRead, 10.0),
    (Action::CursorMove, 40.0),
    (Action::FileMod, 30.0),
    (Action::FileSave, 10.0),
    (Action::FeedbackAdd, 0.5),
    (Action::FeedbackComment, 2.5),
    // Rare structural edits
    (Action::FileCreate, 0.01),
    (Action::FileUpdate, 0.01),
    (Action::FileDelete, 0.01),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.wire_name().parse::<EventKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_unknown_name_rejected() {
        assert!("NOT_AN_EVENT".parse::<EventKind>().is_err());
        // Case matters on the wire
        assert!("ECHO".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_send_only_events_not_inbound() {
        assert!(!EventKind::ActivityPing.is_inbound());
        assert!(!EventKind::TimestampAck.is_inbound());
        assert!(!EventKind::TimeSync.is_inbound());
        assert!(EventKind::TimeSyncAck.is_inbound());
        assert!(EventKind::ParticipantStatus.is_inbound());
    }

    #[test]
    fn test_default_weights_cover_every_action_once() {
        let mut seen = std::collections::HashSet::new();
        for (action, weight) in DEFAULT_WEIGHTS {
            assert!(weight > 0.0);
            assert!(seen.insert(action));
        }
        assert_eq!(seen.len(), 10);
    }
}
