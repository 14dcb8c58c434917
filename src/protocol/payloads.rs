#![forbid(unsafe_code)]

// Inbound payload models. Every field is defaulted so partial payloads
// decode to something the world-state update can safely ignore.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

pub const FILE_TYPE: &str = "file";
pub const DIRECTORY_TYPE: &str = "directory";

/// Fields shared by every acknowledgement-style event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Outcome {
    pub success: Option<bool>,
    pub error: Option<Value>,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        self.success == Some(false) || self.error.as_ref().is_some_and(|e| !e.is_null())
    }
}

/// One entry of a directory listing: either a bare path or `{name, type}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DirEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
}

impl DirEntry {
    pub fn name(&self) -> &str {
        match self {
            DirEntry::Name(name) => name,
            DirEntry::Detailed { name, .. } => name,
        }
    }

    pub fn is_directory(&self) -> bool {
        match self {
            DirEntry::Name(name) => name.ends_with('/'),
            DirEntry::Detailed { kind, .. } => kind.as_deref() == Some(DIRECTORY_TYPE),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DirListing {
    pub owner_id: Option<i64>,
    pub files: Vec<DirEntry>,
}

/// FILE_READ / FILE_CREATE / FILE_UPDATE / FILE_DELETE
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileEvent {
    pub owner_id: Option<i64>,
    pub file: Option<String>,
    pub new_file: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub content: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl FileEvent {
    pub fn is_directory(&self) -> bool {
        self.kind.as_deref() == Some(DIRECTORY_TYPE)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentPayload {
    pub id: Option<i64>,
    pub feedback_id: Option<i64>,
    pub ptc_id: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackPayload {
    pub id: Option<i64>,
    pub owner_id: Option<i64>,
    pub file: Option<String>,
    pub line: Option<u32>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub acl: Vec<i64>,
    #[serde(default, deserialize_with = "skip_invalid")]
    pub comments: Vec<CommentPayload>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackList {
    #[serde(default, deserialize_with = "skip_invalid")]
    pub feedbacks: Vec<FeedbackPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RosterSnapshot {
    #[serde(default, deserialize_with = "skip_invalid")]
    pub participants: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Accessibility {
    #[serde(default, deserialize_with = "null_as_default")]
    pub accessible_to: Vec<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub accessible_from: Vec<i64>,
}

/// Participant id of a roster record, keyed by `ptc_id` or `id`
pub fn participant_id(record: &Map<String, Value>) -> Option<i64> {
    record
        .get("ptc_id")
        .or_else(|| record.get("id"))
        .and_then(Value::as_i64)
}

/// A `null` field decodes like a missing one.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keeps the list entries that decode and drops the rest. A `null` list is empty.
fn skip_invalid<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// Decodes a payload, treating `null` as an empty object.
pub fn parse<T>(payload: &Value) -> Result<T, serde_json::Error>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if payload.is_null() {
        return Ok(T::default());
    }
    T::deserialize(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dir_entries_accept_both_shapes() {
        let listing: DirListing = parse(&json!({
            "owner_id": 4,
            "files": ["main.py", {"name": "a", "type": "directory"}, {"name": "b/x.py", "type": "file"}]
        }))
        .unwrap();
        assert_eq!(listing.owner_id, Some(4));
        assert_eq!(listing.files.len(), 3);
        assert_eq!(listing.files[0].name(), "main.py");
        assert!(!listing.files[0].is_directory());
        assert!(listing.files[1].is_directory());
        assert!(!listing.files[2].is_directory());
    }

    #[test]
    fn test_outcome_error_detection() {
        let ok: FileEvent = parse(&json!({"file": "a.py", "success": true})).unwrap();
        assert!(!ok.outcome.is_error());
        let failed: FileEvent = parse(&json!({"file": "a.py", "success": false})).unwrap();
        assert!(failed.outcome.is_error());
        let errored: FileEvent = parse(&json!({"file": "a.py", "error": "exists"})).unwrap();
        assert!(errored.outcome.is_error());
        let null_error: FileEvent = parse(&json!({"file": "a.py", "error": null})).unwrap();
        assert!(!null_error.outcome.is_error());
    }

    #[test]
    fn test_null_payload_is_default() {
        let listing: DirListing = parse(&Value::Null).unwrap();
        assert!(listing.files.is_empty());
    }

    #[test]
    fn test_wrong_field_type_is_an_error() {
        assert!(parse::<DirListing>(&json!({"files": 7})).is_err());
    }

    #[test]
    fn test_feedback_list_survives_null_fields() {
        let list: FeedbackList = parse(&json!({
            "feedbacks": [
                {"id": 1, "owner_id": 4, "file": "a.py", "line": 2, "acl": null,
                 "comments": [{"feedback_id": 1, "id": 7, "content": null}, "not a comment"]},
                "not a thread",
                {"id": 2, "acl": [4, 5], "comments": null}
            ]
        }))
        .unwrap();
        assert_eq!(list.feedbacks.len(), 2);
        assert!(list.feedbacks[0].acl.is_empty());
        assert_eq!(list.feedbacks[0].comments.len(), 1);
        assert_eq!(list.feedbacks[0].comments[0].content, "");
        assert_eq!(list.feedbacks[1].acl, vec![4, 5]);
        assert!(list.feedbacks[1].comments.is_empty());

        let empty: FeedbackList = parse(&json!({"feedbacks": null})).unwrap();
        assert!(empty.feedbacks.is_empty());
    }

    #[test]
    fn test_null_lists_decode_empty() {
        let access: Accessibility = parse(&json!({"accessible_to": null, "accessible_from": [3]})).unwrap();
        assert!(access.accessible_to.is_empty());
        assert_eq!(access.accessible_from, vec![3]);
        let roster: RosterSnapshot = parse(&json!({"participants": [{"id": 1}, null]})).unwrap();
        assert_eq!(roster.participants.len(), 1);
    }

    #[test]
    fn test_participant_id_keys() {
        let by_ptc = json!({"ptc_id": 5, "id": 9});
        let by_id = json!({"id": 9});
        assert_eq!(participant_id(by_ptc.as_object().unwrap()), Some(5));
        assert_eq!(participant_id(by_id.as_object().unwrap()), Some(9));
        assert_eq!(participant_id(&Map::new()), None);
    }
}
