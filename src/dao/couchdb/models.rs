use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{QuestionEntity, StandingEntity};

/// Id prefix of leaderboard documents.
pub const LEADERBOARD_PREFIX: &str = "leaderboard::";
/// Id prefix of question documents.
pub const QUESTION_PREFIX: &str = "question::";
/// Id prefix of membership documents.
pub const MEMBERSHIP_PREFIX: &str = "membership::";
/// Upper bound appended to a prefix for `_all_docs` range scans.
pub const END_SUFFIX: &str = "\u{ffff}";

/// Body of an `_all_docs` response.
#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    /// Matched rows.
    pub rows: Vec<AllDocsRow>,
}

/// One `_all_docs` row.
#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    /// Document id.
    #[allow(dead_code)]
    pub id: String,
    /// Document body, present with `include_docs=true`.
    #[serde(default)]
    pub doc: Option<Value>,
}

/// One document per group holding its standings and the sessions already folded in.
///
/// Keeping the applied session ids in the same document lets CouchDB's revision check make
/// "apply once" atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchLeaderboardDocument {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision, absent before the first write.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Group the standings belong to.
    pub group_id: String,
    /// Standings, best first.
    #[serde(default)]
    pub standings: Vec<StandingEntity>,
    /// Sessions already folded into the standings.
    #[serde(default)]
    pub applied_sessions: Vec<Uuid>,
}

impl CouchLeaderboardDocument {
    /// Document for a group with no standings yet.
    pub fn empty(group_id: &str) -> Self {
        Self {
            id: leaderboard_doc_id(group_id),
            rev: None,
            group_id: group_id.to_string(),
            standings: Vec::new(),
            applied_sessions: Vec::new(),
        }
    }
}

/// Question stored under the `question::` prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchQuestionDocument {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// The question itself.
    #[serde(flatten)]
    pub question: QuestionEntity,
}

/// Roster of one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchMembershipDocument {
    /// Document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Users allowed to join the group's room.
    #[serde(default)]
    pub members: Vec<String>,
}

/// Id of the leaderboard document of `group_id`.
pub fn leaderboard_doc_id(group_id: &str) -> String {
    format!("{}{}", LEADERBOARD_PREFIX, group_id)
}

/// Id of the membership document of `group_id`.
pub fn membership_doc_id(group_id: &str) -> String {
    format!("{}{}", MEMBERSHIP_PREFIX, group_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_document_flattens_entity_fields() {
        let raw = serde_json::json!({
            "_id": "question::q1",
            "_rev": "1-abc",
            "id": "q1",
            "prompt": "2 + 2?",
            "choices": ["3", "4"],
            "correctChoice": "4",
            "category": "maths",
            "difficulty": "easy",
            "timeLimitSeconds": 10,
            "pointValue": 5
        });
        let doc: CouchQuestionDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.id, "question::q1");
        assert_eq!(doc.question.correct_choice, "4");
        assert!(doc.question.is_playable());
    }

    #[test]
    fn leaderboard_doc_ids_are_prefixed() {
        assert_eq!(leaderboard_doc_id("smiths"), "leaderboard::smiths");
        assert_eq!(membership_doc_id("smiths"), "membership::smiths");
    }
}
