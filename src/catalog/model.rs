use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One lightweight line of a source's `index` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub paper_id: String,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Which source this entry was fetched from. Provenance only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// A full question. Everything beyond the id is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// A per-paper document: the paper's full question map keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaperDocument {
    pub paper_id: String,
    #[serde(default)]
    pub questions: IndexMap<String, Question>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_entry_wire_names() {
        let entry: IndexEntry = serde_json::from_value(serde_json::json!({
            "id": "2023-1-q4",
            "paperId": "2023-1",
            "number": 4,
            "type": "choice",
            "tags": ["algebra"]
        }))
        .unwrap();
        assert_eq!(entry.paper_id, "2023-1");
        assert_eq!(entry.kind.as_deref(), Some("choice"));
        assert_eq!(entry.source_url, None);
    }

    #[test]
    fn test_question_keeps_unknown_fields() {
        let question: Question = serde_json::from_value(serde_json::json!({
            "id": "q1",
            "stem": "What is 2 + 2?",
            "answer": "4"
        }))
        .unwrap();
        assert_eq!(question.fields["stem"], "What is 2 + 2?");

        let back = serde_json::to_value(&question).unwrap();
        assert_eq!(back["answer"], "4");
    }
}
