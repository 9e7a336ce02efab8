use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-question study status. A question missing from the progress map is
/// `Unanswered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unanswered,
    Mastered,
    Confused,
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Unanswered => write!(f, "unanswered"),
            Status::Mastered => write!(f, "mastered"),
            Status::Confused => write!(f, "confused"),
            Status::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unanswered" => Ok(Status::Unanswered),
            "mastered" => Ok(Status::Mastered),
            "confused" => Ok(Status::Confused),
            "failed" => Ok(Status::Failed),
            _ => Err(format!(
                "unknown status: {s} (valid: unanswered, mastered, confused, failed)"
            )),
        }
    }
}

pub type ProgressMap = BTreeMap<String, Status>;
pub type NoteMap = BTreeMap<String, String>;
/// Accumulated seconds per question
pub type TimeMap = BTreeMap<String, u64>;
pub type StarMap = BTreeMap<String, bool>;
/// Epoch milliseconds of the last local write per question
pub type LastModifiedMap = BTreeMap<String, i64>;

/// The timestamped collections of a blob. Stars have no timestamps and are
/// merged separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapField {
    Progress,
    Notes,
    Times,
}

impl fmt::Display for MapField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapField::Progress => write!(f, "progress"),
            MapField::Notes => write!(f, "notes"),
            MapField::Times => write!(f, "times"),
        }
    }
}

/// A configured location to fetch catalog data from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoSource {
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_builtin: bool,
}

fn default_enabled() -> bool {
    true
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// The document exchanged with the remote store.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBlob {
    pub version: u64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub progress: ProgressMap,
    #[serde(default)]
    pub progress_last_modified: LastModifiedMap,
    #[serde(default)]
    pub notes: NoteMap,
    #[serde(default)]
    pub notes_last_modified: LastModifiedMap,
    #[serde(default)]
    pub stars: StarMap,
    #[serde(default)]
    pub repo_sources: Vec<RepoSource>,
    #[serde(default)]
    pub times: TimeMap,
    #[serde(default)]
    pub times_last_modified: LastModifiedMap,
}

impl SyncBlob {
    /// Blob with every collection empty at version 0.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compares everything except `version` and `timestamp`.
    pub fn same_content(&self, other: &SyncBlob) -> bool {
        self.progress == other.progress
            && self.progress_last_modified == other.progress_last_modified
            && self.notes == other.notes
            && self.notes_last_modified == other.notes_last_modified
            && self.stars == other.stars
            && self.repo_sources == other.repo_sources
            && self.times == other.times
            && self.times_last_modified == other.times_last_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_str_case_insensitive() {
        assert_eq!("MASTERED".parse::<Status>().unwrap(), Status::Mastered);
        assert_eq!("Confused".parse::<Status>().unwrap(), Status::Confused);
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn test_blob_uses_camel_case_wire_names() {
        let mut blob = SyncBlob::empty();
        blob.progress.insert("q1".to_string(), Status::Failed);
        blob.progress_last_modified.insert("q1".to_string(), 100);
        blob.repo_sources.push(RepoSource {
            id: "main".to_string(),
            url: "https://example.org/catalog".to_string(),
            name: "Main".to_string(),
            enabled: true,
            is_builtin: true,
        });

        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["progress"]["q1"], "failed");
        assert_eq!(json["progressLastModified"]["q1"], 100);
        assert_eq!(json["repoSources"][0]["isBuiltin"], true);
        assert!(json.get("timesLastModified").is_some());
    }

    #[test]
    fn test_repo_source_builtin_flag_skipped_when_false() {
        let source = RepoSource {
            id: "extra".to_string(),
            url: "https://example.org/extra".to_string(),
            name: "Extra".to_string(),
            enabled: false,
            is_builtin: false,
        };
        let json = serde_json::to_string(&source).unwrap();
        assert!(!json.contains("isBuiltin"));
        let restored: RepoSource = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, source);
    }

    #[test]
    fn test_same_content_ignores_version_and_timestamp() {
        let mut a = SyncBlob::empty();
        a.notes.insert("q1".to_string(), "remember".to_string());
        let mut b = a.clone();
        b.version = 9;
        b.timestamp = "2026-01-01T00:00:00Z".to_string();
        assert!(a.same_content(&b));
        b.stars.insert("q1".to_string(), true);
        assert!(!a.same_content(&b));
    }
}
