use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::model::{Status, SyncBlob};

/// Validate a remote blob.
///
/// The top level must be an object with a non-negative integer `version`.
/// Each collection is checked on its own: a missing or malformed collection
/// becomes empty (and is logged) without rejecting the rest of the blob.
/// Unknown fields are ignored.
pub fn parse_remote_blob(value: &Value) -> Result<SyncBlob> {
    let obj = value
        .as_object()
        .ok_or_else(|| SyncError::Validation("blob is not a JSON object".to_string()))?;

    let version = match obj.get("version") {
        Some(v) => v.as_u64().ok_or_else(|| {
            SyncError::Validation(format!("version must be a non-negative integer, got {}", v))
        })?,
        None => return Err(SyncError::Validation("version is missing".to_string())),
    };

    let mut issues = Vec::new();
    let mut blob = SyncBlob {
        version,
        timestamp: obj
            .get("timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        progress: collection(obj, "progress", &mut issues),
        progress_last_modified: collection(obj, "progressLastModified", &mut issues),
        notes: collection(obj, "notes", &mut issues),
        notes_last_modified: collection(obj, "notesLastModified", &mut issues),
        stars: collection(obj, "stars", &mut issues),
        repo_sources: collection(obj, "repoSources", &mut issues),
        times: collection(obj, "times", &mut issues),
        times_last_modified: collection(obj, "timesLastModified", &mut issues),
    };

    // Absence already means unanswered
    blob.progress.retain(|_, status| *status != Status::Unanswered);

    for issue in &issues {
        tracing::warn!("Remote blob collection defaulted to empty: {}", issue);
    }

    Ok(blob)
}

fn collection<T: DeserializeOwned + Default>(
    obj: &Map<String, Value>,
    name: &str,
    issues: &mut Vec<String>,
) -> T {
    match obj.get(name) {
        None | Some(Value::Null) => T::default(),
        Some(v) => serde_json::from_value(v.clone()).unwrap_or_else(|e| {
            issues.push(format!("{}: {}", name, e));
            T::default()
        }),
    }
}
