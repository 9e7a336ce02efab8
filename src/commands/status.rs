use anyhow::Result;
use chrono::{DateTime, Utc};
use std::io::Write;

use study_sync::model::{MapField, Status};
use study_sync::store::stars_digest;

use super::Context;

/// Print a summary of the local state and the last sync.
pub fn handle<W: Write>(ctx: &Context, output: &mut W) -> Result<()> {
    let store = &ctx.store;
    let progress = store.progress();
    let meta = store.sync_meta();

    writeln!(output, "Data directory: {}", ctx.config.data_dir.display())?;
    match &ctx.config.remote_url {
        Some(url) => writeln!(output, "Remote: {}", url)?,
        None => writeln!(output, "Remote: (none, sync disabled)")?,
    }
    match (meta.last_synced_version, meta.last_synced_at) {
        (Some(version), Some(at)) => writeln!(
            output,
            "Last sync: version {} at {}",
            version,
            at.format("%Y-%m-%d %H:%M:%S UTC")
        )?,
        (Some(version), None) => writeln!(output, "Last sync: version {}", version)?,
        _ => writeln!(output, "Last sync: never")?,
    }

    writeln!(output)?;
    for status in [Status::Mastered, Status::Confused, Status::Failed] {
        let count = progress.values().filter(|s| **s == status).count();
        writeln!(output, "  {:<10} {}", status.to_string(), count)?;
    }
    writeln!(output, "  {:<10} {}", "notes", store.notes().len())?;

    let stars = store.stars();
    let unsynced = meta.synced_stars_digest.as_deref() != Some(stars_digest(&stars).as_str());
    writeln!(
        output,
        "  {:<10} {}{}",
        "starred",
        stars.len(),
        if unsynced && !stars.is_empty() { " (unsynced)" } else { "" }
    )?;

    let seconds: u64 = store.times().values().sum();
    writeln!(
        output,
        "  {:<10} {}h {:02}m",
        "studied",
        seconds / 3600,
        (seconds % 3600) / 60
    )?;

    let newest = [MapField::Progress, MapField::Notes, MapField::Times]
        .into_iter()
        .filter_map(|field| store.last_modified(field).values().max().copied())
        .max();
    if let Some(at) = newest.and_then(DateTime::<Utc>::from_timestamp_millis) {
        writeln!(output, "  last edit  {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    }

    writeln!(output)?;
    writeln!(output, "Sources: {}", store.repo_sources().len())?;
    writeln!(output, "Drafts: {}", ctx.drafts().list_ids()?.len())?;
    Ok(())
}
