use anyhow::{Context as _, Result};
use std::io::Write;
use std::path::Path;

use study_sync::drafts::DraftMap;

use super::Context;

pub fn list<W: Write>(ctx: &Context, output: &mut W) -> Result<()> {
    for id in ctx.drafts().list_ids()? {
        writeln!(output, "{}", id)?;
    }
    Ok(())
}

pub fn export<W: Write>(ctx: &Context, file: &Path, output: &mut W) -> Result<()> {
    let drafts = ctx.drafts().export_all()?;
    let content = serde_json::to_string_pretty(&drafts).context("Failed to serialize drafts")?;
    std::fs::write(file, content)
        .with_context(|| format!("Failed to write drafts to {:?}", file))?;
    writeln!(output, "exported {} draft(s) to {}", drafts.len(), file.display())?;
    Ok(())
}

pub fn import<W: Write>(ctx: &Context, file: &Path, output: &mut W) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read drafts from {:?}", file))?;
    let drafts: DraftMap = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse drafts file {:?}", file))?;
    let count = ctx.drafts().import_all(&drafts)?;
    writeln!(output, "imported {} draft(s)", count)?;
    Ok(())
}
