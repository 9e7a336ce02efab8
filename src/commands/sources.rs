use anyhow::{bail, Result};
use std::io::Write;

use study_sync::model::RepoSource;

use super::Context;

pub fn list<W: Write>(ctx: &Context, output: &mut W) -> Result<()> {
    let sources = ctx.store.repo_sources();
    if sources.is_empty() {
        writeln!(output, "no sources; the builtin catalog is used")?;
        return Ok(());
    }
    for source in sources {
        writeln!(
            output,
            "{} {}\t{}\t{}{}",
            if source.enabled { "*" } else { " " },
            source.id,
            source.name,
            source.url,
            if source.is_builtin { " (builtin)" } else { "" }
        )?;
    }
    Ok(())
}

pub fn add<W: Write>(
    ctx: &Context,
    id: String,
    url: String,
    name: Option<String>,
    output: &mut W,
) -> Result<()> {
    let source = RepoSource {
        name: name.unwrap_or_else(|| id.clone()),
        id,
        url,
        enabled: true,
        is_builtin: false,
    };
    let id = source.id.clone();
    if !ctx.store.add_repo_source(source) {
        bail!("source {} already exists", id);
    }
    writeln!(output, "added {}", id)?;
    Ok(())
}

pub fn remove<W: Write>(ctx: &Context, id: &str, output: &mut W) -> Result<()> {
    if !ctx.store.remove_repo_source(id) {
        bail!("no removable source {}", id);
    }
    writeln!(output, "removed {}", id)?;
    Ok(())
}

pub fn set_enabled<W: Write>(ctx: &Context, id: &str, enabled: bool, output: &mut W) -> Result<()> {
    if !ctx.store.set_repo_source_enabled(id, enabled) {
        bail!("no source {}", id);
    }
    writeln!(
        output,
        "{} {}",
        if enabled { "enabled" } else { "disabled" },
        id
    )?;
    Ok(())
}
