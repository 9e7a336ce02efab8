use anyhow::Result;
use std::io::Write;

use study_sync::error::SyncError;
use study_sync::merge::Resolution;
use study_sync::sync::SyncOutcome;

use super::{print_outcome, Context};

/// Run one cycle. A tie conflict fails the command unless `resolve` says how
/// to settle it.
pub async fn handle<W: Write>(
    ctx: &Context,
    resolve: Option<Resolution>,
    output: &mut W,
) -> Result<()> {
    let engine = ctx.engine()?;
    let outcome = engine.sync_now().await?;

    let SyncOutcome::Conflict(report) = &outcome else {
        return print_outcome(output, &outcome);
    };
    print_outcome(output, &outcome)?;

    match resolve {
        Some(resolution) => {
            let resolved = engine.resolve_conflict(resolution).await?;
            print_outcome(output, &resolved)
        }
        None => {
            writeln!(
                output,
                "rerun with --resolve local, --resolve remote or --resolve merge"
            )?;
            Err(SyncError::MergeConflict {
                keys: report.keys.clone(),
            }
            .into())
        }
    }
}
