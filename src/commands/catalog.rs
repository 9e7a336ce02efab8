use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use study_sync::catalog::{CatalogAggregator, HttpCatalogFetcher};

use super::Context;

/// Load and print the catalog index, or one paper's questions.
pub async fn handle<W: Write>(ctx: &Context, paper: Option<String>, output: &mut W) -> Result<()> {
    let fetcher = HttpCatalogFetcher::new(ctx.config.request_timeout())?;
    let aggregator = CatalogAggregator::new(
        Arc::new(fetcher),
        ctx.config.builtin_catalog_url.clone(),
    );
    let sources = ctx.store.repo_sources();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("  {spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));

    match paper {
        Some(paper_id) => {
            spinner.set_message(format!("Fetching paper {}", paper_id));
            let document = aggregator.load_paper(&sources, &paper_id).await;
            spinner.finish_and_clear();

            match document? {
                Some(document) => {
                    for (id, question) in &document.questions {
                        writeln!(
                            output,
                            "{}\t{}",
                            id,
                            question.source_url.as_deref().unwrap_or("")
                        )?;
                    }
                }
                None => writeln!(output, "no source carries paper {}", paper_id)?,
            }
        }
        None => {
            spinner.set_message(format!(
                "Fetching catalog from {} source(s)",
                aggregator.effective_sources(&sources).len()
            ));
            let catalog = aggregator.load_index(&sources).await;
            spinner.finish_and_clear();

            let catalog = catalog?;
            for entry in catalog.entries() {
                writeln!(
                    output,
                    "{}\t{}\t{}\t{}",
                    entry.id,
                    entry.paper_id,
                    entry.number.map(|n| n.to_string()).unwrap_or_default(),
                    entry.kind.as_deref().unwrap_or("")
                )?;
            }
            writeln!(output, "{} entries", catalog.len())?;
        }
    }
    Ok(())
}
