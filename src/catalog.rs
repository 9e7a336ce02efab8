//! Read-only question catalog, aggregated from the configured repo sources.

mod aggregator;
mod fetcher;
mod model;

pub use aggregator::{effective_sources, Catalog, CatalogAggregator};
pub use fetcher::{CatalogFetcher, HttpCatalogFetcher};
pub use model::{IndexEntry, PaperDocument, Question};
