//! Shared data model, configuration, error taxonomy, URL normalisation and
//! the composite URL/domain filter used by every stage of the crawler.

pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod record;
pub mod url;

pub use error::CrawlError;
pub use record::{AnalyzedResult, FetchResult, GraphEdge, UrlRecord};
