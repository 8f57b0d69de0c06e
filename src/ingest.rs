//! Page ingestion.
//!
//! A [`PageSource`] produces the raw pages of one space; `run_import`
//! upserts them into the store. Import never touches embedding columns, so
//! re-importing unchanged pages is a no-op for the reconciliation engine
//! while changed pages become stale through their bumped `updated_at`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::CoreError;
use crate::models::RawPage;
use crate::store::RecordStore;

/// Supplier of raw pages for a space.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_space_pages(&self, space_key: &str) -> Result<Vec<RawPage>, CoreError>;
}

/// Reads an export file containing a JSON array of raw pages.
///
/// The file holds every page of a single space; the space key is supplied
/// at import time.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl PageSource for JsonFileSource {
    async fn fetch_space_pages(&self, _space_key: &str) -> Result<Vec<RawPage>, CoreError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            CoreError::Validation(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&raw).map_err(|e| {
            CoreError::Validation(format!("invalid page export {}: {}", self.path.display(), e))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportOutcome {
    pub imported: usize,
}

/// Fetch every page of `space_key` from `source` and upsert into the store.
pub async fn run_import(
    store: &RecordStore,
    source: &dyn PageSource,
    space_key: &str,
) -> Result<ImportOutcome, CoreError> {
    let pages = source.fetch_space_pages(space_key).await?;

    for page in &pages {
        store.upsert_page(space_key, page).await?;
    }

    info!(space = space_key, pages = pages.len(), "import complete");
    Ok(ImportOutcome {
        imported: pages.len(),
    })
}
