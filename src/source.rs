//! Where candidate seeds come from.

use std::{future::Future, path::PathBuf};

use tracing::info;

use crate::{error::SourceError, model::CandidateSeed};

/// Supplies the ordered list of candidates for one run.
pub trait CandidateSource {
    fn load(&self) -> impl Future<Output = Result<Vec<CandidateSeed>, SourceError>> + Send;
}

/// Reads a JSON array of `{id, domain, remain, location}` records.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CandidateSource for JsonFileSource {
    async fn load(&self) -> Result<Vec<CandidateSeed>, SourceError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read { path: self.path.clone(), source })?;
        let seeds: Vec<CandidateSeed> = serde_json::from_slice(&bytes)
            .map_err(|source| SourceError::Parse { path: self.path.clone(), source })?;
        if seeds.is_empty() {
            return Err(SourceError::Empty);
        }
        info!(count = seeds.len(), path = %self.path.display(), "candidates loaded");
        Ok(seeds)
    }
}
