use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::source::RowCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Outcome of the latest fetch of one source.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl SourceStatus {
    pub fn connected(count: usize) -> Self {
        SourceStatus {
            status: "connected",
            count: Some(count),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        SourceStatus {
            status: "error",
            count: None,
            error: Some(error.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub row_cache: RowCache,
    pub source_status: HashMap<String, SourceStatus>,
}

impl AppState {
    pub fn new(cfg: &Config) -> Self {
        AppState {
            workspace: None,
            db: None,
            row_cache: RowCache::new(cfg.cache_ttl()),
            source_status: HashMap::new(),
        }
    }

    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        // Cached tables and statuses belong to the previous workspace.
        self.row_cache.invalidate_all();
        self.source_status.clear();
        info!(workspace = %path.display(), "workspace opened");
        Ok(())
    }
}
