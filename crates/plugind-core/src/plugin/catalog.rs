//! Bootstrap catalog
//!
//! `catalog.json` lists the plugins the repository starts with:
//! `[{"name": "...", "details": "<git url>"}, ...]`

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::error::{PluginError, Result};
use crate::plugin::types::CatalogEntry;

pub const CATALOG_FILE: &str = "catalog.json";

/// Load and validate a catalog file
pub fn load_catalog(path: &Path) -> Result<Vec<CatalogEntry>> {
    let content = fs::read_to_string(path)?;
    let entries: Vec<CatalogEntry> =
        serde_json::from_str(&content).map_err(|e| PluginError::CatalogParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    check_unique(&entries)?;
    tracing::debug!(path = %path.display(), count = entries.len(), "loaded plugin catalog");

    Ok(entries)
}

pub(crate) fn check_unique(entries: &[CatalogEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.name.as_str()) {
            return Err(PluginError::DuplicatePlugin {
                name: entry.name.clone(),
            });
        }
    }
    Ok(())
}
