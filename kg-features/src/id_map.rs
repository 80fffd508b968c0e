//! Bidirectional URI <-> ID index
//!
//! Built from `ent_id` / `rel_id` files, one `<uri>\t<id>` pair per line.

use crate::error::{FeatureError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Forward and reverse index over one identifier space
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    forward: HashMap<String, usize>,
    reverse: HashMap<usize, String>,
}

impl IdMap {
    /// Load an ID map from a tab-separated file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FeatureError::data_load(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let label = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let map = Self::parse(&label, &contents)?;
        log::debug!("Loaded {} ids from {}", map.len(), path.display());
        Ok(map)
    }

    /// Parse `<uri>\t<id>` lines. `label` names the source in error messages.
    pub fn parse(label: &str, contents: &str) -> Result<Self> {
        let mut map = Self::default();

        for (idx, raw) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 2 {
                return Err(FeatureError::data_load(format!(
                    "{} line {}: expected 2 tab-separated fields, found {}",
                    label,
                    line_no,
                    fields.len()
                )));
            }

            let uri = fields[0];
            let id: usize = fields[1].trim().parse().map_err(|_| {
                FeatureError::data_load(format!(
                    "{} line {}: id {:?} is not a non-negative integer",
                    label, line_no, fields[1]
                ))
            })?;

            map.insert(label, line_no, uri, id)?;
        }

        Ok(map)
    }

    fn insert(&mut self, label: &str, line_no: usize, uri: &str, id: usize) -> Result<()> {
        if self.forward.contains_key(uri) {
            return Err(FeatureError::data_load(format!(
                "{} line {}: duplicate uri {}",
                label, line_no, uri
            )));
        }
        if self.reverse.contains_key(&id) {
            return Err(FeatureError::data_load(format!(
                "{} line {}: duplicate id {}",
                label, line_no, id
            )));
        }
        self.forward.insert(uri.to_string(), id);
        self.reverse.insert(id, uri.to_string());
        Ok(())
    }

    /// Look up the ID for a URI
    pub fn id(&self, uri: &str) -> Result<usize> {
        self.forward
            .get(uri)
            .copied()
            .ok_or_else(|| FeatureError::not_found(uri))
    }

    /// Look up the URI for an ID
    pub fn name(&self, id: usize) -> Result<&str> {
        self.reverse
            .get(&id)
            .map(String::as_str)
            .ok_or_else(|| FeatureError::not_found(format!("id {}", id)))
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterate over `(uri, id)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.forward.iter().map(|(uri, id)| (uri.as_str(), *id))
    }
}
