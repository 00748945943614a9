//! Repository memory
//!
//! Facts the agent learns about a workspace ("tests run with make check",
//! "config lives in etc/") survive across runs in a JSON file at the
//! workspace root and are folded into the system prompt.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Category used when none is given
pub const DEFAULT_CATEGORY: &str = "general";

/// Items per category included in the prompt context
pub const DEFAULT_CONTEXT_ITEMS: usize = 20;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("memory key must not be empty")]
    EmptyKey,
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// A single remembered fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub key: String,
    pub value: String,
    pub category: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    updated_at: DateTime<Local>,
    #[serde(default)]
    categories: BTreeMap<String, Vec<MemoryItem>>,
}

/// Workspace-scoped memory store
#[derive(Debug, Clone)]
pub struct RepositoryMemory {
    path: PathBuf,
    categories: BTreeMap<String, Vec<MemoryItem>>,
    /// Mutated since the last `flush`
    dirty: bool,
}

impl RepositoryMemory {
    /// Empty store backed by `path`; nothing is read.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            categories: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load from `path`. A missing file yields an empty store; an unreadable
    /// or corrupt one is logged and also yields an empty store.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let mut memory = Self::new(path);
        if !memory.path.exists() {
            return memory;
        }

        match tokio::fs::read_to_string(&memory.path).await {
            Ok(content) => match serde_json::from_str::<MemoryFile>(&content) {
                Ok(file) => {
                    memory.categories = file.categories;
                    debug!("loaded {} memories from {:?}", memory.len(), memory.path);
                }
                Err(e) => warn!("ignoring corrupt memory file {:?}: {}", memory.path, e),
            },
            Err(e) => warn!("failed to read memory file {:?}: {}", memory.path, e),
        }
        memory
    }

    /// Persist to the backing file
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = MemoryFile {
            updated_at: Local::now(),
            categories: self.categories.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(&self.path, content).await?;
        debug!("saved {} memories to {:?}", self.len(), self.path);
        Ok(())
    }

    /// Save only if something changed since the last flush. Returns whether
    /// the file was written.
    pub async fn flush(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        self.save().await?;
        self.dirty = false;
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or update the item with `key` in `category`.
    pub fn add(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        category: Option<&str>,
    ) -> Result<MemoryItem> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(MemoryError::EmptyKey);
        }
        let category = category
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();
        let value = value.into();
        self.dirty = true;
        let items = self.categories.entry(category.clone()).or_default();

        if let Some(existing) = items.iter_mut().find(|i| i.key == key) {
            existing.value = value;
            existing.timestamp = Local::now();
            return Ok(existing.clone());
        }

        let item = MemoryItem {
            key,
            value,
            category,
            timestamp: Local::now(),
        };
        items.push(item.clone());
        debug!("remembered {} ({})", item.key, item.category);
        Ok(item)
    }

    fn items<'a>(
        &'a self,
        category: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = &'a MemoryItem> + 'a> {
        match category {
            Some(c) => Box::new(self.categories.get(c).into_iter().flatten()),
            None => Box::new(self.categories.values().flatten()),
        }
    }

    /// Items whose key contains `key`, case-insensitively
    pub fn get(&self, key: &str, category: Option<&str>) -> Vec<MemoryItem> {
        let needle = key.to_lowercase();
        self.items(category)
            .filter(|i| i.key.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    /// Items whose key or value contains `query`, at most `limit`
    pub fn search(&self, query: &str, category: Option<&str>, limit: usize) -> Vec<MemoryItem> {
        let needle = query.to_lowercase();
        self.items(category)
            .filter(|i| {
                i.key.to_lowercase().contains(&needle) || i.value.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Remove items whose key contains `key`. Returns how many were removed.
    pub fn delete(&mut self, key: &str, category: Option<&str>) -> usize {
        let needle = key.to_lowercase();
        let mut removed = 0;
        for (name, items) in self.categories.iter_mut() {
            if category.is_some_and(|c| c != name.as_str()) {
                continue;
            }
            let before = items.len();
            items.retain(|i| !i.key.to_lowercase().contains(&needle));
            removed += before - items.len();
        }
        self.categories.retain(|_, items| !items.is_empty());
        self.dirty |= removed > 0;
        removed
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.keys().cloned().collect()
    }

    pub fn category(&self, category: &str) -> Vec<MemoryItem> {
        self.categories.get(category).cloned().unwrap_or_default()
    }

    pub fn clear_category(&mut self, category: &str) -> bool {
        let removed = self.categories.remove(category).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn clear(&mut self) {
        self.dirty |= !self.categories.is_empty();
        self.categories.clear();
    }

    pub fn len(&self) -> usize {
        self.categories.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Markdown block for the system prompt; empty when nothing is stored.
    /// The most recent `max_items` of each category are included.
    pub fn context_prompt(&self, max_items: usize) -> String {
        if self.is_empty() {
            return String::new();
        }

        let mut out = String::from("## Repository Memory\n");
        for (category, items) in &self.categories {
            out.push_str(&format!("\n### {}\n", capitalize(category)));
            let skip = items.len().saturating_sub(max_items);
            for item in items.iter().skip(skip) {
                out.push_str(&format!("- **{}**: {}\n", item.key, item.value));
            }
        }
        out
    }

    /// One line per category with its item count
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "No memories stored".to_string();
        }
        self.categories
            .iter()
            .map(|(c, items)| format!("{}: {} items", c, items.len()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
