//! Prompt storage
//!
//! Stores hand raw prompt and partial sources to the compiler. Where the text
//! lives (files, a database, a remote registry) is up to the implementor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifies a prompt or partial in a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PromptRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl PromptRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }
}

/// A prompt or partial together with its source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptData {
    #[serde(flatten)]
    pub reference: PromptRef,
    pub source: String,
}

/// Which variant/version to load. `None` selects the default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub variant: Option<String>,
    pub version: Option<String>,
}

impl LoadOptions {
    pub fn variant(variant: impl Into<String>) -> Self {
        Self {
            variant: Some(variant.into()),
            version: None,
        }
    }
}

/// Read access to prompts and partials.
pub trait PromptStore {
    fn list(&self) -> anyhow::Result<Vec<PromptRef>>;

    fn list_partials(&self) -> anyhow::Result<Vec<PromptRef>>;

    /// `Ok(None)` when no prompt matches.
    fn load(&self, name: &str, options: &LoadOptions) -> anyhow::Result<Option<PromptData>>;

    /// `Ok(None)` when no partial matches.
    fn load_partial(&self, name: &str, options: &LoadOptions) -> anyhow::Result<Option<PromptData>>;
}

/// An in-memory [`PromptStore`]. Saving a prompt with an existing reference
/// replaces it.
///
/// Loading without a pinned version picks the latest one. Versions compare
/// numerically by dot-separated component (`10` after `9`, `1.10` after
/// `1.9`, an optional leading `v` ignored) when every candidate has such a
/// version; otherwise the most recently saved candidate wins.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    prompts: BTreeMap<PromptRef, Entry>,
    partials: BTreeMap<PromptRef, Entry>,
    saved: u64,
}

#[derive(Debug, Clone)]
struct Entry {
    source: String,
    saved_at: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, reference: PromptRef, source: impl Into<String>) -> &mut Self {
        let entry = self.entry(source.into());
        self.prompts.insert(reference, entry);
        self
    }

    pub fn save_partial(&mut self, reference: PromptRef, source: impl Into<String>) -> &mut Self {
        let entry = self.entry(source.into());
        self.partials.insert(reference, entry);
        self
    }

    fn entry(&mut self, source: String) -> Entry {
        self.saved += 1;
        Entry {
            source,
            saved_at: self.saved,
        }
    }

    pub fn delete(&mut self, reference: &PromptRef) -> bool {
        self.prompts.remove(reference).is_some()
    }
}

/// `"1.10"` → `[1, 10]`. `None` unless every component is a number.
fn numeric_version(version: &str) -> Option<Vec<u64>> {
    let version = version.strip_prefix('v').unwrap_or(version);
    version.split('.').map(|part| part.parse().ok()).collect()
}

/// Match on name and variant; a requested version must match exactly,
/// otherwise the latest version wins.
fn find(entries: &BTreeMap<PromptRef, Entry>, name: &str, options: &LoadOptions) -> Option<PromptData> {
    let candidates: Vec<(&PromptRef, &Entry, Option<Vec<u64>>)> = entries
        .iter()
        .filter(|(r, _)| r.name == name && r.variant == options.variant)
        .filter(|(r, _)| options.version.is_none() || r.version == options.version)
        .map(|(r, e)| (r, e, r.version.as_deref().and_then(numeric_version)))
        .collect();

    let all_numeric = candidates.iter().all(|(_, _, v)| v.is_some());
    let latest = if all_numeric {
        candidates.into_iter().max_by(|a, b| a.2.cmp(&b.2))
    } else {
        candidates.into_iter().max_by_key(|(_, e, _)| e.saved_at)
    };

    latest.map(|(reference, entry, _)| PromptData {
        reference: reference.clone(),
        source: entry.source.clone(),
    })
}

impl PromptStore for MemoryStore {
    fn list(&self) -> anyhow::Result<Vec<PromptRef>> {
        Ok(self.prompts.keys().cloned().collect())
    }

    fn list_partials(&self) -> anyhow::Result<Vec<PromptRef>> {
        Ok(self.partials.keys().cloned().collect())
    }

    fn load(&self, name: &str, options: &LoadOptions) -> anyhow::Result<Option<PromptData>> {
        Ok(find(&self.prompts, name, options))
    }

    fn load_partial(&self, name: &str, options: &LoadOptions) -> anyhow::Result<Option<PromptData>> {
        Ok(find(&self.partials, name, options))
    }
}
