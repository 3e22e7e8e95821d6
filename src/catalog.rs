//! Declarative subject catalog
//!
//! Which strategies may price which subject is decided here, never guessed from
//! the name. Every [`SubjectKind`] has a default strategy set and individual
//! entries can narrow or replace it.

use crate::{
    constants::{GIFT_STRATEGIES, PREMARKET_GIFTS, PREMARKET_STRATEGIES, STICKER_STRATEGIES},
    error::ConfigError,
    types::StrategyId,
};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Category of a priced subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// Gift traded on the regular market
    Gift,
    /// Gift that is only traded on the premarket
    PremarketGift,
    /// Sticker from a sticker collection
    Sticker,
}

/// A subject resolved against the catalog, ready to be priced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    name: String,
    query_name: String,
    kind: SubjectKind,
    collection: Option<String>,
    strategies: BTreeSet<String>,
}

impl Subject {
    /// Builds a subject with the default strategy set of its kind
    pub fn new(name: impl Into<String>, kind: SubjectKind) -> Self {
        let name = name.into();
        Self {
            query_name: name.clone(),
            name,
            kind,
            collection: None,
            strategies: default_strategies(kind),
        }
    }

    pub fn with_query_name(mut self, query_name: impl Into<String>) -> Self {
        self.query_name = query_name.into();
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_strategies<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Name the caller asked for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the marketplaces know the subject by
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_premarket(&self) -> bool {
        self.kind == SubjectKind::PremarketGift
    }

    /// Cache and history key, stable across spelling variants
    pub fn key(&self) -> String {
        normalize_name(&self.query_name)
    }

    pub fn allows(&self, id: StrategyId) -> bool {
        self.strategies.contains(id.as_str())
    }

    pub fn strategies(&self) -> impl Iterator<Item = &str> {
        self.strategies.iter().map(String::as_str)
    }
}

/// One catalog entry as stored in the catalog JSON file
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub query_name: Option<String>,
    pub kind: SubjectKind,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub strategies: Option<Vec<String>>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, kind: SubjectKind) -> Self {
        Self {
            name: name.into(),
            query_name: None,
            kind,
            collection: None,
            strategies: None,
        }
    }

    fn query_name(&self) -> &str {
        self.query_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    subjects: Vec<CatalogEntry>,
}

/// Registry of known subjects and per-kind strategy capabilities
#[derive(Debug, Clone)]
pub struct SubjectCatalog {
    entries: HashMap<String, CatalogEntry>,
    defaults: HashMap<SubjectKind, BTreeSet<String>>,
}

impl Default for SubjectCatalog {
    /// Catalog with the built-in premarket gifts registered
    fn default() -> Self {
        let mut catalog = Self::empty();
        for (name, query_name) in PREMARKET_GIFTS {
            let mut entry = CatalogEntry::new(*name, SubjectKind::PremarketGift);
            entry.query_name = Some(query_name.to_string());
            catalog.insert(entry);
        }
        catalog
    }
}

impl SubjectCatalog {
    /// Catalog with no entries; unknown names are treated as regular gifts
    pub fn empty() -> Self {
        let defaults = [
            SubjectKind::Gift,
            SubjectKind::PremarketGift,
            SubjectKind::Sticker,
        ]
        .into_iter()
        .map(|kind| (kind, default_strategies(kind)))
        .collect();

        Self {
            entries: HashMap::new(),
            defaults,
        }
    }

    /// Built-in catalog extended with the entries of a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::CatalogIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::default().extend_from_json(&raw).map_err(|source| ConfigError::CatalogParse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Adds the entries of a `{"subjects": [...]}` document
    pub fn extend_from_json(mut self, raw: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        for entry in file.subjects {
            self.insert(entry);
        }
        Ok(self)
    }

    /// Registers an entry under both its name and its query name
    pub fn insert(&mut self, entry: CatalogEntry) {
        let query_key = normalize_name(entry.query_name());
        let name_key = normalize_name(&entry.name);
        if query_key != name_key {
            self.entries.insert(query_key, entry.clone());
        }
        self.entries.insert(name_key, entry);
    }

    pub fn with_entry(mut self, entry: CatalogEntry) -> Self {
        self.insert(entry);
        self
    }

    /// Replaces the default strategy set of a kind
    pub fn set_kind_strategies<I, S>(&mut self, kind: SubjectKind, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defaults
            .insert(kind, ids.into_iter().map(Into::into).collect());
    }

    /// Resolves a caller-supplied name into a subject
    pub fn lookup(&self, name: &str) -> Subject {
        let name = name.trim();
        let Some(entry) = self.entries.get(&normalize_name(name)) else {
            return Subject {
                name: name.to_string(),
                query_name: name.to_string(),
                kind: SubjectKind::Gift,
                collection: None,
                strategies: self.kind_strategies(SubjectKind::Gift),
            };
        };

        let strategies = match &entry.strategies {
            Some(ids) => ids.iter().cloned().collect(),
            None => self.kind_strategies(entry.kind),
        };

        Subject {
            name: name.to_string(),
            query_name: entry.query_name().to_string(),
            kind: entry.kind,
            collection: entry.collection.clone(),
            strategies,
        }
    }

    fn kind_strategies(&self, kind: SubjectKind) -> BTreeSet<String> {
        self.defaults
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| default_strategies(kind))
    }
}

fn default_strategies(kind: SubjectKind) -> BTreeSet<String> {
    let ids = match kind {
        SubjectKind::Gift => GIFT_STRATEGIES,
        SubjectKind::PremarketGift => PREMARKET_STRATEGIES,
        SubjectKind::Sticker => STICKER_STRATEGIES,
    };
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

/// Lowercases and collapses everything but ASCII alphanumerics into `_`
///
/// `"Happy Brownie"`, `"Happy_Brownie"` and `" happy-brownie "` all map to
/// `"happy_brownie"`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
