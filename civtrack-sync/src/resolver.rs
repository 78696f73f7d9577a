//! Voter resolution: provider slug → local person
//!
//! Lookup order, first match wins:
//! 1. External identifier mapping for the source, case-insensitive
//! 2. The person's own slug, lowercased
//!
//! Both tables are read once per run into a [`ResolutionCache`]; resolving is
//! then a pure in-memory lookup, so a run stays network-bound.
//!
//! When several persons share a lowercased key the earliest created one wins
//! (ties broken by insertion order). The loaders return rows in that order and
//! the first insert for a key is kept, so resolution never flips between runs
//! over the same data.

use civtrack_common::Result;
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::db::persons;

#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    by_identifier: HashMap<String, Uuid>,
    by_slug: HashMap<String, Uuid>,
}

impl ResolutionCache {
    /// Bulk-load mappings of `source` and every person slug
    pub async fn load(pool: &SqlitePool, source: &str) -> Result<Self> {
        let identifiers = persons::load_identifier_pairs(pool, source).await?;
        let slugs = persons::load_slug_pairs(pool).await?;

        let cache = Self::from_pairs(identifiers, slugs);
        tracing::debug!(
            source,
            identifiers = cache.by_identifier.len(),
            slugs = cache.by_slug.len(),
            "Resolution cache built"
        );
        Ok(cache)
    }

    /// Build from `(key, person)` pairs already sorted oldest person first
    pub fn from_pairs(
        identifiers: impl IntoIterator<Item = (String, Uuid)>,
        slugs: impl IntoIterator<Item = (String, Uuid)>,
    ) -> Self {
        let mut by_identifier = HashMap::new();
        for (key, person) in identifiers {
            by_identifier.entry(key.to_lowercase()).or_insert(person);
        }

        let mut by_slug = HashMap::new();
        for (key, person) in slugs {
            by_slug.entry(key.to_lowercase()).or_insert(person);
        }

        Self {
            by_identifier,
            by_slug,
        }
    }

    pub fn resolve(&self, voter_slug: &str) -> Option<Uuid> {
        let key = voter_slug.trim().to_lowercase();
        self.by_identifier
            .get(&key)
            .or_else(|| self.by_slug.get(&key))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty() && self.by_slug.is_empty()
    }
}

/// Resolver for one run: the cache plus the slugs it could not resolve
#[derive(Debug, Default)]
pub struct EntityResolver {
    cache: ResolutionCache,
    unresolved: BTreeSet<String>,
}

impl EntityResolver {
    pub fn new(cache: ResolutionCache) -> Self {
        Self {
            cache,
            unresolved: BTreeSet::new(),
        }
    }

    /// Resolve a voter slug, remembering it when no person matches
    pub fn resolve(&mut self, voter_slug: &str) -> Option<Uuid> {
        let resolved = self.cache.resolve(voter_slug);
        if resolved.is_none() {
            self.unresolved.insert(voter_slug.trim().to_lowercase());
        }
        resolved
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// Sorted, deduplicated unresolved slugs
    pub fn into_unresolved(self) -> Vec<String> {
        self.unresolved.into_iter().collect()
    }
}
