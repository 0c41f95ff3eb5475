//! # Term Lookup
//!
//! Display terms for human-readable renderings and validation messages.

use crate::{ConceptId, RepositoryError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Source of display terms for concepts.
pub trait TermSource: Send + Sync {
    /// Preferred terms for every id in `ids` that has one. Unknown ids are
    /// absent from the result.
    fn preferred_terms(
        &self,
        ids: &BTreeSet<ConceptId>,
    ) -> Result<BTreeMap<ConceptId, String>, RepositoryError>;

    /// Fully specified name of `id`, if known.
    fn fully_specified_name(&self, id: ConceptId) -> Result<Option<String>, RepositoryError>;
}

/// Terms of a single concept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptTerms {
    pub preferred: String,
    #[serde(default)]
    pub fsn: Option<String>,
}

/// Term source backed by a fixed table, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredTerms {
    terms: BTreeMap<ConceptId, ConceptTerms>,
}

impl ConfiguredTerms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the terms of `id`.
    pub fn insert(&mut self, id: ConceptId, preferred: impl Into<String>, fsn: Option<String>) {
        self.terms.insert(
            id,
            ConceptTerms {
                preferred: preferred.into(),
                fsn,
            },
        );
    }

    /// Builder form of [`ConfiguredTerms::insert`].
    #[must_use]
    pub fn with(mut self, id: ConceptId, preferred: &str, fsn: Option<&str>) -> Self {
        self.insert(id, preferred, fsn.map(str::to_string));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl FromIterator<(ConceptId, ConceptTerms)> for ConfiguredTerms {
    fn from_iter<T: IntoIterator<Item = (ConceptId, ConceptTerms)>>(iter: T) -> Self {
        Self {
            terms: iter.into_iter().collect(),
        }
    }
}

impl TermSource for ConfiguredTerms {
    fn preferred_terms(
        &self,
        ids: &BTreeSet<ConceptId>,
    ) -> Result<BTreeMap<ConceptId, String>, RepositoryError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.terms.get(id).map(|t| (*id, t.preferred.clone())))
            .collect())
    }

    fn fully_specified_name(&self, id: ConceptId) -> Result<Option<String>, RepositoryError> {
        Ok(self.terms.get(&id).and_then(|t| t.fsn.clone()))
    }
}
