//! # Expression Store
//!
//! Branch-scoped storage of materialized concepts and expression reference
//! set members.
//!
//! This module defines the `ExpressionStore` and `Commit` traits and the
//! in-memory `MemoryStore`. The redb-backed store lives in `storage`.
//!
//! Writes only go through a [`Commit`]. A commit that is dropped, or closed
//! without [`Commit::mark_successful`], discards every write made through it.

use crate::{
    Concept, ConceptId, ReferenceSetMember, RelationshipSet, RepositoryError, strip_whitespace,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

// =============================================================================
// TRAITS
// =============================================================================

/// Read access to a branch plus the commit-open entry point for writes.
///
/// All reads see committed state only.
pub trait ExpressionStore: Send + Sync {
    /// The commit type handed out by [`ExpressionStore::open_commit`].
    type Commit<'a>: Commit
    where
        Self: 'a;

    /// Active member of `refset_id` whose expression equals `expression`
    /// once whitespace is removed.
    fn find_member_by_expression(
        &self,
        branch: &str,
        refset_id: ConceptId,
        expression: &str,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError>;

    /// An active member of `refset_id` referencing `component_id`. When several
    /// forms map to the same component, the first by expression text wins.
    fn find_member_by_component(
        &self,
        branch: &str,
        refset_id: ConceptId,
        component_id: ConceptId,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError>;

    /// All active members of `refset_id`, ordered by referenced component.
    fn members(
        &self,
        branch: &str,
        refset_id: ConceptId,
    ) -> Result<Vec<ReferenceSetMember>, RepositoryError>;

    fn find_concept(&self, branch: &str, id: ConceptId) -> Result<Option<Concept>, RepositoryError>;

    /// Concept whose relationship set equals `relationships` exactly.
    fn find_concept_with_relationships(
        &self,
        branch: &str,
        relationships: &RelationshipSet,
    ) -> Result<Option<ConceptId>, RepositoryError>;

    fn concept_count(&self, branch: &str) -> Result<usize, RepositoryError>;

    /// Number of active members across every reference set.
    fn member_count(&self, branch: &str) -> Result<usize, RepositoryError>;

    /// Open the single commit allowed on `branch`.
    ///
    /// Fails with [`RepositoryError::BranchLocked`] while another commit on
    /// the same branch is open.
    fn open_commit(&self, branch: &str) -> Result<Self::Commit<'_>, RepositoryError>;
}

/// An open write scope on one branch.
pub trait Commit {
    fn branch(&self) -> &str;

    /// Queue concepts. Existing concepts with the same id are replaced.
    fn save_concepts(&mut self, concepts: &[Concept]) -> Result<(), RepositoryError>;

    /// Queue members. An existing member with the same refset, referenced
    /// component and expression is replaced.
    fn save_members(&mut self, members: &[ReferenceSetMember]) -> Result<(), RepositoryError>;

    /// Allow [`Commit::close`] to make the writes durable.
    fn mark_successful(&mut self);

    /// Make the writes visible if marked successful, else discard them.
    fn close(self) -> Result<(), RepositoryError>
    where
        Self: Sized;
}

// =============================================================================
// MEMORY STORE
// =============================================================================

#[derive(Debug, Default)]
struct BranchState {
    concepts: BTreeMap<ConceptId, Concept>,
    relationship_index: BTreeMap<RelationshipSet, ConceptId>,
    /// Keyed by (refset, referenced component, expression).
    members: BTreeMap<(ConceptId, ConceptId, String), ReferenceSetMember>,
    member_expressions: BTreeMap<(ConceptId, String), ConceptId>,
}

impl BranchState {
    fn apply(&mut self, concepts: Vec<Concept>, members: Vec<ReferenceSetMember>) {
        for concept in concepts {
            let Some(id) = concept.id else { continue };
            if let Some(previous) = self.concepts.get(&id) {
                self.relationship_index.remove(&previous.relationship_set());
            }
            self.relationship_index.insert(concept.relationship_set(), id);
            self.concepts.insert(id, concept);
        }
        for member in members {
            let index_key = (member.refset_id, member.expression.clone());
            if member.active {
                self.member_expressions
                    .insert(index_key, member.referenced_component_id);
            } else {
                self.member_expressions.remove(&index_key);
            }
            self.members.insert(
                (
                    member.refset_id,
                    member.referenced_component_id,
                    member.expression.clone(),
                ),
                member,
            );
        }
    }
}

/// Outcome counters of closed commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub committed: u64,
    pub rolled_back: u64,
}

/// BTreeMap-backed store. Used for tests and `check` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    branches: RwLock<BTreeMap<String, BranchState>>,
    open_commits: Mutex<BTreeSet<String>>,
    stats: Mutex<CommitStats>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of commits closed so far.
    pub fn stats(&self) -> Result<CommitStats, RepositoryError> {
        self.stats
            .lock()
            .map(|s| *s)
            .map_err(|_| poisoned())
    }

    fn read<T>(
        &self,
        branch: &str,
        f: impl FnOnce(&BranchState) -> T,
    ) -> Result<Option<T>, RepositoryError> {
        let branches = self.branches.read().map_err(|_| poisoned())?;
        Ok(branches.get(branch).map(f))
    }

    fn record(&self, committed: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            if committed {
                stats.committed += 1;
            } else {
                stats.rolled_back += 1;
            }
        }
    }
}

fn poisoned() -> RepositoryError {
    RepositoryError::Store("memory store lock poisoned".to_string())
}

impl ExpressionStore for MemoryStore {
    type Commit<'a>
        = MemoryCommit<'a>
    where
        Self: 'a;

    fn find_member_by_expression(
        &self,
        branch: &str,
        refset_id: ConceptId,
        expression: &str,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError> {
        let key = (refset_id, strip_whitespace(expression));
        Ok(self
            .read(branch, |state| {
                let component = *state.member_expressions.get(&key)?;
                state
                    .members
                    .get(&(refset_id, component, key.1.clone()))
                    .cloned()
            })?
            .flatten())
    }

    fn find_member_by_component(
        &self,
        branch: &str,
        refset_id: ConceptId,
        component_id: ConceptId,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError> {
        Ok(self
            .read(branch, |state| {
                state
                    .members
                    .range((refset_id, component_id, String::new())..)
                    .take_while(|((r, c, _), _)| *r == refset_id && *c == component_id)
                    .map(|(_, m)| m)
                    .find(|m| m.active)
                    .cloned()
            })?
            .flatten())
    }

    fn members(
        &self,
        branch: &str,
        refset_id: ConceptId,
    ) -> Result<Vec<ReferenceSetMember>, RepositoryError> {
        Ok(self
            .read(branch, |state| {
                state
                    .members
                    .values()
                    .filter(|m| m.refset_id == refset_id && m.active)
                    .cloned()
                    .collect()
            })?
            .unwrap_or_default())
    }

    fn find_concept(&self, branch: &str, id: ConceptId) -> Result<Option<Concept>, RepositoryError> {
        Ok(self
            .read(branch, |state| state.concepts.get(&id).cloned())?
            .flatten())
    }

    fn find_concept_with_relationships(
        &self,
        branch: &str,
        relationships: &RelationshipSet,
    ) -> Result<Option<ConceptId>, RepositoryError> {
        Ok(self
            .read(branch, |state| state.relationship_index.get(relationships).copied())?
            .flatten())
    }

    fn concept_count(&self, branch: &str) -> Result<usize, RepositoryError> {
        Ok(self
            .read(branch, |state| state.concepts.len())?
            .unwrap_or(0))
    }

    fn member_count(&self, branch: &str) -> Result<usize, RepositoryError> {
        Ok(self
            .read(branch, |state| state.members.values().filter(|m| m.active).count())?
            .unwrap_or(0))
    }

    fn open_commit(&self, branch: &str) -> Result<MemoryCommit<'_>, RepositoryError> {
        let mut open = self.open_commits.lock().map_err(|_| poisoned())?;
        if !open.insert(branch.to_string()) {
            return Err(RepositoryError::BranchLocked(branch.to_string()));
        }
        debug!(branch, "commit opened");
        Ok(MemoryCommit {
            store: self,
            branch: branch.to_string(),
            concepts: Vec::new(),
            members: Vec::new(),
            successful: false,
            closed: false,
        })
    }
}

/// Commit on a [`MemoryStore`]. Writes are staged and applied on close.
#[derive(Debug)]
pub struct MemoryCommit<'a> {
    store: &'a MemoryStore,
    branch: String,
    concepts: Vec<Concept>,
    members: Vec<ReferenceSetMember>,
    successful: bool,
    closed: bool,
}

impl Commit for MemoryCommit<'_> {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn save_concepts(&mut self, concepts: &[Concept]) -> Result<(), RepositoryError> {
        if let Some(concept) = concepts.iter().find(|c| c.id.is_none()) {
            return Err(RepositoryError::Store(format!(
                "concept without identifier: {:?}",
                concept.relationship_set()
            )));
        }
        self.concepts.extend_from_slice(concepts);
        Ok(())
    }

    fn save_members(&mut self, members: &[ReferenceSetMember]) -> Result<(), RepositoryError> {
        self.members.extend_from_slice(members);
        Ok(())
    }

    fn mark_successful(&mut self) {
        self.successful = true;
    }

    fn close(mut self) -> Result<(), RepositoryError> {
        self.closed = true;
        if !self.successful {
            self.rollback();
            return Ok(());
        }
        let concepts = std::mem::take(&mut self.concepts);
        let members = std::mem::take(&mut self.members);
        let mut branches = self.store.branches.write().map_err(|_| poisoned())?;
        branches
            .entry(self.branch.clone())
            .or_default()
            .apply(concepts, members);
        self.store.record(true);
        debug!(branch = %self.branch, "commit closed");
        Ok(())
    }
}

impl MemoryCommit<'_> {
    fn rollback(&mut self) {
        warn!(
            branch = %self.branch,
            concepts = self.concepts.len(),
            members = self.members.len(),
            "commit rolled back"
        );
        self.concepts.clear();
        self.members.clear();
        self.store.record(false);
    }
}

impl Drop for MemoryCommit<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.rollback();
        }
        if let Ok(mut open) = self.store.open_commits.lock() {
            open.remove(&self.branch);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
