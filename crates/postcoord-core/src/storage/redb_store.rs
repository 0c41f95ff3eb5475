//! # redb-backed Expression Storage
//!
//! A disk-backed expression store using the redb embedded database.
//!
//! - A commit wraps exactly one redb `WriteTransaction`, so a rolled back
//!   batch leaves nothing behind on disk
//! - Reads use separate read transactions and only see committed data
//! - Identifier counters are written in the same transaction as the batch
//!
//! redb allows a single writer at a time, so commits on different branches
//! are serialized on the database.

use crate::formats::{decode_record, encode_record};
use crate::identifiers::{CounterKey, IdentifierSource, SequentialIdentifierSource};
use crate::store::{Commit, ExpressionStore};
use crate::{
    Concept, ConceptId, ReferenceSetMember, RelationshipSet, RepositoryError,
    relationship_fingerprint, strip_whitespace,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Table for concepts: (branch, concept id) -> encoded Concept
const CONCEPTS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("concepts");

/// Table for members: (branch, refset id, referenced component id, expression) -> encoded member
const MEMBERS: TableDefinition<(&str, u64, u64, &str), &[u8]> = TableDefinition::new("members");

/// Index of active members: (branch, refset id, expression) -> referenced component id
const MEMBER_EXPRESSIONS: TableDefinition<(&str, u64, &str), u64> =
    TableDefinition::new("member_expressions");

/// Index of concept definitions: (branch, relationship fingerprint) -> concept id
const RELATIONSHIP_INDEX: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("relationship_index");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// Metadata key prefix of identifier counters.
const COUNTER_PREFIX: &str = "next_item:";

fn io(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Store(e.to_string())
}

fn counter_key((namespace, partition): &CounterKey) -> String {
    format!("{COUNTER_PREFIX}{namespace}:{partition}")
}

fn parse_counter_key(key: &str) -> Option<CounterKey> {
    let rest = key.strip_prefix(COUNTER_PREFIX)?;
    let (namespace, partition) = rest.split_once(':')?;
    Some((namespace.parse().ok()?, partition.to_string()))
}

/// A disk-backed expression store using redb.
pub struct RedbStore {
    db: Database,
    ids: SequentialIdentifierSource,
    open_commits: Mutex<BTreeSet<String>>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create an expression database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| RepositoryError::IoError(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(CONCEPTS).map_err(io)?;
            let _ = write_txn.open_table(MEMBERS).map_err(io)?;
            let _ = write_txn.open_table(MEMBER_EXPRESSIONS).map_err(io)?;
            let _ = write_txn.open_table(RELATIONSHIP_INDEX).map_err(io)?;
            let _ = write_txn.open_table(METADATA).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }

        // Load identifier counters
        let counters = {
            let read_txn = db.begin_read().map_err(io)?;
            let table = read_txn.open_table(METADATA).map_err(io)?;
            let mut counters = BTreeMap::new();
            for entry in table.iter().map_err(io)? {
                let (key, value) = entry.map_err(io)?;
                if let Some(counter) = parse_counter_key(key.value()) {
                    counters.insert(counter, value.value());
                }
            }
            counters
        };
        debug!(counters = counters.len(), "expression database opened");

        Ok(Self {
            db,
            ids: SequentialIdentifierSource::with_counters(counters),
            open_commits: Mutex::new(BTreeSet::new()),
        })
    }

    /// Identifier source sharing this store's persisted counters.
    #[must_use]
    pub fn identifier_source(&self) -> SequentialIdentifierSource {
        self.ids.clone()
    }

    fn decode_member(bytes: &[u8]) -> Result<ReferenceSetMember, RepositoryError> {
        decode_record(bytes)
    }
}

impl IdentifierSource for RedbStore {
    fn reserve(
        &self,
        namespace: u32,
        partition: &str,
        count: usize,
    ) -> Result<Vec<ConceptId>, RepositoryError> {
        self.ids.reserve(namespace, partition, count)
    }
}

// =============================================================================
// EXPRESSIONSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl ExpressionStore for RedbStore {
    type Commit<'a>
        = RedbCommit<'a>
    where
        Self: 'a;

    fn find_member_by_expression(
        &self,
        branch: &str,
        refset_id: ConceptId,
        expression: &str,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError> {
        let expression = strip_whitespace(expression);
        let read_txn = self.db.begin_read().map_err(io)?;
        let index = read_txn.open_table(MEMBER_EXPRESSIONS).map_err(io)?;
        let Some(component) = index
            .get((branch, refset_id.0, expression.as_str()))
            .map_err(io)?
            .map(|v| v.value())
        else {
            return Ok(None);
        };
        let members = read_txn.open_table(MEMBERS).map_err(io)?;
        match members
            .get((branch, refset_id.0, component, expression.as_str()))
            .map_err(io)?
        {
            Some(data) => Ok(Some(Self::decode_member(data.value())?)),
            None => Ok(None),
        }
    }

    fn find_member_by_component(
        &self,
        branch: &str,
        refset_id: ConceptId,
        component_id: ConceptId,
    ) -> Result<Option<ReferenceSetMember>, RepositoryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let members = read_txn.open_table(MEMBERS).map_err(io)?;
        for entry in members
            .range((branch, refset_id.0, component_id.0, "")..)
            .map_err(io)?
        {
            let (key, value) = entry.map_err(io)?;
            let (b, refset, component, _) = key.value();
            if b != branch || refset != refset_id.0 || component != component_id.0 {
                break;
            }
            let member = Self::decode_member(value.value())?;
            if member.active {
                return Ok(Some(member));
            }
        }
        Ok(None)
    }

    fn members(
        &self,
        branch: &str,
        refset_id: ConceptId,
    ) -> Result<Vec<ReferenceSetMember>, RepositoryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(MEMBERS).map_err(io)?;

        let mut members = Vec::new();
        for entry in table
            .range(
                (branch, refset_id.0, 0u64, "")..(branch, refset_id.0.saturating_add(1), 0u64, ""),
            )
            .map_err(io)?
        {
            let (_, value) = entry.map_err(io)?;
            let member = Self::decode_member(value.value())?;
            if member.active {
                members.push(member);
            }
        }
        members.sort_by(|a, b| a.referenced_component_id.cmp(&b.referenced_component_id));
        Ok(members)
    }

    fn find_concept(&self, branch: &str, id: ConceptId) -> Result<Option<Concept>, RepositoryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(CONCEPTS).map_err(io)?;
        match table.get((branch, id.0)).map_err(io)? {
            Some(data) => Ok(Some(decode_record(data.value())?)),
            None => Ok(None),
        }
    }

    fn find_concept_with_relationships(
        &self,
        branch: &str,
        relationships: &RelationshipSet,
    ) -> Result<Option<ConceptId>, RepositoryError> {
        let fingerprint = relationship_fingerprint(relationships);
        let read_txn = self.db.begin_read().map_err(io)?;
        let index = read_txn.open_table(RELATIONSHIP_INDEX).map_err(io)?;
        Ok(index
            .get((branch, fingerprint.as_str()))
            .map_err(io)?
            .map(|v| ConceptId(v.value())))
    }

    fn concept_count(&self, branch: &str) -> Result<usize, RepositoryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(CONCEPTS).map_err(io)?;
        let mut count = 0;
        for entry in table.range((branch, 0u64)..=(branch, u64::MAX)).map_err(io)? {
            entry.map_err(io)?;
            count += 1;
        }
        Ok(count)
    }

    fn member_count(&self, branch: &str) -> Result<usize, RepositoryError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(MEMBERS).map_err(io)?;
        let mut count = 0;
        for entry in table.range((branch, 0u64, 0u64, "")..).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            if key.value().0 != branch {
                break;
            }
            if Self::decode_member(value.value())?.active {
                count += 1;
            }
        }
        Ok(count)
    }

    fn open_commit(&self, branch: &str) -> Result<RedbCommit<'_>, RepositoryError> {
        {
            let mut open = self
                .open_commits
                .lock()
                .map_err(|_| RepositoryError::Store("commit lock poisoned".to_string()))?;
            if !open.insert(branch.to_string()) {
                return Err(RepositoryError::BranchLocked(branch.to_string()));
            }
        }
        // Build the commit before beginning the transaction so the branch
        // lock is released by Drop if `begin_write` fails.
        let mut commit = RedbCommit {
            store: self,
            branch: branch.to_string(),
            txn: None,
            successful: false,
            writes: 0,
        };
        commit.txn = Some(self.db.begin_write().map_err(io)?);
        debug!(branch, "commit opened");
        Ok(commit)
    }
}

// =============================================================================
// COMMIT
// =============================================================================

/// Commit on a [`RedbStore`], backed by one write transaction.
pub struct RedbCommit<'a> {
    store: &'a RedbStore,
    branch: String,
    txn: Option<WriteTransaction>,
    successful: bool,
    writes: usize,
}

impl std::fmt::Debug for RedbCommit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCommit")
            .field("branch", &self.branch)
            .field("successful", &self.successful)
            .field("writes", &self.writes)
            .finish_non_exhaustive()
    }
}

impl RedbCommit<'_> {
    fn txn(&self) -> Result<&WriteTransaction, RepositoryError> {
        self.txn
            .as_ref()
            .ok_or_else(|| RepositoryError::Store("commit already closed".to_string()))
    }

    fn rollback(&mut self) {
        if let Some(txn) = self.txn.take() {
            warn!(branch = %self.branch, writes = self.writes, "commit rolled back");
            if let Err(e) = txn.abort() {
                warn!(branch = %self.branch, error = %e, "abort failed");
            }
        }
    }
}

impl Commit for RedbCommit<'_> {
    fn branch(&self) -> &str {
        &self.branch
    }

    fn save_concepts(&mut self, concepts: &[Concept]) -> Result<(), RepositoryError> {
        let branch = self.branch.as_str();
        let txn = self.txn()?;
        {
            let mut table = txn.open_table(CONCEPTS).map_err(io)?;
            let mut index = txn.open_table(RELATIONSHIP_INDEX).map_err(io)?;
            for concept in concepts {
                let id = concept.id.ok_or_else(|| {
                    RepositoryError::Store("concept without identifier".to_string())
                })?;
                let previous: Option<Concept> = match table.get((branch, id.0)).map_err(io)? {
                    Some(data) => Some(decode_record(data.value())?),
                    None => None,
                };
                if let Some(previous) = previous {
                    let old = relationship_fingerprint(&previous.relationship_set());
                    index.remove((branch, old.as_str())).map_err(io)?;
                }

                let bytes = encode_record(concept)?;
                table
                    .insert((branch, id.0), bytes.as_slice())
                    .map_err(io)?;
                let fingerprint = relationship_fingerprint(&concept.relationship_set());
                index
                    .insert((branch, fingerprint.as_str()), id.0)
                    .map_err(io)?;
            }
        }
        self.writes += concepts.len();
        Ok(())
    }

    fn save_members(&mut self, members: &[ReferenceSetMember]) -> Result<(), RepositoryError> {
        let branch = self.branch.as_str();
        let txn = self.txn()?;
        {
            let mut table = txn.open_table(MEMBERS).map_err(io)?;
            let mut index = txn.open_table(MEMBER_EXPRESSIONS).map_err(io)?;
            for member in members {
                let bytes = encode_record(member)?;
                table
                    .insert(
                        (
                            branch,
                            member.refset_id.0,
                            member.referenced_component_id.0,
                            member.expression.as_str(),
                        ),
                        bytes.as_slice(),
                    )
                    .map_err(io)?;
                let index_key = (branch, member.refset_id.0, member.expression.as_str());
                if member.active {
                    index
                        .insert(index_key, member.referenced_component_id.0)
                        .map_err(io)?;
                } else {
                    index.remove(index_key).map_err(io)?;
                }
            }
        }
        self.writes += members.len();
        Ok(())
    }

    fn mark_successful(&mut self) {
        self.successful = true;
    }

    fn close(mut self) -> Result<(), RepositoryError> {
        if !self.successful {
            self.rollback();
            return Ok(());
        }
        let Some(txn) = self.txn.take() else {
            return Err(RepositoryError::Store("commit already closed".to_string()));
        };
        {
            let counters = self.store.ids.snapshot()?;
            let mut meta = txn.open_table(METADATA).map_err(io)?;
            for (key, value) in &counters {
                meta.insert(counter_key(key).as_str(), *value).map_err(io)?;
            }
        }
        txn.commit().map_err(io)?;
        debug!(branch = %self.branch, writes = self.writes, "commit closed");
        Ok(())
    }
}

impl Drop for RedbCommit<'_> {
    fn drop(&mut self) {
        self.rollback();
        if let Ok(mut open) = self.store.open_commits.lock() {
            open.remove(&self.branch);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
