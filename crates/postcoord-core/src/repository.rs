//! # Expression Repository
//!
//! Batch orchestration over the pipeline, the materializer and the store.
//!
//! A batch call runs the pipeline over every input first. Persistence happens
//! only when no input failed and at least one still needs an identifier; it
//! then goes through a single commit that either becomes visible as a whole
//! or not at all.

use crate::classify::{Classifier, PassThroughClassifier};
use crate::expression::{ExpressionParser, ScgParser};
use crate::identifiers::{IdentifierSource, SequentialIdentifierSource};
use crate::materializer::{ConceptGraphMaterializer, ExpressionIdCache};
use crate::pipeline::ExpressionPipeline;
use crate::primitives::{
    CANONICAL_CLOSE_TO_USER_FORM_REFSET, CLASSIFIABLE_FORM_REFSET, FLUSH_THRESHOLD, MAX_BATCH_SIZE,
};
use crate::record::{ExpressionOutcome, PostCoordinatedExpression};
use crate::storage::RedbStore;
use crate::store::{Commit, ExpressionStore, MemoryStore};
use crate::terms::{ConfiguredTerms, TermSource};
use crate::validation::{ExpressionTransformer, RangeValidator};
use crate::{Concept, ConceptId, ReferenceSetMember, RepositoryError, sctid};
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// PENDING WRITES
// =============================================================================

/// Totals of one [`PendingWrites`] scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub concepts: usize,
    pub members: usize,
    pub flushes: usize,
}

/// Commit-scoped write buffer.
///
/// Buffered writes reach the commit whenever the pending concepts reach the
/// flush threshold. [`PendingWrites::finish`] flushes the rest and closes
/// the commit as successful; dropping the buffer any other way closes the
/// commit unmarked, which discards every write made through it.
pub struct PendingWrites<C: Commit> {
    commit: Option<C>,
    threshold: usize,
    concepts: Vec<Concept>,
    members: Vec<ReferenceSetMember>,
    summary: WriteSummary,
}

impl<C: Commit> PendingWrites<C> {
    #[must_use]
    pub fn new(commit: C) -> Self {
        Self::with_threshold(commit, FLUSH_THRESHOLD)
    }

    /// A threshold of 0 is treated as 1.
    #[must_use]
    pub fn with_threshold(commit: C, threshold: usize) -> Self {
        Self {
            commit: Some(commit),
            threshold: threshold.max(1),
            concepts: Vec::new(),
            members: Vec::new(),
            summary: WriteSummary::default(),
        }
    }

    /// Queue writes, flushing if the threshold is reached.
    pub fn push(
        &mut self,
        concepts: impl IntoIterator<Item = Concept>,
        members: impl IntoIterator<Item = ReferenceSetMember>,
    ) -> Result<(), RepositoryError> {
        self.concepts.extend(concepts);
        self.members.extend(members);
        if self.concepts.len() >= self.threshold {
            self.flush()?;
        }
        Ok(())
    }

    /// Number of writes not yet handed to the commit.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.concepts.len() + self.members.len()
    }

    pub fn flush(&mut self) -> Result<(), RepositoryError> {
        if self.concepts.is_empty() && self.members.is_empty() {
            return Ok(());
        }
        let commit = Self::commit_mut(&mut self.commit)?;
        // Concepts before the members that reference them.
        let concepts = std::mem::take(&mut self.concepts);
        let members = std::mem::take(&mut self.members);
        commit.save_concepts(&concepts)?;
        commit.save_members(&members)?;
        self.summary.concepts += concepts.len();
        self.summary.members += members.len();
        self.summary.flushes += 1;
        debug!(
            concepts = concepts.len(),
            members = members.len(),
            "flushed pending writes"
        );
        Ok(())
    }

    /// Flush the remainder, mark the commit successful and close it.
    pub fn finish(mut self) -> Result<WriteSummary, RepositoryError> {
        self.flush()?;
        let mut commit = self
            .commit
            .take()
            .ok_or_else(|| RepositoryError::Store("commit already closed".to_string()))?;
        commit.mark_successful();
        commit.close()?;
        Ok(self.summary)
    }

    fn commit_mut(commit: &mut Option<C>) -> Result<&mut C, RepositoryError> {
        commit
            .as_mut()
            .ok_or_else(|| RepositoryError::Store("commit already closed".to_string()))
    }
}

impl<C: Commit> Drop for PendingWrites<C> {
    fn drop(&mut self) {
        if let Some(commit) = self.commit.take() {
            warn!(
                branch = commit.branch(),
                discarded = self.concepts.len() + self.members.len(),
                "pending writes discarded"
            );
            if let Err(e) = commit.close() {
                warn!(error = %e, "failed to close rolled back commit");
            }
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// Creates and looks up post-coordinated expressions on branches of a store.
///
/// Identifiers for persisted concepts and temporary classification ids both
/// come from `ids`.
pub struct ExpressionRepository<S, I> {
    store: S,
    ids: I,
    parser: Box<dyn ExpressionParser>,
    transformer: Box<dyn ExpressionTransformer>,
    classifier: Box<dyn Classifier>,
    terms: Box<dyn TermSource>,
    classification_package: Option<String>,
    flush_threshold: usize,
}

impl ExpressionRepository<MemoryStore, SequentialIdentifierSource> {
    /// Repository over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), SequentialIdentifierSource::new())
    }
}

impl ExpressionRepository<RedbStore, SequentialIdentifierSource> {
    /// Open or create a redb-backed repository. Identifier counters are
    /// persisted alongside the data.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let store = RedbStore::open(path)?;
        let ids = store.identifier_source();
        Ok(Self::new(store, ids))
    }
}

impl<S, I> ExpressionRepository<S, I>
where
    S: ExpressionStore,
    I: IdentifierSource,
{
    /// Repository with the default collaborators: the compositional grammar
    /// parser, a validator without range rules, the pass-through classifier
    /// and no display terms.
    pub fn new(store: S, ids: I) -> Self {
        Self {
            store,
            ids,
            parser: Box::new(ScgParser::new()),
            transformer: Box::new(RangeValidator::default()),
            classifier: Box::new(PassThroughClassifier),
            terms: Box::new(ConfiguredTerms::new()),
            classification_package: None,
            flush_threshold: FLUSH_THRESHOLD,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: impl ExpressionParser + 'static) -> Self {
        self.parser = Box::new(parser);
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: impl ExpressionTransformer + 'static) -> Self {
        self.transformer = Box::new(transformer);
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Classifier + 'static) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    #[must_use]
    pub fn with_terms(mut self, terms: impl TermSource + 'static) -> Self {
        self.terms = Box::new(terms);
        self
    }

    /// Classification package handed to the classifier with every request.
    #[must_use]
    pub fn with_classification_package(mut self, package: impl Into<String>) -> Self {
        self.classification_package = Some(package.into());
        self
    }

    /// Number of pending concepts that triggers a flush into the commit.
    #[must_use]
    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn identifier_source(&self) -> &I {
        &self.ids
    }

    fn pipeline(&self) -> ExpressionPipeline<'_, S> {
        ExpressionPipeline {
            store: &self.store,
            parser: self.parser.as_ref(),
            transformer: self.transformer.as_ref(),
            classifier: self.classifier.as_ref(),
            terms: self.terms.as_ref(),
            temp_ids: &self.ids,
            classification_package: self.classification_package.as_deref(),
        }
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Create a single expression.
    pub fn create_expression(
        &self,
        input: &str,
        branch: &str,
        module_id: ConceptId,
    ) -> Result<ExpressionOutcome, RepositoryError> {
        let mut outcomes = self.create_expressions_all_or_nothing(&[input], branch, module_id)?;
        outcomes
            .pop()
            .ok_or_else(|| RepositoryError::Store("no outcome for input".to_string()))
    }

    /// Process every input and persist the batch if none failed.
    ///
    /// Outcomes match `inputs` one to one. When any outcome failed, nothing
    /// is written and no outcome carries a new identifier. An `Err` means the
    /// commit phase itself failed and was rolled back.
    pub fn create_expressions_all_or_nothing<T: AsRef<str>>(
        &self,
        inputs: &[T],
        branch: &str,
        module_id: ConceptId,
    ) -> Result<Vec<ExpressionOutcome>, RepositoryError> {
        if inputs.len() > MAX_BATCH_SIZE {
            return Err(RepositoryError::BatchTooLarge(inputs.len()));
        }
        let namespace = sctid::namespace_of(module_id)?;

        let mut outcomes = self.process_only(inputs, branch)?;
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        let to_persist = outcomes
            .iter()
            .filter_map(ExpressionOutcome::expression)
            .filter(|e| e.needs_persisting())
            .count();

        if failed > 0 || to_persist == 0 {
            info!(
                branch,
                inputs = inputs.len(),
                failed,
                persisted = 0,
                "batch processed without commit"
            );
            return Ok(outcomes);
        }

        let summary = self.persist(&mut outcomes, branch, module_id, namespace)?;
        info!(
            branch,
            inputs = inputs.len(),
            failed,
            persisted = to_persist,
            concepts = summary.concepts,
            members = summary.members,
            flushes = summary.flushes,
            "batch committed"
        );
        Ok(outcomes)
    }

    /// Run the pipeline without persisting anything.
    pub fn process_only<T: AsRef<str>>(
        &self,
        inputs: &[T],
        branch: &str,
    ) -> Result<Vec<ExpressionOutcome>, RepositoryError> {
        if inputs.len() > MAX_BATCH_SIZE {
            return Err(RepositoryError::BatchTooLarge(inputs.len()));
        }
        let pipeline = self.pipeline();
        Ok(inputs
            .iter()
            .map(|input| pipeline.process(input.as_ref(), branch))
            .collect())
    }

    /// Every stored expression on `branch`, ordered by identifier.
    pub fn find_all(
        &self,
        branch: &str,
    ) -> Result<Vec<PostCoordinatedExpression>, RepositoryError> {
        let pipeline = self.pipeline();
        self.store
            .members(branch, CANONICAL_CLOSE_TO_USER_FORM_REFSET)?
            .into_iter()
            .map(|member| pipeline.stored(branch, member))
            .collect()
    }

    /// The stored expression whose member in `refset_id` has the given
    /// expression text. Whitespace in `expression` is ignored.
    pub fn find_by_expression(
        &self,
        branch: &str,
        expression: &str,
        refset_id: ConceptId,
    ) -> Result<Option<PostCoordinatedExpression>, RepositoryError> {
        let Some(member) = self
            .store
            .find_member_by_expression(branch, refset_id, expression)?
        else {
            return Ok(None);
        };
        let close_to_user = if refset_id == CANONICAL_CLOSE_TO_USER_FORM_REFSET {
            Some(member)
        } else {
            self.store.find_member_by_component(
                branch,
                CANONICAL_CLOSE_TO_USER_FORM_REFSET,
                member.referenced_component_id,
            )?
        };
        close_to_user
            .map(|member| self.pipeline().stored(branch, member))
            .transpose()
    }

    /// Materialize and write every record still lacking an identifier.
    fn persist(
        &self,
        outcomes: &mut [ExpressionOutcome],
        branch: &str,
        module_id: ConceptId,
        namespace: u32,
    ) -> Result<WriteSummary, RepositoryError> {
        let commit = self.store.open_commit(branch)?;
        let mut writes = PendingWrites::with_threshold(commit, self.flush_threshold);
        let materializer =
            ConceptGraphMaterializer::new(&self.store, &self.ids, branch, module_id, namespace);
        let mut cache = ExpressionIdCache::new();
        let mut created = Vec::new();

        for outcome in outcomes.iter_mut() {
            let ExpressionOutcome::Processed(record) = outcome else {
                continue;
            };
            if !record.needs_persisting() {
                continue;
            }
            let nnf = record.necessary_normal_form_expression().ok_or_else(|| {
                RepositoryError::Classification(format!(
                    "no necessary normal form for {}",
                    record.close_to_user_form
                ))
            })?;
            let id = materializer.materialize(nnf, false, &mut cache, &mut created)?;

            let classifiable = record.classifiable_form.as_deref().ok_or_else(|| {
                RepositoryError::Classification(format!(
                    "no classifiable form for {}",
                    record.close_to_user_form
                ))
            })?;
            let members = [
                ReferenceSetMember::new(
                    module_id,
                    CANONICAL_CLOSE_TO_USER_FORM_REFSET,
                    id,
                    &record.close_to_user_form,
                ),
                ReferenceSetMember::new(module_id, CLASSIFIABLE_FORM_REFSET, id, classifiable),
            ];
            writes.push(created.drain(..), members)?;
            record.id = Some(id);
        }

        writes.finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConceptDefinitionStatus, Relationship};

    const MODULE: ConceptId = ConceptId(11_000_003_104);

    #[derive(Default)]
    struct CountingCommit {
        saves: usize,
        concepts: usize,
        /// The save that fails, counting from 1.
        fail_on_save: Option<usize>,
        marked: bool,
        closed: std::rc::Rc<std::cell::Cell<Option<bool>>>,
    }

    impl Commit for CountingCommit {
        fn branch(&self) -> &str {
            "MAIN"
        }

        fn save_concepts(&mut self, concepts: &[Concept]) -> Result<(), RepositoryError> {
            self.saves += 1;
            if self.fail_on_save == Some(self.saves) {
                return Err(RepositoryError::Store("write rejected".to_string()));
            }
            self.concepts += concepts.len();
            Ok(())
        }

        fn save_members(&mut self, _members: &[ReferenceSetMember]) -> Result<(), RepositoryError> {
            Ok(())
        }

        fn mark_successful(&mut self) {
            self.marked = true;
        }

        fn close(self) -> Result<(), RepositoryError> {
            self.closed.set(Some(self.marked));
            Ok(())
        }
    }

    fn concept(n: u64) -> Concept {
        let mut concept = Concept::candidate(MODULE, ConceptDefinitionStatus::Primitive);
        concept.add_relationship(Relationship::is_a(ConceptId(71_388_002)));
        concept.assign_id(ConceptId(n));
        concept
    }

    #[test]
    fn flushes_at_threshold() {
        let closed = std::rc::Rc::new(std::cell::Cell::new(None));
        let commit = CountingCommit {
            closed: closed.clone(),
            ..CountingCommit::default()
        };
        let mut writes = PendingWrites::with_threshold(commit, 3);
        for n in 0..7 {
            writes.push([concept(100_000 + n)], Vec::new()).expect("push");
        }
        assert_eq!(writes.pending(), 1);

        let summary = writes.finish().expect("finish");
        assert_eq!(summary.concepts, 7);
        assert_eq!(summary.flushes, 3);
        assert_eq!(closed.get(), Some(true));
    }

    #[test]
    fn dropping_closes_unmarked() {
        let closed = std::rc::Rc::new(std::cell::Cell::new(None));
        let commit = CountingCommit {
            closed: closed.clone(),
            ..CountingCommit::default()
        };
        {
            let mut writes = PendingWrites::new(commit);
            writes.push([concept(100_001)], Vec::new()).expect("push");
        }
        assert_eq!(closed.get(), Some(false));
    }

    #[test]
    fn failed_flush_leaves_commit_unmarked() {
        let closed = std::rc::Rc::new(std::cell::Cell::new(None));
        let commit = CountingCommit {
            fail_on_save: Some(2),
            closed: closed.clone(),
            ..CountingCommit::default()
        };
        let mut writes = PendingWrites::with_threshold(commit, 1);
        writes.push([concept(100_002)], Vec::new()).expect("first flush");
        let error = writes
            .push([concept(100_003)], Vec::new())
            .expect_err("second flush fails");
        assert_eq!(error, RepositoryError::Store("write rejected".to_string()));
        assert_eq!(closed.get(), None);

        drop(writes);
        assert_eq!(closed.get(), Some(false));
    }

    #[test]
    fn failed_finish_leaves_commit_unmarked() {
        let closed = std::rc::Rc::new(std::cell::Cell::new(None));
        let commit = CountingCommit {
            fail_on_save: Some(1),
            closed: closed.clone(),
            ..CountingCommit::default()
        };
        let mut writes = PendingWrites::new(commit);
        writes.push([concept(100_004)], Vec::new()).expect("buffered");

        assert!(writes.finish().is_err());
        assert_eq!(closed.get(), Some(false));
    }

    #[test]
    fn rejects_oversized_batch() {
        let repository = ExpressionRepository::in_memory();
        let inputs = vec!["71388002"; MAX_BATCH_SIZE + 1];
        let result = repository.create_expressions_all_or_nothing(&inputs, "MAIN", MODULE);
        assert_eq!(
            result.err(),
            Some(RepositoryError::BatchTooLarge(MAX_BATCH_SIZE + 1))
        );
        assert_eq!(repository.store().concept_count("MAIN"), Ok(0));
    }

    #[test]
    fn creates_and_finds() {
        let repository = ExpressionRepository::in_memory();
        let outcome = repository
            .create_expression("71388002 |Procedure| : 405813007 = 15497006", "MAIN", MODULE)
            .expect("create");
        let id = outcome.id().expect("persisted");

        let found = repository
            .find_by_expression(
                "MAIN",
                "=== 71388002 : 405813007 = 15497006",
                CANONICAL_CLOSE_TO_USER_FORM_REFSET,
            )
            .expect("lookup")
            .expect("found");
        assert_eq!(found.id, Some(id));

        let all = repository.find_all("MAIN").expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].close_to_user_form, "===71388002:405813007=15497006");
    }

    #[test]
    fn find_by_classifiable_form() {
        let repository = ExpressionRepository::in_memory();
        let id = repository
            .create_expression("71388002 : 405813007 = 15497006", "MAIN", MODULE)
            .expect("create")
            .id()
            .expect("persisted");

        // The default validator groups the loose attribute.
        let found = repository
            .find_by_expression(
                "MAIN",
                "===71388002:{405813007=15497006}",
                CLASSIFIABLE_FORM_REFSET,
            )
            .expect("lookup")
            .expect("found");
        assert_eq!(found.id, Some(id));
        assert_eq!(found.close_to_user_form, "===71388002:405813007=15497006");
    }

    #[test]
    fn invalid_module_id_is_rejected() {
        let repository = ExpressionRepository::in_memory();
        let result = repository.create_expression("71388002", "MAIN", ConceptId(31_000_003_163));
        assert!(matches!(result, Err(RepositoryError::InvalidIdentifier(_))));
    }
}
