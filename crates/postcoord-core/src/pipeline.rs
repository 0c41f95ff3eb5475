//! # Expression Processing Pipeline
//!
//! The per-input state machine:
//!
//! ```text
//! Parse -> DedupLookup -> TransformValidate -> AssignTempId -> Classify
//!       -> ClearTempId -> Assemble -> Humanize
//! ```
//!
//! A stored close-to-user form skips from `DedupLookup` straight to
//! `Assemble`, which rebuilds the record from the store, and `Humanize`.
//! Every input yields exactly one outcome, and an error never escapes the
//! input that caused it.

use crate::classify::{ClassificationRequest, Classifier};
use crate::expression::{CanonicalExpression, ExpressionParser};
use crate::identifiers::IdentifierSource;
use crate::materializer::concept_to_expression;
use crate::primitives::{
    CANONICAL_CLOSE_TO_USER_FORM_REFSET, CLASSIFIABLE_FORM_REFSET, DEMO_NAMESPACE,
    EXPRESSION_PARTITION,
};
use crate::record::{ExpressionOutcome, FailedExpression, PostCoordinatedExpression};
use crate::store::ExpressionStore;
use crate::terms::TermSource;
use crate::validation::{ExpressionContext, ExpressionTransformer};
use crate::{ReferenceSetMember, RepositoryError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Instant;
use tracing::{debug, warn};

// =============================================================================
// STAGES
// =============================================================================

/// States of the per-expression pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessingStage {
    Parse,
    DedupLookup,
    TransformValidate,
    AssignTempId,
    Classify,
    ClearTempId,
    Assemble,
    Humanize,
}

impl ProcessingStage {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::DedupLookup => "dedup_lookup",
            Self::TransformValidate => "transform_validate",
            Self::AssignTempId => "assign_temp_id",
            Self::Classify => "classify",
            Self::ClearTempId => "clear_temp_id",
            Self::Assemble => "assemble",
            Self::Humanize => "humanize",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Emits a debug event with the elapsed time of each stage.
#[derive(Debug)]
pub struct StageTimer {
    started: Instant,
    last: Instant,
    reached: Vec<ProcessingStage>,
}

impl StageTimer {
    #[must_use]
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            reached: Vec::new(),
        }
    }

    pub fn checkpoint(&mut self, stage: ProcessingStage) {
        let now = Instant::now();
        debug!(
            stage = stage.name(),
            elapsed_us = now.duration_since(self.last).as_micros() as u64,
            "stage complete"
        );
        self.last = now;
        self.reached.push(stage);
    }

    /// Stages completed so far, in order.
    #[must_use]
    pub fn reached(&self) -> &[ProcessingStage] {
        &self.reached
    }

    pub fn finish(&self) {
        debug!(
            stages = self.reached.len(),
            total_us = self.started.elapsed().as_micros() as u64,
            "expression processed"
        );
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Collaborators the pipeline drives, borrowed for one call.
pub struct ExpressionPipeline<'a, S: ?Sized> {
    pub store: &'a S,
    pub parser: &'a dyn ExpressionParser,
    pub transformer: &'a dyn ExpressionTransformer,
    pub classifier: &'a dyn Classifier,
    pub terms: &'a dyn TermSource,
    /// Source of throwaway classification identifiers.
    pub temp_ids: &'a dyn IdentifierSource,
    pub classification_package: Option<&'a str>,
}

impl<S: ExpressionStore + ?Sized> ExpressionPipeline<'_, S> {
    /// Run the pipeline over one input.
    pub fn process(&self, input: &str, branch: &str) -> ExpressionOutcome {
        let mut timer = StageTimer::start();
        let outcome = match self.try_process(input, branch, &mut timer) {
            Ok(expression) => ExpressionOutcome::Processed(expression),
            Err(error) => {
                debug!(%error, "expression failed");
                ExpressionOutcome::Failed(FailedExpression {
                    human_readable_close_to_user_form: self.humanize_input(input),
                    error,
                })
            }
        };
        timer.finish();
        outcome
    }

    fn try_process(
        &self,
        input: &str,
        branch: &str,
        timer: &mut StageTimer,
    ) -> Result<PostCoordinatedExpression, RepositoryError> {
        let close_to_user_form = self.parser.parse(input)?;
        let canonical_ctu = close_to_user_form.canonical();
        timer.checkpoint(ProcessingStage::Parse);

        let existing = self.store.find_member_by_expression(
            branch,
            CANONICAL_CLOSE_TO_USER_FORM_REFSET,
            &canonical_ctu,
        )?;
        timer.checkpoint(ProcessingStage::DedupLookup);
        if let Some(member) = existing {
            let (mut record, classifiable) = self.assemble_stored(branch, member)?;
            timer.checkpoint(ProcessingStage::Assemble);
            self.humanize(&mut record, classifiable.as_ref());
            timer.checkpoint(ProcessingStage::Humanize);
            return Ok(record);
        }

        let context = ExpressionContext {
            branch,
            terms: self.terms,
        };
        let classifiable = self
            .transformer
            .validate_and_transform(&close_to_user_form, &context)?;
        timer.checkpoint(ProcessingStage::TransformValidate);

        let nnf = self.classify(&classifiable, timer)?;

        let mut record = PostCoordinatedExpression::new(
            None,
            canonical_ctu,
            Some(classifiable.to_string()),
            Some(nnf),
        );
        timer.checkpoint(ProcessingStage::Assemble);
        self.humanize(&mut record, Some(&classifiable));
        timer.checkpoint(ProcessingStage::Humanize);
        Ok(record)
    }

    /// AssignTempId, Classify and ClearTempId. The request holding the
    /// temporary ids does not outlive this function.
    fn classify(
        &self,
        classifiable: &CanonicalExpression,
        timer: &mut StageTimer,
    ) -> Result<CanonicalExpression, RepositoryError> {
        let needed = ClassificationRequest::distinct_expressions(classifiable);
        let reserved = self
            .temp_ids
            .reserve(DEMO_NAMESPACE, EXPRESSION_PARTITION, needed)?;
        let request = ClassificationRequest::new(
            classifiable,
            self.classification_package,
            &mut reserved.into_iter(),
        )?;
        timer.checkpoint(ProcessingStage::AssignTempId);

        let nnf = self.classifier.classify(&request)?;
        timer.checkpoint(ProcessingStage::Classify);

        drop(request);
        timer.checkpoint(ProcessingStage::ClearTempId);
        Ok(nnf)
    }

    /// Rebuild the record of a stored close-to-user form member.
    pub(crate) fn stored(
        &self,
        branch: &str,
        member: ReferenceSetMember,
    ) -> Result<PostCoordinatedExpression, RepositoryError> {
        let (mut record, classifiable) = self.assemble_stored(branch, member)?;
        self.humanize(&mut record, classifiable.as_ref());
        Ok(record)
    }

    /// The stored record without human-readable forms, plus its parsed
    /// classifiable form.
    fn assemble_stored(
        &self,
        branch: &str,
        member: ReferenceSetMember,
    ) -> Result<(PostCoordinatedExpression, Option<CanonicalExpression>), RepositoryError> {
        let id = member.referenced_component_id;
        let stored_classifiable = self
            .store
            .find_member_by_component(branch, CLASSIFIABLE_FORM_REFSET, id)?
            .map(|m| m.expression);
        // Members hold compact text; re-render it spaced like a fresh result.
        let classifiable = stored_classifiable.as_deref().and_then(|text| {
            self.parser
                .parse(text)
                .inspect_err(|error| warn!(%error, %id, "stored classifiable form could not be parsed"))
                .ok()
        });
        let nnf = self
            .store
            .find_concept(branch, id)?
            .map(|c| concept_to_expression(&c));
        let classifiable_form = classifiable
            .as_ref()
            .map(ToString::to_string)
            .or(stored_classifiable);
        let record =
            PostCoordinatedExpression::new(Some(id), member.expression, classifiable_form, nnf);
        Ok((record, classifiable))
    }

    /// Fill the human-readable forms. Falls back to the unlabelled text.
    fn humanize(
        &self,
        record: &mut PostCoordinatedExpression,
        classifiable: Option<&CanonicalExpression>,
    ) {
        let mut ids = BTreeSet::new();
        if let Some(expression) = classifiable {
            ids.extend(expression.all_concept_ids());
        }
        if let Some(expression) = record.necessary_normal_form_expression() {
            ids.extend(expression.all_concept_ids());
        }
        let terms = match self.terms.preferred_terms(&ids) {
            Ok(terms) => terms,
            Err(error) => {
                warn!(%error, "term lookup failed, returning unlabelled forms");
                BTreeMap::new()
            }
        };

        record.human_readable_classifiable_form = match classifiable {
            Some(expression) => Some(expression.render_with_terms(&terms)),
            None => record.classifiable_form.clone(),
        };
        record.human_readable_necessary_normal_form = record
            .necessary_normal_form_expression()
            .map(|expression| expression.render_with_terms(&terms));
    }

    /// Render a failed input as human-readably as possible.
    fn humanize_input(&self, input: &str) -> String {
        let Ok(expression) = self.parser.parse(input) else {
            return input.to_string();
        };
        match self.terms.preferred_terms(&expression.all_concept_ids()) {
            Ok(terms) => expression.render_with_terms(&terms),
            Err(error) => {
                warn!(%error, "term lookup failed for failed input");
                input.to_string()
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
