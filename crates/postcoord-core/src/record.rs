//! # Expression Records
//!
//! Per-input results returned to callers.

use crate::expression::CanonicalExpression;
use crate::{ConceptId, RepositoryError};
use serde::Serialize;

/// A processed post-coordinated expression.
///
/// `id` stays `None` until the expression is persisted, or is set straight
/// away when an identical close-to-user form was already stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostCoordinatedExpression {
    pub id: Option<ConceptId>,
    /// Canonical close-to-user form, whitespace removed.
    pub close_to_user_form: String,
    pub classifiable_form: Option<String>,
    pub necessary_normal_form: Option<String>,
    pub human_readable_classifiable_form: Option<String>,
    pub human_readable_necessary_normal_form: Option<String>,
    #[serde(skip)]
    nnf: Option<CanonicalExpression>,
}

impl PostCoordinatedExpression {
    pub(crate) fn new(
        id: Option<ConceptId>,
        close_to_user_form: String,
        classifiable_form: Option<String>,
        nnf: Option<CanonicalExpression>,
    ) -> Self {
        Self {
            id,
            close_to_user_form,
            classifiable_form,
            necessary_normal_form: nnf.as_ref().map(ToString::to_string),
            human_readable_classifiable_form: None,
            human_readable_necessary_normal_form: None,
            nnf,
        }
    }

    /// The necessary normal form as an expression.
    #[must_use]
    pub fn necessary_normal_form_expression(&self) -> Option<&CanonicalExpression> {
        self.nnf.as_ref()
    }

    /// Whether the orchestrator still has to persist this record.
    #[must_use]
    pub fn needs_persisting(&self) -> bool {
        self.id.is_none()
    }
}

/// An input that could not be processed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedExpression {
    /// The input with display terms added when possible, otherwise verbatim.
    pub human_readable_close_to_user_form: String,
    pub error: RepositoryError,
}

/// Outcome for one input string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExpressionOutcome {
    Processed(PostCoordinatedExpression),
    Failed(FailedExpression),
}

impl ExpressionOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    #[must_use]
    pub fn expression(&self) -> Option<&PostCoordinatedExpression> {
        match self {
            Self::Processed(expression) => Some(expression),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&RepositoryError> {
        match self {
            Self::Processed(_) => None,
            Self::Failed(failed) => Some(&failed.error),
        }
    }

    /// Identifier of a processed and persisted expression.
    #[must_use]
    pub fn id(&self) -> Option<ConceptId> {
        self.expression().and_then(|e| e.id)
    }
}
