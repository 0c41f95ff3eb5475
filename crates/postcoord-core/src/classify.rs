//! # Classification
//!
//! The classifier computes the necessary normal form of a classifiable form.
//!
//! A [`ClassificationRequest`] carries throwaway identifiers for the
//! expression and each nested sub-expression so the classifier has stable
//! references to compute against. The request borrows the classifiable form
//! and is dropped as soon as the classifier returns, so the identifiers never
//! reach a returned or persisted record.

use crate::expression::CanonicalExpression;
use crate::{ConceptId, RepositoryError};
use std::collections::BTreeMap;

/// One classification round trip.
#[derive(Debug)]
pub struct ClassificationRequest<'a> {
    expression: &'a CanonicalExpression,
    temp_ids: BTreeMap<String, ConceptId>,
    package: Option<&'a str>,
}

impl<'a> ClassificationRequest<'a> {
    /// Build a request, taking one temporary id per distinct (sub)expression
    /// from `ids`.
    pub(crate) fn new(
        expression: &'a CanonicalExpression,
        package: Option<&'a str>,
        ids: &mut dyn Iterator<Item = ConceptId>,
    ) -> Result<Self, RepositoryError> {
        let mut temp_ids = BTreeMap::new();
        let mut missing = false;
        expression.for_each_expression(&mut |e| {
            let key = e.canonical();
            if temp_ids.contains_key(&key) {
                return;
            }
            match ids.next() {
                Some(id) => {
                    temp_ids.insert(key, id);
                }
                None => missing = true,
            }
        });
        if missing {
            return Err(RepositoryError::IdentifierAllocation(
                "not enough temporary identifiers for classification".to_string(),
            ));
        }
        Ok(Self {
            expression,
            temp_ids,
            package,
        })
    }

    /// Number of distinct (sub)expressions, and so of temporary ids needed.
    pub(crate) fn distinct_expressions(expression: &CanonicalExpression) -> usize {
        let mut keys = std::collections::BTreeSet::new();
        expression.for_each_expression(&mut |e| {
            keys.insert(e.canonical());
        });
        keys.len()
    }

    /// The classifiable form.
    #[must_use]
    pub fn expression(&self) -> &CanonicalExpression {
        self.expression
    }

    /// Temporary id of the whole expression.
    #[must_use]
    pub fn expression_id(&self) -> Option<ConceptId> {
        self.temp_ids.get(&self.expression.canonical()).copied()
    }

    /// Temporary id of any (sub)expression, by its canonical text.
    #[must_use]
    pub fn temp_id(&self, canonical: &str) -> Option<ConceptId> {
        self.temp_ids.get(canonical).copied()
    }

    /// Classification package to compute against, if configured.
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.package
    }
}

/// Computes necessary normal forms.
pub trait Classifier: Send + Sync {
    /// Classify, failing with [`RepositoryError::Classification`].
    fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<CanonicalExpression, RepositoryError>;
}

/// Returns the classifiable form unchanged as the necessary normal form.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughClassifier;

impl Classifier for PassThroughClassifier {
    fn classify(
        &self,
        request: &ClassificationRequest<'_>,
    ) -> Result<CanonicalExpression, RepositoryError> {
        Ok(request.expression().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Attribute;

    fn nested() -> CanonicalExpression {
        let inner = CanonicalExpression::of(ConceptId(15_497_006))
            .with_attribute(Attribute::concept(ConceptId(272_741_003), ConceptId(24_028_007)));
        CanonicalExpression::of(ConceptId(71_388_002))
            .with_attribute(Attribute::nested(ConceptId(405_813_007), inner))
    }

    #[test]
    fn one_temp_id_per_distinct_expression() {
        let expression = nested();
        assert_eq!(ClassificationRequest::distinct_expressions(&expression), 2);

        let mut ids = [ConceptId(11_000_003_162), ConceptId(21_000_003_166)].into_iter();
        let request = ClassificationRequest::new(&expression, None, &mut ids).expect("request");
        assert!(request.expression_id().is_some());
        assert_ne!(
            request.expression_id(),
            request.temp_id("===15497006:272741003=24028007")
        );
    }

    #[test]
    fn too_few_ids_fail() {
        let expression = nested();
        let mut ids = [ConceptId(11_000_003_162)].into_iter();
        assert!(matches!(
            ClassificationRequest::new(&expression, None, &mut ids),
            Err(RepositoryError::IdentifierAllocation(_))
        ));
    }

    #[test]
    fn pass_through_returns_classifiable_form() {
        let expression = nested();
        let mut ids = [ConceptId(11_000_003_162), ConceptId(21_000_003_166)].into_iter();
        let request =
            ClassificationRequest::new(&expression, Some("demo"), &mut ids).expect("request");
        assert_eq!(request.package(), Some("demo"));
        let nnf = PassThroughClassifier.classify(&request).expect("classify");
        assert_eq!(nnf, expression);
    }
}
