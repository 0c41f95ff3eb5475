//! # Validation and Transformation
//!
//! Turns a close-to-user form into a classifiable form.
//!
//! [`RangeValidator`] is the default rule set:
//! - every attribute with a configured range must take a value inside it
//! - loose attributes are grouped, except those configured to stay ungrouped
//!
//! Rules apply to nested sub-expressions as well.

use crate::expression::{Attribute, AttributeGroup, AttributeValue, CanonicalExpression};
use crate::terms::TermSource;
use crate::{ConceptId, RepositoryError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Marker given to the group that collects loose attributes.
pub const LOOSE_ATTRIBUTE_GROUP: u32 = 1;

/// Inputs available to a transformer besides the expression itself.
pub struct ExpressionContext<'a> {
    pub branch: &'a str,
    pub terms: &'a dyn TermSource,
}

impl std::fmt::Debug for ExpressionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionContext")
            .field("branch", &self.branch)
            .finish_non_exhaustive()
    }
}

/// Validates an expression against modeling rules and produces its
/// classifiable form.
pub trait ExpressionTransformer: Send + Sync {
    /// Fails with [`RepositoryError::Validation`] carrying a user-facing message.
    fn validate_and_transform(
        &self,
        expression: &CanonicalExpression,
        context: &ExpressionContext<'_>,
    ) -> Result<CanonicalExpression, RepositoryError>;
}

// =============================================================================
// CONCEPT HIERARCHY
// =============================================================================

/// Stated `is a` parents, enough to answer descendant-or-self questions.
#[derive(Debug, Clone, Default)]
pub struct ConceptHierarchy {
    parents: BTreeMap<ConceptId, BTreeSet<ConceptId>>,
}

impl ConceptHierarchy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parent(&mut self, child: ConceptId, parent: ConceptId) {
        self.parents.entry(child).or_default().insert(parent);
    }

    /// Builder form of [`ConceptHierarchy::add_parent`].
    #[must_use]
    pub fn with_parent(mut self, child: ConceptId, parent: ConceptId) -> Self {
        self.add_parent(child, parent);
        self
    }

    /// Whether `id` is `ancestor` or one of its descendants.
    #[must_use]
    pub fn is_descendant_or_self(&self, id: ConceptId, ancestor: ConceptId) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            if current == ancestor {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(&current) {
                queue.extend(parents.iter().copied());
            }
        }
        false
    }
}

// =============================================================================
// RANGE VALIDATOR
// =============================================================================

/// Permitted values of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRange {
    pub attribute: ConceptId,
    /// Constraint text quoted in the failure message.
    pub constraint: String,
    /// Values must be one of these or a descendant.
    pub roots: BTreeSet<ConceptId>,
}

/// Attribute-range validation plus loose attribute grouping.
#[derive(Debug, Clone, Default)]
pub struct RangeValidator {
    hierarchy: ConceptHierarchy,
    ranges: BTreeMap<ConceptId, AttributeRange>,
    ungrouped: BTreeSet<ConceptId>,
}

impl RangeValidator {
    #[must_use]
    pub fn new(hierarchy: ConceptHierarchy) -> Self {
        Self {
            hierarchy,
            ..Self::default()
        }
    }

    /// Add a range rule, replacing any earlier rule for the same attribute.
    #[must_use]
    pub fn with_range(mut self, range: AttributeRange) -> Self {
        self.ranges.insert(range.attribute, range);
        self
    }

    /// Allow `attribute` to stay outside any group.
    #[must_use]
    pub fn with_ungrouped(mut self, attribute: ConceptId) -> Self {
        self.ungrouped.insert(attribute);
        self
    }

    fn check(
        &self,
        attribute: &Attribute,
        context: &ExpressionContext<'_>,
    ) -> Result<(), RepositoryError> {
        let Some(range) = self.ranges.get(&attribute.type_id) else {
            return Ok(());
        };
        let values: Vec<ConceptId> = match &attribute.value {
            AttributeValue::Concept(id) => vec![*id],
            AttributeValue::Nested(nested) => nested.focus_concepts().collect(),
        };
        for value in values {
            let permitted = range
                .roots
                .iter()
                .any(|root| self.hierarchy.is_descendant_or_self(value, *root));
            if !permitted {
                return Err(RepositoryError::Validation(out_of_range_message(
                    value, range, context,
                )?));
            }
        }
        Ok(())
    }

    fn transform(
        &self,
        expression: &CanonicalExpression,
        context: &ExpressionContext<'_>,
    ) -> Result<CanonicalExpression, RepositoryError> {
        let mut result = CanonicalExpression::new(expression.definition_status());
        for focus in expression.focus_concepts() {
            result.add_focus(focus);
        }

        let mut loose = AttributeGroup::transformed(LOOSE_ATTRIBUTE_GROUP);
        for attribute in expression.attributes() {
            let attribute = self.transform_attribute(attribute, context)?;
            if self.ungrouped.contains(&attribute.type_id) {
                result.add_attribute(attribute);
            } else {
                loose.add(attribute);
            }
        }
        for group in expression.groups() {
            let mut transformed = AttributeGroup::new();
            for attribute in group.attributes() {
                transformed.add(self.transform_attribute(attribute, context)?);
            }
            result.add_group(transformed);
        }
        result.add_group(loose);
        Ok(result)
    }

    fn transform_attribute(
        &self,
        attribute: &Attribute,
        context: &ExpressionContext<'_>,
    ) -> Result<Attribute, RepositoryError> {
        self.check(attribute, context)?;
        Ok(match &attribute.value {
            AttributeValue::Concept(_) => attribute.clone(),
            AttributeValue::Nested(nested) => {
                Attribute::nested(attribute.type_id, self.transform(nested, context)?)
            }
        })
    }
}

impl ExpressionTransformer for RangeValidator {
    fn validate_and_transform(
        &self,
        expression: &CanonicalExpression,
        context: &ExpressionContext<'_>,
    ) -> Result<CanonicalExpression, RepositoryError> {
        self.transform(expression, context)
    }
}

fn out_of_range_message(
    value: ConceptId,
    range: &AttributeRange,
    context: &ExpressionContext<'_>,
) -> Result<String, RepositoryError> {
    let ids: BTreeSet<ConceptId> = [value, range.attribute].into_iter().collect();
    let preferred = context.terms.preferred_terms(&ids)?;
    let attribute_name = match context.terms.fully_specified_name(range.attribute)? {
        Some(fsn) => Some(fsn),
        None => preferred.get(&range.attribute).cloned(),
    };
    Ok(format!(
        "Value {} is not within the permitted range of attribute {} - ({}).",
        labelled(value, preferred.get(&value).map(String::as_str)),
        labelled(range.attribute, attribute_name.as_deref()),
        range.constraint
    ))
}

fn labelled(id: ConceptId, term: Option<&str>) -> String {
    match term {
        Some(term) => format!("{id} | {term} |"),
        None => id.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExpressionParser, ScgParser};
    use crate::terms::ConfiguredTerms;

    const SITE: ConceptId = ConceptId(405_813_007);
    const BODY_STRUCTURE: ConceptId = ConceptId(442_083_009);
    const OVARY: ConceptId = ConceptId(15_497_006);
    const HORSE: ConceptId = ConceptId(388_441_000);
    const LATERALITY: ConceptId = ConceptId(272_741_003);
    const SIDE: ConceptId = ConceptId(182_353_008);
    const RIGHT: ConceptId = ConceptId(24_028_007);

    fn validator() -> RangeValidator {
        let hierarchy = ConceptHierarchy::new()
            .with_parent(OVARY, BODY_STRUCTURE)
            .with_parent(RIGHT, SIDE);
        RangeValidator::new(hierarchy)
            .with_range(AttributeRange {
                attribute: SITE,
                constraint: "<< 442083009 |Anatomical or acquired body structure (body structure)|"
                    .to_string(),
                roots: [BODY_STRUCTURE].into_iter().collect(),
            })
            .with_range(AttributeRange {
                attribute: LATERALITY,
                constraint: "<< 182353008 |Side (qualifier value)|".to_string(),
                roots: [SIDE].into_iter().collect(),
            })
    }

    fn terms() -> ConfiguredTerms {
        ConfiguredTerms::new()
            .with(HORSE, "Horse", Some("Horse (organism)"))
            .with(
                SITE,
                "Procedure site - direct",
                Some("Procedure site - direct (attribute)"),
            )
            .with(LATERALITY, "Laterality", Some("Laterality (attribute)"))
    }

    fn run(text: &str) -> Result<CanonicalExpression, RepositoryError> {
        let expression = ScgParser.parse(text).expect("parse");
        let terms = terms();
        let context = ExpressionContext {
            branch: "MAIN",
            terms: &terms,
        };
        validator().validate_and_transform(&expression, &context)
    }

    #[test]
    fn in_range_values_pass() {
        let result = run("71388002 : { 405813007 = 15497006 }").expect("valid");
        assert_eq!(result.to_string(), "=== 71388002 : { 405813007 = 15497006 }");
    }

    #[test]
    fn out_of_range_message_is_verbatim() {
        let error = run("71388002 : { 260686004 = 129304002, 405813007 = 388441000 |Horse| }")
            .expect_err("out of range");
        assert_eq!(
            error.to_string(),
            "Value 388441000 | Horse | is not within the permitted range of attribute \
             405813007 | Procedure site - direct (attribute) | - \
             (<< 442083009 |Anatomical or acquired body structure (body structure)|)."
        );
    }

    #[test]
    fn nested_attributes_are_checked() {
        let error = run("71388002 : { 405813007 = ( 15497006 : 272741003 = 388441000 ) }")
            .expect_err("out of range");
        assert_eq!(
            error.to_string(),
            "Value 388441000 | Horse | is not within the permitted range of attribute \
             272741003 | Laterality (attribute) | - (<< 182353008 |Side (qualifier value)|)."
        );
    }

    #[test]
    fn nested_value_checked_through_focus() {
        assert!(run("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ) }").is_ok());
        assert!(run("71388002 : { 405813007 = ( 388441000 : 272741003 = 24028007 ) }").is_err());
    }

    #[test]
    fn unknown_terms_are_omitted() {
        let expression = ScgParser.parse("71388002 : 405813007 = 71388002").expect("parse");
        let terms = ConfiguredTerms::new();
        let context = ExpressionContext {
            branch: "MAIN",
            terms: &terms,
        };
        let error = validator()
            .validate_and_transform(&expression, &context)
            .expect_err("out of range");
        assert!(error.to_string().starts_with(
            "Value 71388002 is not within the permitted range of attribute 405813007 - ("
        ));
    }

    #[test]
    fn loose_attributes_are_grouped() {
        let result = run("71388002 : 405813007 = 15497006, 260686004 = 129304002").expect("valid");
        assert_eq!(
            result.to_string(),
            "=== 71388002 : { 260686004 = 129304002, 405813007 = 15497006 }"
        );
        let group = result.groups().next().expect("group");
        assert_eq!(group.transformation_group(), Some(LOOSE_ATTRIBUTE_GROUP));
    }

    #[test]
    fn configured_attributes_stay_ungrouped() {
        let expression = ScgParser
            .parse("15497006 : 272741003 = 24028007")
            .expect("parse");
        let terms = terms();
        let context = ExpressionContext {
            branch: "MAIN",
            terms: &terms,
        };
        let result = validator()
            .with_ungrouped(LATERALITY)
            .validate_and_transform(&expression, &context)
            .expect("valid");
        assert_eq!(result.to_string(), "=== 15497006 : 272741003 = 24028007");
    }

    #[test]
    fn hierarchy_handles_cycles() {
        let hierarchy = ConceptHierarchy::new()
            .with_parent(OVARY, RIGHT)
            .with_parent(RIGHT, OVARY);
        assert!(!hierarchy.is_descendant_or_self(OVARY, SIDE));
        assert!(hierarchy.is_descendant_or_self(OVARY, OVARY));
    }
}
