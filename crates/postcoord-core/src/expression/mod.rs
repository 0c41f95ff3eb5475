//! # Canonical Expression Model
//!
//! Order-independent representation of post-coordinated expressions.
//!
//! Focus concepts, attributes and attribute groups are held in sorted sets,
//! so two expressions built from inputs that differ only in component order
//! are equal and render to byte-identical text.
//!
//! ## Renderings
//!
//! - `Display`: spaced form, `=== 71388002 : { 260686004 = 129304002 }`
//! - [`CanonicalExpression::canonical`]: the same text without whitespace,
//!   used as the identity of an expression
//! - [`CanonicalExpression::render_with_terms`]: spaced form with `|term|` labels
//!
//! Display labels from the input never reach any of these renderings.

pub mod lexer;
pub mod parser;

use crate::ConceptId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use parser::{ExpressionParser, ScgParser};

// =============================================================================
// DEFINITION STATUS
// =============================================================================

/// Definition status of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum DefinitionStatus {
    /// `===`: the expression is equivalent to its definition.
    #[default]
    EquivalentTo,
    /// `<<<`: the expression is a subtype of its definition.
    SubtypeOf,
}

impl DefinitionStatus {
    /// The compositional grammar token.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::EquivalentTo => "===",
            Self::SubtypeOf => "<<<",
        }
    }
}

// =============================================================================
// ATTRIBUTES
// =============================================================================

/// Value of an attribute: a concept or a nested expression.
///
/// Concepts order before nested expressions. Nested expressions order by
/// their canonical text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Concept(ConceptId),
    Nested(Box<CanonicalExpression>),
}

impl Ord for AttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Concept(a), Self::Concept(b)) => a.cmp(b),
            (Self::Concept(_), Self::Nested(_)) => Ordering::Less,
            (Self::Nested(_), Self::Concept(_)) => Ordering::Greater,
            (Self::Nested(a), Self::Nested(b)) => a.canonical().cmp(&b.canonical()),
        }
    }
}

impl PartialOrd for AttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A type-value refinement pair. Ordered by `(type_id, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Attribute {
    pub type_id: ConceptId,
    pub value: AttributeValue,
}

impl Attribute {
    /// An attribute with a concept value.
    #[must_use]
    pub fn concept(type_id: ConceptId, value: ConceptId) -> Self {
        Self {
            type_id,
            value: AttributeValue::Concept(value),
        }
    }

    /// An attribute with a nested expression value.
    #[must_use]
    pub fn nested(type_id: ConceptId, value: CanonicalExpression) -> Self {
        Self {
            type_id,
            value: AttributeValue::Nested(Box::new(value)),
        }
    }
}

/// A set of attributes that co-occur.
///
/// Groups order by size first, then by their sorted members. The
/// transformation marker is ignored by equality and ordering and is never
/// persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeGroup {
    attributes: BTreeSet<Attribute>,
    #[serde(skip)]
    transformation_group: Option<u32>,
}

impl AttributeGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty group created by a transformation step.
    #[must_use]
    pub fn transformed(marker: u32) -> Self {
        Self {
            attributes: BTreeSet::new(),
            transformation_group: Some(marker),
        }
    }

    /// Add an attribute. Duplicates by ordering key collapse.
    pub fn add(&mut self, attribute: Attribute) {
        self.attributes.insert(attribute);
    }

    /// Builder form of [`AttributeGroup::add`].
    #[must_use]
    pub fn with(mut self, attribute: Attribute) -> Self {
        self.add(attribute);
        self
    }

    /// Members in canonical order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether the group has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Marker set by the transformer for groups it created.
    #[must_use]
    pub fn transformation_group(&self) -> Option<u32> {
        self.transformation_group
    }
}

impl PartialEq for AttributeGroup {
    fn eq(&self, other: &Self) -> bool {
        self.attributes == other.attributes
    }
}

impl Eq for AttributeGroup {}

impl Ord for AttributeGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.attributes
            .len()
            .cmp(&other.attributes.len())
            .then_with(|| self.attributes.iter().cmp(other.attributes.iter()))
    }
}

impl PartialOrd for AttributeGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// =============================================================================
// CANONICAL EXPRESSION
// =============================================================================

/// A post-coordinated expression in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanonicalExpression {
    definition_status: DefinitionStatus,
    focus_concepts: BTreeSet<ConceptId>,
    attributes: BTreeSet<Attribute>,
    groups: BTreeSet<AttributeGroup>,
}

impl CanonicalExpression {
    /// Create an empty expression with the given definition status.
    #[must_use]
    pub fn new(definition_status: DefinitionStatus) -> Self {
        Self {
            definition_status,
            ..Self::default()
        }
    }

    /// Create an `===` expression with a single focus concept.
    #[must_use]
    pub fn of(focus: ConceptId) -> Self {
        Self::new(DefinitionStatus::EquivalentTo).with_focus(focus)
    }

    /// Builder: add a focus concept.
    #[must_use]
    pub fn with_focus(mut self, focus: ConceptId) -> Self {
        self.focus_concepts.insert(focus);
        self
    }

    /// Builder: add an ungrouped attribute.
    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.insert(attribute);
        self
    }

    /// Builder: add an attribute group. Empty groups are dropped.
    #[must_use]
    pub fn with_group(mut self, group: AttributeGroup) -> Self {
        self.add_group(group);
        self
    }

    pub fn add_focus(&mut self, focus: ConceptId) {
        self.focus_concepts.insert(focus);
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.insert(attribute);
    }

    pub fn add_group(&mut self, group: AttributeGroup) {
        if !group.is_empty() {
            self.groups.insert(group);
        }
    }

    pub fn set_definition_status(&mut self, status: DefinitionStatus) {
        self.definition_status = status;
    }

    #[must_use]
    pub fn definition_status(&self) -> DefinitionStatus {
        self.definition_status
    }

    pub fn focus_concepts(&self) -> impl Iterator<Item = ConceptId> + '_ {
        self.focus_concepts.iter().copied()
    }

    /// Ungrouped attributes in canonical order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Attribute groups in canonical order.
    pub fn groups(&self) -> impl Iterator<Item = &AttributeGroup> {
        self.groups.iter()
    }

    #[must_use]
    pub fn has_refinement(&self) -> bool {
        !self.attributes.is_empty() || !self.groups.is_empty()
    }

    /// Canonical text without whitespace. This is the identity of the
    /// expression for deduplication.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, &Style::Compact, false);
        out
    }

    /// Spaced rendering with `id |term|` labels for every known concept.
    #[must_use]
    pub fn render_with_terms(&self, terms: &BTreeMap<ConceptId, String>) -> String {
        let mut out = String::new();
        self.render(&mut out, &Style::Labelled(terms), false);
        out
    }

    /// Every concept referenced anywhere, nested expressions included.
    #[must_use]
    pub fn all_concept_ids(&self) -> BTreeSet<ConceptId> {
        let mut ids = BTreeSet::new();
        self.collect_concept_ids(&mut ids);
        ids
    }

    fn collect_concept_ids(&self, ids: &mut BTreeSet<ConceptId>) {
        ids.extend(self.focus_concepts.iter().copied());
        for attribute in self.all_attributes() {
            ids.insert(attribute.type_id);
            match &attribute.value {
                AttributeValue::Concept(id) => {
                    ids.insert(*id);
                }
                AttributeValue::Nested(nested) => nested.collect_concept_ids(ids),
            }
        }
    }

    /// Ungrouped attributes followed by grouped ones.
    pub fn all_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes
            .iter()
            .chain(self.groups.iter().flat_map(AttributeGroup::attributes))
    }

    /// Visit every nested sub-expression, innermost first, then `self`.
    pub fn for_each_expression<'a>(&'a self, visit: &mut dyn FnMut(&'a CanonicalExpression)) {
        for attribute in self.all_attributes() {
            if let AttributeValue::Nested(nested) = &attribute.value {
                nested.for_each_expression(visit);
            }
        }
        visit(self);
    }

    /// Depth of nested sub-expressions; 0 when no value is nested.
    #[must_use]
    pub fn nesting_depth(&self) -> usize {
        self.all_attributes()
            .filter_map(|a| match &a.value {
                AttributeValue::Nested(nested) => Some(nested.nesting_depth() + 1),
                AttributeValue::Concept(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    fn render(&self, out: &mut String, style: &Style<'_>, nested: bool) {
        let sp = style.space();
        if !nested {
            out.push_str(self.definition_status.token());
            out.push_str(sp);
        }
        for (i, focus) in self.focus_concepts.iter().enumerate() {
            if i > 0 {
                out.push_str(sp);
                out.push('+');
                out.push_str(sp);
            }
            style.concept(out, *focus);
        }
        if !self.has_refinement() {
            return;
        }
        out.push_str(sp);
        out.push(':');
        out.push_str(sp);

        let mut first = true;
        for attribute in &self.attributes {
            if !first {
                out.push(',');
                out.push_str(sp);
            }
            first = false;
            render_attribute(attribute, out, style);
        }
        for group in &self.groups {
            if !first {
                out.push(',');
                out.push_str(sp);
            }
            first = false;
            out.push('{');
            out.push_str(sp);
            for (i, attribute) in group.attributes.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                    out.push_str(sp);
                }
                render_attribute(attribute, out, style);
            }
            out.push_str(sp);
            out.push('}');
        }
    }
}

fn render_attribute(attribute: &Attribute, out: &mut String, style: &Style<'_>) {
    let sp = style.space();
    style.concept(out, attribute.type_id);
    out.push_str(sp);
    out.push('=');
    out.push_str(sp);
    match &attribute.value {
        AttributeValue::Concept(id) => style.concept(out, *id),
        AttributeValue::Nested(nested) => {
            out.push('(');
            out.push_str(sp);
            nested.render(out, style, true);
            out.push_str(sp);
            out.push(')');
        }
    }
}

impl fmt::Display for CanonicalExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, &Style::Spaced, false);
        f.write_str(&out)
    }
}

/// Rendering style.
enum Style<'a> {
    Spaced,
    Compact,
    Labelled(&'a BTreeMap<ConceptId, String>),
}

impl Style<'_> {
    fn space(&self) -> &'static str {
        match self {
            Style::Compact => "",
            Style::Spaced | Style::Labelled(_) => " ",
        }
    }

    fn concept(&self, out: &mut String, id: ConceptId) {
        out.push_str(&id.to_string());
        if let Style::Labelled(terms) = self
            && let Some(term) = terms.get(&id)
        {
            out.push_str(" |");
            out.push_str(term);
            out.push('|');
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
