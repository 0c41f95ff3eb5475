//! # Concept Graph Materializer
//!
//! Converts a necessary normal form into concepts and relationships.
//!
//! Deduplication is two-tier:
//! - the batch-local [`ExpressionIdCache`], keyed by canonical text, covers
//!   sub-expressions seen earlier in the same batch, persisted or not
//! - for nested sub-expressions the store is asked for a concept with an
//!   identical relationship set
//!
//! Top-level expressions never reuse a stored concept here; their dedup
//! happens against the close-to-user form before classification.

use crate::expression::{AttributeValue, CanonicalExpression, DefinitionStatus};
use crate::identifiers::IdentifierSource;
use crate::primitives::EXPRESSION_PARTITION;
use crate::store::ExpressionStore;
use crate::{Concept, ConceptDefinitionStatus, ConceptId, Relationship, RepositoryError};
use std::collections::BTreeMap;
use tracing::trace;

// =============================================================================
// BATCH CACHE
// =============================================================================

/// Canonical text to concept id, owned by one batch call.
#[derive(Debug, Default)]
pub struct ExpressionIdCache {
    ids: BTreeMap<String, ConceptId>,
}

impl ExpressionIdCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, canonical: &str) -> Option<ConceptId> {
        self.ids.get(canonical).copied()
    }

    pub fn insert(&mut self, canonical: String, id: ConceptId) {
        self.ids.insert(canonical, id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// =============================================================================
// MATERIALIZER
// =============================================================================

/// Builds concepts for one branch and module.
pub struct ConceptGraphMaterializer<'a, S: ?Sized, I: ?Sized> {
    store: &'a S,
    ids: &'a I,
    branch: &'a str,
    module_id: ConceptId,
    namespace: u32,
}

impl<'a, S, I> ConceptGraphMaterializer<'a, S, I>
where
    S: ExpressionStore + ?Sized,
    I: IdentifierSource + ?Sized,
{
    pub fn new(
        store: &'a S,
        ids: &'a I,
        branch: &'a str,
        module_id: ConceptId,
        namespace: u32,
    ) -> Self {
        Self {
            store,
            ids,
            branch,
            module_id,
            namespace,
        }
    }

    /// Return the concept id of `expression`, minting concepts for it and
    /// for its nested values as needed. New concepts are pushed to `created`.
    pub fn materialize(
        &self,
        expression: &CanonicalExpression,
        nested: bool,
        cache: &mut ExpressionIdCache,
        created: &mut Vec<Concept>,
    ) -> Result<ConceptId, RepositoryError> {
        let canonical = expression.canonical();
        if let Some(id) = cache.get(&canonical) {
            trace!(%id, nested, "batch cache hit");
            return Ok(id);
        }

        let status = match expression.definition_status() {
            DefinitionStatus::EquivalentTo => ConceptDefinitionStatus::Defined,
            DefinitionStatus::SubtypeOf => ConceptDefinitionStatus::Primitive,
        };
        let mut concept = Concept::candidate(self.module_id, status);
        for focus in expression.focus_concepts() {
            concept.add_relationship(Relationship::is_a(focus));
        }
        for attribute in expression.attributes() {
            let value = self.resolve(&attribute.value, cache, created)?;
            concept.add_relationship(Relationship::new(attribute.type_id, value, 0));
        }
        for (group, attributes) in (1u32..).zip(expression.groups()) {
            for attribute in attributes.attributes() {
                let value = self.resolve(&attribute.value, cache, created)?;
                concept.add_relationship(Relationship::new(attribute.type_id, value, group));
            }
        }

        if nested
            && let Some(existing) = self
                .store
                .find_concept_with_relationships(self.branch, &concept.relationship_set())?
        {
            trace!(id = %existing, "reusing stored nested concept");
            cache.insert(canonical, existing);
            return Ok(existing);
        }

        let id = self
            .ids
            .reserve(self.namespace, EXPRESSION_PARTITION, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RepositoryError::IdentifierAllocation("no identifier reserved".to_string())
            })?;
        concept.assign_id(id);
        trace!(%id, nested, "minted concept");
        created.push(concept);
        cache.insert(canonical, id);
        Ok(id)
    }

    fn resolve(
        &self,
        value: &AttributeValue,
        cache: &mut ExpressionIdCache,
        created: &mut Vec<Concept>,
    ) -> Result<ConceptId, RepositoryError> {
        match value {
            AttributeValue::Concept(id) => Ok(*id),
            AttributeValue::Nested(nested) => self.materialize(nested, true, cache, created),
        }
    }
}

/// Rebuild an expression from a stored concept.
///
/// Ungrouped `is a` relationships become focus concepts. Other ungrouped
/// relationships become attributes, and each group number becomes one
/// attribute group.
/// Nested values come back as plain concept references.
#[must_use]
pub fn concept_to_expression(concept: &Concept) -> CanonicalExpression {
    use crate::expression::{Attribute, AttributeGroup};
    use crate::primitives::ISA;

    let status = match concept.definition_status {
        ConceptDefinitionStatus::Defined => DefinitionStatus::EquivalentTo,
        ConceptDefinitionStatus::Primitive => DefinitionStatus::SubtypeOf,
    };
    let mut expression = CanonicalExpression::new(status);
    let mut groups: BTreeMap<u32, AttributeGroup> = BTreeMap::new();
    for relationship in &concept.relationships {
        let attribute = Attribute::concept(relationship.type_id, relationship.destination_id);
        match relationship.group {
            0 if relationship.type_id == ISA => expression.add_focus(relationship.destination_id),
            0 => expression.add_attribute(attribute),
            group => groups.entry(group).or_default().add(attribute),
        }
    }
    for group in groups.into_values() {
        expression.add_group(group);
    }
    expression
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ExpressionParser, ScgParser};
    use crate::identifiers::SequentialIdentifierSource;
    use crate::primitives::{DEMO_NAMESPACE, ISA};
    use crate::store::{Commit, MemoryStore};
    use crate::{RelationshipShape, sctid};

    const MODULE: ConceptId = ConceptId(11_000_003_104);

    fn parse(text: &str) -> CanonicalExpression {
        ScgParser.parse(text).expect("parse")
    }

    #[test]
    fn single_focus_defined_concept() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);
        let mut cache = ExpressionIdCache::new();
        let mut created = Vec::new();

        let id = materializer
            .materialize(&parse("=== 83152002"), false, &mut cache, &mut created)
            .expect("materialize");

        assert!(sctid::is_valid(id));
        assert_eq!(created.len(), 1);
        let concept = &created[0];
        assert_eq!(concept.id, Some(id));
        assert_eq!(concept.definition_status, ConceptDefinitionStatus::Defined);
        assert_eq!(concept.module_id, MODULE);
        assert!(concept.relationships.iter().all(|r| r.source_id == Some(id)));
        assert_eq!(
            concept.relationship_set().into_iter().collect::<Vec<_>>(),
            vec![RelationshipShape {
                group: 0,
                type_id: ISA,
                destination_id: ConceptId(83_152_002),
            }]
        );
    }

    #[test]
    fn groups_numbered_from_one_in_canonical_order() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);
        let mut cache = ExpressionIdCache::new();
        let mut created = Vec::new();

        let expression = parse(
            "<<< 71388002 : 272741003 = 24028007, { 405813007 = 15497006, 260686004 = 129304002 }, { 405815000 = 122456005 }",
        );
        materializer
            .materialize(&expression, false, &mut cache, &mut created)
            .expect("materialize");

        let concept = &created[0];
        assert_eq!(concept.definition_status, ConceptDefinitionStatus::Primitive);
        let groups: Vec<(u32, ConceptId)> = concept
            .relationships
            .iter()
            .map(|r| (r.group, r.type_id))
            .collect();
        assert!(groups.contains(&(0, ConceptId(272_741_003))));
        assert!(groups.contains(&(1, ConceptId(405_815_000))));
        assert!(groups.contains(&(2, ConceptId(260_686_004))));
        assert!(groups.contains(&(2, ConceptId(405_813_007))));
    }

    #[test]
    fn nested_value_is_materialized_first_and_cached() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);
        let mut cache = ExpressionIdCache::new();
        let mut created = Vec::new();

        let a = parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ) }");
        let b = parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ), 260686004 = 129304002 }");
        materializer
            .materialize(&a, false, &mut cache, &mut created)
            .expect("materialize");
        materializer
            .materialize(&b, false, &mut cache, &mut created)
            .expect("materialize");

        assert_eq!(created.len(), 3, "nested concept must be created once");
        let nested_id = created[0].id.expect("id");
        assert!(created[0].relationships.contains(&Relationship {
            source_id: Some(nested_id),
            ..Relationship::is_a(ConceptId(15_497_006))
        }));
        for parent in &created[1..] {
            assert!(
                parent
                    .relationships
                    .iter()
                    .any(|r| r.type_id == ConceptId(405_813_007) && r.destination_id == nested_id)
            );
        }
    }

    #[test]
    fn nested_concept_reused_from_store() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);

        let mut created = Vec::new();
        materializer
            .materialize(
                &parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ) }"),
                false,
                &mut ExpressionIdCache::new(),
                &mut created,
            )
            .expect("materialize");
        let nested_id = created[0].id.expect("id");
        let mut commit = store.open_commit("MAIN").expect("open");
        commit.save_concepts(&created).expect("save");
        commit.mark_successful();
        commit.close().expect("close");

        let mut second = Vec::new();
        materializer
            .materialize(
                &parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ), 260686004 = 129304002 }"),
                false,
                &mut ExpressionIdCache::new(),
                &mut second,
            )
            .expect("materialize");
        assert_eq!(second.len(), 1, "only the outer concept is new");
        assert!(
            second[0]
                .relationships
                .iter()
                .any(|r| r.destination_id == nested_id)
        );
    }

    #[test]
    fn different_nested_value_mints_new_concept() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);
        let mut cache = ExpressionIdCache::new();
        let mut created = Vec::new();

        materializer
            .materialize(
                &parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 24028007 ) }"),
                false,
                &mut cache,
                &mut created,
            )
            .expect("materialize");
        materializer
            .materialize(
                &parse("71388002 : { 405813007 = ( 15497006 : 272741003 = 7771000 ) }"),
                false,
                &mut cache,
                &mut created,
            )
            .expect("materialize");
        assert_eq!(created.len(), 4);
    }

    #[test]
    fn concept_round_trips_to_expression() {
        let store = MemoryStore::new();
        let ids = SequentialIdentifierSource::new();
        let materializer = ConceptGraphMaterializer::new(&store, &ids, "MAIN", MODULE, DEMO_NAMESPACE);
        let expression = parse(
            "71388002 : { 260686004 = 129304002, 405813007 = 15497006, 405815000 = 122456005 }",
        );
        let mut created = Vec::new();
        materializer
            .materialize(&expression, false, &mut ExpressionIdCache::new(), &mut created)
            .expect("materialize");

        assert_eq!(concept_to_expression(&created[0]), expression);
    }
}
