//! Tests for configuration loading and the CLI command layer.

use postcoord::cli::{CommandContext, cmd_create, cmd_init, cmd_list, cmd_status, collect_inputs};
use postcoord::config::{Config, DEFAULT_BRANCH, DEFAULT_MODULE_ID};
use postcoord_core::primitives::CANONICAL_CLOSE_TO_USER_FORM_REFSET;
use postcoord_core::{ConceptId, ExpressionRepository, ExpressionStore, RedbStore, RepositoryError};
use std::collections::BTreeSet;
use tempfile::TempDir;

const EXAMPLE: &str = r#"
ungrouped_attributes = [272741003]

[repository]
module_id = 11000003104
branch = "MAIN/PROJECT"
classification_package = "demo-package"

[terms.388441000]
preferred = "Horse"
fsn = "Horse (organism)"

[terms.405813007]
preferred = "Procedure site - direct"
fsn = "Procedure site - direct (attribute)"

[hierarchy]
15497006 = [442083009]

[[attribute_range]]
attribute = 405813007
constraint = "<< 442083009 |Anatomical or acquired body structure (body structure)|"
roots = [442083009]
"#;

// =============================================================================
// CONFIG TESTS
// =============================================================================

#[test]
fn empty_config_uses_defaults() {
    let config = Config::from_toml_str("").expect("parse");
    assert_eq!(config, Config::default());
    assert_eq!(config.repository.branch, DEFAULT_BRANCH);
    assert_eq!(config.module_id(), Ok(ConceptId(DEFAULT_MODULE_ID)));
}

#[test]
fn example_config_parses() {
    let config = Config::from_toml_str(EXAMPLE).expect("parse");
    assert_eq!(config.repository.branch, "MAIN/PROJECT");
    assert_eq!(
        config.repository.classification_package.as_deref(),
        Some("demo-package")
    );
    assert_eq!(config.terms().expect("terms").len(), 2);
    assert_eq!(config.attribute_range.len(), 1);
    assert_eq!(config.ungrouped_attributes, vec![272_741_003]);
}

#[test]
fn unknown_fields_are_rejected() {
    let result = Config::from_toml_str("[repository]\nmodule = 1\n");
    assert!(matches!(result, Err(RepositoryError::Config(_))));
}

#[test]
fn invalid_module_id_is_reported() {
    let config = Config::from_toml_str("[repository]\nmodule_id = 31000003163\n").expect("parse");
    assert!(matches!(config.module_id(), Err(RepositoryError::Config(_))));
}

#[test]
fn non_numeric_term_key_is_reported() {
    let config = Config::from_toml_str("[terms.horse]\npreferred = \"Horse\"\n").expect("parse");
    assert!(matches!(config.terms(), Err(RepositoryError::Config(_))));
}

#[test]
fn configured_range_rule_reaches_repository() {
    let config = Config::from_toml_str(EXAMPLE).expect("parse");
    let repository = config
        .apply(ExpressionRepository::in_memory())
        .expect("apply");

    let outcome = repository
        .create_expression(
            "71388002 : { 405813007 = 388441000 }",
            "MAIN",
            config.module_id().expect("module"),
        )
        .expect("batch call");
    assert_eq!(
        outcome.error().map(ToString::to_string).as_deref(),
        Some(
            "Value 388441000 | Horse | is not within the permitted range of attribute \
             405813007 | Procedure site - direct (attribute) | - \
             (<< 442083009 |Anatomical or acquired body structure (body structure)|)."
        )
    );
}

#[test]
fn ungrouped_attributes_stay_ungrouped() {
    let config = Config::from_toml_str(EXAMPLE).expect("parse");
    let repository = config
        .apply(ExpressionRepository::in_memory())
        .expect("apply");

    let outcome = repository
        .create_expression(
            "71388002 : 272741003 = 24028007, 405813007 = 15497006",
            "MAIN",
            config.module_id().expect("module"),
        )
        .expect("batch call");
    let record = outcome.expression().expect("processed");
    assert_eq!(
        record.classifiable_form.as_deref(),
        Some("=== 71388002 : 272741003 = 24028007, { 405813007 = 15497006 }")
    );
}

// =============================================================================
// COMMAND TESTS
// =============================================================================

fn context(dir: &TempDir) -> CommandContext {
    CommandContext {
        database: dir.path().join("postcoord.redb"),
        branch: "MAIN".to_string(),
        json_mode: true,
        config: Config::default(),
    }
}

#[test]
fn input_file_skips_comments_and_blank_lines() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("expressions.txt");
    std::fs::write(
        &path,
        "# procedures\n71388002\n\n   83152002 |Oophorectomy|  \n# end\n",
    )
    .expect("write");

    let inputs = collect_inputs(vec!["129304002".to_string()], Some(path.as_path())).expect("inputs");
    assert_eq!(inputs, vec!["129304002", "71388002", "83152002 |Oophorectomy|"]);
}

#[test]
fn no_inputs_is_an_error() {
    assert!(collect_inputs(Vec::new(), None).is_err());
}

#[test]
fn init_refuses_existing_database_without_force() {
    let dir = TempDir::new().expect("tempdir");
    let context = context(&dir);
    cmd_init(&context, false).expect("init");
    assert!(cmd_init(&context, false).is_err());
    cmd_init(&context, true).expect("forced init");
}

#[test]
fn create_persists_and_failed_batch_reports_error() {
    let dir = TempDir::new().expect("tempdir");
    let context = context(&dir);

    cmd_create(
        &context,
        vec!["71388002 : 405813007 = 15497006".to_string()],
        None,
    )
    .expect("create");

    let result = cmd_create(
        &context,
        vec!["83152002".to_string(), "83152002 ==".to_string()],
        None,
    );
    assert!(matches!(result, Err(RepositoryError::Validation(_))));

    cmd_status(&context).expect("status");
    cmd_list(&context).expect("list");

    let store = RedbStore::open(&context.database).expect("open");
    assert_eq!(store.concept_count("MAIN"), Ok(1));
    let expressions: BTreeSet<String> = store
        .members("MAIN", CANONICAL_CLOSE_TO_USER_FORM_REFSET)
        .expect("members")
        .into_iter()
        .map(|m| m.expression)
        .collect();
    assert_eq!(
        expressions,
        BTreeSet::from(["===71388002:405813007=15497006".to_string()])
    );
}
