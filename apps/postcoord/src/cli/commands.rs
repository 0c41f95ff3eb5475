//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::Config;
use postcoord_core::primitives::{
    CANONICAL_CLOSE_TO_USER_FORM_REFSET, CLASSIFIABLE_FORM_REFSET, MAX_BATCH_SIZE,
};
use postcoord_core::{
    ExpressionOutcome, ExpressionParser, ExpressionRepository, ExpressionStore,
    PostCoordinatedExpression, RedbStore, RepositoryError, ScgParser, SequentialIdentifierSource,
};
use std::path::{Path, PathBuf};

type Repository = ExpressionRepository<RedbStore, SequentialIdentifierSource>;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of an expression input file (16 MB).
const MAX_INPUT_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Settings shared by every command.
#[derive(Debug)]
pub struct CommandContext {
    pub database: PathBuf,
    pub branch: String,
    pub json_mode: bool,
    pub config: Config,
}

/// Validate an input file path and size before reading.
fn validate_input_file(path: &Path) -> Result<PathBuf, RepositoryError> {
    let canonical = path.canonicalize().map_err(|e| {
        RepositoryError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(RepositoryError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| RepositoryError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(RepositoryError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    Ok(canonical)
}

/// Expressions from the arguments followed by those in `file`.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn collect_inputs(
    expressions: Vec<String>,
    file: Option<&Path>,
) -> Result<Vec<String>, RepositoryError> {
    let mut inputs = expressions;
    if let Some(file) = file {
        let path = validate_input_file(file)?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| RepositoryError::IoError(format!("Read file: {}", e)))?;
        inputs.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if inputs.is_empty() {
        return Err(RepositoryError::Parse(
            "no expressions given; pass them as arguments or with --file".to_string(),
        ));
    }
    if inputs.len() > MAX_BATCH_SIZE {
        return Err(RepositoryError::BatchTooLarge(inputs.len()));
    }
    Ok(inputs)
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(context: &CommandContext, force: bool) -> Result<(), RepositoryError> {
    let db_path = &context.database;
    if db_path.exists() {
        if !force {
            return Err(RepositoryError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| RepositoryError::IoError(format!("Remove database: {}", e)))?;
    }

    let _store = RedbStore::open(db_path)?;
    println!("Initialized new expression database at {:?}", db_path);
    Ok(())
}

// =============================================================================
// CREATE / CHECK COMMANDS
// =============================================================================

/// Create expressions all or nothing.
pub fn cmd_create(
    context: &CommandContext,
    expressions: Vec<String>,
    file: Option<&Path>,
) -> Result<(), RepositoryError> {
    let inputs = collect_inputs(expressions, file)?;
    let module_id = context.config.module_id()?;
    let repository = open_repository(context)?;

    tracing::info!(
        count = inputs.len(),
        branch = %context.branch,
        module = %module_id,
        "creating expressions"
    );
    let outcomes =
        repository.create_expressions_all_or_nothing(&inputs, &context.branch, module_id)?;
    print_outcomes(context, &outcomes)?;
    fail_on_errors(&outcomes, "nothing was stored")
}

/// Process expressions without storing them.
pub fn cmd_check(
    context: &CommandContext,
    expressions: Vec<String>,
    file: Option<&Path>,
) -> Result<(), RepositoryError> {
    let inputs = collect_inputs(expressions, file)?;
    let repository = open_repository(context)?;

    let outcomes = repository.process_only(&inputs, &context.branch)?;
    print_outcomes(context, &outcomes)?;
    fail_on_errors(&outcomes, "expressions are invalid")
}

fn fail_on_errors(
    outcomes: &[ExpressionOutcome],
    consequence: &str,
) -> Result<(), RepositoryError> {
    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    if failed == 0 {
        return Ok(());
    }
    Err(RepositoryError::Validation(format!(
        "{} of {} expressions failed; {}",
        failed,
        outcomes.len(),
        consequence
    )))
}

// =============================================================================
// LOOKUP / LIST COMMANDS
// =============================================================================

/// Look up a stored expression by its close-to-user form.
pub fn cmd_lookup(context: &CommandContext, expression: &str) -> Result<(), RepositoryError> {
    let canonical = ScgParser::new().parse(expression)?.canonical();
    let repository = open_repository(context)?;
    let found = repository.find_by_expression(
        &context.branch,
        &canonical,
        CANONICAL_CLOSE_TO_USER_FORM_REFSET,
    )?;

    if context.json_mode {
        return print_json(&found);
    }
    match found {
        Some(record) => print_record(&record),
        None => println!("No stored expression matches {}", canonical),
    }
    Ok(())
}

/// List stored expressions.
pub fn cmd_list(context: &CommandContext) -> Result<(), RepositoryError> {
    let repository = open_repository(context)?;
    let records = repository.find_all(&context.branch)?;

    if context.json_mode {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No expressions stored on {}", context.branch);
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show repository status.
pub fn cmd_status(context: &CommandContext) -> Result<(), RepositoryError> {
    let repository = open_repository(context)?;
    let store = repository.store();
    let branch = context.branch.as_str();

    let concepts = store.concept_count(branch)?;
    let members = store.member_count(branch)?;
    let close_to_user = store
        .members(branch, CANONICAL_CLOSE_TO_USER_FORM_REFSET)?
        .len();
    let classifiable = store.members(branch, CLASSIFIABLE_FORM_REFSET)?.len();

    if context.json_mode {
        let output = serde_json::json!({
            "database": context.database.to_string_lossy(),
            "branch": branch,
            "module_id": context.config.repository.module_id,
            "concepts": concepts,
            "members": members,
            "close_to_user_form_members": close_to_user,
            "classifiable_form_members": classifiable,
        });
        return print_json(&output);
    }

    println!("Postcoord Repository Status");
    println!("===========================");
    println!("Database: {:?}", context.database);
    println!("Branch:   {}", branch);
    println!("Module:   {}", context.config.repository.module_id);
    println!();
    println!("Concepts:               {}", concepts);
    println!("Members:                {}", members);
    println!("  close-to-user form:   {}", close_to_user);
    println!("  classifiable form:    {}", classifiable);

    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the database and install the configured collaborators.
pub fn open_repository(context: &CommandContext) -> Result<Repository, RepositoryError> {
    context
        .config
        .apply(ExpressionRepository::open(&context.database)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), RepositoryError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn print_outcomes(
    context: &CommandContext,
    outcomes: &[ExpressionOutcome],
) -> Result<(), RepositoryError> {
    if context.json_mode {
        return print_json(&outcomes);
    }
    for (index, outcome) in outcomes.iter().enumerate() {
        print!("[{}] ", index + 1);
        match outcome {
            ExpressionOutcome::Processed(record) => print_record(record),
            ExpressionOutcome::Failed(failed) => {
                println!("FAILED {}", failed.human_readable_close_to_user_form);
                println!("    error: {}", failed.error);
            }
        }
    }
    Ok(())
}

fn print_record(record: &PostCoordinatedExpression) {
    match record.id {
        Some(id) => println!("{} {}", id, record.close_to_user_form),
        None => println!("(not stored) {}", record.close_to_user_form),
    }
    let classifiable = record
        .human_readable_classifiable_form
        .as_deref()
        .or(record.classifiable_form.as_deref());
    if let Some(form) = classifiable {
        println!("    classifiable: {}", form);
    }
    let normal_form = record
        .human_readable_necessary_normal_form
        .as_deref()
        .or(record.necessary_normal_form.as_deref());
    if let Some(form) = normal_form {
        println!("    normal form:  {}", form);
    }
}
