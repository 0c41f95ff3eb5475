//! # Compositional Grammar Parser
//!
//! Reads expression text into a [`CanonicalExpression`].
//!
//! Supported subset:
//! - optional `===` or `<<<` definition status
//! - focus concepts joined by `+`
//! - `:` refinement of ungrouped attributes and `{ }` groups, commas optional
//! - parenthesised nested values
//! - `|term|` labels after any concept reference (discarded)
//!
//! Concrete values (`#1`, `"text"`) are not supported.

use super::lexer::{Span, Token, lexer};
use super::{Attribute, AttributeGroup, AttributeValue, CanonicalExpression, DefinitionStatus};
use crate::primitives::{MAX_EXPRESSION_LENGTH, MAX_NESTING_DEPTH};
use crate::{ConceptId, RepositoryError};
use chumsky::error::SimpleReason;
use chumsky::prelude::*;
use std::fmt::Display;
use std::hash::Hash;

/// Turns expression text into a canonical expression.
pub trait ExpressionParser: Send + Sync {
    /// Parse `text`, failing with [`RepositoryError::Parse`] on a syntax error.
    fn parse(&self, text: &str) -> Result<CanonicalExpression, RepositoryError>;
}

/// Compositional grammar parser built from a lexer and a token parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScgParser;

impl ScgParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionParser for ScgParser {
    fn parse(&self, text: &str) -> Result<CanonicalExpression, RepositoryError> {
        if text.len() > MAX_EXPRESSION_LENGTH {
            return Err(RepositoryError::Parse(format!(
                "expression of {} bytes exceeds the limit of {MAX_EXPRESSION_LENGTH}",
                text.len()
            )));
        }
        if text.trim().is_empty() {
            return Err(RepositoryError::Parse(
                "empty expression at position 0".to_string(),
            ));
        }

        let tokens = lexer().parse(text).map_err(first_error)?;
        check_nesting(&tokens)?;

        let len = text.chars().count();
        parser()
            .parse(chumsky::Stream::from_iter(len..len + 1, tokens.into_iter()))
            .map_err(first_error)
    }
}

// =============================================================================
// GRAMMAR
// =============================================================================

/// Create a parser for a complete expression.
pub fn parser() -> impl Parser<Token, CanonicalExpression, Error = Simple<Token>> + Clone {
    definition_status()
        .or_not()
        .then(sub_expression())
        .then_ignore(end())
        .map(|(status, mut expression)| {
            expression.set_definition_status(status.unwrap_or_default());
            expression
        })
}

/// An item after `:`.
enum Refinement {
    Attribute(Attribute),
    Group(AttributeGroup),
}

fn definition_status() -> impl Parser<Token, DefinitionStatus, Error = Simple<Token>> + Clone {
    select! {
        Token::Equivalent => DefinitionStatus::EquivalentTo,
        Token::Subtype => DefinitionStatus::SubtypeOf,
    }
}

/// A concept id with its optional `|term|` label.
fn concept_reference() -> impl Parser<Token, ConceptId, Error = Simple<Token>> + Clone {
    select! { Token::Id(id) => id }.then_ignore(just(Token::Term).or_not())
}

/// Focus concepts with an optional refinement. Nested values recurse here.
fn sub_expression() -> impl Parser<Token, CanonicalExpression, Error = Simple<Token>> + Clone {
    recursive(|sub_expression| {
        let nested = just(Token::LParen)
            .ignore_then(
                definition_status()
                    .map_with_span(|_, span: Span| span)
                    .or_not(),
            )
            .then(sub_expression)
            .then_ignore(just(Token::RParen))
            .validate(
                |(status, nested): (Option<Span>, CanonicalExpression), _, emit| {
                    if let Some(span) = status {
                        emit(Simple::custom(
                            span,
                            "definition status is not allowed in a nested expression",
                        ));
                    }
                    AttributeValue::Nested(Box::new(nested))
                },
            );

        let attribute = concept_reference()
            .then_ignore(just(Token::Eq))
            .then(choice((
                nested,
                concept_reference().map(AttributeValue::Concept),
            )))
            .map(|(type_id, value)| Attribute { type_id, value });

        let group = attribute
            .clone()
            .separated_by(just(Token::Comma).or_not())
            .at_least(1)
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(|attributes| {
                attributes
                    .into_iter()
                    .fold(AttributeGroup::new(), AttributeGroup::with)
            });

        let refinement = choice((
            group.map(Refinement::Group),
            attribute.map(Refinement::Attribute),
        ))
        .separated_by(just(Token::Comma).or_not())
        .at_least(1);

        concept_reference()
            .separated_by(just(Token::Plus))
            .at_least(1)
            .then(just(Token::Colon).ignore_then(refinement).or_not())
            .map(|(focus, refinement)| {
                let mut expression = CanonicalExpression::new(DefinitionStatus::EquivalentTo);
                for id in focus {
                    expression.add_focus(id);
                }
                for item in refinement.into_iter().flatten() {
                    match item {
                        Refinement::Attribute(attribute) => expression.add_attribute(attribute),
                        Refinement::Group(group) => expression.add_group(group),
                    }
                }
                expression
            })
    })
}

// =============================================================================
// ERRORS
// =============================================================================

/// Reject nesting beyond [`MAX_NESTING_DEPTH`] before the recursive parser runs.
fn check_nesting(tokens: &[(Token, Span)]) -> Result<(), RepositoryError> {
    let mut depth = 0usize;
    for (token, span) in tokens {
        match token {
            Token::LParen => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(RepositoryError::Parse(format!(
                        "nesting deeper than {MAX_NESTING_DEPTH} levels at position {}",
                        span.start
                    )));
                }
            }
            Token::RParen => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// The earliest of `errors` as a parse error.
fn first_error<T: Display + Hash + Eq>(errors: Vec<Simple<T>>) -> RepositoryError {
    match errors.into_iter().min_by_key(|e| e.span().start) {
        Some(error) => RepositoryError::Parse(describe(&error)),
        None => RepositoryError::Parse("invalid expression".to_string()),
    }
}

fn describe<T: Display + Hash + Eq>(error: &Simple<T>) -> String {
    let position = error.span().start;
    if let SimpleReason::Custom(message) = error.reason() {
        return format!("{message} at position {position}");
    }

    let found = error
        .found()
        .map(|t| format!("'{}'", t))
        .unwrap_or_else(|| "end of input".to_string());
    let mut expected: Vec<String> = error
        .expected()
        .map(|t| match t {
            Some(t) => format!("'{}'", t),
            None => "end of input".to_string(),
        })
        .collect();
    expected.sort();
    expected.dedup();

    if expected.is_empty() {
        format!("unexpected {found} at position {position}")
    } else {
        format!(
            "unexpected {found}, expected one of: {} at position {position}",
            expected.join(", ")
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
