//! # Expression Lexer
//!
//! Tokenizes compositional grammar text for the expression parser.

use crate::ConceptId;
use chumsky::prelude::*;
use std::fmt;
use std::ops::Range;

/// Character range of a token in the source text.
pub type Span = Range<usize>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    // Definition status
    Equivalent, // ===
    Subtype,    // <<<

    // Punctuation
    Plus,     // +
    Colon,    // :
    Comma,    // ,
    Eq,       // =
    DoubleEq, // ==, never valid
    LBrace,   // {
    RBrace,   // }
    LParen,   // (
    RParen,   // )

    Id(ConceptId),
    /// A `|term|` label.
    Term,
    /// A `#` or `"` concrete value, reported by the lexer.
    Concrete,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Equivalent => write!(f, "==="),
            Token::Subtype => write!(f, "<<<"),
            Token::Plus => write!(f, "+"),
            Token::Colon => write!(f, ":"),
            Token::Comma => write!(f, ","),
            Token::Eq => write!(f, "="),
            Token::DoubleEq => write!(f, "=="),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Id(id) => write!(f, "{}", id),
            Token::Term => write!(f, "|term|"),
            Token::Concrete => write!(f, "concrete value"),
        }
    }
}

/// Create a lexer for compositional grammar expressions.
pub fn lexer() -> impl Parser<char, Vec<(Token, Span)>, Error = Simple<char>> {
    // Letters glued to the digits make the whole identifier malformed
    let identifier = text::digits(10)
        .then(filter(char::is_ascii_alphabetic).repeated())
        .validate(|(digits, suffix): (String, Vec<char>), span: Span, emit| {
            if !suffix.is_empty() {
                emit(Simple::custom(span, "malformed concept identifier"));
                return Token::Id(ConceptId(0));
            }
            match digits.parse::<ConceptId>() {
                Ok(id) => Token::Id(id),
                Err(_) => {
                    emit(Simple::custom(
                        span,
                        format!("invalid concept identifier '{digits}'"),
                    ));
                    Token::Id(ConceptId(0))
                }
            }
        });

    let term = just('|')
        .ignore_then(none_of('|').repeated())
        .then(just('|').or_not())
        .validate(|(_, close), span: Span, emit| {
            if close.is_none() {
                emit(Simple::custom(span, "unterminated term"));
            }
            Token::Term
        });

    let concrete = one_of("#\"").validate(|_, span: Span, emit| {
        emit(Simple::custom(span, "concrete values are not supported"));
        Token::Concrete
    });

    // Longest operators first so `===` never lexes as `==` `=`
    let punctuation = choice((
        just("===").to(Token::Equivalent),
        just("==").to(Token::DoubleEq),
        just("<<<").to(Token::Subtype),
        just('=').to(Token::Eq),
        just('+').to(Token::Plus),
        just(':').to(Token::Colon),
        just(',').to(Token::Comma),
        just('{').to(Token::LBrace),
        just('}').to(Token::RBrace),
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
    ));

    choice((identifier, term, concrete, punctuation))
        .map_with_span(|token, span| (token, span))
        .padded()
        .repeated()
        .then_ignore(end())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        lexer()
            .parse(text)
            .expect("lex")
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn operators_prefer_longest_match() {
        assert_eq!(
            tokens("=== <<< == ="),
            vec![Token::Equivalent, Token::Subtype, Token::DoubleEq, Token::Eq]
        );
    }

    #[test]
    fn labels_become_term_tokens() {
        assert_eq!(
            tokens("83152002 |Oophorectomy (procedure)|"),
            vec![Token::Id(ConceptId(83_152_002)), Token::Term]
        );
    }

    #[test]
    fn spans_are_character_ranges() {
        let lexed = lexer().parse("  71388002 : ").expect("lex");
        assert_eq!(lexed[0].1, 2..10);
        assert_eq!(lexed[1], (Token::Colon, 11..12));
    }

    #[test]
    fn unknown_character_is_an_error() {
        assert!(lexer().parse("71388002 ; 1").is_err());
    }
}
