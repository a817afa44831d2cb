//! Subject addressing and wildcard filters.
//!
//! Subjects are dot-separated tokens (`warehouse.46.product.Apples`).
//! Filters use the usual broker wildcards:
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens (last position only)

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject filter cannot be empty")]
    Empty,

    #[error("subject filter {0:?} contains an empty token")]
    EmptyToken(String),

    #[error("subject filter {0:?} uses '>' before the last token")]
    MisplacedTail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

/// A parsed subject filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectFilter {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectFilter {
    pub fn parse(pattern: impl Into<String>) -> Result<Self, SubjectError> {
        let raw = pattern.into();
        if raw.is_empty() {
            return Err(SubjectError::Empty);
        }

        let parts: Vec<&str> = raw.split('.').collect();
        let last = parts.len() - 1;
        let mut tokens = Vec::with_capacity(parts.len());

        for (idx, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => return Err(SubjectError::EmptyToken(raw.clone())),
                "*" => Token::Single,
                ">" if idx == last => Token::Tail,
                ">" => return Err(SubjectError::MisplacedTail(raw.clone())),
                lit => Token::Literal(lit.to_string()),
            };
            tokens.push(token);
        }

        Ok(Self { raw, tokens })
    }

    /// Filter matching every subject.
    pub fn all() -> Self {
        Self {
            raw: ">".to_string(),
            tokens: vec![Token::Tail],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, subject: &str) -> bool {
        let mut parts = subject.split('.');

        for token in &self.tokens {
            match token {
                Token::Tail => {
                    // Needs at least one remaining non-empty token.
                    return parts.next().is_some_and(|p| !p.is_empty());
                }
                Token::Single => match parts.next() {
                    Some(p) if !p.is_empty() => {}
                    _ => return false,
                },
                Token::Literal(lit) => match parts.next() {
                    Some(p) if p == lit => {}
                    _ => return false,
                },
            }
        }

        parts.next().is_none()
    }
}

impl fmt::Display for SubjectFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
