//! Filter query parsing.
//!
//! A filter is a whitespace-separated conjunction of `key=value` and
//! `key!=value` tokens matched against point labels, e.g. the default
//! errors filter `status=OPEN` combined with a user query like
//! `service=api level!=debug`.

use crate::error::{Result, StoreError};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Eq,
    NotEq,
}

#[derive(Debug, Clone)]
struct Term {
    key: String,
    op: Op,
    value: String,
}

/// A parsed filter; matches when every term matches.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    terms: Vec<Term>,
}

impl Filter {
    /// Parses a filter query. An empty query matches everything; a token
    /// without an operator is a configuration error.
    pub fn parse(query: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for token in query.split_whitespace() {
            if let Some((key, value)) = token.split_once("!=") {
                if key.is_empty() {
                    return Err(StoreError::MalformedFilter(token.to_string()));
                }
                terms.push(Term {
                    key: key.to_string(),
                    op: Op::NotEq,
                    value: value.to_string(),
                });
            } else if let Some((key, value)) = token.split_once('=') {
                if key.is_empty() {
                    return Err(StoreError::MalformedFilter(token.to_string()));
                }
                terms.push(Term {
                    key: key.to_string(),
                    op: Op::Eq,
                    value: value.to_string(),
                });
            } else {
                return Err(StoreError::MalformedFilter(token.to_string()));
            }
        }
        Ok(Self { terms })
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.terms.iter().all(|term| {
            let actual = labels.get(&term.key).map(String::as_str);
            match term.op {
                Op::Eq => actual == Some(term.value.as_str()),
                // Absent labels satisfy a negative match.
                Op::NotEq => actual != Some(term.value.as_str()),
            }
        })
    }
}
