//! Token filters for queries and continuous queries.
//!
//! A filter's canonical rendering doubles as its identity: two filters that
//! render the same are the same series key in the task queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::token::{Token, TokenType};

/// Boolean expression over token attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every token
    All,
    /// Attribute equals value
    Equals { attribute: String, value: String },
    /// Attribute is set
    Present { attribute: String },
    /// Token has the given type
    TokenType(TokenType),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Evaluate the expression against a token
    pub fn matches(&self, token: &Token) -> bool {
        match self {
            Filter::All => true,
            Filter::Equals { attribute, value } => token.attribute(attribute) == Some(value),
            Filter::Present { attribute } => token.attribute(attribute).is_some(),
            Filter::TokenType(token_type) => token.token_type() == *token_type,
            Filter::And(filters) => filters.iter().all(|f| f.matches(token)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(token)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("(*)"),
            Filter::Equals { attribute, value } => write!(f, "({attribute}={value})"),
            Filter::Present { attribute } => write!(f, "({attribute}=*)"),
            Filter::TokenType(token_type) => write!(f, "(@type={token_type})"),
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// A filter plus the attributes a partial query should return
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFilter {
    filter: Filter,
    #[serde(default)]
    returned_attributes: Vec<String>,
}

impl TokenFilter {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            returned_attributes: Vec::new(),
        }
    }

    /// Filter that matches every token
    pub fn all() -> Self {
        Self::new(Filter::All)
    }

    /// Restrict partial query results to these attributes
    #[must_use]
    pub fn returning<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.returned_attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn returned_attributes(&self) -> &[String] {
        &self.returned_attributes
    }

    pub fn matches(&self, token: &Token) -> bool {
        self.filter.matches(token)
    }

    /// Stable identity used to order tasks that share this filter
    pub fn identity(&self) -> String {
        if self.returned_attributes.is_empty() {
            self.filter.to_string()
        } else {
            format!("{}[{}]", self.filter, self.returned_attributes.join(","))
        }
    }
}

impl From<Filter> for TokenFilter {
    fn from(filter: Filter) -> Self {
        Self::new(filter)
    }
}
