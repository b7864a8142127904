//! Token records persisted by the token store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of record a token represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Session,
    Oauth,
    Saml2,
    Rest,
    Generic,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenType::Session => "session",
            TokenType::Oauth => "oauth",
            TokenType::Saml2 => "saml2",
            TokenType::Rest => "rest",
            TokenType::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// A generic persisted record
///
/// Tokens are plain values: the store owns the persisted copy and every
/// operation hands out clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    id: String,
    token_type: TokenType,
    expiry: Option<DateTime<Utc>>,
    attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blob: Option<Vec<u8>>,
}

impl Token {
    /// Create an empty token with the given ID and type
    pub fn new(id: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            id: id.into(),
            token_type,
            expiry: None,
            attributes: BTreeMap::new(),
            blob: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    #[must_use]
    pub fn with_blob(mut self, blob: Vec<u8>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token_type(&self) -> TokenType {
        self.token_type
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn set_expiry(&mut self, expiry: Option<DateTime<Utc>>) {
        self.expiry = expiry;
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }

    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Whether the token has passed its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Project the token onto a subset of its attributes.
    ///
    /// An empty `names` slice keeps every attribute.
    pub fn to_partial(&self, names: &[String]) -> PartialToken {
        let attributes = if names.is_empty() {
            self.attributes.clone()
        } else {
            names
                .iter()
                .filter_map(|name| {
                    self.attributes
                        .get(name)
                        .map(|value| (name.clone(), value.clone()))
                })
                .collect()
        };

        PartialToken {
            id: self.id.clone(),
            attributes,
        }
    }
}

/// A subset of a token's attributes, keyed by the token ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialToken {
    id: String,
    attributes: BTreeMap<String, String>,
}

impl PartialToken {
    /// A partial token that carries only its ID
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

/// What happened to a token in the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// One entry of the backend change feed
///
/// For deletions `token` is the last persisted state of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenChange {
    pub change_type: ChangeType,
    pub token: Token,
}
