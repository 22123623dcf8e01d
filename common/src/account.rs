//! NEAR account identifiers.
//!
//! Account ids are validated once, when the configuration is parsed, so that
//! providers never have to deal with malformed ids at sampling time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MIN_LEN: usize = 2;
const MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountIdError {
    #[error("account id `{0}` must be between 2 and 64 characters")]
    Length(String),
    #[error("account id `{id}` has invalid character {ch:?} at position {pos}")]
    InvalidChar { id: String, ch: char, pos: usize },
    #[error("account id `{0}` has a misplaced separator")]
    Separator(String),
}

/// A validated NEAR account id (e.g. `client-eth2.bridge.near`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '.' | '-' | '_')
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < MIN_LEN || s.len() > MAX_LEN {
            return Err(AccountIdError::Length(s.to_string()));
        }

        let mut prev_separator = true; // rejects a leading separator
        for (pos, ch) in s.chars().enumerate() {
            if is_separator(ch) {
                if prev_separator {
                    return Err(AccountIdError::Separator(s.to_string()));
                }
                prev_separator = true;
            } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
                prev_separator = false;
            } else {
                return Err(AccountIdError::InvalidChar { id: s.to_string(), ch, pos });
            }
        }

        if prev_separator {
            return Err(AccountIdError::Separator(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
