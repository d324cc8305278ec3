//! Account ownership tokens.
//!
//! A purchase is tagged at launch time with a one-way hash of the caller's
//! account identifier; restored purchases are later matched against the same
//! hash. The hash must stay stable across process restarts.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a rendered token in hex characters (the provider's limit for
/// obfuscated account ids).
pub const OWNERSHIP_TOKEN_LEN: usize = 64;

/// Opaque, lowercase-hex ownership token.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipToken(String);

impl OwnershipToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a provider-supplied owner token belongs to this account.
    ///
    /// An absent owner token never matches.
    pub fn owns(&self, owner: Option<&str>) -> bool {
        owner == Some(self.0.as_str())
    }
}

impl std::fmt::Display for OwnershipToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<OwnershipToken> for String {
    fn from(token: OwnershipToken) -> Self {
        token.0
    }
}

/// Hash an account identifier (e.g. an email address) into an ownership token.
///
/// Returns `None` for empty or blank input: that is the normal "no account"
/// signal, not an error. Non-blank input is hashed over its raw bytes.
pub fn hash_account_id(identifier: &str) -> Option<OwnershipToken> {
    if identifier.trim().is_empty() {
        return None;
    }

    let digest = Sha256::digest(identifier.as_bytes());
    let mut rendered = hex::encode(digest);
    rendered.truncate(OWNERSHIP_TOKEN_LEN);
    Some(OwnershipToken(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vector() {
        let token = hash_account_id("abc").unwrap();
        assert_eq!(
            token.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_empty_and_blank_yield_nothing() {
        assert!(hash_account_id("").is_none());
        assert!(hash_account_id("   ").is_none());
        assert!(hash_account_id("\t\n").is_none());
    }

    #[test]
    fn test_identifier_is_not_trimmed() {
        assert_ne!(hash_account_id("a@b.com"), hash_account_id(" a@b.com"));
    }

    #[test]
    fn test_owns() {
        let token = hash_account_id("a@b.com").unwrap();
        assert!(token.owns(Some(token.as_str())));
        assert!(!token.owns(None));
        assert!(!token.owns(Some("")));
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic_lowercase_hex(input in "\\PC*") {
            match hash_account_id(&input) {
                None => prop_assert!(input.trim().is_empty()),
                Some(first) => {
                    let second = hash_account_id(&input).unwrap();
                    prop_assert_eq!(&first, &second);
                    prop_assert_eq!(first.as_str().len(), OWNERSHIP_TOKEN_LEN);
                    prop_assert!(first
                        .as_str()
                        .chars()
                        .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
                }
            }
        }
    }
}
