//! Opaque Identifiers
//!
//! UUID-backed newtypes for everything the server hands out or looks up.
//! All of them implement `Ord` so they can key `BTreeMap`s, and serialize
//! as the plain hyphenated UUID string.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Get raw bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// First four bytes as hex, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.as_bytes()[..4])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Opaque credential proving a live login.
    ///
    /// Ordering is byte-lexicographic, which matches the ordering of the
    /// lowercase hyphenated string form.
    SessionToken
);

uuid_id!(
    /// Account identifier in the account store.
    AccountId
);

uuid_id!(
    /// Unique identifier of an in-flight match.
    MatchId
);

uuid_id!(
    /// Identifier of a persisted match record.
    RecordId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_ordering_matches_string_ordering() {
        let a = SessionToken::from_bytes([0x10; 16]);
        let b = SessionToken::from_bytes([0xab; 16]);
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let id = MatchId::from_bytes([1; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let parsed: MatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_short_prefix() {
        let token = SessionToken::from_bytes([0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(token.short(), "deadbeef");
    }

    #[test]
    fn test_parse_from_str() {
        let token = SessionToken::new_v4();
        let parsed: SessionToken = token.to_string().parse().unwrap();
        assert_eq!(parsed, token);
        assert!("not-a-token".parse::<SessionToken>().is_err());
    }
}
