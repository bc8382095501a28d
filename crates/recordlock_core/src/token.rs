//! Lock token.

use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier of one granted (or attempted) lock.
///
/// Tokens are 128-bit random UUIDs that are:
/// - Minted once per `acquire` call
/// - Attached to the record being locked
/// - Never reused
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    /// Mints a new random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a token from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for LockToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for LockToken {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

impl From<LockToken> for Uuid {
    fn from(token: LockToken) -> Self {
        token.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_is_unique() {
        let tokens: HashSet<_> = (0..1000).map(|_| LockToken::new()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn display_parses_back() {
        let token = LockToken::new();
        let text = token.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<LockToken>().unwrap(), token);
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!("not-a-token".parse::<LockToken>().is_err());
    }

    #[test]
    fn uuid_conversion() {
        let uuid = Uuid::new_v4();
        let token = LockToken::from(uuid);
        assert_eq!(Uuid::from(token), uuid);
        assert_eq!(token.as_uuid(), &uuid);
    }
}
