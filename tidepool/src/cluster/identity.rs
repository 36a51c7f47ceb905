//! Stable names of virtual actors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A virtual actor's application-level name: an identity within a kind.
///
/// Two requests naming the same `ClusterIdentity` reach the same
/// activation, wherever the cluster currently hosts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterIdentity {
    /// Name of the instance, e.g. `order-42`.
    pub identity: String,
    /// Name of the registered kind, e.g. `OrderActor`.
    pub kind: String,
}

impl ClusterIdentity {
    /// Create an identity.
    pub fn new(identity: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            kind: kind.into(),
        }
    }

    /// Parse the `kind/identity` form produced by `Display`.
    ///
    /// The identity part may itself contain `/`.
    pub fn parse(value: &str) -> Option<Self> {
        let (kind, identity) = value.split_once('/')?;
        if kind.is_empty() || identity.is_empty() {
            return None;
        }
        Some(Self::new(identity, kind))
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        let id = ClusterIdentity::new("order-42", "OrderActor");
        assert_eq!(id.to_string(), "OrderActor/order-42");
        assert_eq!(ClusterIdentity::parse("OrderActor/order-42"), Some(id));
    }

    #[test]
    fn identity_may_contain_slashes() {
        let parsed = ClusterIdentity::parse("Files/a/b").expect("parse");
        assert_eq!(parsed.kind, "Files");
        assert_eq!(parsed.identity, "a/b");
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(ClusterIdentity::parse("no-kind"), None);
        assert_eq!(ClusterIdentity::parse("/x"), None);
        assert_eq!(ClusterIdentity::parse("Kind/"), None);
    }
}
