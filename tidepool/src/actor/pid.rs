//! Process identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Address used by a system that has no remote layer attached.
///
/// Pids carrying this address always resolve in the local registry, even
/// after the system starts listening on a real address.
pub const LOCAL_ADDRESS: &str = "nonhost";

/// Identifies a process anywhere in the system.
///
/// A pid is an immutable `{address, id}` pair. The address names the system
/// that hosts the process; the id is unique within that system's registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pid {
    /// Address of the hosting system.
    pub address: String,
    /// Registry id within the hosting system.
    pub id: String,
}

impl Pid {
    /// Create a pid from an address and id.
    pub fn new(address: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            id: id.into(),
        }
    }

    /// Create a pid on [`LOCAL_ADDRESS`].
    pub fn local(id: impl Into<String>) -> Self {
        Self::new(LOCAL_ADDRESS, id)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_address_and_id() {
        let pid = Pid::new("127.0.0.1:4501", "$7");
        assert_eq!(pid.to_string(), "127.0.0.1:4501/$7");
        assert_eq!(Pid::local("root").to_string(), "nonhost/root");
    }

    #[test]
    fn serde_roundtrip_preserves_identity() {
        let pid = Pid::new("10.0.0.1:9000", "activator/OrderActor/order-42");
        let json = serde_json::to_string(&pid).expect("serialize");
        let back: Pid = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(pid, back);
    }
}
