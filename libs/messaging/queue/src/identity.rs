//! Mailbox addressing
//!
//! An [`Identity`] names the party a mailbox speaks for. Two mailboxes are the
//! same party when their identities compare equal, so equality and hashing are
//! by value of the name, never by reference.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Addressing key for a mailbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    name: Arc<str>,
}

impl Identity {
    /// Create identity from a name
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    /// Generate a fresh identity, e.g. `worker-5f0c...`
    pub fn unique(prefix: &str) -> Self {
        Self::new(format!("{}-{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.name
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Self {
            name: Arc::from(name),
        }
    }
}

impl From<&Identity> for Identity {
    fn from(id: &Identity) -> Self {
        id.clone()
    }
}

/// Opaque handle tying an acknowledgement back to the command it answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId {
    id: Uuid,
}

impl CorrelationId {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd-{}", self.id.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_identity_value_equality() {
        let a = Identity::new("sim");
        let b = Identity::from(String::from("sim"));
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get("sim"), Some(&1));
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn test_unique_identity() {
        let a = Identity::unique("worker");
        let b = Identity::unique("worker");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("worker-"));
    }

    #[test]
    fn test_correlation_display() {
        let id = CorrelationId::new();
        assert_ne!(id, CorrelationId::new());
        assert!(id.to_string().starts_with("cmd-"));
    }
}
