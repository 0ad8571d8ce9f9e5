//! Registration table
//!
//! Registrations are standing subscriptions matched by prefix equality: a
//! pattern matches a probe when it is non-empty, no longer than the probe, and
//! equal to it element by element from the left.

use crate::identity::{CorrelationId, Identity};
use serde_json::Value;

/// Prefix-equal match of `pattern` against `probe`
pub fn prefix_matches(pattern: &[Value], probe: &[Value]) -> bool {
    !pattern.is_empty()
        && pattern.len() <= probe.len()
        && pattern.iter().zip(probe).all(|(p, q)| p == q)
}

/// A registration received from another mailbox
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// Subscriber that will be notified
    pub sender: Identity,
    /// Correlation the notifications are addressed to
    pub correlation: CorrelationId,
    pub match_args: Vec<Value>,
}

impl Registration {
    pub fn matches(&self, probe: &[Value]) -> bool {
        prefix_matches(&self.match_args, probe)
    }
}

/// Registrations this mailbox holds on behalf of subscribers
#[derive(Debug, Default)]
pub(crate) struct RegistrationTable {
    entries: Vec<Registration>,
}

impl RegistrationTable {
    pub fn add(&mut self, registration: Registration) {
        self.entries.push(registration);
    }

    /// Remove every entry from `sender` whose pattern equals `match_args`
    pub fn remove(&mut self, sender: &Identity, match_args: &[Value]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|reg| !(&reg.sender == sender && reg.match_args == match_args));
        before - self.entries.len()
    }

    /// Entries matching `probe`, in registration order
    pub fn matching(&self, probe: &[Value]) -> Vec<Registration> {
        self.entries
            .iter()
            .filter(|reg| reg.matches(probe))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Registration> {
        self.entries.clone()
    }

    /// Empty the table, returning what it held
    pub fn take_all(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.entries)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A registration this mailbox sent elsewhere, kept for revocation
#[derive(Debug, Clone, PartialEq)]
pub struct SentRegistration {
    pub recipient: Identity,
    pub correlation: CorrelationId,
    pub match_args: Vec<Value>,
}

#[derive(Debug, Default)]
pub(crate) struct SentRegistrationLog {
    entries: Vec<SentRegistration>,
}

impl SentRegistrationLog {
    pub fn record(&mut self, sent: SentRegistration) {
        self.entries.push(sent);
    }

    pub fn take_all(&mut self) -> Vec<SentRegistration> {
        std::mem::take(&mut self.entries)
    }

    /// Forget the registration sent with `correlation`
    pub fn remove(&mut self, correlation: &CorrelationId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|sent| &sent.correlation != correlation);
        before != self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<SentRegistration> {
        self.entries.clone()
    }
}
