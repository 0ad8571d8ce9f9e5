use crate::identity::Identity;
use crate::message::MessageKind;

/// Errors surfaced by mailbox routing, lifecycle and configuration
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("Unknown recipient {recipient} (sender: {sender})")]
    UnknownRecipient { recipient: Identity, sender: Identity },

    #[error("Mailbox {0} is shut down")]
    MailboxClosed(Identity),

    #[error("Expected a command message, got {0}")]
    NotACommand(MessageKind),

    #[error("Identity {0} is already registered")]
    DuplicateIdentity(Identity),

    #[error("Failed to spawn worker for {identity}: {reason}")]
    WorkerSpawn { identity: Identity, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl BusError {
    /// Create an unknown recipient error
    pub fn unknown_recipient(recipient: Identity, sender: Identity) -> Self {
        BusError::UnknownRecipient { recipient, sender }
    }

    /// Create a closed mailbox error
    pub fn closed(identity: Identity) -> Self {
        BusError::MailboxClosed(identity)
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        BusError::InvalidConfig(msg.into())
    }

    /// Routing failures are local and non-fatal; the message was dropped
    pub fn is_routing_error(&self) -> bool {
        matches!(
            self,
            BusError::UnknownRecipient { .. } | BusError::MailboxClosed(_)
        )
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_classification() {
        let err = BusError::unknown_recipient(Identity::new("ghost"), Identity::new("me"));
        assert!(err.is_routing_error());
        assert_eq!(err.to_string(), "Unknown recipient ghost (sender: me)");

        assert!(BusError::closed(Identity::new("gone")).is_routing_error());
        assert!(!BusError::invalid_config("bad").is_routing_error());
        assert!(!BusError::NotACommand(MessageKind::Info).is_routing_error());
    }
}
