//! Recipient discovery
//!
//! Every mailbox keeps a [`Directory`] of peers it can address. Misses fall
//! back to a [`Resolver`], typically a shared [`MailboxRegistry`], and hits are
//! cached in the directory so later sends skip discovery.

use crate::config::BusConfig;
use crate::error::BusError;
use crate::identity::Identity;
use crate::mailbox::Mailbox;
use crate::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Discovery collaborator consulted when a recipient is not in the directory
pub trait Resolver: Send + Sync {
    /// Mailbox for `identity`, if one is known
    fn resolve(&self, identity: &Identity) -> Option<Mailbox>;

    /// Called once when `mailbox` shuts down
    fn forget(&self, _mailbox: &Mailbox) {}
}

/// Anything that embeds a mailbox and can be used as a recipient handle
pub trait HasMailbox {
    fn mailbox(&self) -> &Mailbox;
}

/// Per-mailbox cache of addressable peers
#[derive(Default)]
pub(crate) struct Directory {
    entries: RwLock<HashMap<Identity, Mailbox>>,
}

impl Directory {
    pub fn get(&self, identity: &Identity) -> Option<Mailbox> {
        self.entries.read().get(identity).cloned()
    }

    /// Insert unless already present; returns whether an entry was added
    pub fn insert_if_absent(&self, identity: Identity, mailbox: Mailbox) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&identity) {
            return false;
        }
        entries.insert(identity, mailbox);
        true
    }

    pub fn remove(&self, identity: &Identity) -> Option<Mailbox> {
        self.entries.write().remove(identity)
    }

    pub fn drain_all(&self) -> Vec<(Identity, Mailbox)> {
        self.entries.write().drain().collect()
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.entries.read().keys().cloned().collect()
    }
}

/// Shared process-wide lookup of mailboxes by identity.
///
/// Mailboxes spawned through the registry resolve each other on demand and
/// are removed again when they shut down.
#[derive(Clone, Default)]
pub struct MailboxRegistry {
    mailboxes: Arc<RwLock<HashMap<Identity, Mailbox>>>,
    config: Arc<BusConfig>,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose spawned mailboxes take their settings from `config`
    pub fn with_config(config: BusConfig) -> Self {
        Self {
            mailboxes: Arc::default(),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Make `mailbox` discoverable under its identity. Returns `false` when the
    /// identity is already taken.
    pub fn register(&self, mailbox: Mailbox) -> bool {
        let identity = mailbox.identity().clone();
        let mut mailboxes = self.mailboxes.write();
        if mailboxes.contains_key(&identity) {
            warn!(mailbox = %identity, "Identity already registered");
            return false;
        }
        debug!(mailbox = %identity, "Registering mailbox");
        mailboxes.insert(identity, mailbox);
        true
    }

    pub fn unregister(&self, identity: &Identity) -> Option<Mailbox> {
        let removed = self.mailboxes.write().remove(identity);
        if removed.is_some() {
            debug!(mailbox = %identity, "Unregistered mailbox");
        }
        removed
    }

    pub fn find(&self, identity: &Identity) -> Option<Mailbox> {
        self.mailboxes.read().get(identity).cloned()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.mailboxes.read().contains_key(identity)
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.mailboxes.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.mailboxes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.read().is_empty()
    }

    /// Build a mailbox with this registry as its resolver and register it.
    ///
    /// The mailbox's settings are the registry config's effective settings
    /// for `identity`.
    pub fn spawn_mailbox(&self, identity: impl Into<Identity>) -> Result<Mailbox> {
        let identity = identity.into();
        if self.contains(&identity) {
            return Err(BusError::DuplicateIdentity(identity));
        }
        let config = self.config.for_mailbox(identity.as_str());
        let mailbox = Mailbox::builder(identity)
            .config(config)
            .resolver(Arc::new(self.clone()))
            .build()?;
        if !self.register(mailbox.clone()) {
            // lost a race for the identity; the winner stays registered
            mailbox.shutdown();
            return Err(BusError::DuplicateIdentity(mailbox.identity().clone()));
        }
        Ok(mailbox)
    }

    /// Shut down every registered mailbox
    pub fn shutdown_all(&self) {
        let mailboxes: Vec<Mailbox> = self.mailboxes.read().values().cloned().collect();
        info!(count = mailboxes.len(), "Shutting down all mailboxes");
        for mailbox in mailboxes {
            mailbox.shutdown();
        }
        self.mailboxes.write().clear();
    }
}

impl Resolver for MailboxRegistry {
    fn resolve(&self, identity: &Identity) -> Option<Mailbox> {
        self.find(identity)
    }

    fn forget(&self, mailbox: &Mailbox) {
        let mut mailboxes = self.mailboxes.write();
        let registered = mailboxes
            .get(mailbox.identity())
            .is_some_and(|entry| entry.same_mailbox(mailbox));
        if registered {
            mailboxes.remove(mailbox.identity());
            debug!(mailbox = %mailbox.identity(), "Forgot shut down mailbox");
        }
    }
}

impl fmt::Debug for MailboxRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxRegistry")
            .field("mailboxes", &self.identities())
            .finish()
    }
}
