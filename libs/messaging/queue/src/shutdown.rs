//! Mailbox shutdown
//!
//! Shutdown is one-way and idempotent. It releases everyone who could be
//! waiting on this mailbox. Registrations it sent are revoked, and its own
//! subscribers and queued commands are acknowledged with
//! [`AckStatus::Shutdown`]. Peers then drop their cached entry for it and the
//! dedicated worker is joined.

use crate::command::{AckMessage, AckStatus, UnregisterMessage};
use crate::mailbox::Mailbox;
use crate::message::{Message, MessageKind};
use crate::registration::Registration;
use crate::stats::MailboxStats;
use std::thread;
use tracing::{debug, info, warn};

impl Mailbox {
    /// Stop the mailbox. Later calls are no-ops.
    pub fn shutdown(&self) {
        let (registrants, leftovers): (Vec<Registration>, Vec<Message>) = {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.inner.ready.notify_all();
            let registrants = state.registrations.take_all();
            (registrants, state.inbound.drain(..).collect())
        };
        info!(
            mailbox = %self.identity(),
            queued = leftovers.len(),
            "Shutting down mailbox"
        );

        self.revoke_registrations();

        for msg in leftovers
            .iter()
            .filter(|msg| msg.kind() == MessageKind::Command)
        {
            MailboxStats::incr(&self.inner.stats.shutdown_acks);
            if let Err(e) = self.ack(msg, AckStatus::Shutdown, None) {
                debug!(mailbox = %self.identity(), error = %e, "Shutdown ack not delivered");
            }
        }

        self.release_registrants(registrants);

        let dropped = self.inner.pending.lock().clear();
        if dropped > 0 {
            debug!(mailbox = %self.identity(), dropped, "Dropped pending ack handlers");
        }

        self.remove_cached_entries();
        if let Some(resolver) = &self.inner.resolver {
            resolver.forget(self);
        }
        self.join_worker();
    }

    /// Unregister every registration this mailbox has sent
    pub fn revoke_registrations(&self) {
        let sent = self.inner.sent_registrations.lock().take_all();
        for registration in sent {
            self.inner.pending.lock().remove(&registration.correlation);
            if &registration.recipient == self.identity() {
                continue;
            }
            let revoke = Message::unregister(UnregisterMessage {
                match_args: registration.match_args,
            })
            .with_recipient(registration.recipient.clone());
            if let Err(e) = self.send(revoke) {
                debug!(
                    mailbox = %self.identity(),
                    recipient = %registration.recipient,
                    error = %e,
                    "Registration revoke not delivered"
                );
            }
        }
    }

    /// Tell every subscriber its registration is gone
    fn release_registrants(&self, registrants: Vec<Registration>) {
        for registration in registrants {
            if &registration.sender == self.identity() {
                continue;
            }
            let closed = Message::ack(AckMessage::for_command(
                AckStatus::Shutdown,
                registration.correlation,
            ))
            .with_recipient(registration.sender.clone());
            if let Err(e) = self.send(closed) {
                debug!(
                    mailbox = %self.identity(),
                    subscriber = %registration.sender,
                    error = %e,
                    "Registration release not delivered"
                );
            }
        }
    }

    /// Forget all peers and make every peer forget this mailbox
    fn remove_cached_entries(&self) {
        for (_, peer) in self.inner.directory.drain_all() {
            if peer.same_mailbox(self) {
                continue;
            }
            let cached = peer.inner.directory.get(self.identity());
            if cached.is_some_and(|entry| entry.same_mailbox(self)) {
                peer.inner.directory.remove(self.identity());
            }
        }
    }

    fn join_worker(&self) {
        let Some(handle) = self.inner.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // shut down from its own handler; the loop exits after this drain
            return;
        }
        if handle.join().is_err() {
            warn!(mailbox = %self.identity(), "Mailbox worker panicked");
        } else {
            debug!(mailbox = %self.identity(), "Mailbox worker joined");
        }
    }
}
