//! Mailbox
//!
//! The addressable unit of the bus. A mailbox owns its inbound queue, the
//! registrations other parties hold with it, a directory of mailboxes it has
//! talked to, and the callbacks that handle its messages. Handling always
//! happens on whichever thread drains the mailbox: its dedicated worker, or
//! the external driver calling [`Mailbox::process_messages`].
//!
//! # Lock Ordering
//!
//! 1. `state` (inbound queue, registration table, shutdown flag)
//! 2. `pending`
//! 3. `callbacks`
//!
//! `directory` and `sent_registrations` are never held together with any other
//! lock. No lock is held while calling into another mailbox or a handler.

use crate::command::{AckMessage, AckStatus, CommandMessage};
use crate::config::MailboxConfig;
use crate::directory::{Directory, HasMailbox, Resolver};
use crate::dispatch::{CallbackId, CallbackTable, DispatchContext, Handler, PendingTable};
use crate::error::BusError;
use crate::identity::{CorrelationId, Identity};
use crate::message::{Message, MessageBody, MessageKind, Payload};
use crate::registration::{
    Registration, RegistrationTable, SentRegistration, SentRegistrationLog,
};
use crate::stats::{MailboxStats, MailboxStatsSnapshot};
use crate::Result;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

#[derive(Default)]
pub(crate) struct QueueState {
    pub inbound: VecDeque<Message>,
    pub registrations: RegistrationTable,
    pub shutdown: bool,
}

pub(crate) struct MailboxInner {
    pub identity: Identity,
    pub config: MailboxConfig,
    pub state: Mutex<QueueState>,
    pub ready: Condvar,
    pub directory: Directory,
    pub sent_registrations: Mutex<SentRegistrationLog>,
    pub pending: Mutex<PendingTable>,
    pub callbacks: RwLock<CallbackTable>,
    pub resolver: Option<Arc<dyn Resolver>>,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    pub draining: AtomicBool,
    pub stats: MailboxStats,
}

/// Handle to a mailbox; clones share the same mailbox
#[derive(Clone)]
pub struct Mailbox {
    pub(crate) inner: Arc<MailboxInner>,
}

/// Builder for mailboxes that need a resolver or a non-default config
pub struct MailboxBuilder {
    identity: Identity,
    config: MailboxConfig,
    resolver: Option<Arc<dyn Resolver>>,
}

impl MailboxBuilder {
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self {
            identity: identity.into(),
            config: MailboxConfig::default(),
            resolver: None,
        }
    }

    pub fn config(mut self, config: MailboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Request (or not) a dedicated worker thread
    pub fn dedicated_worker(mut self, enabled: bool) -> Self {
        self.config.dedicated_worker = enabled;
        self
    }

    /// Discovery collaborator consulted on directory misses
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Result<Mailbox> {
        self.config.validate()?;
        let dedicated_worker = self.config.dedicated_worker;
        let mailbox = Mailbox::from_parts(self.identity, self.config, self.resolver);
        if dedicated_worker {
            mailbox.start_worker()?;
        }
        Ok(mailbox)
    }
}

/// Resets the draining flag when a drain ends, even by unwinding, and wakes
/// a worker parked behind it
pub(crate) struct DrainGuard<'a> {
    inner: &'a MailboxInner,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.inner.draining.store(false, Ordering::Release);
        // taken so a waiter cannot miss the wakeup between its check and park
        let _state = self.inner.state.lock();
        self.inner.ready.notify_all();
    }
}

impl Mailbox {
    /// Externally driven mailbox: the owner calls `process_messages`
    pub fn new(identity: impl Into<Identity>) -> Self {
        Self::from_parts(identity.into(), MailboxConfig::default(), None)
    }

    /// Mailbox drained by its own worker thread until shutdown
    pub fn spawn(identity: impl Into<Identity>) -> Result<Self> {
        MailboxBuilder::new(identity)
            .config(MailboxConfig::threaded())
            .build()
    }

    /// Mailbox with explicit settings; a worker is spawned if `config` asks
    pub fn with_config(identity: impl Into<Identity>, config: MailboxConfig) -> Result<Self> {
        MailboxBuilder::new(identity).config(config).build()
    }

    pub fn builder(identity: impl Into<Identity>) -> MailboxBuilder {
        MailboxBuilder::new(identity)
    }

    fn from_parts(
        identity: Identity,
        config: MailboxConfig,
        resolver: Option<Arc<dyn Resolver>>,
    ) -> Self {
        debug!(
            mailbox = %identity,
            dedicated_worker = config.dedicated_worker,
            "Mailbox created"
        );
        Self {
            inner: Arc::new(MailboxInner {
                identity,
                config,
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                directory: Directory::default(),
                sent_registrations: Mutex::new(SentRegistrationLog::default()),
                pending: Mutex::new(PendingTable::default()),
                callbacks: RwLock::new(CallbackTable::default()),
                resolver,
                worker: Mutex::new(None),
                draining: AtomicBool::new(false),
                stats: MailboxStats::default(),
            }),
        }
    }

    fn start_worker(&self) -> Result<()> {
        let name = format!("{}{}", self.inner.config.worker_name_prefix, self.identity());
        let worker = self.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run_worker())
            .map_err(|e| BusError::WorkerSpawn {
                identity: self.identity().clone(),
                reason: e.to_string(),
            })?;
        *self.inner.worker.lock() = Some(handle);
        info!(mailbox = %self.identity(), "Mailbox worker started");
        Ok(())
    }

    fn run_worker(&self) {
        while !self.is_shutdown() {
            self.process_messages_blocking();
        }
        debug!(mailbox = %self.identity(), "Mailbox worker exiting");
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.inner.config
    }

    pub fn has_worker(&self) -> bool {
        self.inner.worker.lock().is_some()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Number of queued, not yet dispatched messages
    pub fn messages_waiting(&self) -> usize {
        self.inner.state.lock().inbound.len()
    }

    /// Registrations other parties hold with this mailbox
    pub fn registrations(&self) -> Vec<Registration> {
        self.inner.state.lock().registrations.snapshot()
    }

    /// Registrations this mailbox has sent and not yet revoked
    pub fn sent_registrations(&self) -> Vec<SentRegistration> {
        self.inner.sent_registrations.lock().snapshot()
    }

    /// Commands and registrations awaiting acks through a handler
    pub fn pending_commands(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn known_recipients(&self) -> Vec<Identity> {
        self.inner.directory.identities()
    }

    pub fn stats(&self) -> MailboxStatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub(crate) fn stats_ref(&self) -> &MailboxStats {
        &self.inner.stats
    }

    pub fn same_mailbox(&self, other: &Mailbox) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Seed the directory, bypassing discovery. Existing entries win.
    pub fn register_receiver(&self, identity: impl Into<Identity>, mailbox: Mailbox) -> bool {
        self.inner.directory.insert_if_absent(identity.into(), mailbox)
    }

    /// Seed the directory with an object that embeds a mailbox
    pub fn register_holder<H: HasMailbox + ?Sized>(&self, holder: &H) -> bool {
        let mailbox = holder.mailbox();
        self.register_receiver(mailbox.identity().clone(), mailbox.clone())
    }

    /// Attach a handler for `kind`; handlers run in registration order
    pub fn register_callback<F>(&self, kind: MessageKind, callback: F) -> CallbackId
    where
        F: Fn(&Message, &DispatchContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.callbacks.write().register(kind, Arc::new(callback))
    }

    pub fn unregister_callback(&self, kind: MessageKind, id: CallbackId) -> bool {
        self.inner.callbacks.write().unregister(kind, id)
    }

    pub fn callback_count(&self, kind: MessageKind) -> usize {
        self.inner.callbacks.read().count(kind)
    }

    pub(crate) fn callbacks_for(&self, kind: MessageKind) -> Vec<Handler> {
        self.inner.callbacks.read().for_kind(kind)
    }

    pub(crate) fn pending_reply(
        &self,
        correlation: &CorrelationId,
        status: Option<AckStatus>,
        release: bool,
    ) -> Option<Handler> {
        if status == Some(AckStatus::Shutdown) {
            // the recipient is gone; there is nothing left to revoke
            self.inner.sent_registrations.lock().remove(correlation);
        }
        self.inner
            .pending
            .lock()
            .on_reply(correlation, status, release)
    }

    /// Last status reported for a command or registration still awaiting acks
    /// through a handler. `None` once it has been released.
    pub fn command_status(&self, correlation: &CorrelationId) -> Option<AckStatus> {
        self.inner.pending.lock().status(correlation)
    }

    /// Stop tracking a command whose recipient will never answer. Returns
    /// whether an entry was dropped.
    pub fn cancel_pending(&self, correlation: &CorrelationId) -> bool {
        let removed = self.inner.pending.lock().remove(correlation);
        self.inner.sent_registrations.lock().remove(correlation);
        if removed {
            debug!(mailbox = %self.identity(), correlation = %correlation, "Cancelled pending command");
        }
        removed
    }

    /// Send `msg` to its recipient.
    ///
    /// A message without a recipient is dropped silently and reported as
    /// success. An identity that neither the directory nor the resolver knows
    /// is an error; the message is dropped and no bounce is generated.
    pub fn send(&self, msg: impl Into<Message>) -> Result<()> {
        match self.prepare(msg.into())? {
            Some((target, msg)) => self.deliver(&target, msg),
            None => Ok(()),
        }
    }

    pub fn send_to(&self, msg: impl Into<Message>, recipient: impl Into<Identity>) -> Result<()> {
        let mut msg = msg.into();
        msg.set_recipient(recipient.into());
        self.send(msg)
    }

    /// Resolve the recipient and stamp sender-side bookkeeping.
    ///
    /// `Ok(None)` means the message had no recipient and was dropped.
    pub(crate) fn prepare(&self, mut msg: Message) -> Result<Option<(Mailbox, Message)>> {
        let Some(recipient) = msg.recipient().cloned() else {
            MailboxStats::incr(&self.inner.stats.silent_drops);
            trace!(mailbox = %self.identity(), kind = %msg.kind(), "No recipient, dropping");
            return Ok(None);
        };

        let Some(target) = self.resolve(&recipient) else {
            MailboxStats::incr(&self.inner.stats.unresolved_recipients);
            warn!(
                mailbox = %self.identity(),
                recipient = %recipient,
                kind = %msg.kind(),
                "Unknown recipient, dropping message"
            );
            return Err(BusError::unknown_recipient(recipient, self.identity().clone()));
        };

        msg.fill_sender(self.identity());

        let persistent = msg.kind() == MessageKind::Registered;
        if let Some(cmd) = msg.as_command_mut() {
            let correlation = cmd.correlation();
            if let Some(handler) = cmd.take_ack_handler() {
                self.inner
                    .pending
                    .lock()
                    .insert(correlation, handler, persistent);
            }
        }

        if let MessageBody::Registered(reg) = &msg.body {
            self.inner.sent_registrations.lock().record(SentRegistration {
                recipient: recipient.clone(),
                correlation: reg.correlation(),
                match_args: reg.match_args().to_vec(),
            });
        }

        Ok(Some((target, msg)))
    }

    /// Hand a prepared message to `target`
    pub(crate) fn deliver(&self, target: &Mailbox, msg: Message) -> Result<()> {
        let correlation = msg.as_command().map(CommandMessage::correlation);

        // replies resolve through the target's directory without discovery;
        // a shut-down sender must not reappear in peers' directories
        let seeded = !target.same_mailbox(self)
            && !self.is_shutdown()
            && target
                .inner
                .directory
                .insert_if_absent(self.identity().clone(), self.clone());

        trace!(
            mailbox = %self.identity(),
            recipient = %target.identity(),
            kind = %msg.kind(),
            "Delivering message"
        );

        let result = target.receive(msg);
        if result.is_err() {
            if seeded {
                target.inner.directory.remove(self.identity());
            }
            if let Some(correlation) = correlation {
                self.inner.pending.lock().remove(&correlation);
            }
        }
        result
    }

    fn resolve(&self, recipient: &Identity) -> Option<Mailbox> {
        if recipient == self.identity() {
            return Some(self.clone());
        }
        if let Some(mailbox) = self.inner.directory.get(recipient) {
            return Some(mailbox);
        }
        let found = self.inner.resolver.as_ref()?.resolve(recipient)?;
        debug!(mailbox = %self.identity(), recipient = %recipient, "Discovered recipient");
        self.inner
            .directory
            .insert_if_absent(recipient.clone(), found.clone());
        Some(found)
    }

    /// Accept a message from another mailbox. Never blocks on dispatch.
    ///
    /// Registrations and unregistrations update the registration table at
    /// once and are then queued like everything else, so callbacks for those
    /// kinds still see them.
    pub fn receive(&self, msg: Message) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            drop(state);
            self.reject_closed(&msg);
            return Err(BusError::closed(self.identity().clone()));
        }

        match &msg.body {
            MessageBody::Registered(reg) => match msg.sender() {
                Some(sender) => state.registrations.add(Registration {
                    sender: sender.clone(),
                    correlation: reg.correlation(),
                    match_args: reg.match_args().to_vec(),
                }),
                None => warn!(
                    mailbox = %self.identity(),
                    "Ignoring registration without a sender"
                ),
            },
            MessageBody::Unregister(unreg) => {
                if let Some(sender) = msg.sender() {
                    let removed = state.registrations.remove(sender, &unreg.match_args);
                    debug!(
                        mailbox = %self.identity(),
                        subscriber = %sender,
                        removed,
                        "Registration revoked"
                    );
                }
            }
            _ => {}
        }

        state.inbound.push_back(msg);
        let depth = state.inbound.len();
        self.inner.ready.notify_one();
        drop(state);

        MailboxStats::incr(&self.inner.stats.received);
        let threshold = self.inner.config.queue_depth_warning;
        if threshold > 0 && depth == threshold {
            warn!(mailbox = %self.identity(), depth, "Inbound queue depth reached warning threshold");
        }
        Ok(())
    }

    /// Release whoever might block on a command that can no longer be handled
    fn reject_closed(&self, msg: &Message) {
        warn!(
            mailbox = %self.identity(),
            kind = %msg.kind(),
            "Mailbox is shut down, rejecting message"
        );
        if let Some(handle) = msg.as_command().and_then(CommandMessage::wait_handle) {
            handle.set(AckStatus::Shutdown);
        }
    }

    pub(crate) fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        self.inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainGuard { inner: &self.inner })
    }

    /// Next message in arrival order; `None` once empty or shut down
    pub(crate) fn pop_inbound(&self) -> Option<Message> {
        let mut state = self.inner.state.lock();
        if state.shutdown {
            return None;
        }
        state.inbound.pop_front()
    }

    /// Park while running and either empty or drained by another thread.
    /// Returns `false` on shutdown.
    pub(crate) fn wait_for_inbound(&self) -> bool {
        let mut state = self.inner.state.lock();
        // re-check every condition on every wake
        while !state.shutdown
            && (state.inbound.is_empty() || self.inner.draining.load(Ordering::Acquire))
        {
            self.inner.ready.wait(&mut state);
        }
        !state.shutdown
    }

    /// Send `command` and block until its wait handle is signaled.
    ///
    /// A wait handle is attached if the command has none, which also forces
    /// `want_ack`. Blocks indefinitely if the recipient never acknowledges;
    /// callers that need a timeout wrap this call. Must not be called from the
    /// recipient's own dispatch thread.
    pub fn send_and_wait(
        &self,
        command: CommandMessage,
        recipient: impl Into<Identity>,
    ) -> Result<AckStatus> {
        let mut command = command;
        let handle = command.ensure_wait_handle();
        self.send_to(Message::command(command), recipient)?;
        let status = handle.wait();
        handle.reset();
        Ok(status)
    }

    /// Acknowledge `command` on behalf of this mailbox.
    ///
    /// The command's wait handle is signaled first, so a blocked
    /// `send_and_wait` is released even when no ack message is requested.
    pub fn ack(&self, command: &Message, status: AckStatus, payload: Option<Payload>) -> Result<()> {
        let cmd = command
            .as_command()
            .ok_or(BusError::NotACommand(command.kind()))?;
        let Some(ack) = cmd.ack_command(status) else {
            return Ok(());
        };

        let mut msg = Message::ack(ack).with_shared_payload(payload);
        if let Some(sender) = command.sender() {
            msg.set_recipient(sender.clone());
        }
        self.send(msg)
    }

    /// Notify every registration whose pattern prefix-matches `match_args`.
    ///
    /// With `originating_ack`, registrations held by that ack's sender are
    /// skipped and the notifications are sent in its name. Returns how many
    /// notifications were delivered.
    pub fn match_registered(
        &self,
        match_args: &[Value],
        status: AckStatus,
        payload: Option<Payload>,
        originating_ack: Option<&Message>,
    ) -> usize {
        let hits = self.inner.state.lock().registrations.matching(match_args);
        let mut delivered = 0;

        for registration in hits {
            let ack = AckMessage::for_command(status, registration.correlation)
                .with_match_params(match_args.to_vec());
            let mut msg = Message::ack(ack).with_shared_payload(payload.clone());
            msg.set_recipient(registration.sender.clone());

            if let Some(origin) = originating_ack {
                if origin.sender() == Some(&registration.sender) {
                    trace!(
                        mailbox = %self.identity(),
                        subscriber = %registration.sender,
                        "Skipping echo to originator"
                    );
                    continue;
                }
                msg.override_sender(origin.sender().cloned());
            }

            match self.send(msg) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(
                    mailbox = %self.identity(),
                    subscriber = %registration.sender,
                    error = %e,
                    "Registration notification not delivered"
                ),
            }
        }
        delivered
    }
}

impl HasMailbox for Mailbox {
    fn mailbox(&self) -> &Mailbox {
        self
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("identity", self.identity())
            .field("dedicated_worker", &self.inner.config.dedicated_worker)
            .finish()
    }
}
