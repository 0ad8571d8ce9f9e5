//! Dispatch engine
//!
//! Drains a mailbox's inbound queue one message at a time, in arrival order.
//! Acks and bounces carrying the correlation of a pending command go straight
//! to that command's handler; everything else fans out to the callbacks
//! registered for its kind.
//!
//! Every drain owns a [`DispatchContext`]. Handlers send through it, and
//! commands sent that way are staged until the drain finishes so two mailboxes
//! volleying commands cannot recurse into each other.

use crate::command::AckStatus;
use crate::identity::{CorrelationId, Identity};
use crate::mailbox::Mailbox;
use crate::message::{Message, MessageKind, Payload};
use crate::stats::MailboxStats;
use crate::Result;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

/// Callback invoked on the dispatching thread
pub type Handler =
    Arc<dyn Fn(&Message, &DispatchContext<'_>) -> anyhow::Result<()> + Send + Sync>;

/// Token returned by [`Mailbox::register_callback`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Default)]
pub(crate) struct CallbackTable {
    next_id: u64,
    by_kind: HashMap<MessageKind, Vec<(CallbackId, Handler)>>,
}

impl CallbackTable {
    pub fn register(&mut self, kind: MessageKind, handler: Handler) -> CallbackId {
        self.next_id += 1;
        let id = CallbackId(self.next_id);
        self.by_kind.entry(kind).or_default().push((id, handler));
        id
    }

    pub fn unregister(&mut self, kind: MessageKind, id: CallbackId) -> bool {
        let Some(handlers) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        match handlers.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Handlers for `kind` in registration order
    pub fn for_kind(&self, kind: MessageKind) -> Vec<Handler> {
        self.by_kind
            .get(&kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }
}

struct PendingCommand {
    handler: Handler,
    /// Last status carried by a correlated ack
    status: AckStatus,
    /// Registrations keep receiving match notifications until revoked
    persistent: bool,
}

/// Sender-side record of commands awaiting acknowledgement.
///
/// Commands leave on a terminal ack or a bounce, registrations on revocation
/// or a `Shutdown` notification from their recipient, and everything on the
/// sender's own shutdown. A recipient that takes a command and never answers
/// leaves its entry behind; [`Mailbox::cancel_pending`] drops it.
#[derive(Default)]
pub(crate) struct PendingTable {
    entries: HashMap<CorrelationId, PendingCommand>,
}

impl PendingTable {
    pub fn insert(&mut self, correlation: CorrelationId, handler: Handler, persistent: bool) {
        self.entries.insert(
            correlation,
            PendingCommand {
                handler,
                status: AckStatus::WaitingToStart,
                persistent,
            },
        );
    }

    /// Record `status` (when the reply carries one) and return the handler.
    ///
    /// The entry is released when `release` is set and it is not persistent.
    /// A `Shutdown` status releases persistent entries as well.
    pub fn on_reply(
        &mut self,
        correlation: &CorrelationId,
        status: Option<AckStatus>,
        release: bool,
    ) -> Option<Handler> {
        let entry = self.entries.get_mut(correlation)?;
        if let Some(status) = status {
            entry.status = status;
        }
        let handler = Arc::clone(&entry.handler);
        let closed = status == Some(AckStatus::Shutdown);
        if closed || (release && !entry.persistent) {
            self.entries.remove(correlation);
        }
        Some(handler)
    }

    pub fn status(&self, correlation: &CorrelationId) -> Option<AckStatus> {
        self.entries.get(correlation).map(|entry| entry.status)
    }

    pub fn remove(&mut self, correlation: &CorrelationId) -> bool {
        self.entries.remove(correlation).is_some()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Execution context of one drain, handed to every handler it invokes
pub struct DispatchContext<'a> {
    mailbox: &'a Mailbox,
    staged: RefCell<Vec<(Mailbox, Message)>>,
}

impl<'a> DispatchContext<'a> {
    pub(crate) fn new(mailbox: &'a Mailbox) -> Self {
        Self {
            mailbox,
            staged: RefCell::new(Vec::new()),
        }
    }

    /// Mailbox being drained
    pub fn mailbox(&self) -> &Mailbox {
        self.mailbox
    }

    pub fn identity(&self) -> &Identity {
        self.mailbox.identity()
    }

    /// Send from inside a handler.
    ///
    /// Resolution happens now, so an unknown recipient still fails
    /// immediately. Commands are held back until the current drain completes;
    /// other kinds are delivered right away.
    pub fn send(&self, msg: impl Into<Message>) -> Result<()> {
        let Some((target, msg)) = self.mailbox.prepare(msg.into())? else {
            return Ok(());
        };
        if msg.kind() == MessageKind::Command {
            trace!(
                mailbox = %self.mailbox.identity(),
                recipient = %target.identity(),
                "Staging command until drain completes"
            );
            MailboxStats::incr(&self.mailbox.stats_ref().commands_staged);
            self.staged.borrow_mut().push((target, msg));
            return Ok(());
        }
        self.mailbox.deliver(&target, msg)
    }

    pub fn send_to(&self, msg: impl Into<Message>, recipient: impl Into<Identity>) -> Result<()> {
        let mut msg = msg.into();
        msg.set_recipient(recipient.into());
        self.send(msg)
    }

    /// Acknowledge `command`; see [`Mailbox::ack`]
    pub fn ack(&self, command: &Message, status: AckStatus, payload: Option<Payload>) -> Result<()> {
        self.mailbox.ack(command, status, payload)
    }

    /// See [`Mailbox::match_registered`]
    pub fn match_registered(
        &self,
        match_args: &[Value],
        status: AckStatus,
        payload: Option<Payload>,
        originating_ack: Option<&Message>,
    ) -> usize {
        self.mailbox
            .match_registered(match_args, status, payload, originating_ack)
    }

    /// Commands waiting for the drain to finish
    pub fn staged_len(&self) -> usize {
        self.staged.borrow().len()
    }

    pub(crate) fn flush(self) {
        let staged = self.staged.into_inner();
        for (target, msg) in staged {
            if let Err(e) = self.mailbox.deliver(&target, msg) {
                warn!(
                    mailbox = %self.mailbox.identity(),
                    recipient = %target.identity(),
                    error = %e,
                    "Dropping staged command"
                );
            }
        }
    }
}

impl fmt::Debug for DispatchContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("mailbox", self.mailbox.identity())
            .field("staged", &self.staged_len())
            .finish()
    }
}

impl Mailbox {
    /// Drain everything currently queued without blocking.
    ///
    /// Returns `false` when nothing was processed, including when another
    /// drain of this mailbox is already running.
    pub fn process_messages(&self) -> bool {
        let Some(_guard) = self.begin_drain() else {
            MailboxStats::incr(&self.stats_ref().contended_drains);
            debug!(mailbox = %self.identity(), "Drain already in progress");
            return false;
        };

        let ctx = DispatchContext::new(self);
        let mut processed = false;
        while let Some(msg) = self.pop_inbound() {
            processed = true;
            self.dispatch(msg, &ctx);
        }
        ctx.flush();
        processed
    }

    /// Park until a message arrives or the mailbox shuts down, then drain.
    pub fn process_messages_blocking(&self) -> bool {
        if !self.wait_for_inbound() {
            return false;
        }
        self.process_messages()
    }

    fn dispatch(&self, msg: Message, ctx: &DispatchContext<'_>) {
        let kind = msg.kind();
        MailboxStats::incr(&self.stats_ref().dispatched);

        if matches!(kind, MessageKind::Ack | MessageKind::Bounce) {
            if let Some(correlation) = msg.correlation() {
                let status = msg.as_ack().map(|ack| ack.status);
                let release = status.map_or(true, AckStatus::is_terminal);
                if let Some(handler) = self.pending_reply(&correlation, status, release) {
                    MailboxStats::incr(&self.stats_ref().acks_correlated);
                    self.invoke(&handler, &msg, ctx);
                    return;
                }
                trace!(
                    mailbox = %self.identity(),
                    correlation = %correlation,
                    "No pending handler, falling back to callbacks"
                );
            }
        }

        let handlers = self.callbacks_for(kind);
        if handlers.is_empty() {
            let unanswered = matches!(kind, MessageKind::Ack | MessageKind::Bounce);
            if unanswered && self.config().log_dropped_acks {
                warn!(
                    mailbox = %self.identity(),
                    kind = %kind,
                    sender = ?msg.sender(),
                    "Dropping ack with no handler or callback"
                );
            } else {
                trace!(mailbox = %self.identity(), kind = %kind, "No callbacks registered");
            }
        }
        for handler in handlers {
            self.invoke(&handler, &msg, ctx);
        }
    }

    fn invoke(&self, handler: &Handler, msg: &Message, ctx: &DispatchContext<'_>) {
        let outcome = if self.config().catch_callback_panics {
            panic::catch_unwind(AssertUnwindSafe(|| handler(msg, ctx)))
        } else {
            Ok(handler(msg, ctx))
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                MailboxStats::incr(&self.stats_ref().callback_failures);
                error!(
                    mailbox = %self.identity(),
                    kind = %msg.kind(),
                    error = %e,
                    "Callback failed"
                );
            }
            Err(panic) => {
                MailboxStats::incr(&self.stats_ref().callback_failures);
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(
                    mailbox = %self.identity(),
                    kind = %msg.kind(),
                    panic = %reason,
                    "Callback panicked"
                );
            }
        }
    }
}
