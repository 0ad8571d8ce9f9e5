//! Commands, acknowledgements and registrations
//!
//! A command is an immutable request. What changes over its lifetime (the
//! latest [`AckStatus`], whether a blocked caller has been released) lives in
//! shared cells travelling with it (a status cell and the optional
//! [`WaitHandle`]) and in the sender's pending record, never in the request
//! fields themselves.

use crate::dispatch::{DispatchContext, Handler};
use crate::identity::CorrelationId;
use crate::message::Message;
use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress of a command as reported by its acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckStatus {
    WaitingToStart,
    Started,
    Progress,
    Completed,
    Failed,
    Busy,
    Shutdown,
    /// Default for an ack built without an explicit status; a diagnostic smell
    #[default]
    UnknownError,
}

impl AckStatus {
    /// No further acks are expected after a terminal status
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AckStatus::Completed | AckStatus::Failed | AckStatus::Shutdown | AckStatus::UnknownError
        )
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Default)]
struct Signal {
    set: bool,
    status: Option<AckStatus>,
}

#[derive(Debug, Default)]
struct WaitState {
    signal: Mutex<Signal>,
    changed: Condvar,
}

/// Manually-reset blocking signal used for synchronous round trips.
///
/// Clones share the same signal. Only the acknowledging side sets it.
#[derive(Debug, Clone, Default)]
pub struct WaitHandle {
    inner: Arc<WaitState>,
}

impl WaitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` and release every waiter
    pub fn set(&self, status: AckStatus) {
        let mut signal = self.inner.signal.lock();
        signal.set = true;
        signal.status = Some(status);
        self.inner.changed.notify_all();
    }

    /// Clear the signaled state; the last status is kept
    pub fn reset(&self) {
        self.inner.signal.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.inner.signal.lock().set
    }

    /// Last status recorded by `set`
    pub fn status(&self) -> Option<AckStatus> {
        self.inner.signal.lock().status
    }

    /// Block until signaled
    pub fn wait(&self) -> AckStatus {
        let mut signal = self.inner.signal.lock();
        while !signal.set {
            self.inner.changed.wait(&mut signal);
        }
        signal.status.unwrap_or_default()
    }

    /// Block until signaled or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<AckStatus> {
        let deadline = Instant::now() + timeout;
        let mut signal = self.inner.signal.lock();
        while !signal.set {
            if self.inner.changed.wait_until(&mut signal, deadline).timed_out() {
                break;
            }
        }
        if signal.set {
            Some(signal.status.unwrap_or_default())
        } else {
            None
        }
    }

    pub fn same_handle(&self, other: &WaitHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Last status reported for a command; every clone of the command shares it
#[derive(Debug, Clone, Default)]
struct StatusCell(Arc<Mutex<Option<AckStatus>>>);

/// Request for the recipient to perform `command`
#[derive(Clone)]
pub struct CommandMessage {
    command: Value,
    want_ack: bool,
    correlation: CorrelationId,
    ack_handler: Option<Handler>,
    wait_handle: Option<WaitHandle>,
    progress: StatusCell,
}

impl CommandMessage {
    /// Fire-and-forget command; no ack is requested
    pub fn new(command: impl Into<Value>) -> Self {
        Self {
            command: command.into(),
            want_ack: false,
            correlation: CorrelationId::new(),
            ack_handler: None,
            wait_handle: None,
            progress: StatusCell::default(),
        }
    }

    /// Route acks for this command to `handler`; implies `want_ack`
    pub fn with_ack_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message, &DispatchContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ack_handler = Some(Arc::new(handler));
        self.want_ack = true;
        self
    }

    /// Attach a fresh wait handle so a caller can block on the outcome
    pub fn with_wait_handle(mut self) -> Self {
        self.wait_handle = Some(WaitHandle::new());
        self
    }

    /// Attach a caller-owned wait handle
    pub fn with_shared_wait_handle(mut self, handle: WaitHandle) -> Self {
        self.wait_handle = Some(handle);
        self
    }

    pub fn with_want_ack(mut self, want_ack: bool) -> Self {
        self.want_ack = want_ack;
        self
    }

    pub fn command(&self) -> &Value {
        &self.command
    }

    pub fn wants_ack(&self) -> bool {
        self.want_ack
    }

    pub fn correlation(&self) -> CorrelationId {
        self.correlation
    }

    pub fn wait_handle(&self) -> Option<&WaitHandle> {
        self.wait_handle.as_ref()
    }

    pub fn has_ack_handler(&self) -> bool {
        self.ack_handler.is_some()
    }

    /// Latest status reported by `ack_command`, on this value or any clone
    pub fn status(&self) -> AckStatus {
        self.progress.0.lock().unwrap_or(AckStatus::WaitingToStart)
    }

    /// Block until the wait handle is signaled, then reset it.
    ///
    /// Returns immediately with the current status when no handle is attached.
    pub fn wait_for_status(&self) -> AckStatus {
        match &self.wait_handle {
            Some(handle) => {
                let status = handle.wait();
                handle.reset();
                status
            }
            None => self.status(),
        }
    }

    /// Signal the wait handle and build the ack, if one was requested.
    ///
    /// The wait handle is signaled regardless of `want_ack`.
    pub fn ack_command(&self, status: AckStatus) -> Option<AckMessage> {
        *self.progress.0.lock() = Some(status);
        if let Some(handle) = &self.wait_handle {
            handle.set(status);
        }
        if !self.want_ack {
            return None;
        }
        Some(AckMessage::for_command(status, self.correlation))
    }

    pub(crate) fn take_ack_handler(&mut self) -> Option<Handler> {
        self.ack_handler.take()
    }

    pub(crate) fn ensure_wait_handle(&mut self) -> WaitHandle {
        if let Some(handle) = &self.wait_handle {
            return handle.clone();
        }
        let handle = WaitHandle::new();
        self.wait_handle = Some(handle.clone());
        // without an ack nobody would be waiting on the other end
        self.want_ack = true;
        handle
    }
}

impl fmt::Debug for CommandMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandMessage")
            .field("command", &self.command)
            .field("want_ack", &self.want_ack)
            .field("correlation", &self.correlation)
            .field("has_ack_handler", &self.ack_handler.is_some())
            .field("has_wait_handle", &self.wait_handle.is_some())
            .finish()
    }
}

/// Response to a command or a registration match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AckMessage {
    pub status: AckStatus,
    /// Correlation of the command this answers
    pub correlation: Option<CorrelationId>,
    /// Probe that triggered a registration match
    pub match_params: Option<Vec<Value>>,
}

impl AckMessage {
    pub fn new(status: AckStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn for_command(status: AckStatus, correlation: CorrelationId) -> Self {
        Self {
            status,
            correlation: Some(correlation),
            match_params: None,
        }
    }

    pub fn with_match_params(mut self, params: Vec<Value>) -> Self {
        self.match_params = Some(params);
        self
    }
}

/// Standing subscription held in the recipient's registration table.
///
/// The recipient answers it through [`crate::Mailbox::match_registered`]
/// whenever a probe matches `match_args`.
#[derive(Debug, Clone)]
pub struct RegisteredMessage {
    command: CommandMessage,
    match_args: Vec<Value>,
}

impl RegisteredMessage {
    pub fn new<I, V>(match_args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            command: CommandMessage::new(Value::Null),
            match_args: match_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Route match notifications to `handler`
    pub fn with_ack_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message, &DispatchContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.command = self.command.with_ack_handler(handler);
        self
    }

    pub fn match_args(&self) -> &[Value] {
        &self.match_args
    }

    pub fn command(&self) -> &CommandMessage {
        &self.command
    }

    pub(crate) fn command_mut(&mut self) -> &mut CommandMessage {
        &mut self.command
    }

    pub fn correlation(&self) -> CorrelationId {
        self.command.correlation()
    }
}

/// Revokes the sender's registration with equal `match_args`
#[derive(Debug, Clone, PartialEq)]
pub struct UnregisterMessage {
    pub match_args: Vec<Value>,
}

impl UnregisterMessage {
    pub fn new<I, V>(match_args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            match_args: match_args.into_iter().map(Into::into).collect(),
        }
    }
}
