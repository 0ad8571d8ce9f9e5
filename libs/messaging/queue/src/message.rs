//! Message model
//!
//! A [`Message`] is the envelope every mailbox routes: sender, recipient, an
//! optional opaque payload and a kind-specific body. The routing fields are
//! only written by builders before sending and by the one-time sender
//! backfill in [`crate::Mailbox::send`].

use crate::command::{AckMessage, CommandMessage, RegisteredMessage, UnregisterMessage};
use crate::identity::{CorrelationId, Identity};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque payload carried alongside any message
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Closed set of message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Info,
    Command,
    Ack,
    Registered,
    Unregister,
    Event,
    Bounce,
}

impl MessageKind {
    pub const ALL: [MessageKind; 7] = [
        MessageKind::Info,
        MessageKind::Command,
        MessageKind::Ack,
        MessageKind::Registered,
        MessageKind::Unregister,
        MessageKind::Event,
        MessageKind::Bounce,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Info => "info",
            MessageKind::Command => "command",
            MessageKind::Ack => "ack",
            MessageKind::Registered => "registered",
            MessageKind::Unregister => "unregister",
            MessageKind::Event => "event",
            MessageKind::Bounce => "bounce",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of an informative message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InfoLevel {
    #[default]
    Info,
    Warning,
    Error,
}

/// Fire-and-forget notification, e.g. a log line handed to another thread
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoMessage {
    pub level: InfoLevel,
    pub args: Vec<Value>,
}

impl InfoMessage {
    pub fn new<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            level: InfoLevel::Info,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_level(mut self, level: InfoLevel) -> Self {
        self.level = level;
        self
    }
}

/// Answer to a registration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventMessage {
    pub registration: Option<CorrelationId>,
    pub args: Vec<Value>,
}

impl EventMessage {
    pub fn new<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            registration: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Event answering the registration with the given correlation
    pub fn for_registration(mut self, registration: CorrelationId) -> Self {
        self.registration = Some(registration);
        self
    }
}

/// The recipient could not or would not handle `original`
#[derive(Debug, Clone)]
pub struct BounceMessage {
    pub original: Box<Message>,
    pub reason: Option<String>,
    /// Correlation of the bounced command, if it was one
    pub correlation: Option<CorrelationId>,
}

/// Kind-specific part of a message
#[derive(Debug, Clone)]
pub enum MessageBody {
    Info(InfoMessage),
    Command(CommandMessage),
    Ack(AckMessage),
    Registered(RegisteredMessage),
    Unregister(UnregisterMessage),
    Event(EventMessage),
    Bounce(BounceMessage),
}

impl MessageBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Info(_) => MessageKind::Info,
            MessageBody::Command(_) => MessageKind::Command,
            MessageBody::Ack(_) => MessageKind::Ack,
            MessageBody::Registered(_) => MessageKind::Registered,
            MessageBody::Unregister(_) => MessageKind::Unregister,
            MessageBody::Event(_) => MessageKind::Event,
            MessageBody::Bounce(_) => MessageKind::Bounce,
        }
    }
}

/// Routed envelope
#[derive(Clone)]
pub struct Message {
    sender: Option<Identity>,
    recipient: Option<Identity>,
    payload: Option<Payload>,
    pub(crate) body: MessageBody,
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            sender: None,
            recipient: None,
            payload: None,
            body,
        }
    }

    pub fn info(info: InfoMessage) -> Self {
        Self::new(MessageBody::Info(info))
    }

    pub fn command(command: CommandMessage) -> Self {
        Self::new(MessageBody::Command(command))
    }

    pub fn ack(ack: AckMessage) -> Self {
        Self::new(MessageBody::Ack(ack))
    }

    pub fn registered(registration: RegisteredMessage) -> Self {
        Self::new(MessageBody::Registered(registration))
    }

    pub fn unregister(unregister: UnregisterMessage) -> Self {
        Self::new(MessageBody::Unregister(unregister))
    }

    pub fn event(event: EventMessage) -> Self {
        Self::new(MessageBody::Event(event))
    }

    /// Set the recipient
    pub fn with_recipient(mut self, recipient: impl Into<Identity>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Set the sender explicitly instead of letting the sending mailbox fill it in
    pub fn with_sender(mut self, sender: impl Into<Identity>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Attach an opaque payload
    pub fn with_payload<T: Any + Send + Sync>(mut self, payload: T) -> Self {
        self.payload = Some(Arc::new(payload));
        self
    }

    /// Attach an already shared payload
    pub fn with_shared_payload(mut self, payload: Option<Payload>) -> Self {
        self.payload = payload;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn sender(&self) -> Option<&Identity> {
        self.sender.as_ref()
    }

    pub fn recipient(&self) -> Option<&Identity> {
        self.recipient.as_ref()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Downcast the payload
    pub fn payload_as<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn is_sender(&self, identity: &Identity) -> bool {
        self.sender.as_ref() == Some(identity)
    }

    pub fn is_recipient(&self, identity: &Identity) -> bool {
        self.recipient.as_ref() == Some(identity)
    }

    /// Command part of a `Command` or `Registered` message
    pub fn as_command(&self) -> Option<&CommandMessage> {
        match &self.body {
            MessageBody::Command(cmd) => Some(cmd),
            MessageBody::Registered(reg) => Some(reg.command()),
            _ => None,
        }
    }

    pub(crate) fn as_command_mut(&mut self) -> Option<&mut CommandMessage> {
        match &mut self.body {
            MessageBody::Command(cmd) => Some(cmd),
            MessageBody::Registered(reg) => Some(reg.command_mut()),
            _ => None,
        }
    }

    pub fn as_ack(&self) -> Option<&AckMessage> {
        match &self.body {
            MessageBody::Ack(ack) => Some(ack),
            _ => None,
        }
    }

    pub fn as_registered(&self) -> Option<&RegisteredMessage> {
        match &self.body {
            MessageBody::Registered(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn as_unregister(&self) -> Option<&UnregisterMessage> {
        match &self.body {
            MessageBody::Unregister(unreg) => Some(unreg),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&EventMessage> {
        match &self.body {
            MessageBody::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_info(&self) -> Option<&InfoMessage> {
        match &self.body {
            MessageBody::Info(info) => Some(info),
            _ => None,
        }
    }

    pub fn as_bounce(&self) -> Option<&BounceMessage> {
        match &self.body {
            MessageBody::Bounce(bounce) => Some(bounce),
            _ => None,
        }
    }

    /// Correlation an `Ack` or `Bounce` carries back to its command
    pub fn correlation(&self) -> Option<CorrelationId> {
        match &self.body {
            MessageBody::Ack(ack) => ack.correlation,
            MessageBody::Bounce(bounce) => bounce.correlation,
            _ => None,
        }
    }

    /// Build a bounce addressed back to this message's sender.
    ///
    /// Never sent automatically; a handler that rejects a message calls this
    /// and sends the result itself.
    pub fn bounce(&self, reason: Option<impl Into<String>>) -> Message {
        let correlation = self.as_command().map(|cmd| cmd.correlation());
        Message {
            sender: None,
            recipient: self.sender.clone(),
            payload: None,
            body: MessageBody::Bounce(BounceMessage {
                original: Box::new(self.clone()),
                reason: reason.map(Into::into),
                correlation,
            }),
        }
    }

    /// One-time sender backfill
    pub(crate) fn fill_sender(&mut self, sender: &Identity) {
        if self.sender.is_none() {
            self.sender = Some(sender.clone());
        }
    }

    pub(crate) fn set_recipient(&mut self, recipient: Identity) {
        self.recipient = Some(recipient);
    }

    pub(crate) fn override_sender(&mut self, sender: Option<Identity>) {
        self.sender = sender;
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind())
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("has_payload", &self.payload.is_some())
            .field("body", &self.body)
            .finish()
    }
}

impl From<InfoMessage> for Message {
    fn from(info: InfoMessage) -> Self {
        Message::info(info)
    }
}

impl From<CommandMessage> for Message {
    fn from(command: CommandMessage) -> Self {
        Message::command(command)
    }
}

impl From<AckMessage> for Message {
    fn from(ack: AckMessage) -> Self {
        Message::ack(ack)
    }
}

impl From<RegisteredMessage> for Message {
    fn from(registration: RegisteredMessage) -> Self {
        Message::registered(registration)
    }
}

impl From<UnregisterMessage> for Message {
    fn from(unregister: UnregisterMessage) -> Self {
        Message::unregister(unregister)
    }
}

impl From<EventMessage> for Message {
    fn from(event: EventMessage) -> Self {
        Message::event(event)
    }
}
