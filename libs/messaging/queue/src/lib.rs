//! In-Process Message Queue
//!
//! Mailbox bus for threads that talk to each other by message instead of by
//! shared state. Each party owns a [`Mailbox`]; peers address it by
//! [`Identity`], and every message is handled on the thread that drains the
//! recipient, either its dedicated worker or an external driver.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  send   ┌──────────────────────────┐
//! │  Mailbox A   │────────▶│  Mailbox B               │
//! │              │         │  inbound queue (FIFO)    │
//! │  pending     │◀────────│  registration table      │
//! │  ack table   │   ack   │  callbacks by kind       │
//! └──────────────┘         └──────────────────────────┘
//!        ▲                              │
//!        └──── MailboxRegistry ◀────────┘
//!              (discovery)
//! ```
//!
//! # Message Flow
//!
//! - **Commands** carry a [`CorrelationId`]. Acks for them come back to the
//!   sender's pending table and run the handler attached at send time.
//! - **Registrations** are standing subscriptions. The recipient answers
//!   them with [`Mailbox::match_registered`] whenever a probe prefix-matches.
//! - **Synchronous round trips** block on the [`WaitHandle`] travelling with
//!   a command; see [`Mailbox::send_and_wait`].
//!
//! # Examples
//!
//! ```rust
//! use message_queue::{AckStatus, CommandMessage, Mailbox, MessageKind};
//!
//! let client = Mailbox::new("client");
//! let server = Mailbox::new("server");
//! client.register_receiver("server", server.clone());
//!
//! server.register_callback(MessageKind::Command, |msg, ctx| {
//!     ctx.ack(msg, AckStatus::Completed, None)?;
//!     Ok(())
//! });
//!
//! let cmd = CommandMessage::new("reload").with_ack_handler(|ack, _| {
//!     assert_eq!(ack.as_ack().map(|a| a.status), Some(AckStatus::Completed));
//!     Ok(())
//! });
//! client.send_to(cmd, "server").unwrap();
//!
//! server.process_messages();
//! client.process_messages();
//! ```

pub mod command;
pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod mailbox;
pub mod message;
pub mod registration;
mod shutdown;
pub mod stats;

pub use command::{
    AckMessage, AckStatus, CommandMessage, RegisteredMessage, UnregisterMessage, WaitHandle,
};
pub use config::{BusConfig, MailboxConfig, MailboxConfigToml};
pub use directory::{HasMailbox, MailboxRegistry, Resolver};
pub use dispatch::{CallbackId, DispatchContext, Handler};
pub use error::BusError;
pub use identity::{CorrelationId, Identity};
pub use mailbox::{Mailbox, MailboxBuilder};
pub use message::{
    BounceMessage, EventMessage, InfoLevel, InfoMessage, Message, MessageBody, MessageKind,
    Payload,
};
pub use registration::{prefix_matches, Registration, SentRegistration};
pub use stats::{MailboxStats, MailboxStatsSnapshot};

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
