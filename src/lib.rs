//! novalink drives one central-role BLE session against a named
//! peripheral: scan for its advertisement, connect, enumerate the GATT
//! service topology, read what is readable, subscribe to the live
//! characteristics and stream their notifications until the listen
//! window closes.
//!
//! The lifecycle is an explicit state machine owned by
//! [`Session`](session::Session); the platform BLE stack sits behind the
//! [`api`] traits so that any backend (or the in-memory [`mock`] one)
//! can drive it. Everything the session learns is reported as an ordered
//! stream of [`SessionEvent`](event::SessionEvent)s; rendering them is
//! the consumer's business.
//!
//! ```no_run
//! use novalink::event::event_channel;
//! use novalink::mock::MockCentral;
//! use novalink::session::{cancel_pair, Session, SessionConfig};
//! use tokio_stream::StreamExt;
//!
//! # async fn run() {
//! let central = MockCentral::new();
//! let (sink, mut events) = event_channel();
//! let (_cancel, token) = cancel_pair();
//!
//! let end = Session::new(central, SessionConfig::default())
//!     .run(&sink, &token)
//!     .await;
//!
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! println!("session ended: {:?}", end);
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;

pub mod api;
pub mod event;
pub mod explore;
pub mod mock;
pub mod registry;
pub mod relay;
pub mod scanner;
pub mod session;

pub use api::{CharProps, Characteristic, DeviceId, Service};
pub use event::{EventSink, SessionEvent};
pub use scanner::DeviceHandle;
pub use session::{
    cancel_pair, CancelHandle, CancelToken, DisconnectReason, Session, SessionConfig, SessionEnd,
    SessionState,
};

/// The errors a platform backend can surface through the [`api`] traits.
///
/// Session-terminal failures are not represented here; those are reason
/// codes on [`DisconnectReason`]. Per-characteristic failures carry one
/// of these variants inside the read/subscribe reports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Not connected")]
    NotConnected,

    #[error("No such characteristic")]
    NoSuchCharacteristic,

    #[error("The operation is not supported: {0}")]
    NotSupported(String),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Runtime Error: {0}")]
    RuntimeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
