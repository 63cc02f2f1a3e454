//! Upstream connection and delivery replay for webhooker.
//!
//! This crate holds the pieces that talk to the network: a [`Session`] keeps
//! one WebSocket connection to the webhooker relay open and decodes every
//! frame into a [`Delivery`], and the [`Forwarder`] replays each delivery as
//! an HTTP request against the developer's local server.
//!
//! # Architecture
//!
//! ```text
//! relay  --WS-->  Session  --dispatch-->  Forwarder  --HTTP-->  target
//!                    |                        |
//!                    +-------[Event Sink]-----+
//! ```
//!
//! Forwarding happens on spawned tasks, so a slow target never holds up the
//! read loop or other deliveries. Reconnecting after a session ends is left
//! to the caller.

pub mod forward;
pub mod message;
pub mod session;

pub use forward::{Forwarder, ForwarderConfig, ForwardError, DEFAULT_FORWARD_TIMEOUT};
pub use message::{decode, DecodeError, Delivery, DeliveryRecord};
pub use session::{ConnectError, DeliveryHandler, Session, TerminationReason};
