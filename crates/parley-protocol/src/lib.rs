//! # parley-protocol
//!
//! Wire definitions for the Parley presence-and-messaging engine.
//!
//! This crate defines what crosses a stream connection: the user profile
//! projection, presence and message events, and the Server-Sent-Events
//! codec that frames them.
//!
//! ## Frame Types
//!
//! - `Event` - A presence or message event from a user's mailbox
//! - `KeepAlive` - Idle heartbeat (`data: {}`)
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Event, Frame, PresenceStanza, Profile};
//!
//! let presence = PresenceStanza::new(Profile::new(1, "Alice"), true);
//! let frame = Frame::event(Event::presence(presence));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert!(encoded.starts_with(b"data: "));
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(decoded, frame);
//! ```

pub mod codec;
pub mod entity;
pub mod events;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use entity::{Profile, UserId};
pub use events::{ChatMessage, Event, EventBody, Frame, PresenceStanza, ThreadId};
