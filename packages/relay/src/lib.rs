//! Multiplayer relay for the storymode daily dungeon.
//!
//! Clients keep one TCP connection open and exchange `\n` delimited JSON frames with the relay.
//! A client announces itself with `connect`, joins a numbered floor with `floor`, and from then
//! on its `movement` and `dead` events are broadcast to everyone else on the same floor.
//!
//! * [`session`] holds the state owned by a single connection.
//! * [`floor`] is the registry actor that owns floor membership and fans messages out.
//! * [`dispatch`] routes decoded frames to their handlers.
//! * [`connection`] runs the accept loop and the per-connection read and write tasks.
//! * [`server`] composes all of the above behind [`Server`].

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod floor;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use server::{Server, ServerError, ServerHandle};

/// Locally assigned connection id. Starts at 1 and is never reused within a process.
pub type ConnId = u64;

/// One serialized outbound frame, without its delimiter.
pub type Msg = String;
