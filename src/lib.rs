//! Server-to-server federation engine for a self-hosted blog.
//!
//! The engine covers the protocol core: the activity object model, the
//! durable outbox with supersession and batched fan-out, the follower and
//! following registries, and the inbound activity state machine. Content
//! authoring, HTTP transport and request signing live in the embedding
//! application and reach the engine through its public services and ports.

pub mod activity_pub;
pub mod config;
pub mod error;

pub use error::{Error, Result};
