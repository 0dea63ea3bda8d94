//! Backend collaborator layer: the chat backend contract, a PostgREST client,
//! the realtime websocket client and an in-process backend.

pub mod backend;
pub mod error;
pub mod memory;
pub mod realtime;
pub mod rest;

pub use backend::{ChatBackend, Subscription, SubscriptionGuard};
pub use error::{NetError, Result};
pub use memory::MemoryBackend;
pub use realtime::{RealtimeClient, RealtimeCommand};
pub use rest::{RestBackend, RestConfig};
