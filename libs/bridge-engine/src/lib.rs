//! Channel-oriented wiring between an application's message streams
//! and a partitioned broker.
//!
//! A [`BridgeConfig`] declares incoming and outgoing channels by name;
//! [`Engine::bootstrap`] validates the channel table, resolves codec
//! and failure-handler identifiers against the registries, and spawns
//! the pipeline tasks. Applications then take decoded-message streams
//! with [`Engine::take_incoming`] and feed outgoing channels through
//! [`Engine::attach_source`].

pub mod bootstrap;
pub mod channels;
pub mod config;
pub mod error;
pub mod registry;

pub use bootstrap::Engine;
pub use channels::{ChannelDirection, ChannelRegistry, ChannelSpec};
pub use config::{BridgeConfig, IncomingConfig, OutgoingConfig, SinkMode};
pub use error::EngineError;
pub use registry::{CodecRegistry, FailureHandlerRegistry};
