pub mod client;
pub mod codec;
pub mod error;
pub mod failure;
pub mod health;
pub mod memory;
pub mod message;
pub mod record;

pub use client::{BrokerClient, BrokerClientFactory, ConsumerPosition};
pub use codec::{Deserializer, F64Codec, JsonCodec, Serializer, StringCodec};
pub use error::{BrokerError, ErrorKind};
pub use failure::{ConstantFallback, DeserializationFailureHandler};
pub use health::{ChannelHealth, HealthRegistry, HealthStatus};
pub use memory::InMemoryBroker;
pub use message::Message;
pub use record::{ConsumerRecord, DecodedMessage, Header, ProducerRecord, RecordMetadata};
