pub mod error;
mod sink;
mod source;

pub use error::PipelineError;
pub use sink::{SinkOptions, spawn_independent_sink, spawn_shared_sink};
pub use source::{FieldDecoder, SourceOptions, spawn_consumer_source};
