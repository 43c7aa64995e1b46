use std::collections::HashMap;
use std::sync::Arc;

use bridge_api::{
    Deserializer, DeserializationFailureHandler, F64Codec, JsonCodec, Serializer, StringCodec,
};

use crate::error::EngineError;

/// Wire codecs keyed by identifier.
///
/// Ships with the built-ins ("json", "string", "f64"); applications
/// register their own at startup. Resolution is case-sensitive exact
/// match and happens during bootstrap validation — an identifier that
/// does not resolve aborts startup, never a running pipeline.
pub struct CodecRegistry {
    serializers: HashMap<String, Arc<dyn Serializer>>,
    deserializers: HashMap<String, Arc<dyn Deserializer>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            serializers: HashMap::new(),
            deserializers: HashMap::new(),
        };
        registry.register_serializer("json", Arc::new(JsonCodec));
        registry.register_deserializer("json", Arc::new(JsonCodec));
        registry.register_serializer("string", Arc::new(StringCodec));
        registry.register_deserializer("string", Arc::new(StringCodec));
        registry.register_serializer("f64", Arc::new(F64Codec));
        registry.register_deserializer("f64", Arc::new(F64Codec));
        registry
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_serializer(&mut self, id: impl Into<String>, codec: Arc<dyn Serializer>) {
        self.serializers.insert(id.into(), codec);
    }

    pub fn register_deserializer(&mut self, id: impl Into<String>, codec: Arc<dyn Deserializer>) {
        self.deserializers.insert(id.into(), codec);
    }

    pub fn serializer(&self, id: &str) -> Result<Arc<dyn Serializer>, EngineError> {
        self.serializers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCodec(id.to_string()))
    }

    pub fn deserializer(&self, id: &str) -> Result<Arc<dyn Deserializer>, EngineError> {
        self.deserializers
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownCodec(id.to_string()))
    }
}

/// Decode-failure fallback strategies keyed by identifier.
///
/// Populated once at startup, read-only during operation. A channel
/// references a handler by string identifier; the reference is
/// resolved at bootstrap, so a typo fails configuration validation
/// instead of surfacing at record-processing time.
#[derive(Default)]
pub struct FailureHandlerRegistry {
    handlers: HashMap<String, Arc<dyn DeserializationFailureHandler>>,
}

impl FailureHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: impl Into<String>,
        handler: Arc<dyn DeserializationFailureHandler>,
    ) {
        let id = id.into();
        if self.handlers.insert(id.clone(), handler).is_some() {
            tracing::warn!(handler = %id, "failure handler replaced");
        }
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn DeserializationFailureHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn resolve_required(
        &self,
        id: &str,
    ) -> Result<Arc<dyn DeserializationFailureHandler>, EngineError> {
        self.resolve(id)
            .ok_or_else(|| EngineError::UnknownFailureHandler(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use bridge_api::ConstantFallback;

    use super::*;

    #[test]
    fn builtin_codecs_resolve_both_ways() {
        let registry = CodecRegistry::new();
        for id in ["json", "string", "f64"] {
            registry.serializer(id).unwrap();
            registry.deserializer(id).unwrap();
        }
        assert!(matches!(
            registry.serializer("avro"),
            Err(EngineError::UnknownCodec(id)) if id == "avro"
        ));
    }

    #[test]
    fn handler_resolution_is_case_sensitive() {
        let mut registry = FailureHandlerRegistry::new();
        registry.register("value-fallback", Arc::new(ConstantFallback(json!(null))));

        assert!(registry.resolve("value-fallback").is_some());
        assert!(registry.resolve("Value-Fallback").is_none());
        assert!(matches!(
            registry.resolve_required("VALUE-FALLBACK"),
            Err(EngineError::UnknownFailureHandler(_))
        ));
    }
}
