use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelDirection {
    Incoming,
    Outgoing,
}

impl std::fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelDirection::Incoming => write!(f, "incoming"),
            ChannelDirection::Outgoing => write!(f, "outgoing"),
        }
    }
}

/// Declared channel identity, as seen by conflict validation.
#[derive(Debug, Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub direction: ChannelDirection,
    /// merge-policy=merge: the name may intentionally serve both
    /// directions.
    pub merge: bool,
}

/// Closed table of declared channels, validated before any pipeline
/// task starts.
///
/// Detection only: a conflict aborts startup, nothing is resolved or
/// rewritten here.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<ChannelSpec>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one declared channel.
    ///
    /// Fails when the name already exists in the opposite direction
    /// and neither declaration opts into merge, or when the name is
    /// duplicated within its own direction.
    pub fn register(&mut self, spec: ChannelSpec) -> Result<(), EngineError> {
        for existing in &self.channels {
            if existing.name != spec.name {
                continue;
            }
            if existing.direction == spec.direction {
                return Err(EngineError::Config(format!(
                    "channel '{}' is declared twice as {}",
                    spec.name, spec.direction
                )));
            }
            if !existing.merge && !spec.merge {
                return Err(EngineError::Conflict(spec.name));
            }
        }
        self.channels.push(spec);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.channels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, direction: ChannelDirection, merge: bool) -> ChannelSpec {
        ChannelSpec { name: name.into(), direction, merge }
    }

    #[test]
    fn same_name_both_directions_conflicts() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(spec("my-topic", ChannelDirection::Outgoing, false))
            .unwrap();
        let err = registry
            .register(spec("my-topic", ChannelDirection::Incoming, false))
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(name) if name == "my-topic"));
    }

    #[test]
    fn merge_on_either_side_resolves_the_conflict() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(spec("my-topic", ChannelDirection::Outgoing, false))
            .unwrap();
        registry
            .register(spec("my-topic", ChannelDirection::Incoming, true))
            .unwrap();

        let mut registry = ChannelRegistry::new();
        registry
            .register(spec("my-topic", ChannelDirection::Outgoing, true))
            .unwrap();
        registry
            .register(spec("my-topic", ChannelDirection::Incoming, false))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_within_one_direction_is_a_config_error() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(spec("dup", ChannelDirection::Incoming, false))
            .unwrap();
        let err = registry
            .register(spec("dup", ChannelDirection::Incoming, true))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn distinct_names_never_interact() {
        let mut registry = ChannelRegistry::new();
        registry
            .register(spec("a", ChannelDirection::Incoming, false))
            .unwrap();
        registry
            .register(spec("b", ChannelDirection::Outgoing, false))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }
}
