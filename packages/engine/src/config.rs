use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};

/// Tuning knobs for a sync session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Passes over deferred inserts at the end of a batch before their
    /// parents are synthesized from CRDT state
    pub max_deferred_passes: u32,

    /// Automatic full reloads attempted before resync is surfaced to the caller
    pub max_resync_attempts: u32,

    /// Compare every parent touched by a batch against the CRDT children
    /// collection and reconcile on mismatch
    pub verify_touched_parents: bool,

    /// Capacity of the outgoing local-update broadcast channel
    pub outgoing_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_deferred_passes: 2,
            max_resync_attempts: 1,
            verify_touched_parents: true,
            outgoing_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        if config.outgoing_capacity == 0 {
            return Err(SyncError::Config(
                "outgoing_capacity must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "max_resync_attempts": 3 }"#).unwrap();
        assert_eq!(config.max_resync_attempts, 3);
        assert_eq!(config.max_deferred_passes, 2);
        assert!(config.verify_touched_parents);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(EngineConfig::from_json_str(r#"{ "outgoing_capacity": 0 }"#).is_err());
        assert!(EngineConfig::from_json_str("[]").is_err());
    }
}
