use ferry_mem::{AllocatorOptions, LinearMemoryOptions};
use serde::Deserialize;

use crate::{BridgeError, Result};

/// Handles are `u32` and index 0 is reserved.
pub const MAX_HANDLE_CAPACITY: usize = u32::MAX as usize - 1;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BoundaryConfig {
    pub memory: LinearMemoryOptions,
    pub allocator: AllocatorOptions,
    /// Handle slots preallocated up front.
    pub handle_capacity: usize,
    /// Run destructors of closures and exported objects still live when the boundary is dropped.
    pub finalize_on_drop: bool,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            memory: LinearMemoryOptions::default(),
            allocator: AllocatorOptions::default(),
            handle_capacity: 128,
            finalize_on_drop: true,
        }
    }
}

impl BoundaryConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| BridgeError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.handle_capacity > MAX_HANDLE_CAPACITY {
            return Err(BridgeError::Config(format!(
                "handle_capacity {} exceeds the {MAX_HANDLE_CAPACITY} addressable handles",
                self.handle_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = BoundaryConfig::from_json(r#"{"memory": {"max_pages": 32}}"#).unwrap();
        assert_eq!(
            config,
            BoundaryConfig {
                memory: LinearMemoryOptions {
                    initial_pages: 1,
                    max_pages: 32
                },
                ..BoundaryConfig::default()
            }
        );
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            BoundaryConfig::from_json("{\"handle_capacity\": -1}"),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn handle_capacity_beyond_u32_is_rejected() {
        assert!(matches!(
            BoundaryConfig::from_json(r#"{"handle_capacity": 18446744073709551615}"#),
            Err(BridgeError::Config(_))
        ));
        let config = BoundaryConfig {
            handle_capacity: usize::MAX,
            ..BoundaryConfig::default()
        };
        assert!(matches!(
            crate::Boundary::new(config),
            Err(BridgeError::Config(_))
        ));
    }
}
