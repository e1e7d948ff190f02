use std::time::Duration;

use pausa::{DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, ResourceLimits};
use serde::{Deserialize, Serialize};

use crate::SandboxError;

/// Resource limits for one run, deserializable from host configuration.
///
/// Every field is optional. An absent field disables that limit, except the recursion depth
/// which falls back to the engine default of 1000 frames.
///
/// ```
/// use pausa_sandbox::Limits;
///
/// let limits: Limits = serde_json::from_str(r#"{"max_duration_secs": 0.5, "max_memory": 1048576}"#).unwrap();
/// assert_eq!(limits.max_memory, Some(1_048_576));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Limits {
    pub max_allocations: Option<usize>,
    pub max_duration_secs: Option<f64>,
    /// Approximate heap size in bytes.
    pub max_memory: Option<usize>,
    /// Collect the heap every N allocations.
    pub gc_interval: Option<usize>,
    pub max_recursion_depth: Option<usize>,
    /// VM instructions per execution step.
    pub max_operations: Option<usize>,
}

impl Limits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration_secs(mut self, secs: f64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    /// Converts to the engine's limit configuration.
    ///
    /// Fails with a validation error when the duration is negative, NaN or too large.
    pub fn to_resource_limits(&self) -> Result<ResourceLimits, SandboxError> {
        let mut limits = ResourceLimits::new()
            .max_recursion_depth(Some(self.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH)));
        if let Some(limit) = self.max_allocations {
            limits = limits.max_allocations(limit);
        }
        if let Some(secs) = self.max_duration_secs {
            let duration = Duration::try_from_secs_f64(secs)
                .map_err(|err| SandboxError::Validation(format!("invalid max_duration_secs {secs}: {err}")))?;
            limits = limits.max_duration(duration);
        }
        if let Some(bytes) = self.max_memory {
            limits = limits.max_memory(bytes);
        }
        if let Some(interval) = self.gc_interval {
            if interval == 0 {
                return Err(SandboxError::Validation("gc_interval must be positive".to_owned()));
            }
            limits = limits.gc_interval(interval);
        }
        if let Some(limit) = self.max_operations {
            limits = limits.max_operations(limit);
        }
        Ok(limits)
    }

    pub(crate) fn tracker(&self) -> Result<LimitedTracker, SandboxError> {
        self.to_resource_limits().map(LimitedTracker::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_recursion_limit() {
        let limits = Limits::new().to_resource_limits().unwrap();
        assert_eq!(limits, ResourceLimits::new());
    }

    #[test]
    fn duration_conversion() {
        let limits = Limits::new().max_duration_secs(1.5).to_resource_limits().unwrap();
        assert_eq!(limits.max_duration, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let err = Limits::new().max_duration_secs(-1.0).to_resource_limits().unwrap_err();
        assert!(matches!(err, SandboxError::Validation(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<Limits>(r#"{"max_bananas": 3}"#).is_err());
    }
}
