use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::ExcType;

/// Threshold in bytes above which `check_large_result` is called.
///
/// Operations that may produce results larger than this threshold (100KB) should call
/// `check_large_result` before performing the operation, so `'x' * 10_000_000` is
/// rejected before the string is built.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// Largest string, bytes or sequence a single operation may build (1 GiB).
///
/// Enforced by every tracker, including [`NoLimitTracker`], so an unlimited run still
/// cannot ask the allocator for more than this in one step.
pub const MAX_RESULT_BYTES: usize = 1 << 30;

/// Recommended maximum recursion depth if not otherwise specified.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum instruction operations exceeded.
    Operation { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum memory usage exceeded.
    Memory { limit: usize, used: usize },
    /// Maximum recursion depth exceeded.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Operation { limit, count } => {
                write!(f, "operation limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::Memory { limit, used } => {
                write!(f, "memory limit exceeded: {used} bytes > {limit} bytes")
            }
            Self::Recursion { .. } => {
                write!(f, "maximum recursion depth exceeded")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Python exception type reported for this violation.
    ///
    /// - `Allocation`, `Memory` → `MemoryError`
    /// - `Operation`, `Time` → `TimeoutError`
    /// - `Recursion` → `RecursionError`
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::Allocation { .. } | Self::Memory { .. } => ExcType::MemoryError,
            Self::Operation { .. } | Self::Time { .. } => ExcType::TimeoutError,
            Self::Recursion { .. } => ExcType::RecursionError,
        }
    }
}

/// Trait for tracking resource usage and scheduling garbage collection.
///
/// Implementations can enforce limits on allocations, time, and memory,
/// as well as decide how often the heap is collected.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    ///
    /// Returns `Ok(())` if the allocation should proceed, or `Err(ResourceError)`
    /// if a limit would be exceeded.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called before inserting an item into an existing container.
    ///
    /// Growth of a list or dict counts against the allocation budget and, with the size
    /// of the inserted item, against the memory budget.
    fn on_container_insert(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        self.on_allocate(get_size)
    }

    /// Called when memory is freed by garbage collection.
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called before every instruction to check time and operation limits.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new call frame to check recursion depth.
    ///
    /// # Arguments
    /// * `current_depth` - Current call stack depth (before the new frame is pushed)
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Called before operations that may produce large results (>100KB).
    ///
    /// The default only applies [`MAX_RESULT_BYTES`]; trackers with a memory budget check it as well.
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        within_result_ceiling(estimated_bytes)
    }

    /// Whether the heap should be collected now, given the allocations made since the last collection.
    fn should_gc(&self, _allocations_since_gc: usize) -> bool {
        false
    }
}

fn within_result_ceiling(estimated_bytes: usize) -> Result<(), ResourceError> {
    if estimated_bytes > MAX_RESULT_BYTES {
        return Err(ResourceError::Memory {
            limit: MAX_RESULT_BYTES,
            used: estimated_bytes,
        });
    }
    Ok(())
}

/// A tracker that imposes no limits except the default recursion depth and [`MAX_RESULT_BYTES`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self, _get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn on_free(&mut self, _get_size: impl FnOnce() -> usize) {}

    #[inline]
    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// The default value of 1000 matches CPython behavior.
    #[inline]
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        depth_within(DEFAULT_MAX_RECURSION_DEPTH, current_depth)
    }
}

/// `current_depth` is measured before the new frame is pushed.
fn depth_within(limit: usize, current_depth: usize) -> Result<(), ResourceError> {
    if current_depth >= limit {
        return Err(ResourceError::Recursion {
            limit,
            depth: current_depth + 1,
        });
    }
    Ok(())
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of VM operations (instructions) per execution step.
    pub max_operations: Option<usize>,
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum execution time.
    pub max_duration: Option<Duration>,
    /// Maximum heap memory in bytes (approximate).
    pub max_memory: Option<usize>,
    /// Run garbage collection every N allocations.
    pub gc_interval: Option<usize>,
    /// Maximum recursion depth (function call stack depth).
    pub max_recursion_depth: Option<usize>,
}

impl ResourceLimits {
    /// Creates a new ResourceLimits with all limits disabled, except max recursion which is set to 1000.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    /// Sets the maximum number of allocations.
    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    /// Sets the maximum number of VM operations (instructions) per execution step.
    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    /// Sets the maximum execution duration.
    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Sets the maximum memory usage in bytes.
    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    /// Sets the garbage collection interval (run GC every N allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Sets the maximum recursion depth (function call stack depth).
    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// Running totals kept by [`LimitedTracker`].
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Usage {
    allocations: usize,
    operations: usize,
    /// Approximate live heap bytes.
    memory: usize,
}

/// A resource tracker that enforces configurable limits.
///
/// Only the counters are serialized. The clock restarts when a snapshot is loaded, so
/// `max_duration` applies to each resumed segment rather than to the whole run.
#[derive(Debug, Serialize, Deserialize)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    usage: Usage,
    #[serde(skip, default = "Instant::now")]
    started: Instant,
}

impl LimitedTracker {
    /// Creates a tracker whose clock starts now, so create it right before execution begins.
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            usage: Usage::default(),
            started: Instant::now(),
        }
    }

    /// Heap size after adding `bytes`, or the memory error if that passes `max_memory`.
    fn memory_after(&self, bytes: usize) -> Result<usize, ResourceError> {
        let used = self.usage.memory.saturating_add(bytes);
        match self.limits.max_memory {
            Some(limit) if used > limit => Err(ResourceError::Memory { limit, used }),
            _ => Ok(used),
        }
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        let count = self.usage.allocations + 1;
        if let Some(limit) = self.limits.max_allocations.filter(|&limit| count > limit) {
            return Err(ResourceError::Allocation { limit, count });
        }
        self.usage.memory = self.memory_after(get_size())?;
        self.usage.allocations = count;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.usage.memory = self.usage.memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(limit) = self.limits.max_operations {
            self.usage.operations += 1;
            if self.usage.operations > limit {
                return Err(ResourceError::Operation {
                    limit,
                    count: self.usage.operations,
                });
            }
        }
        match self.limits.max_duration {
            Some(limit) => {
                let elapsed = self.started.elapsed();
                if elapsed > limit {
                    Err(ResourceError::Time { limit, elapsed })
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        self.limits
            .max_recursion_depth
            .map_or(Ok(()), |limit| depth_within(limit, current_depth))
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        within_result_ceiling(estimated_bytes)?;
        self.memory_after(estimated_bytes).map(drop)
    }

    fn should_gc(&self, allocations_since_gc: usize) -> bool {
        self.limits
            .gc_interval
            .is_some_and(|interval| interval > 0 && allocations_since_gc >= interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_ceiling_applies_without_limits() {
        assert_eq!(NoLimitTracker.check_large_result(MAX_RESULT_BYTES), Ok(()));
        assert_eq!(
            NoLimitTracker.check_large_result(MAX_RESULT_BYTES + 1),
            Err(ResourceError::Memory {
                limit: MAX_RESULT_BYTES,
                used: MAX_RESULT_BYTES + 1,
            })
        );
        let tracker = LimitedTracker::new(ResourceLimits::new());
        assert!(tracker.check_large_result(usize::MAX).is_err());
    }

    #[test]
    fn memory_budget_counts_live_bytes() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(100));
        tracker.on_allocate(|| 60).unwrap();
        assert_eq!(
            tracker.check_large_result(50),
            Err(ResourceError::Memory { limit: 100, used: 110 })
        );
        tracker.on_free(|| 60);
        assert_eq!(tracker.check_large_result(50), Ok(()));
        assert_eq!(
            tracker.on_allocate(|| 101),
            Err(ResourceError::Memory { limit: 100, used: 101 })
        );
    }

    #[test]
    fn allocation_count_is_checked_before_counting() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        tracker.on_allocate(|| 1).unwrap();
        tracker.on_allocate(|| 1).unwrap();
        assert_eq!(
            tracker.on_allocate(|| 1),
            Err(ResourceError::Allocation { limit: 2, count: 3 })
        );
    }

    #[test]
    fn recursion_depth() {
        assert!(NoLimitTracker.check_recursion_depth(DEFAULT_MAX_RECURSION_DEPTH - 1).is_ok());
        let tracker = LimitedTracker::new(ResourceLimits::new().max_recursion_depth(Some(3)));
        assert_eq!(
            tracker.check_recursion_depth(3),
            Err(ResourceError::Recursion { limit: 3, depth: 4 })
        );
        let unlimited = LimitedTracker::new(ResourceLimits::new().max_recursion_depth(None));
        assert!(unlimited.check_recursion_depth(1_000_000).is_ok());
    }
}
