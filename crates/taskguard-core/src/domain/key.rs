//! Lock keys: `(task_type, resource_id)` and their store representation.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::GuardError;

/// Separator between task type and resource id inside a lock key.
pub const KEY_SEPARATOR: char = ':';

/// Logical job kind, e.g. `data_profiling` or `video_analysis`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    /// Validates that the type is non-empty and free of the key separator.
    pub fn new(s: impl Into<String>) -> Result<Self, GuardError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(GuardError::InvalidKey("task_type must not be empty".to_string()));
        }
        if s.contains(KEY_SEPARATOR) {
            return Err(GuardError::InvalidKey(format!(
                "task_type '{s}' must not contain '{KEY_SEPARATOR}'"
            )));
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the resource a job acts on (dataset id, video id, ...).
///
/// Numeric ids are stored in their decimal form so `42` and `"42"` name the
/// same lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for ResourceId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl From<u64> for ResourceId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl From<i64> for ResourceId {
    fn from(n: i64) -> Self {
        Self(n.to_string())
    }
}

impl From<u32> for ResourceId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}

/// Composite key `task_type:resource_id` identifying one guarded job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockKey {
    pub task_type: TaskType,
    pub resource_id: ResourceId,
}

impl LockKey {
    pub fn new(task_type: TaskType, resource_id: ResourceId) -> Self {
        Self {
            task_type,
            resource_id,
        }
    }

    /// Parses and validates a raw task type together with a resource id.
    pub fn parse(
        task_type: impl Into<String>,
        resource_id: impl Into<ResourceId>,
    ) -> Result<Self, GuardError> {
        Ok(Self::new(TaskType::new(task_type)?, resource_id.into()))
    }

    /// Full key in the store, i.e. the namespace followed by `task_type:resource_id`.
    pub fn store_key(&self, namespace: &str) -> String {
        format!("{namespace}{self}")
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.task_type, KEY_SEPARATOR, self.resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn lock_key_joins_with_separator() {
        let key = LockKey::parse("data_profiling", "ds-1").unwrap();
        assert_eq!(key.to_string(), "data_profiling:ds-1");
        assert_eq!(key.store_key("taskguard:"), "taskguard:data_profiling:ds-1");
    }

    #[test]
    fn numeric_and_string_resource_ids_share_a_key() {
        let a = LockKey::parse("video_analysis", 42u64).unwrap();
        let b = LockKey::parse("video_analysis", "42").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn resource_id_may_contain_separator() {
        // resource 側の ':' は許容（key は task_type で一意に区切れる）
        let key = LockKey::parse("audio_analysis", "bucket:file.wav").unwrap();
        assert_eq!(key.to_string(), "audio_analysis:bucket:file.wav");
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    #[case::separator("video:analysis")]
    fn invalid_task_types_are_rejected(#[case] raw: &str) {
        assert!(matches!(TaskType::new(raw), Err(GuardError::InvalidKey(_))));
    }
}
