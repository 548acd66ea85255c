//! Typed ID definitions for all orchestrator resources.
//!
//! Generated IDs are ULID-based for sortability and uniqueness. The resource
//! pool and task IDs carry domain structure instead and are defined by hand.

use serde::{Deserialize, Serialize};

use crate::{define_id, IdError};

// =============================================================================
// Jobs and Updates
// =============================================================================

define_id!(JobId, "job");
define_id!(UpdateId, "upd");

// =============================================================================
// Hosts and Leases
// =============================================================================

define_id!(HostOfferId, "lease");
define_id!(AgentId, "agent");
define_id!(PodId, "pod");
define_id!(VolumeId, "vol");

// =============================================================================
// Resource Pools
// =============================================================================

/// ID of a node in the resource pool tree.
///
/// Unlike generated IDs, resource pool IDs are operator-chosen labels used as
/// path segments (`/a/b/c`). The root of the tree is always [`RespoolId::ROOT`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RespoolId(String);

impl RespoolId {
    /// The reserved ID of the tree root.
    pub const ROOT_NAME: &'static str = "root";

    /// Parses a resource pool ID.
    ///
    /// Labels must be non-empty and must not contain the path delimiter `/`
    /// or whitespace.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.contains('/') || s.chars().any(char::is_whitespace) {
            return Err(IdError::InvalidFormat {
                message: format!("invalid resource pool id: {s:?}"),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the root resource pool ID.
    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT_NAME.to_string())
    }

    /// Returns true if this is the root ID.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT_NAME
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RespoolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RespoolId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// ID of a single task: one instance slot of a job.
///
/// Rendered as `{job_id}-{instance_id}`, e.g.
/// `job_01HV4Z2WQXKJNM8GPQY6VBKC3D-3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId {
    job_id: JobId,
    instance_id: u32,
}

impl TaskId {
    /// Creates a task ID from its parts.
    #[must_use]
    pub const fn new(job_id: JobId, instance_id: u32) -> Self {
        Self {
            job_id,
            instance_id,
        }
    }

    /// Returns the job this task belongs to.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns the instance slot within the job.
    #[must_use]
    pub const fn instance_id(&self) -> u32 {
        self.instance_id
    }

    /// Parses a task ID from its `{job_id}-{instance_id}` form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let Some((job, instance)) = s.rsplit_once('-') else {
            return Err(IdError::InvalidFormat {
                message: format!("task id missing instance suffix: {s:?}"),
            });
        };
        let job_id = JobId::parse(job)?;
        let instance_id = instance.parse().map_err(|_| IdError::InvalidFormat {
            message: format!("invalid instance id: {instance:?}"),
        })?;
        Ok(Self {
            job_id,
            instance_id,
        })
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.job_id, self.instance_id)
    }
}

impl std::str::FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Event Stream
// =============================================================================

define_id!(StreamId, "stream");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_roundtrip() {
        let id = JobId::new();
        let parsed = JobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn generated_id_rejects_wrong_prefix() {
        let id = JobId::new();
        let err = UpdateId::parse(&id.to_string()).unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn respool_id_root() {
        let root = RespoolId::root();
        assert!(root.is_root());
        assert_eq!(root.as_str(), "root");
        assert!(!RespoolId::parse("batch").unwrap().is_root());
    }

    #[test]
    fn respool_id_rejects_delimiters() {
        assert!(RespoolId::parse("a/b").is_err());
        assert!(RespoolId::parse("").is_err());
        assert!(RespoolId::parse("a b").is_err());
    }

    #[test]
    fn task_id_roundtrip() {
        let task = TaskId::new(JobId::new(), 42);
        let parsed = TaskId::parse(&task.to_string()).unwrap();
        assert_eq!(task, parsed);
        assert_eq!(parsed.instance_id(), 42);
    }

    #[test]
    fn task_id_serde_as_string() {
        let task = TaskId::new(JobId::new(), 7);
        let json = serde_json::to_string(&task).unwrap();
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }
}
