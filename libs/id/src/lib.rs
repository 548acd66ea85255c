//! # armada-id
//!
//! Stable ID types, parsing, and validation for the Armada orchestrator.
//!
//! ## Design Principles
//!
//! - IDs are stable and system-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs support roundtrip serialization (parse → format → parse)
//! - IDs are typed to prevent mixing different resource types
//!
//! ## ID Format
//!
//! Generated resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `job_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `upd_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `lease_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! Two ID families do not follow this format:
//! - [`RespoolId`] is an operator-chosen label; the tree root is always the
//!   literal `"root"`.
//! - [`TaskId`] is the composite `{job_id}-{instance_id}`, one per job
//!   instance slot.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
