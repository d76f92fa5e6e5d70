//! CAPSEM core: canonical event model, policy contract, and enforcement.
//!
//! This crate defines the vocabulary every other layer speaks (agents, tools,
//! decisions), the `Policy` trait consulted at each interception point, the
//! `SecurityManager` that aggregates policy decisions, and the provider wire
//! formats that are normalized into the canonical model. It carries no
//! transport or runtime dependencies so it can be embedded in any host.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input and
//! failing policies surface as `CapsemError` or as a `Decision`, never as a
//! crashed request task.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod identity;
pub mod loader;
pub mod manager;
pub mod model;
pub mod policy;
pub mod protocol;

/// Shared result type.
pub use error::{CapsemError, Result};
pub use manager::{FailureMode, SecurityManager};
pub use model::{Agent, Decision, InterceptionPoint, InvocationId, Media, Reason, Tool, Verdict};
pub use policy::Policy;
