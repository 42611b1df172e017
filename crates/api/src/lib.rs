//! Converge API: the resource orchestrator and the managed-Kubernetes kinds it
//! drives.
//!
//! Frontends (the CLI, or a provider plugin host) hold an
//! `Arc<dyn RemoteClient>`, build one [`Orchestrator`] per kind and call
//! `create`/`read`/`update`/`delete` on it. Permission sets are declarative
//! and go through [`PermissionSet`] instead.

#![forbid(unsafe_code)]

pub mod kind;
pub mod kinds;
mod orchestrator;
pub mod permissions;

pub use converge_core::{ConvergeError, ConvergeResult, ResourceIdentity, Timeouts};
pub use converge_ops::CancelToken;
pub use kind::{ReadyStage, ResourceKind};
pub use orchestrator::{Orchestrator, ResourceState};
pub use permissions::{Grant, PermissionSet};
