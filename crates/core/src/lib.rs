//! Converge core types: composite identities, the error taxonomy, remote error
//! classification and poll state classification.
//!
//! Nothing in this crate talks to the network. The engine crates (`converge_ops`,
//! `converge-apply`) and the orchestrator (`converge_api`) build on these types.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod policy;
pub mod state;

pub use config::Timeouts;
pub use error::{ConvergeError, ConvergeResult};
pub use identity::{ResourceIdentity, SEPARATOR};
pub use policy::{ErrorClass, ErrorPolicy, RemoteError};
pub use state::{Observation, PollSpec, StateClass, ABSENT};

pub mod prelude {
    pub use super::{
        ConvergeError, ConvergeResult, ErrorClass, ErrorPolicy, Observation, PollSpec, RemoteError,
        ResourceIdentity, StateClass, Timeouts, ABSENT,
    };
}
