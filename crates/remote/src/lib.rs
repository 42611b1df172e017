//! Converge remote: the single boundary to a managed-Kubernetes control plane.
//!
//! Everything the engine sends is a named [`Request`] with a JSON body, and
//! every answer is JSON or a typed [`RemoteError`]. Two implementations live
//! here: [`ScriptedClient`] replays canned answers for tests and
//! [`SimCloud`] is an in-memory control plane whose resources move through
//! their lifecycle a few describes at a time.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub use converge_core::RemoteError;

mod scripted;
mod sim;

pub use scripted::ScriptedClient;
pub use sim::SimCloud;

/// Response body of a successful call.
pub type Response = Json;

/// One remote call: vendor action name plus JSON parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    pub params: Json,
}

impl Request {
    pub fn new(action: impl Into<String>, params: Json) -> Self {
        Self { action: action.into(), params }
    }

    /// String parameter `key`, if present.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// Remote control plane client. Implementations must be shareable across
/// tasks; the engine holds them as `Arc<dyn RemoteClient>`.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn call(&self, req: Request) -> Result<Response, RemoteError>;
}

pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
