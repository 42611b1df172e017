//! What the orchestrator needs to know about one kind of remote resource.

use std::time::Duration;

use converge_core::{ConvergeError, ConvergeResult, ErrorPolicy, Observation, PollSpec, RemoteError, ResourceIdentity, Timeouts};
use converge_remote::{Request, Response};
use serde_json::Value as Json;

/// Codes that mean the addressed resource does not exist (matched against
/// any dot-separated segment, so `InternalError.ClusterNotFound` counts).
pub const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "ClusterNotFound"];

/// Codes the control plane returns while it is busy with earlier work.
pub const BUSY_CODES: &[&str] = &["ClusterState", "InternalError", "RequestLimitExceeded", "ResourceInUse"];

/// Codes that mean the request itself is wrong; retrying cannot help.
pub const CALLER_CODES: &[&str] = &[
    "AuthFailure",
    "UnauthorizedOperation",
    "InvalidParameter",
    "InvalidParameterValue",
    "MissingParameter",
    "UnsupportedOperation",
];

/// Create/modify calls: retry while busy, everything else is fatal.
pub fn mutate_policy() -> ErrorPolicy { ErrorPolicy::fatal_by_default().retry_on(BUSY_CODES) }

/// Describe/delete calls: retry by default, stop on caller errors and on
/// not-found (the orchestrator turns the latter into "absent").
pub fn lookup_policy() -> ErrorPolicy {
    ErrorPolicy::retry_by_default().fatal_on(CALLER_CODES).fatal_on(NOT_FOUND_CODES)
}

/// A wait on a describe call other than the kind's own, polled before
/// [`ResourceKind::ready`]. Used when the resource rides on something with
/// its own lifecycle, such as the instance behind a cluster worker.
pub struct ReadyStage {
    pub request: Request,
    pub spec: PollSpec,
    pub observe: fn(&Response) -> Observation,
}

/// A kind of managed resource: how to address it, which requests to send
/// and how to read its status.
///
/// Builders are pure; nothing here talks to the network.
pub trait ResourceKind: Send + Sync {
    /// Declared configuration the caller wants.
    type Spec: Send + Sync;

    const KIND: &'static str;
    /// Number of identity parts.
    const ID_PARTS: usize;

    fn create_request(&self, spec: &Self::Spec) -> ConvergeResult<Request>;

    /// Identity parts the spec already fixes. The orchestrator validates them
    /// before the create call goes out.
    fn spec_identity_parts<'a>(&self, _spec: &'a Self::Spec) -> Vec<&'a str> { Vec::new() }

    /// Identity of the new resource, from the spec and the create response.
    fn identity_from_create(&self, spec: &Self::Spec, resp: &Response) -> ConvergeResult<ResourceIdentity>;

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request>;

    /// Status label and detail from a describe response. An empty result set
    /// must come back as [`Observation::absent`].
    fn observe(&self, resp: &Response) -> Observation;

    /// Mutable attributes from a describe response, for update diffs.
    fn attributes(&self, _resp: &Response) -> Json { Json::Null }

    /// Request that moves the resource from `current` to `spec`, or `None`
    /// when nothing mutable changed.
    fn update_request(&self, _id: &ResourceIdentity, _spec: &Self::Spec, _current: &Json) -> ConvergeResult<Option<Request>> {
        Ok(None)
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request>;

    /// Wait after create/update.
    fn ready(&self, t: &Timeouts) -> PollSpec;

    /// Waits that must pass, in order, before `ready` is polled.
    fn ready_stages(&self, _id: &ResourceIdentity, _t: &Timeouts) -> ConvergeResult<Vec<ReadyStage>> { Ok(Vec::new()) }

    /// Wait after delete. Its success labels also mark a resource that reads
    /// as gone.
    fn gone(&self, t: &Timeouts) -> PollSpec;

    fn mutate_policy(&self) -> ErrorPolicy { mutate_policy() }

    fn read_policy(&self) -> ErrorPolicy { lookup_policy() }

    fn delete_policy(&self) -> ErrorPolicy { lookup_policy() }

    fn absent_codes(&self) -> &'static [&'static str] { NOT_FOUND_CODES }

    /// Delete the half-created resource when create fails to converge.
    fn rollback_on_failed_create(&self) -> bool { false }

    /// Budget for issuing the create call itself.
    fn create_budget(&self, t: &Timeouts) -> Duration { t.write }
}

/// String at `ptr` (JSON pointer) in a response, or an error naming it.
pub fn required_str(resp: &Response, ptr: &str, what: &str) -> ConvergeResult<String> {
    match resp.pointer(ptr).and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ConvergeError::FatalRemote {
            what: what.to_string(),
            source: RemoteError::new("InvalidResponse", format!("response carries no {}", ptr)),
        }),
    }
}

/// String at `ptr`, or `""`.
pub fn str_at<'a>(resp: &'a Response, ptr: &str) -> &'a str {
    resp.pointer(ptr).and_then(|v| v.as_str()).unwrap_or("")
}
