use converge_core::{ConvergeError, ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kind::{str_at, ReadyStage, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSpec {
    pub cluster_id: String,
    /// Existing compute instance; it is reinstalled as a worker.
    pub instance_id: String,
    pub key_ids: Vec<String>,
    pub password: Option<String>,
    pub unschedulable: bool,
}

/// An existing instance joined to a cluster as a worker, addressed as
/// `clusterId#instanceId`. Detaching keeps the instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterAttachment;

fn instance_state(resp: &Response) -> Observation {
    match resp.pointer("/InstanceSet/0") {
        Some(i) => Observation::new(str_at(i, "/InstanceState"), str_at(i, "/LatestOperationState")),
        None => Observation::absent(),
    }
}

impl ResourceKind for ClusterAttachment {
    type Spec = AttachmentSpec;
    const KIND: &'static str = "cluster_attachment";
    const ID_PARTS: usize = 2;

    fn create_request(&self, spec: &AttachmentSpec) -> ConvergeResult<Request> {
        let mut login = json!({});
        if !spec.key_ids.is_empty() { login["KeyIds"] = json!(spec.key_ids); }
        if let Some(p) = &spec.password { login["Password"] = json!(p); }
        Ok(Request::new(
            "AddExistedInstances",
            json!({
                "ClusterId": spec.cluster_id,
                "InstanceIds": [spec.instance_id],
                "LoginSettings": login,
                "InstanceAdvancedSettings": {"Unschedulable": i64::from(spec.unschedulable)},
            }),
        ))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a AttachmentSpec) -> Vec<&'a str> {
        vec![spec.cluster_id.as_str(), spec.instance_id.as_str()]
    }

    /// The call succeeds even when the instance is refused; only a listed
    /// success counts.
    fn identity_from_create(&self, spec: &AttachmentSpec, resp: &Response) -> ConvergeResult<ResourceIdentity> {
        let accepted = resp
            .get("SuccInstanceIds")
            .and_then(|v| v.as_array())
            .is_some_and(|ids| ids.iter().any(|i| i.as_str() == Some(spec.instance_id.as_str())));
        if !accepted {
            let reason = resp.pointer("/FailedReasons/0").and_then(|v| v.as_str()).unwrap_or("not in SuccInstanceIds");
            return Err(ConvergeError::ConvergenceFailure {
                what: format!("attach {} to {}", spec.instance_id, spec.cluster_id),
                state: "failed".into(),
                detail: reason.to_string(),
            });
        }
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeClusterInstances", json!({"ClusterId": id.part(0), "InstanceIds": [id.part(1)]})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match resp.pointer("/InstanceSet/0") {
            Some(w) => Observation::new(str_at(w, "/InstanceState"), str_at(w, "/FailedReason")),
            None => Observation::absent(),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new(
            "DeleteClusterInstances",
            json!({"ClusterId": id.part(0), "InstanceIds": [id.part(1)], "InstanceDeleteMode": "retain"}),
        ))
    }

    /// Instance booted first, then the cluster's view of the worker.
    fn ready_stages(&self, id: &ResourceIdentity, t: &Timeouts) -> ConvergeResult<Vec<ReadyStage>> {
        Ok(vec![ReadyStage {
            request: Request::new("DescribeInstances", json!({"InstanceIds": [id.part(1)]})),
            spec: PollSpec::new("instance running", t.read * 7, t.poll_interval)
                .succeed_on(&["RUNNING"])
                .fail_on(&["LAUNCH_FAILED"])
                .transient_on(&["PENDING", "STARTING", "REBOOTING", ABSENT]),
            observe: instance_state,
        }])
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        // A worker missing from the cluster after the attach was accepted
        // will not show up later.
        PollSpec::new("worker running", t.read * 7, t.poll_interval)
            .succeed_on(&["running"])
            .fail_on(&["failed", ABSENT])
            .transient_on(&["initializing", "pending"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("worker removed", t.read * 4, t.poll_interval).succeed_on(&[ABSENT]).transient_on(&["removing", "running"])
    }
}
