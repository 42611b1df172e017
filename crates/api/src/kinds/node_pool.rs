use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::kind::{required_str, str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePoolSpec {
    pub cluster_id: String,
    pub name: String,
    pub desired_capacity: u64,
    pub min_size: u64,
    pub max_size: u64,
    pub instance_type: String,
}

/// Auto-scaled worker pool of a cluster, addressed as `clusterId#nodePoolId`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodePool;

impl ResourceKind for NodePool {
    type Spec = NodePoolSpec;
    const KIND: &'static str = "node_pool";
    const ID_PARTS: usize = 2;

    fn create_request(&self, spec: &NodePoolSpec) -> ConvergeResult<Request> {
        Ok(Request::new(
            "CreateClusterNodePool",
            json!({
                "ClusterId": spec.cluster_id,
                "Name": spec.name,
                "DesiredCapacity": spec.desired_capacity,
                "AutoScalingGroupPara": {"MinSize": spec.min_size, "MaxSize": spec.max_size},
                "LaunchConfigurePara": {"InstanceType": spec.instance_type},
            }),
        ))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a NodePoolSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str()] }

    fn identity_from_create(&self, spec: &NodePoolSpec, resp: &Response) -> ConvergeResult<ResourceIdentity> {
        let np = required_str(resp, "/NodePoolId", "create node pool")?;
        ResourceIdentity::new([spec.cluster_id.clone(), np])
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeClusterNodePoolDetail", json!({"ClusterId": id.part(0), "NodePoolId": id.part(1)})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match resp.get("NodePool") {
            Some(np) if !np.is_null() => Observation::new(str_at(np, "/LifeState"), str_at(np, "/Name")),
            _ => Observation::absent(),
        }
    }

    fn attributes(&self, resp: &Response) -> Json {
        json!({
            "Name": str_at(resp, "/NodePool/Name"),
            "DesiredNodesNum": resp.pointer("/NodePool/DesiredNodesNum").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    }

    fn update_request(&self, id: &ResourceIdentity, spec: &NodePoolSpec, current: &Json) -> ConvergeResult<Option<Request>> {
        let same_name = str_at(current, "/Name") == spec.name;
        let same_size = current.get("DesiredNodesNum").and_then(|v| v.as_u64()) == Some(spec.desired_capacity);
        if same_name && same_size {
            return Ok(None);
        }
        Ok(Some(Request::new(
            "ModifyClusterNodePool",
            json!({
                "ClusterId": id.part(0),
                "NodePoolId": id.part(1),
                "Name": spec.name,
                "DesiredCapacity": spec.desired_capacity,
                "MinNodesNum": spec.min_size,
                "MaxNodesNum": spec.max_size,
            }),
        )))
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new(
            "DeleteClusterNodePool",
            json!({"ClusterId": id.part(0), "NodePoolIds": [id.part(1)], "KeepInstance": false}),
        ))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("node pool ready", t.read * 3, t.poll_interval)
            .succeed_on(&["normal"])
            .fail_on(&["abnormal", "failed"])
            .transient_on(&["creating", "updating"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("node pool gone", t.read * 2, t.poll_interval)
            .succeed_on(&[ABSENT, "deleted"])
            .transient_on(&["deleting", "normal"])
    }

    fn rollback_on_failed_create(&self) -> bool { true }
}
