use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::kind::{required_str, str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub version: String,
    pub vpc_id: String,
    pub cidr: String,
    pub description: String,
}

/// A managed cluster, addressed by its cluster id.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cluster;

impl ResourceKind for Cluster {
    type Spec = ClusterSpec;
    const KIND: &'static str = "cluster";
    const ID_PARTS: usize = 1;

    fn create_request(&self, spec: &ClusterSpec) -> ConvergeResult<Request> {
        Ok(Request::new(
            "CreateCluster",
            json!({
                "ClusterName": spec.name,
                "ClusterVersion": spec.version,
                "ClusterDesc": spec.description,
                "VpcId": spec.vpc_id,
                "ClusterCIDR": spec.cidr,
            }),
        ))
    }

    fn identity_from_create(&self, _spec: &ClusterSpec, resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new([required_str(resp, "/ClusterId", "create cluster")?])
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeClusters", json!({"ClusterIds": [id.part(0)]})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match resp.pointer("/Clusters/0") {
            Some(c) => Observation::new(str_at(c, "/ClusterStatus"), str_at(c, "/ClusterName")),
            None => Observation::absent(),
        }
    }

    fn attributes(&self, resp: &Response) -> Json {
        json!({"ClusterName": str_at(resp, "/Clusters/0/ClusterName")})
    }

    fn update_request(&self, id: &ResourceIdentity, spec: &ClusterSpec, current: &Json) -> ConvergeResult<Option<Request>> {
        if str_at(current, "/ClusterName") == spec.name {
            return Ok(None);
        }
        Ok(Some(Request::new(
            "ModifyClusterAttribute",
            json!({"ClusterId": id.part(0), "ClusterName": spec.name, "ClusterDesc": spec.description}),
        )))
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DeleteCluster", json!({"ClusterId": id.part(0), "InstanceDeleteMode": "terminate"})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("cluster ready", t.read * 5, t.poll_interval)
            .succeed_on(&["Running"])
            .fail_on(&["Abnormal", "Failed"])
            .transient_on(&["Creating", "Initializing", "Upgrading"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("cluster gone", t.read * 2, t.poll_interval)
            .succeed_on(&[converge_core::ABSENT])
            .transient_on(&["Deleting", "Running"])
    }

    fn rollback_on_failed_create(&self) -> bool { true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::StateClass;

    #[test]
    fn observe_reads_first_cluster_or_absent() {
        let k = Cluster;
        let o = k.observe(&json!({"TotalCount": 1, "Clusters": [{"ClusterId": "cls-1", "ClusterStatus": "Creating", "ClusterName": "demo"}]}));
        assert_eq!(o.label, "Creating");
        assert!(k.observe(&json!({"TotalCount": 0, "Clusters": []})).is_absent());
    }

    #[test]
    fn update_only_when_name_changes() {
        let k = Cluster;
        let id = ResourceIdentity::new(["cls-1"]).unwrap();
        let spec = ClusterSpec { name: "demo".into(), ..Default::default() };
        assert!(k.update_request(&id, &spec, &json!({"ClusterName": "demo"})).unwrap().is_none());
        let req = k.update_request(&id, &spec, &json!({"ClusterName": "old"})).unwrap().expect("request");
        assert_eq!(req.action, "ModifyClusterAttribute");
        assert_eq!(req.str_param("ClusterId"), Some("cls-1"));
    }

    #[test]
    fn long_waits_scale_the_read_budget() {
        let t = Timeouts::default();
        let ready = Cluster.ready(&t);
        assert_eq!(ready.deadline, t.read * 5);
        assert_eq!(ready.classify("Abnormal"), StateClass::Failure);
        assert_eq!(Cluster.gone(&t).classify("NotFound"), StateClass::Success);
    }
}
