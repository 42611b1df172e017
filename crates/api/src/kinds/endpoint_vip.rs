use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kind::{str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointVipSpec {
    pub cluster_id: String,
    /// CIDRs allowed to reach the public address; empty allows none.
    pub security_policies: Vec<String>,
}

/// Public API server address of a managed cluster, addressed by the
/// cluster id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterEndpointVip;

impl ResourceKind for ClusterEndpointVip {
    type Spec = EndpointVipSpec;
    const KIND: &'static str = "cluster_endpoint_vip";
    const ID_PARTS: usize = 1;

    fn create_request(&self, spec: &EndpointVipSpec) -> ConvergeResult<Request> {
        let mut params = json!({"ClusterId": spec.cluster_id});
        if !spec.security_policies.is_empty() { params["SecurityPolicies"] = json!(spec.security_policies); }
        Ok(Request::new("CreateClusterEndpointVip", params))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a EndpointVipSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str()] }

    fn identity_from_create(&self, spec: &EndpointVipSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeClusterEndpointVipStatus", json!({"ClusterId": id.part(0)})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match str_at(resp, "/Status") {
            "" => Observation::absent(),
            s => Observation::new(s, str_at(resp, "/ErrorMsg")),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DeleteClusterEndpointVip", json!({"ClusterId": id.part(0)})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("endpoint vip ready", t.read * 2, t.poll_interval)
            .succeed_on(&["Created"])
            .fail_on(&["CreateFailed", "Failed"])
            .transient_on(&["Creating", ABSENT])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("endpoint vip gone", t.read * 2, t.poll_interval)
            .succeed_on(&[ABSENT, "Deleted"])
            .fail_on(&["DeleteFailed"])
            .transient_on(&["Deleting"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::StateClass;

    #[test]
    fn policies_are_sent_only_when_given() {
        let open = EndpointVipSpec { cluster_id: "cls-1".into(), security_policies: vec![] };
        assert!(ClusterEndpointVip.create_request(&open).unwrap().params.get("SecurityPolicies").is_none());
        let locked = EndpointVipSpec { cluster_id: "cls-1".into(), security_policies: vec!["10.0.0.0/8".into()] };
        let req = ClusterEndpointVip.create_request(&locked).unwrap();
        assert_eq!(req.params["SecurityPolicies"], json!(["10.0.0.0/8"]));
    }

    #[test]
    fn not_yet_visible_is_still_creating() {
        let t = Timeouts::default();
        let ready = ClusterEndpointVip.ready(&t);
        assert_eq!(ready.classify(ABSENT), StateClass::Transient);
        assert_eq!(ready.classify("CreateFailed"), StateClass::Failure);
        let o = ClusterEndpointVip.observe(&json!({"Status": "CreateFailed", "ErrorMsg": "eip quota"}));
        assert_eq!(o.detail, "eip quota");
        assert!(ClusterEndpointVip.observe(&json!({"Status": "NotFound"})).is_absent());
    }
}
