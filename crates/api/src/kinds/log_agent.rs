use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kind::{str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogAgentSpec {
    pub cluster_id: String,
    pub kubelet_root_dir: Option<String>,
}

/// Log collection agent of a cluster, addressed by the cluster id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAgent;

const CLOSED: &str = "closed";

impl ResourceKind for LogAgent {
    type Spec = LogAgentSpec;
    const KIND: &'static str = "log_agent";
    const ID_PARTS: usize = 1;

    fn create_request(&self, spec: &LogAgentSpec) -> ConvergeResult<Request> {
        let mut params = json!({"ClusterId": spec.cluster_id});
        if let Some(dir) = &spec.kubelet_root_dir { params["KubeletRootDir"] = json!(dir); }
        Ok(Request::new("InstallLogAgent", params))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a LogAgentSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str()] }

    fn identity_from_create(&self, spec: &LogAgentSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeLogSwitches", json!({"ClusterIds": [id.part(0)], "ClusterType": "tke"})))
    }

    /// The switch entry is authoritative: an enabled entry reports its own
    /// status (so an agent still present during uninstall stays transient),
    /// a disabled one reads as closed and a missing one as absent.
    fn observe(&self, resp: &Response) -> Observation {
        let Some(sw) = resp.pointer("/SwitchSet/0") else { return Observation::absent() };
        let enabled = sw.pointer("/Log/Enable").and_then(|v| v.as_bool()).unwrap_or(false);
        match (enabled, str_at(sw, "/Log/Status")) {
            (false, _) => Observation::new(CLOSED, "log agent disabled"),
            (true, "") => Observation::new("opening", "log agent enabled, status pending"),
            (true, s) => Observation::new(s, str_at(sw, "/Log/ErrorMsg")),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("UninstallLogAgent", json!({"ClusterId": id.part(0)})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("log agent opened", t.read * 3, t.poll_interval)
            .succeed_on(&["opened"])
            .transient_on(&["opening"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("log agent closed", t.read * 3, t.poll_interval)
            .succeed_on(&[CLOSED, ABSENT])
            .transient_on(&["closing", "opened"])
    }
}
