use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::kind::{str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonSpec {
    pub cluster_id: String,
    pub name: String,
    pub version: String,
    /// Base64 values blob handed to the addon chart as-is.
    pub raw_values: Option<String>,
}

/// Cluster addon, addressed as `clusterId#addonName`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Addon;

impl ResourceKind for Addon {
    type Spec = AddonSpec;
    const KIND: &'static str = "addon";
    const ID_PARTS: usize = 2;

    fn create_request(&self, spec: &AddonSpec) -> ConvergeResult<Request> {
        Ok(Request::new(
            "InstallAddon",
            json!({
                "ClusterId": spec.cluster_id,
                "AddonName": spec.name,
                "AddonVersion": spec.version,
                "RawValues": spec.raw_values,
            }),
        ))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a AddonSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str(), spec.name.as_str()] }

    fn identity_from_create(&self, spec: &AddonSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeAddon", json!({"ClusterId": id.part(0), "AddonName": id.part(1)})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match resp.pointer("/Addons/0") {
            Some(a) => Observation::new(str_at(a, "/Phase"), str_at(a, "/Reason")),
            None => Observation::absent(),
        }
    }

    fn attributes(&self, resp: &Response) -> Json {
        json!({"AddonVersion": str_at(resp, "/Addons/0/AddonVersion")})
    }

    fn update_request(&self, id: &ResourceIdentity, spec: &AddonSpec, current: &Json) -> ConvergeResult<Option<Request>> {
        if str_at(current, "/AddonVersion") == spec.version {
            return Ok(None);
        }
        Ok(Some(Request::new(
            "UpdateAddon",
            json!({"ClusterId": id.part(0), "AddonName": id.part(1), "AddonVersion": spec.version, "RawValues": spec.raw_values}),
        )))
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DeleteAddon", json!({"ClusterId": id.part(0), "AddonName": id.part(1)})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("addon ready", t.read * 2, t.poll_interval)
            .succeed_on(&["Succeeded"])
            .fail_on(&["Failed"])
            .transient_on(&["Installing", "Upgrading", "Pending"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("addon gone", t.read, t.poll_interval).succeed_on(&[ABSENT]).transient_on(&["Deleting"])
    }
}
