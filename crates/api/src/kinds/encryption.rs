use converge_core::{ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kind::{str_at, ResourceKind};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionSpec {
    pub cluster_id: String,
    pub kms_key_id: String,
    pub kms_region: String,
}

/// KMS encryption of cluster secrets. One per cluster, addressed by the
/// cluster id; disabling it is the delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionProtection;

impl ResourceKind for EncryptionProtection {
    type Spec = EncryptionSpec;
    const KIND: &'static str = "encryption_protection";
    const ID_PARTS: usize = 1;

    fn create_request(&self, spec: &EncryptionSpec) -> ConvergeResult<Request> {
        Ok(Request::new(
            "EnableEncryptionProtection",
            json!({"ClusterId": spec.cluster_id, "KMSConfiguration": {"KeyId": spec.kms_key_id, "KmsRegion": spec.kms_region}}),
        ))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a EncryptionSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str()] }

    fn identity_from_create(&self, spec: &EncryptionSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeEncryptionStatus", json!({"ClusterId": id.part(0)})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match str_at(resp, "/Status") {
            "" => Observation::absent(),
            s => Observation::new(s, str_at(resp, "/ErrorMsg")),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DisableEncryptionProtection", json!({"ClusterId": id.part(0)})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("encryption opened", t.read * 3, t.poll_interval)
            .succeed_on(&["Opened"])
            .fail_on(&["Failed"])
            .transient_on(&["Opening"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("encryption closed", t.read * 3, t.poll_interval)
            .succeed_on(&["Closed", ABSENT])
            .fail_on(&["Failed"])
            .transient_on(&["Closing", "Opened"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_core::StateClass;

    #[test]
    fn closed_counts_as_gone() {
        let t = Timeouts::default();
        let o = EncryptionProtection.observe(&json!({"Status": "Closed", "ErrorMsg": ""}));
        assert_eq!(EncryptionProtection.gone(&t).classify(&o.label), StateClass::Success);
        assert_eq!(EncryptionProtection.ready(&t).classify(&o.label), StateClass::Transient);
    }

    #[test]
    fn kms_config_is_nested() {
        let spec = EncryptionSpec { cluster_id: "cls-1".into(), kms_key_id: "key-1".into(), kms_region: "ap-guangzhou".into() };
        let req = EncryptionProtection.create_request(&spec).unwrap();
        assert_eq!(req.params["KMSConfiguration"]["KeyId"], json!("key-1"));
    }
}
