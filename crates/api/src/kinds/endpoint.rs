use std::fmt;
use std::str::FromStr;

use converge_core::{ConvergeError, ConvergeResult, Observation, PollSpec, ResourceIdentity, Timeouts, ABSENT};
use converge_remote::{Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kind::{str_at, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointAccess {
    Internet,
    Intranet,
}

impl EndpointAccess {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointAccess::Internet => "internet",
            EndpointAccess::Intranet => "intranet",
        }
    }

    fn is_extranet(self) -> bool { self == EndpointAccess::Internet }
}

impl fmt::Display for EndpointAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for EndpointAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internet" => Ok(EndpointAccess::Internet),
            "intranet" => Ok(EndpointAccess::Intranet),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub cluster_id: String,
    pub access: EndpointAccess,
    pub subnet_id: Option<String>,
    pub security_group: Option<String>,
    pub domain: Option<String>,
}

/// API server endpoint of a cluster, addressed as `clusterId#internet` or
/// `clusterId#intranet`. Nothing about it is mutable in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterEndpoint;

fn access_of(id: &ResourceIdentity) -> ConvergeResult<EndpointAccess> {
    id.part(1).parse::<EndpointAccess>().map_err(|part| ConvergeError::UnexpectedIdentityPart {
        id: id.encode(),
        part,
        expected: "internet or intranet",
    })
}

fn addressed(action: &str, id: &ResourceIdentity) -> ConvergeResult<Request> {
    let access = access_of(id)?;
    Ok(Request::new(action, json!({"ClusterId": id.part(0), "IsExtranet": access.is_extranet()})))
}

impl ResourceKind for ClusterEndpoint {
    type Spec = EndpointSpec;
    const KIND: &'static str = "cluster_endpoint";
    const ID_PARTS: usize = 2;

    fn create_request(&self, spec: &EndpointSpec) -> ConvergeResult<Request> {
        let mut params = json!({"ClusterId": spec.cluster_id, "IsExtranet": spec.access.is_extranet()});
        if let Some(s) = &spec.subnet_id { params["SubnetId"] = json!(s); }
        if let Some(sg) = &spec.security_group { params["SecurityGroup"] = json!(sg); }
        if let Some(d) = &spec.domain { params["Domain"] = json!(d); }
        Ok(Request::new("CreateClusterEndpoint", params))
    }

    fn spec_identity_parts<'a>(&self, spec: &'a EndpointSpec) -> Vec<&'a str> { vec![spec.cluster_id.as_str(), spec.access.as_str()] }

    fn identity_from_create(&self, spec: &EndpointSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new(self.spec_identity_parts(spec))
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        addressed("DescribeClusterEndpointStatus", id)
    }

    fn observe(&self, resp: &Response) -> Observation {
        match str_at(resp, "/Status") {
            "" => Observation::absent(),
            s => Observation::new(s, str_at(resp, "/ErrorMsg")),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        addressed("DeleteClusterEndpoint", id)
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("endpoint ready", t.read * 2, t.poll_interval)
            .succeed_on(&["Created"])
            .fail_on(&["Failed"])
            .transient_on(&["Creating"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("endpoint gone", t.read * 2, t.poll_interval)
            .succeed_on(&[ABSENT, "Deleted"])
            .transient_on(&["Deleting"])
    }
}
