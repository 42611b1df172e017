use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::{lock, RemoteClient, RemoteError, Request, Response};

/// Largest item list a bulk permission request accepts.
const BULK_LIMIT: usize = 100;

#[derive(Debug, Clone)]
struct Pending {
    /// `None` removes the resource.
    to: Option<&'static str>,
    after: u32,
}

#[derive(Debug, Clone)]
struct SimResource {
    label: &'static str,
    attrs: Json,
    pending: Option<Pending>,
}

#[derive(Default)]
struct World {
    resources: FxHashMap<String, SimResource>,
    grants: FxHashMap<(String, String), Vec<Json>>,
    faults: FxHashMap<String, Vec<RemoteError>>,
}

/// In-memory managed-Kubernetes control plane.
///
/// Mutations return at once and leave the resource in an in-flight state;
/// it reaches its next state after `steps` describes of that resource, the
/// way the real control plane finishes work in the background.
pub struct SimCloud {
    steps: u32,
    world: Mutex<World>,
}

impl Default for SimCloud {
    fn default() -> Self { Self::new(2) }
}

fn key(kind: &str, id: &str) -> String { format!("{kind}/{id}") }

fn short_id(prefix: &str) -> String {
    let u = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &u[..8])
}

fn need<'a>(req: &'a Request, k: &str) -> Result<&'a str, RemoteError> {
    req.str_param(k)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RemoteError::new("MissingParameter", format!("{} is required", k)))
}

fn str_list(req: &Request, k: &str) -> Vec<String> {
    req.params
        .get(k)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|x| x.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn endpoint_kind(req: &Request) -> &'static str {
    if req.params.get("IsExtranet").and_then(|v| v.as_bool()).unwrap_or(false) { "internet" } else { "intranet" }
}

impl SimCloud {
    pub fn new(steps: u32) -> Self { Self { steps: steps.max(1), world: Mutex::new(World::default()) } }

    /// Make the next call to `action` fail with `err`. Faults queue up.
    pub fn inject(&self, action: &str, err: RemoteError) {
        lock(&self.world).faults.entry(action.to_string()).or_default().push(err);
    }

    /// Current label of a resource, without advancing it.
    pub fn label_of(&self, kind: &str, id: &str) -> Option<String> {
        lock(&self.world).resources.get(&key(kind, id)).map(|r| r.label.to_string())
    }

    /// Put a resource back in its settled state, as if it had been created
    /// earlier. `kind` is the orchestrator kind name; unknown kinds are
    /// ignored and reported as `false`.
    pub fn restore(&self, kind: &str, id: &str) -> bool {
        let (sim_kind, label) = match kind {
            "cluster" => ("cluster", "Running"),
            "node_pool" => ("nodepool", "normal"),
            "addon" => ("addon", "Succeeded"),
            "cluster_endpoint" => ("endpoint", "Created"),
            "cluster_endpoint_vip" => ("endpointvip", "Created"),
            "cluster_attachment" => ("attachment", "running"),
            "encryption_protection" => ("encryption", "Opened"),
            "log_agent" => ("logagent", "opened"),
            _ => return false,
        };
        let attrs = match sim_kind {
            "nodepool" => json!({"Name": "", "DesiredNodesNum": 0}),
            "addon" => json!({"AddonVersion": ""}),
            _ => json!({"ClusterName": ""}),
        };
        let mut w = lock(&self.world);
        if let ("attachment", Some((_, instance))) = (sim_kind, id.split_once('#')) {
            w.resources.insert(key("instance", instance), SimResource { label: "RUNNING", attrs: json!({}), pending: None });
        }
        let k = key(sim_kind, id);
        debug!(resource = %k, state = label, "sim: restored");
        w.resources.insert(k, SimResource { label, attrs, pending: None });
        true
    }

    /// Seed the grants a principal held in an earlier run.
    pub fn restore_grants<'a, I>(&self, cluster: &str, principal: &str, grants: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let items: Vec<Json> = grants.into_iter().map(|(role, ns)| json!({"Role": role, "Namespace": ns})).collect();
        debug!(cluster, principal, grants = items.len(), "sim: grants restored");
        lock(&self.world).grants.insert((cluster.to_string(), principal.to_string()), items);
    }

    fn start(&self, w: &mut World, k: String, label: &'static str, to: Option<&'static str>, attrs: Json) {
        debug!(resource = %k, state = label, "sim: transition started");
        w.resources.insert(k, SimResource { label, attrs, pending: Some(Pending { to, after: self.steps }) });
    }

    fn transition(&self, w: &mut World, k: &str, label: &'static str, to: Option<&'static str>) -> bool {
        match w.resources.get_mut(k) {
            Some(r) => {
                r.label = label;
                r.pending = Some(Pending { to, after: self.steps });
                true
            }
            None => false,
        }
    }

    /// Advance a resource by one describe and return its state afterwards.
    fn observe(&self, w: &mut World, k: &str) -> Option<SimResource> {
        let mut remove = false;
        if let Some(r) = w.resources.get_mut(k) {
            if let Some(p) = r.pending.as_mut() {
                p.after = p.after.saturating_sub(1);
                if p.after == 0 {
                    match p.to {
                        Some(next) => { r.label = next; r.pending = None; }
                        None => remove = true,
                    }
                }
            }
        }
        if remove {
            w.resources.remove(k);
            debug!(resource = %k, "sim: resource gone");
            return None;
        }
        w.resources.get(k).cloned()
    }

    fn handle(&self, req: &Request) -> Result<Response, RemoteError> {
        let mut guard = lock(&self.world);
        let w = &mut *guard;
        if let Some(q) = w.faults.get_mut(&req.action) {
            if !q.is_empty() { return Err(q.remove(0)); }
        }
        match req.action.as_str() {
            // clusters
            "CreateCluster" => {
                let name = need(req, "ClusterName")?;
                let id = short_id("cls");
                self.start(w, key("cluster", &id), "Creating", Some("Running"), json!({"ClusterName": name}));
                Ok(json!({"ClusterId": id}))
            }
            "DescribeClusters" => {
                let id = req.params.get("ClusterIds").and_then(|v| v.get(0)).and_then(|v| v.as_str()).unwrap_or_default();
                let set: Vec<Json> = self
                    .observe(w, &key("cluster", id))
                    .map(|r| json!({"ClusterId": id, "ClusterStatus": r.label, "ClusterName": r.attrs["ClusterName"]}))
                    .into_iter()
                    .collect();
                Ok(json!({"TotalCount": set.len(), "Clusters": set}))
            }
            "ModifyClusterAttribute" => {
                let id = need(req, "ClusterId")?;
                let k = key("cluster", id);
                let name = req.str_param("ClusterName").map(|s| s.to_string());
                match w.resources.get_mut(&k) {
                    Some(r) => {
                        if let Some(n) = name { r.attrs["ClusterName"] = json!(n); }
                        Ok(json!({}))
                    }
                    None => Err(RemoteError::new("InternalError.ClusterNotFound", format!("cluster {} not found", id))),
                }
            }
            "DeleteCluster" => {
                let id = need(req, "ClusterId")?;
                if self.transition(w, &key("cluster", id), "Deleting", None) {
                    Ok(json!({}))
                } else {
                    Err(RemoteError::new("InternalError.ClusterNotFound", format!("cluster {} not found", id)))
                }
            }
            // node pools
            "CreateClusterNodePool" => {
                let cluster = need(req, "ClusterId")?;
                let name = need(req, "Name")?;
                match w.resources.get(&key("cluster", cluster)) {
                    None => return Err(RemoteError::new("ResourceNotFound.ClusterNotFound", format!("cluster {} not found", cluster))),
                    Some(c) if c.label != "Running" => {
                        return Err(RemoteError::new("InternalError.ClusterState", format!("cluster {} is {}", cluster, c.label)))
                    }
                    Some(_) => {}
                }
                let id = short_id("np");
                let desired = req.params.get("DesiredCapacity").cloned().unwrap_or(json!(0));
                self.start(w, key("nodepool", &format!("{cluster}#{id}")), "creating", Some("normal"), json!({"Name": name, "DesiredNodesNum": desired}));
                Ok(json!({"NodePoolId": id}))
            }
            "DescribeClusterNodePoolDetail" => {
                let cluster = need(req, "ClusterId")?;
                let np = need(req, "NodePoolId")?;
                match self.observe(w, &key("nodepool", &format!("{cluster}#{np}"))) {
                    Some(r) => Ok(json!({"NodePool": {"NodePoolId": np, "Name": r.attrs["Name"], "LifeState": r.label, "DesiredNodesNum": r.attrs["DesiredNodesNum"]}})),
                    None => Err(RemoteError::new("ResourceNotFound", format!("node pool {} not found", np))),
                }
            }
            "ModifyClusterNodePool" => {
                let cluster = need(req, "ClusterId")?;
                let np = need(req, "NodePoolId")?;
                let k = key("nodepool", &format!("{cluster}#{np}"));
                match w.resources.get_mut(&k) {
                    Some(r) => {
                        if let Some(n) = req.str_param("Name") { r.attrs["Name"] = json!(n); }
                        if let Some(d) = req.params.get("DesiredCapacity") { r.attrs["DesiredNodesNum"] = d.clone(); }
                    }
                    None => return Err(RemoteError::new("ResourceNotFound", format!("node pool {} not found", np))),
                }
                self.transition(w, &k, "updating", Some("normal"));
                Ok(json!({}))
            }
            "DeleteClusterNodePool" => {
                let cluster = need(req, "ClusterId")?;
                for np in &str_list(req, "NodePoolIds") {
                    if !self.transition(w, &key("nodepool", &format!("{cluster}#{np}")), "deleting", None) {
                        return Err(RemoteError::new("ResourceNotFound", format!("node pool {} not found", np)));
                    }
                }
                Ok(json!({}))
            }
            // addons
            "InstallAddon" => {
                let cluster = need(req, "ClusterId")?;
                let name = need(req, "AddonName")?;
                let version = req.str_param("AddonVersion").unwrap_or("latest");
                self.start(w, key("addon", &format!("{cluster}#{name}")), "Installing", Some("Succeeded"), json!({"AddonVersion": version}));
                Ok(json!({}))
            }
            "DescribeAddon" => {
                let cluster = need(req, "ClusterId")?;
                let name = need(req, "AddonName")?;
                let set: Vec<Json> = self
                    .observe(w, &key("addon", &format!("{cluster}#{name}")))
                    .map(|r| json!({"AddonName": name, "AddonVersion": r.attrs["AddonVersion"], "Phase": r.label, "Reason": ""}))
                    .into_iter()
                    .collect();
                Ok(json!({"Addons": set}))
            }
            "UpdateAddon" => {
                let cluster = need(req, "ClusterId")?;
                let name = need(req, "AddonName")?;
                let k = key("addon", &format!("{cluster}#{name}"));
                match w.resources.get_mut(&k) {
                    Some(r) => {
                        if let Some(v) = req.str_param("AddonVersion") { r.attrs["AddonVersion"] = json!(v); }
                    }
                    None => return Err(RemoteError::new("ResourceNotFound", format!("addon {} not found", name))),
                }
                self.transition(w, &k, "Upgrading", Some("Succeeded"));
                Ok(json!({}))
            }
            "DeleteAddon" => {
                let cluster = need(req, "ClusterId")?;
                let name = need(req, "AddonName")?;
                if self.transition(w, &key("addon", &format!("{cluster}#{name}")), "Deleting", None) {
                    Ok(json!({}))
                } else {
                    Err(RemoteError::new("ResourceNotFound", format!("addon {} not found", name)))
                }
            }
            // endpoints
            "CreateClusterEndpoint" => {
                let cluster = need(req, "ClusterId")?;
                if !w.resources.contains_key(&key("cluster", cluster)) {
                    return Err(RemoteError::new("InternalError.ClusterNotFound", format!("cluster {} not found", cluster)));
                }
                self.start(w, key("endpoint", &format!("{cluster}#{}", endpoint_kind(req))), "Creating", Some("Created"), json!({}));
                Ok(json!({}))
            }
            "DescribeClusterEndpointStatus" => {
                let cluster = need(req, "ClusterId")?;
                let status = self
                    .observe(w, &key("endpoint", &format!("{cluster}#{}", endpoint_kind(req))))
                    .map(|r| r.label)
                    .unwrap_or("NotFound");
                Ok(json!({"Status": status, "ErrorMsg": ""}))
            }
            "DeleteClusterEndpoint" => {
                let cluster = need(req, "ClusterId")?;
                if self.transition(w, &key("endpoint", &format!("{cluster}#{}", endpoint_kind(req))), "Deleting", None) {
                    Ok(json!({}))
                } else {
                    Err(RemoteError::new("ResourceNotFound", "endpoint not found"))
                }
            }
            // encryption protection
            "EnableEncryptionProtection" => {
                let cluster = need(req, "ClusterId")?;
                self.start(w, key("encryption", cluster), "Opening", Some("Opened"), json!({}));
                Ok(json!({}))
            }
            "DescribeEncryptionStatus" => {
                let cluster = need(req, "ClusterId")?;
                let status = self.observe(w, &key("encryption", cluster)).map(|r| r.label).unwrap_or("Closed");
                Ok(json!({"Status": status, "ErrorMsg": ""}))
            }
            "DisableEncryptionProtection" => {
                let cluster = need(req, "ClusterId")?;
                self.transition(w, &key("encryption", cluster), "Closing", None);
                Ok(json!({}))
            }
            // log agent
            "InstallLogAgent" => {
                let cluster = need(req, "ClusterId")?;
                self.start(w, key("logagent", cluster), "opening", Some("opened"), json!({}));
                Ok(json!({}))
            }
            "DescribeLogSwitches" => {
                let id = req.params.get("ClusterIds").and_then(|v| v.get(0)).and_then(|v| v.as_str()).unwrap_or_default();
                let status = self.observe(w, &key("logagent", id)).map(|r| r.label).unwrap_or("closed");
                Ok(json!({"SwitchSet": [{"ClusterId": id, "Log": {"Enable": status != "closed", "Status": status}}]}))
            }
            "UninstallLogAgent" => {
                let cluster = need(req, "ClusterId")?;
                self.transition(w, &key("logagent", cluster), "closing", None);
                Ok(json!({}))
            }
            // public endpoint vip of managed clusters
            "CreateClusterEndpointVip" => {
                let cluster = need(req, "ClusterId")?;
                if !w.resources.contains_key(&key("cluster", cluster)) {
                    return Err(RemoteError::new("ResourceNotFound.ClusterNotFound", format!("cluster {} not found", cluster)));
                }
                self.start(w, key("endpointvip", cluster), "Creating", Some("Created"), json!({}));
                Ok(json!({}))
            }
            "DescribeClusterEndpointVipStatus" => {
                let cluster = need(req, "ClusterId")?;
                let status = self.observe(w, &key("endpointvip", cluster)).map(|r| r.label).unwrap_or("NotFound");
                Ok(json!({"Status": status, "ErrorMsg": ""}))
            }
            "DeleteClusterEndpointVip" => {
                let cluster = need(req, "ClusterId")?;
                if self.transition(w, &key("endpointvip", cluster), "Deleting", None) {
                    Ok(json!({}))
                } else {
                    Err(RemoteError::new("ResourceNotFound", "endpoint vip not found"))
                }
            }
            // existing instances joined as workers
            "AddExistedInstances" => {
                let cluster = need(req, "ClusterId")?;
                if !w.resources.contains_key(&key("cluster", cluster)) {
                    return Err(RemoteError::new("ResourceNotFound.ClusterNotFound", format!("cluster {} not found", cluster)));
                }
                let (mut ok, mut failed, mut reasons) = (Vec::new(), Vec::new(), Vec::new());
                for ins in str_list(req, "InstanceIds") {
                    let k = key("attachment", &format!("{cluster}#{ins}"));
                    if w.resources.contains_key(&k) {
                        reasons.push(format!("instance {} is already in cluster {}", ins, cluster));
                        failed.push(ins);
                        continue;
                    }
                    // attaching reinstalls the instance, so it boots again
                    self.start(w, key("instance", &ins), "PENDING", Some("RUNNING"), json!({}));
                    self.start(w, k, "initializing", Some("running"), json!({}));
                    ok.push(ins);
                }
                Ok(json!({"SuccInstanceIds": ok, "FailedInstanceIds": failed, "FailedReasons": reasons}))
            }
            "DescribeInstances" => {
                let ins = str_list(req, "InstanceIds").into_iter().next().unwrap_or_default();
                let set: Vec<Json> = self
                    .observe(w, &key("instance", &ins))
                    .map(|r| json!({"InstanceId": ins, "InstanceState": r.label, "LatestOperationState": "SUCCESS"}))
                    .into_iter()
                    .collect();
                Ok(json!({"TotalCount": set.len(), "InstanceSet": set}))
            }
            "DescribeClusterInstances" => {
                let cluster = need(req, "ClusterId")?;
                if !w.resources.contains_key(&key("cluster", cluster)) {
                    return Err(RemoteError::new("InternalError.ClusterNotFound", format!("cluster {} not found", cluster)));
                }
                let ins = str_list(req, "InstanceIds").into_iter().next().unwrap_or_default();
                let set: Vec<Json> = self
                    .observe(w, &key("attachment", &format!("{cluster}#{ins}")))
                    .map(|r| json!({"InstanceId": ins, "InstanceState": r.label, "FailedReason": ""}))
                    .into_iter()
                    .collect();
                Ok(json!({"TotalCount": set.len(), "InstanceSet": set}))
            }
            "DeleteClusterInstances" => {
                let cluster = need(req, "ClusterId")?;
                let (mut ok, mut missing) = (Vec::new(), Vec::new());
                for ins in str_list(req, "InstanceIds") {
                    if self.transition(w, &key("attachment", &format!("{cluster}#{ins}")), "removing", None) {
                        ok.push(ins);
                    } else {
                        missing.push(ins);
                    }
                }
                Ok(json!({"SuccInstanceIds": ok, "NotFoundInstanceIds": missing}))
            }
            // permissions
            "DescribePermissions" => {
                let cluster = need(req, "ClusterId")?;
                let principal = need(req, "Principal")?;
                let grants = w.grants.get(&(cluster.to_string(), principal.to_string())).cloned().unwrap_or_default();
                Ok(json!({"Grants": grants}))
            }
            "GrantPermissions" | "RevokePermissions" => {
                let cluster = need(req, "ClusterId")?;
                let principal = need(req, "Principal")?;
                let items = req.params.get("Grants").and_then(|v| v.as_array()).cloned().unwrap_or_default();
                if items.len() > BULK_LIMIT {
                    return Err(RemoteError::new("InvalidParameter.LimitExceeded", format!("at most {} grants per request, got {}", BULK_LIMIT, items.len())));
                }
                let set = w.grants.entry((cluster.to_string(), principal.to_string())).or_default();
                if req.action == "GrantPermissions" {
                    for it in items {
                        if !set.contains(&it) { set.push(it); }
                    }
                } else {
                    set.retain(|g| !items.contains(g));
                }
                Ok(json!({}))
            }
            other => Err(RemoteError::new("UnsupportedOperation", format!("unknown action {}", other))),
        }
    }
}

#[async_trait::async_trait]
impl RemoteClient for SimCloud {
    async fn call(&self, req: Request) -> Result<Response, RemoteError> {
        let res = self.handle(&req);
        if let Err(e) = &res {
            debug!(action = %req.action, code = %e.code, "sim: call failed");
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn status(sim: &SimCloud, id: &str) -> String {
        let r = sim.call(Request::new("DescribeClusters", json!({"ClusterIds": [id]}))).await.expect("describe");
        r["Clusters"].get(0).and_then(|c| c["ClusterStatus"].as_str()).unwrap_or("NotFound").to_string()
    }

    #[tokio::test]
    async fn cluster_lifecycle_takes_steps() {
        let sim = SimCloud::new(2);
        let r = sim.call(Request::new("CreateCluster", json!({"ClusterName": "demo"}))).await.expect("create");
        let id = r["ClusterId"].as_str().expect("id").to_string();
        assert!(id.starts_with("cls-"));
        assert_eq!(status(&sim, &id).await, "Creating");
        assert_eq!(status(&sim, &id).await, "Running");
        sim.call(Request::new("DeleteCluster", json!({"ClusterId": id}))).await.expect("delete");
        assert_eq!(status(&sim, &id).await, "Deleting");
        assert_eq!(status(&sim, &id).await, "NotFound");
        let e = sim.call(Request::new("DeleteCluster", json!({"ClusterId": id}))).await.unwrap_err();
        assert!(e.code_matches("ClusterNotFound"));
    }

    #[tokio::test]
    async fn node_pool_needs_running_cluster() {
        let sim = SimCloud::new(1);
        let r = sim.call(Request::new("CreateCluster", json!({"ClusterName": "demo"}))).await.expect("create");
        let id = r["ClusterId"].as_str().expect("id").to_string();
        let e = sim
            .call(Request::new("CreateClusterNodePool", json!({"ClusterId": id, "Name": "pool"})))
            .await
            .unwrap_err();
        assert_eq!(e.code, "InternalError.ClusterState");
        assert_eq!(status(&sim, &id).await, "Running");
        sim.call(Request::new("CreateClusterNodePool", json!({"ClusterId": id, "Name": "pool"}))).await.expect("pool");
    }

    #[tokio::test]
    async fn injected_faults_come_first() {
        let sim = SimCloud::new(1);
        sim.inject("CreateCluster", RemoteError::new("RequestLimitExceeded", "slow down"));
        let e = sim.call(Request::new("CreateCluster", json!({"ClusterName": "x"}))).await.unwrap_err();
        assert_eq!(e.code, "RequestLimitExceeded");
        assert!(sim.call(Request::new("CreateCluster", json!({"ClusterName": "x"}))).await.is_ok());
    }

    #[tokio::test]
    async fn bulk_requests_are_capped() {
        let sim = SimCloud::new(1);
        let grants: Vec<Json> = (0..101).map(|i| json!({"Role": "view", "Namespace": format!("ns{i}")})).collect();
        let e = sim
            .call(Request::new("GrantPermissions", json!({"ClusterId": "cls-1", "Principal": "u", "Grants": grants})))
            .await
            .unwrap_err();
        assert!(e.code_matches("LimitExceeded"));
    }

    #[tokio::test]
    async fn attaching_twice_is_refused() {
        let sim = SimCloud::new(1);
        sim.restore("cluster", "cls-1");
        let attach = || sim.call(Request::new("AddExistedInstances", json!({"ClusterId": "cls-1", "InstanceIds": ["ins-1"]})));
        let r = attach().await.expect("attach");
        assert_eq!(r["SuccInstanceIds"], json!(["ins-1"]));
        let again = attach().await.expect("second attach still answers");
        assert_eq!(again["FailedInstanceIds"], json!(["ins-1"]));
        assert!(again["FailedReasons"][0].as_str().is_some_and(|m| m.contains("already")));
    }

    #[tokio::test]
    async fn restored_grants_are_described() {
        let sim = SimCloud::new(1);
        sim.restore_grants("cls-1", "u-1", [("view", "a"), ("admin", "")]);
        let r = sim.call(Request::new("DescribePermissions", json!({"ClusterId": "cls-1", "Principal": "u-1"}))).await.expect("describe");
        assert_eq!(r["Grants"], json!([{"Role": "view", "Namespace": "a"}, {"Role": "admin", "Namespace": ""}]));
    }

    #[tokio::test]
    async fn restored_cluster_accepts_children() {
        let sim = SimCloud::new(1);
        assert!(sim.restore("cluster", "cls-old"));
        assert!(!sim.restore("widget", "w-1"));
        assert_eq!(status(&sim, "cls-old").await, "Running");
        let r = sim
            .call(Request::new("CreateClusterNodePool", json!({"ClusterId": "cls-old", "Name": "pool"})))
            .await
            .expect("node pool on restored cluster");
        assert!(r["NodePoolId"].as_str().is_some());
    }
}
