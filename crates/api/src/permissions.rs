//! Declarative RBAC grants of one principal on one cluster.
//!
//! The declared set replaces whatever the remote holds: grants missing from
//! it are revoked first, then new ones are granted, each side in bulk
//! requests no larger than the vendor batch limit. Grants whose key is on
//! both sides are left alone.

use std::sync::Arc;
use std::time::Instant;

use converge_apply::{apply_batched, diff, ensure_unique_keys, max_batch_size, SetDelta};
use converge_core::{ConvergeError, ConvergeResult, ResourceIdentity, Timeouts};
use converge_ops::{invoke, CancelToken, InvokeSpec};
use converge_remote::{RemoteClient, Request};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use tracing::info;

use crate::kind::{lookup_policy, mutate_policy, str_at, NOT_FOUND_CODES};

const KIND: &str = "permission_set";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    pub cluster_id: String,
    pub principal: String,
    pub role: String,
    /// Empty for cluster-wide roles.
    pub namespace: String,
}

pub type GrantKey = (String, String, String, String);

impl Grant {
    pub fn new(cluster_id: &str, principal: &str, role: &str, namespace: &str) -> Self {
        Self { cluster_id: cluster_id.into(), principal: principal.into(), role: role.into(), namespace: namespace.into() }
    }

    pub fn key(&self) -> GrantKey {
        (self.cluster_id.clone(), self.principal.clone(), self.role.clone(), self.namespace.clone())
    }

    fn wire(&self) -> Json { json!({"Role": self.role, "Namespace": self.namespace}) }
}

/// Permission sets addressed as `clusterId#principal`.
pub struct PermissionSet {
    client: Arc<dyn RemoteClient>,
    timeouts: Timeouts,
    batch_size: usize,
}

impl PermissionSet {
    pub fn new(client: Arc<dyn RemoteClient>, timeouts: Timeouts) -> Self {
        Self { client, timeouts, batch_size: max_batch_size() }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Grants currently held remotely. A missing cluster holds none.
    async fn current(&self, id: &ResourceIdentity, cancel: &CancelToken) -> ConvergeResult<Vec<Grant>> {
        let req = Request::new("DescribePermissions", json!({"ClusterId": id.part(0), "Principal": id.part(1)}));
        let policy = lookup_policy();
        let spec = InvokeSpec::new(self.timeouts.read, self.timeouts.retry_interval);
        let client = &self.client;
        let resp = match invoke("describe permissions", &spec, cancel, |e| policy.classify(e), move || client.call(req.clone())).await {
            Ok(r) => r,
            Err(e) if e.remote().is_some_and(|r| r.matches_any(NOT_FOUND_CODES)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let items = resp.get("Grants").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        Ok(items
            .iter()
            .map(|g| Grant::new(id.part(0), id.part(1), str_at(g, "/Role"), str_at(g, "/Namespace")))
            .collect())
    }

    async fn bulk(&self, action: &str, id: &ResourceIdentity, items: &[Grant], cancel: &CancelToken) -> ConvergeResult<()> {
        let grants: Vec<Json> = items.iter().map(Grant::wire).collect();
        let req = Request::new(action, json!({"ClusterId": id.part(0), "Principal": id.part(1), "Grants": grants}));
        let policy = mutate_policy();
        let spec = InvokeSpec::new(self.timeouts.write, self.timeouts.retry_interval);
        let client = &self.client;
        let what = format!("{} ({} grants)", action, items.len());
        invoke(&what, &spec, cancel, |e| policy.classify(e), move || client.call(req.clone())).await?;
        Ok(())
    }

    /// Make the remote hold exactly `desired`. Returns what was changed.
    pub async fn apply(&self, identity: &str, desired: &[Grant], cancel: &CancelToken) -> ConvergeResult<SetDelta<Grant>> {
        let res = self.apply_inner(identity, desired, cancel).await.map_err(|e| e.in_resource(KIND, identity));
        let outcome = if res.is_ok() { "ok" } else { "error" };
        counter!("converge_ops_total", 1u64, "kind" => KIND, "op" => "apply", "outcome" => outcome);
        res
    }

    async fn apply_inner(&self, identity: &str, desired: &[Grant], cancel: &CancelToken) -> ConvergeResult<SetDelta<Grant>> {
        let t0 = Instant::now();
        let id = ResourceIdentity::decode(identity, 2)?;
        if let Some(g) = desired.iter().find(|g| g.cluster_id != id.part(0) || g.principal != id.part(1)) {
            return Err(ConvergeError::UnexpectedIdentityPart {
                id: id.encode(),
                part: format!("{}#{}", g.cluster_id, g.principal),
                expected: "grants of the addressed cluster and principal",
            });
        }
        ensure_unique_keys(desired, Grant::key)?;
        let current = self.current(&id, cancel).await?;
        let delta = diff(desired, &current, Grant::key);
        if delta.is_empty() {
            info!(id = %id, grants = desired.len(), "permissions: nothing to change");
            return Ok(delta);
        }
        let (this, idr) = (self, &id);
        apply_batched(&delta.to_remove, self.batch_size, move |w| this.bulk("RevokePermissions", idr, w.items, cancel)).await?;
        apply_batched(&delta.to_add, self.batch_size, move |w| this.bulk("GrantPermissions", idr, w.items, cancel)).await?;
        info!(
            id = %id,
            revoked = delta.to_remove.len(),
            granted = delta.to_add.len(),
            took_ms = %t0.elapsed().as_millis(),
            "permissions applied"
        );
        Ok(delta)
    }

    /// Apply `desired` for a new principal and return its identity.
    pub async fn create(&self, cluster_id: &str, principal: &str, desired: &[Grant], cancel: &CancelToken) -> ConvergeResult<ResourceIdentity> {
        let id = ResourceIdentity::new([cluster_id, principal]).map_err(|e| e.in_resource(KIND, "<new>"))?;
        self.apply(&id.encode(), desired, cancel).await?;
        Ok(id)
    }

    pub async fn read(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<Vec<Grant>> {
        let id = ResourceIdentity::decode(identity, 2).map_err(|e| e.in_resource(KIND, identity))?;
        self.current(&id, cancel).await.map_err(|e| e.in_resource(KIND, identity))
    }

    /// Revoke everything.
    pub async fn delete(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<()> {
        self.apply(identity, &[], cancel).await.map(|_| ())
    }
}
