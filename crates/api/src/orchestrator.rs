use std::sync::Arc;
use std::time::{Duration, Instant};

use converge_core::{ConvergeError, ConvergeResult, ErrorPolicy, Observation, RemoteError, ResourceIdentity, StateClass, Timeouts, ABSENT};
use converge_ops::{invoke, poll_until, CancelToken, InvokeSpec};
use converge_remote::{RemoteClient, Request, Response};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::kind::{ReadyStage, ResourceKind};

/// What `read` reports about a live resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub identity: String,
    pub label: String,
    pub detail: String,
    pub attributes: Json,
}

/// Create/read/update/delete for one resource kind: issue the mutation
/// through the invoker, then poll until the remote reaches a terminal state.
///
/// Every error leaving this type is wrapped in [`ConvergeError::Resource`]
/// naming the kind and identity.
pub struct Orchestrator<K: ResourceKind> {
    client: Arc<dyn RemoteClient>,
    kind: K,
    timeouts: Timeouts,
}

fn record<T>(kind: &'static str, op: &'static str, res: &ConvergeResult<T>) {
    let outcome = match res {
        Ok(_) => "ok",
        Err(e) if e.is_cancelled() => "cancelled",
        Err(e) if e.is_timeout() => "timeout",
        Err(_) => "error",
    };
    counter!("converge_ops_total", 1u64, "kind" => kind, "op" => op, "outcome" => outcome);
}

const NEW: &str = "<new>";

impl<K: ResourceKind> Orchestrator<K> {
    pub fn new(client: Arc<dyn RemoteClient>, kind: K, timeouts: Timeouts) -> Self {
        Self { client, kind, timeouts }
    }

    pub fn kind(&self) -> &K { &self.kind }

    pub fn timeouts(&self) -> &Timeouts { &self.timeouts }

    async fn call(&self, what: &str, deadline: Duration, policy: &ErrorPolicy, req: Request, cancel: &CancelToken) -> ConvergeResult<Response> {
        let spec = InvokeSpec::new(deadline, self.timeouts.retry_interval);
        let client = &self.client;
        invoke(what, &spec, cancel, |e| policy.classify(e), move || client.call(req.clone())).await
    }

    /// One describe; not-found errors read as an absent observation.
    async fn fetch(&self, req: &Request) -> Result<(Observation, Json), RemoteError> {
        match self.client.call(req.clone()).await {
            Ok(resp) => Ok((self.kind.observe(&resp), self.kind.attributes(&resp))),
            Err(e) if e.matches_any(self.kind.absent_codes()) => Ok((Observation::absent(), Json::Null)),
            Err(e) => Err(e),
        }
    }

    /// Describe through the invoker with the read policy. `None` when the
    /// resource is absent or already in a gone state.
    async fn lookup(&self, id: &ResourceIdentity, cancel: &CancelToken) -> ConvergeResult<Option<(Observation, Json)>> {
        let req = self.kind.describe_request(id)?;
        let policy = self.kind.read_policy();
        let what = format!("describe {}", K::KIND);
        let spec = InvokeSpec::new(self.timeouts.read, self.timeouts.retry_interval);
        let req = &req;
        let (obs, attrs) = invoke(&what, &spec, cancel, |e| policy.classify(e), move || async move { self.fetch(req).await }).await?;
        let gone = self.kind.gone(&self.timeouts);
        if obs.is_absent() || gone.classify(&obs.label) == StateClass::Success {
            return Ok(None);
        }
        Ok(Some((obs, attrs)))
    }

    async fn fetch_stage(&self, req: &Request, observe: fn(&Response) -> Observation) -> Result<Observation, RemoteError> {
        match self.client.call(req.clone()).await {
            Ok(resp) => Ok(observe(&resp)),
            Err(e) if e.matches_any(self.kind.absent_codes()) => Ok(Observation::absent()),
            Err(e) => Err(e),
        }
    }

    async fn wait(&self, id: &ResourceIdentity, ready: bool, cancel: &CancelToken) -> ConvergeResult<Observation> {
        if ready {
            for ReadyStage { request, mut spec, observe } in self.kind.ready_stages(id, &self.timeouts)? {
                spec.what = format!("{} {} {}", K::KIND, id, spec.what);
                let req = &request;
                let obs = poll_until(&spec, cancel, move || async move { self.fetch_stage(req, observe).await }).await?;
                debug!(kind = K::KIND, id = %id, stage = %spec.what, state = %obs.label, "stage passed");
            }
        }
        let req = self.kind.describe_request(id)?;
        let mut spec = if ready { self.kind.ready(&self.timeouts) } else { self.kind.gone(&self.timeouts) };
        spec.what = format!("{} {} {}", K::KIND, id, if ready { "ready" } else { "gone" });
        let req = &req;
        poll_until(&spec, cancel, move || async move { self.fetch(req).await.map(|(o, _)| o) }).await
    }

    /// Create and wait until ready. The identity is only returned once the
    /// remote reports a ready state.
    pub async fn create(&self, spec: &K::Spec, cancel: &CancelToken) -> ConvergeResult<ResourceIdentity> {
        let res = self.create_inner(spec, cancel).await;
        record(K::KIND, "create", &res);
        res
    }

    async fn create_inner(&self, spec: &K::Spec, cancel: &CancelToken) -> ConvergeResult<ResourceIdentity> {
        let t0 = Instant::now();
        // Parts the spec already fixes must be addressable before the remote
        // holds anything under them.
        let known = self.kind.spec_identity_parts(spec);
        if !known.is_empty() {
            ResourceIdentity::new(known).map_err(|e| e.in_resource(K::KIND, NEW))?;
        }
        let req = self.kind.create_request(spec).map_err(|e| e.in_resource(K::KIND, NEW))?;
        let what = format!("create {}", K::KIND);
        let resp = self
            .call(&what, self.kind.create_budget(&self.timeouts), &self.kind.mutate_policy(), req, cancel)
            .await
            .map_err(|e| e.in_resource(K::KIND, NEW))?;
        let id = match self.kind.identity_from_create(spec, &resp) {
            Ok(id) => id,
            Err(e) => {
                // No addressable identity, so nothing to roll back; leave the
                // raw response where an operator can find the resource.
                warn!(kind = K::KIND, error = %e, response = %resp, "create answered without a usable identity");
                return Err(e.in_resource(K::KIND, NEW));
            }
        };
        info!(kind = K::KIND, id = %id, "create accepted; waiting for ready");
        match self.wait(&id, true, cancel).await {
            Ok(obs) => {
                info!(kind = K::KIND, id = %id, state = %obs.label, took_ms = %t0.elapsed().as_millis(), "create ok");
                Ok(id)
            }
            Err(e) => {
                if self.kind.rollback_on_failed_create() && !e.is_cancelled() {
                    self.rollback(&id, cancel).await;
                }
                Err(e.in_resource(K::KIND, id.encode()))
            }
        }
    }

    async fn rollback(&self, id: &ResourceIdentity, cancel: &CancelToken) {
        warn!(kind = K::KIND, id = %id, "create did not converge; deleting half-created resource");
        let req = match self.kind.delete_request(id) {
            Ok(r) => r,
            Err(e) => {
                warn!(kind = K::KIND, id = %id, error = %e, "rollback skipped");
                return;
            }
        };
        let what = format!("rollback {}", K::KIND);
        match self.call(&what, self.timeouts.write, &self.kind.delete_policy(), req, cancel).await {
            Ok(_) => info!(kind = K::KIND, id = %id, "rollback delete issued"),
            Err(e) => warn!(kind = K::KIND, id = %id, error = %e, "rollback delete failed"),
        }
    }

    /// Current state, or `None` when the resource no longer exists and
    /// should be dropped from the caller's state.
    pub async fn read(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<Option<ResourceState>> {
        let res = self.read_inner(identity, cancel).await.map_err(|e| e.in_resource(K::KIND, identity));
        record(K::KIND, "read", &res);
        res
    }

    async fn read_inner(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<Option<ResourceState>> {
        let id = ResourceIdentity::decode(identity, K::ID_PARTS)?;
        let state = self.lookup(&id, cancel).await?.map(|(obs, attributes)| ResourceState {
            identity: id.encode(),
            label: obs.label,
            detail: obs.detail,
            attributes,
        });
        Ok(state)
    }

    /// Apply `spec` to an existing resource and wait until ready again. A
    /// spec that changes nothing mutable issues no request.
    pub async fn update(&self, identity: &str, spec: &K::Spec, cancel: &CancelToken) -> ConvergeResult<()> {
        let res = self.update_inner(identity, spec, cancel).await.map_err(|e| e.in_resource(K::KIND, identity));
        record(K::KIND, "update", &res);
        res
    }

    async fn update_inner(&self, identity: &str, spec: &K::Spec, cancel: &CancelToken) -> ConvergeResult<()> {
        let t0 = Instant::now();
        let id = ResourceIdentity::decode(identity, K::ID_PARTS)?;
        let (_, current) = self.lookup(&id, cancel).await?.ok_or_else(|| ConvergeError::ConvergenceFailure {
            what: format!("update {}", K::KIND),
            state: ABSENT.to_string(),
            detail: "resource no longer exists".into(),
        })?;
        let Some(req) = self.kind.update_request(&id, spec, &current)? else {
            info!(kind = K::KIND, id = %id, "update: nothing to change");
            return Ok(());
        };
        let what = format!("update {}", K::KIND);
        self.call(&what, self.timeouts.write, &self.kind.mutate_policy(), req, cancel).await?;
        let obs = self.wait(&id, true, cancel).await?;
        info!(kind = K::KIND, id = %id, state = %obs.label, took_ms = %t0.elapsed().as_millis(), "update ok");
        Ok(())
    }

    /// Delete and wait until gone. Deleting something already absent, or
    /// that disappears under the delete call, succeeds.
    pub async fn delete(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<()> {
        let res = self.delete_inner(identity, cancel).await.map_err(|e| e.in_resource(K::KIND, identity));
        record(K::KIND, "delete", &res);
        res
    }

    async fn delete_inner(&self, identity: &str, cancel: &CancelToken) -> ConvergeResult<()> {
        let t0 = Instant::now();
        let id = ResourceIdentity::decode(identity, K::ID_PARTS)?;
        if self.lookup(&id, cancel).await?.is_none() {
            info!(kind = K::KIND, id = %id, "delete: already gone");
            return Ok(());
        }
        let what = format!("delete {}", K::KIND);
        let req = self.kind.delete_request(&id)?;
        match self.call(&what, self.timeouts.write, &self.kind.delete_policy(), req, cancel).await {
            Ok(_) => {}
            Err(e) if e.remote().is_some_and(|r| r.matches_any(self.kind.absent_codes())) => {
                info!(kind = K::KIND, id = %id, "delete: vanished before the delete call");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.wait(&id, false, cancel).await?;
        info!(kind = K::KIND, id = %id, took_ms = %t0.elapsed().as_millis(), "delete ok");
        Ok(())
    }
}
