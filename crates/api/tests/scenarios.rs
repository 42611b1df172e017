#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use converge_api::kind::ResourceKind;
use converge_api::{CancelToken, ConvergeError, ConvergeResult, Grant, Orchestrator, PermissionSet, ResourceIdentity, Timeouts};
use converge_core::{Observation, PollSpec, ABSENT};
use converge_remote::{Request, Response, ScriptedClient};
use serde_json::json;

/// Minimal kind addressed as `region#name`, status under `/State`.
struct Widget;

struct WidgetSpec {
    region: String,
    name: String,
}

impl ResourceKind for Widget {
    type Spec = WidgetSpec;
    const KIND: &'static str = "widget";
    const ID_PARTS: usize = 2;

    fn create_request(&self, spec: &WidgetSpec) -> ConvergeResult<Request> {
        Ok(Request::new("CreateWidget", json!({"Region": spec.region, "Name": spec.name})))
    }

    fn identity_from_create(&self, spec: &WidgetSpec, _resp: &Response) -> ConvergeResult<ResourceIdentity> {
        ResourceIdentity::new([spec.region.as_str(), spec.name.as_str()])
    }

    fn describe_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DescribeWidget", json!({"Region": id.part(0), "Name": id.part(1)})))
    }

    fn observe(&self, resp: &Response) -> Observation {
        match resp.get("State").and_then(|v| v.as_str()) {
            Some(s) => Observation::new(s, ""),
            None => Observation::absent(),
        }
    }

    fn delete_request(&self, id: &ResourceIdentity) -> ConvergeResult<Request> {
        Ok(Request::new("DeleteWidget", json!({"Region": id.part(0), "Name": id.part(1)})))
    }

    fn ready(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("widget available", t.read, t.poll_interval)
            .succeed_on(&["Available"])
            .fail_on(&["Failed"])
            .transient_on(&["Creating"])
    }

    fn gone(&self, t: &Timeouts) -> PollSpec {
        PollSpec::new("widget gone", t.read, t.poll_interval).succeed_on(&[ABSENT]).transient_on(&["Deleting"])
    }
}

fn timeouts() -> Timeouts { Timeouts::uniform(Duration::from_secs(10), Duration::from_millis(1)) }

fn spec() -> WidgetSpec { WidgetSpec { region: "eu-1".into(), name: "widget-a".into() } }

#[tokio::test(start_paused = true)]
async fn create_waits_through_transient_states_then_reads_available() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("CreateWidget", json!({"RequestId": "r-1"}));
    client
        .ok("DescribeWidget", json!({"State": "Creating"}))
        .ok("DescribeWidget", json!({"State": "Creating"}))
        .ok("DescribeWidget", json!({"State": "Available"}));
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());
    let cancel = CancelToken::new();

    let id = orch.create(&spec(), &cancel).await.expect("create");
    assert_eq!(id.encode(), "eu-1#widget-a");
    assert_eq!(client.calls_to("CreateWidget"), 1);
    assert_eq!(client.calls_to("DescribeWidget"), 3);

    let state = orch.read(&id.encode(), &cancel).await.expect("read").expect("present");
    assert_eq!(state.label, "Available");
    assert_eq!(state.identity, "eu-1#widget-a");
}

#[tokio::test(start_paused = true)]
async fn delete_of_absent_resource_succeeds_without_a_delete_call() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("DescribeWidget", json!({"State": "NotFound"}));
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());

    orch.delete("eu-1#widget-a", &CancelToken::new()).await.expect("idempotent delete");
    assert_eq!(client.calls_to("DeleteWidget"), 0);
    assert_eq!(client.calls_to("DescribeWidget"), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_treats_not_found_error_as_gone() {
    let client = Arc::new(ScriptedClient::new());
    client.err("DescribeWidget", "ResourceNotFound", "no such widget");
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());

    orch.delete("eu-1#widget-a", &CancelToken::new()).await.expect("idempotent delete");
    assert_eq!(client.calls_to("DescribeWidget"), 1);
    assert!(orch.read("eu-1#widget-a", &CancelToken::new()).await.expect("read").is_none());
}

#[tokio::test(start_paused = true)]
async fn delete_waits_until_gone() {
    let client = Arc::new(ScriptedClient::new());
    client
        .ok("DescribeWidget", json!({"State": "Available"}))
        .ok("DescribeWidget", json!({"State": "Deleting"}))
        .ok("DescribeWidget", json!({}));
    client.ok("DeleteWidget", json!({}));
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());

    orch.delete("eu-1#widget-a", &CancelToken::new()).await.expect("delete");
    assert_eq!(client.actions(), vec!["DescribeWidget", "DeleteWidget", "DescribeWidget", "DescribeWidget"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_identity_is_rejected_before_any_call() {
    let client = Arc::new(ScriptedClient::new());
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());
    let err = orch.read("eu-1", &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err.root(), ConvergeError::MalformedIdentity { expected: 2, found: 1, .. }), "{err}");
    assert!(client.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_state_surfaces_with_resource_context() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("CreateWidget", json!({}));
    client.ok("DescribeWidget", json!({"State": "Creating"})).ok("DescribeWidget", json!({"State": "Failed"}));
    let orch = Orchestrator::new(client.clone(), Widget, timeouts());

    let err = orch.create(&spec(), &CancelToken::new()).await.unwrap_err();
    match &err {
        ConvergeError::Resource { kind, identity, .. } => {
            assert_eq!(*kind, "widget");
            assert_eq!(identity, "eu-1#widget-a");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(err.root(), ConvergeError::ConvergenceFailure { state, .. } if state == "Failed"));
    // Widget does not opt into rollback.
    assert_eq!(client.calls_to("DeleteWidget"), 0);
}

fn grants(n: usize) -> Vec<Grant> {
    (0..n).map(|i| Grant::new("cls-1", "user-1", &format!("role-{i}"), "default")).collect()
}

fn batch_sizes(client: &ScriptedClient, action: &str) -> Vec<usize> {
    client
        .requests()
        .iter()
        .filter(|r| r.action == action)
        .map(|r| r.params["Grants"].as_array().map(|a| a.len()).unwrap_or(0))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn permission_set_grants_in_vendor_sized_batches() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("DescribePermissions", json!({"Grants": []}));
    client.ok("GrantPermissions", json!({}));
    let perms = PermissionSet::new(client.clone(), timeouts()).with_batch_size(100);

    let delta = perms.apply("cls-1#user-1", &grants(250), &CancelToken::new()).await.expect("apply");
    assert_eq!(delta.to_add.len(), 250);
    assert!(delta.to_remove.is_empty());
    assert_eq!(batch_sizes(&client, "GrantPermissions"), vec![100, 100, 50]);
    let first_role_of_last = client.requests().iter().filter(|r| r.action == "GrantPermissions").nth(2).map(|r| r.params["Grants"][0]["Role"].clone());
    assert_eq!(first_role_of_last, Some(json!("role-200")));
}

#[tokio::test(start_paused = true)]
async fn failed_batch_reports_applied_and_failed_ranges() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("DescribePermissions", json!({"Grants": []}));
    client
        .ok("GrantPermissions", json!({}))
        .err("GrantPermissions", "InvalidParameter.RoleNotFound", "role-150 does not exist")
        .ok("GrantPermissions", json!({}));
    let perms = PermissionSet::new(client.clone(), timeouts()).with_batch_size(100);

    let err = perms.apply("cls-1#user-1", &grants(250), &CancelToken::new()).await.unwrap_err();
    match err.root() {
        ConvergeError::PartialBatchFailure { applied, failed, source } => {
            assert_eq!(*applied, 0..100);
            assert_eq!(*failed, 100..200);
            assert_eq!(source.remote_code(), Some("InvalidParameter.RoleNotFound"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.calls_to("GrantPermissions"), 2);
}

#[tokio::test(start_paused = true)]
async fn permission_set_rejects_foreign_and_duplicate_grants() {
    let client = Arc::new(ScriptedClient::new());
    client.ok("DescribePermissions", json!({"Grants": []}));
    let perms = PermissionSet::new(client.clone(), timeouts());
    let cancel = CancelToken::new();

    let foreign = vec![Grant::new("cls-2", "user-1", "admin", "")];
    let err = perms.apply("cls-1#user-1", &foreign, &cancel).await.unwrap_err();
    assert!(matches!(err.root(), ConvergeError::UnexpectedIdentityPart { .. }), "{err}");

    let dup = vec![Grant::new("cls-1", "user-1", "admin", ""), Grant::new("cls-1", "user-1", "admin", "")];
    let err = perms.apply("cls-1#user-1", &dup, &cancel).await.unwrap_err();
    assert!(matches!(err.root(), ConvergeError::DuplicateKey { .. }), "{err}");
    assert!(client.requests().is_empty());
}
