use std::collections::VecDeque;
use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde_json::Value as Json;

use crate::{lock, RemoteClient, RemoteError, Request, Response};

/// Replays canned answers per action, in order. The last queued answer for
/// an action repeats once the queue is down to it, so a poll can be scripted
/// as `Creating, Creating, Running` without guessing how often it ticks.
/// Every request is logged for assertions.
#[derive(Default)]
pub struct ScriptedClient {
    queues: Mutex<FxHashMap<String, VecDeque<Result<Response, RemoteError>>>>,
    log: Mutex<Vec<Request>>,
}

impl ScriptedClient {
    pub fn new() -> Self { Self::default() }

    pub fn push(&self, action: &str, answer: Result<Response, RemoteError>) -> &Self {
        lock(&self.queues).entry(action.to_string()).or_default().push_back(answer);
        self
    }

    pub fn ok(&self, action: &str, body: Json) -> &Self { self.push(action, Ok(body)) }

    pub fn err(&self, action: &str, code: &str, message: &str) -> &Self {
        self.push(action, Err(RemoteError::new(code, message)))
    }

    /// All requests so far, in call order.
    pub fn requests(&self) -> Vec<Request> { lock(&self.log).clone() }

    pub fn calls_to(&self, action: &str) -> usize {
        lock(&self.log).iter().filter(|r| r.action == action).count()
    }

    pub fn actions(&self) -> Vec<String> {
        lock(&self.log).iter().map(|r| r.action.clone()).collect()
    }
}

#[async_trait::async_trait]
impl RemoteClient for ScriptedClient {
    async fn call(&self, req: Request) -> Result<Response, RemoteError> {
        let action = req.action.clone();
        lock(&self.log).push(req);
        let mut queues = lock(&self.queues);
        match queues.get_mut(&action) {
            Some(q) if q.len() > 1 => q.pop_front().unwrap_or_else(|| Err(unscripted(&action))),
            Some(q) => q.front().cloned().unwrap_or_else(|| Err(unscripted(&action))),
            None => Err(unscripted(&action)),
        }
    }
}

fn unscripted(action: &str) -> RemoteError {
    RemoteError::new("UnsupportedOperation", format!("no scripted answer for {}", action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn last_answer_repeats_and_calls_are_logged() {
        let c = ScriptedClient::new();
        c.ok("DescribeX", json!({"Status": "Creating"})).ok("DescribeX", json!({"Status": "Created"}));
        let mut seen = Vec::new();
        for _ in 0..3 {
            let r = c.call(Request::new("DescribeX", json!({}))).await.expect("scripted");
            seen.push(r["Status"].as_str().unwrap_or_default().to_string());
        }
        assert_eq!(seen, vec!["Creating", "Created", "Created"]);
        assert_eq!(c.calls_to("DescribeX"), 3);
        let e = c.call(Request::new("Other", json!({}))).await.unwrap_err();
        assert_eq!(e.code, "UnsupportedOperation");
        assert_eq!(c.actions().len(), 4);
    }
}
