//! Remote errors and their per-call-site classification.
//!
//! Which vendor codes are retryable differs between resources and even between
//! create and delete of the same resource, so classification is data: an
//! [`ErrorPolicy`] table built by each call site and handed to the invoker.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Typed error returned by the remote API client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct RemoteError {
    /// Vendor code, usually `Category.Detail` (e.g. `InternalError.ClusterNotFound`).
    pub code: String,
    pub message: String,
}

impl RemoteError {
    /// Code used for failures below the API layer (connect, TLS, read timeout).
    pub const TRANSPORT: &'static str = "ClientError.NetworkError";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(Self::TRANSPORT, message)
    }

    /// True when `pattern` is the whole code or one of its dot-separated segments,
    /// so `ClusterNotFound` matches `InternalError.ClusterNotFound`.
    pub fn code_matches(&self, pattern: &str) -> bool {
        self.code == pattern || self.code.split('.').any(|seg| seg == pattern)
    }

    pub fn matches_any<S: AsRef<str>>(&self, patterns: &[S]) -> bool {
        patterns.iter().any(|p| self.code_matches(p.as_ref()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Retryable,
    Fatal,
}

/// Code → classification table.
///
/// Lookup order: exact code, then the last segment (`ClusterNotFound`), then
/// the first segment (`InternalError`), then the fallback. Transport failures
/// start out retryable; `with` can override that like any other code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    rules: FxHashMap<String, ErrorClass>,
    fallback: ErrorClass,
}

impl ErrorPolicy {
    pub fn new(fallback: ErrorClass) -> Self {
        let mut rules = FxHashMap::default();
        rules.insert(RemoteError::TRANSPORT.to_string(), ErrorClass::Retryable);
        Self { rules, fallback }
    }

    pub fn fatal_by_default() -> Self { Self::new(ErrorClass::Fatal) }

    pub fn retry_by_default() -> Self { Self::new(ErrorClass::Retryable) }

    pub fn with(mut self, code: impl Into<String>, class: ErrorClass) -> Self {
        self.rules.insert(code.into(), class);
        self
    }

    pub fn retry_on<S: AsRef<str>>(mut self, codes: &[S]) -> Self {
        for c in codes { self.rules.insert(c.as_ref().to_string(), ErrorClass::Retryable); }
        self
    }

    pub fn fatal_on<S: AsRef<str>>(mut self, codes: &[S]) -> Self {
        for c in codes { self.rules.insert(c.as_ref().to_string(), ErrorClass::Fatal); }
        self
    }

    pub fn classify(&self, err: &RemoteError) -> ErrorClass {
        if let Some(c) = self.rules.get(&err.code) { return *c; }
        if let Some((first, rest)) = err.code.split_once('.') {
            let last = rest.rsplit('.').next().unwrap_or(rest);
            if let Some(c) = self.rules.get(last) { return *c; }
            if let Some(c) = self.rules.get(first) { return *c; }
        }
        self.fallback
    }

    pub fn is_retryable(&self, err: &RemoteError) -> bool {
        self.classify(err) == ErrorClass::Retryable
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self { Self::fatal_by_default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_segments() {
        let e = RemoteError::new("InternalError.ClusterNotFound", "x");
        assert!(e.code_matches("ClusterNotFound"));
        assert!(e.code_matches("InternalError"));
        assert!(e.code_matches("InternalError.ClusterNotFound"));
        assert!(!e.code_matches("Cluster"));
        assert!(e.matches_any(&["ResourceNotFound", "ClusterNotFound"]));
    }

    #[test]
    fn lookup_prefers_exact_then_detail_then_category() {
        let p = ErrorPolicy::fatal_by_default()
            .with("InternalError", ErrorClass::Retryable)
            .with("ClusterNotFound", ErrorClass::Fatal)
            .with("InternalError.ClusterState", ErrorClass::Retryable);
        assert_eq!(p.classify(&RemoteError::new("InternalError.ClusterNotFound", "")), ErrorClass::Fatal);
        assert_eq!(p.classify(&RemoteError::new("InternalError.Unknown", "")), ErrorClass::Retryable);
        assert_eq!(p.classify(&RemoteError::new("InternalError.ClusterState", "")), ErrorClass::Retryable);
        assert_eq!(p.classify(&RemoteError::new("InvalidParameter", "")), ErrorClass::Fatal);
    }

    #[test]
    fn transport_is_retryable_unless_overridden() {
        let e = RemoteError::transport("connection reset");
        assert!(ErrorPolicy::fatal_by_default().is_retryable(&e));
        let strict = ErrorPolicy::fatal_by_default().with(RemoteError::TRANSPORT, ErrorClass::Fatal);
        assert!(!strict.is_retryable(&e));
    }

    #[test]
    fn same_code_differs_per_policy() {
        let not_found = RemoteError::new("ResourceNotFound", "no such node pool");
        let mutate = ErrorPolicy::fatal_by_default().retry_on(&["ResourceNotFound"]);
        let delete = ErrorPolicy::retry_by_default().fatal_on(&["ResourceNotFound"]);
        assert_eq!(mutate.classify(&not_found), ErrorClass::Retryable);
        assert_eq!(delete.classify(&not_found), ErrorClass::Fatal);
    }
}
