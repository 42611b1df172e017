//! Remote state labels and how a poll classifies them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Label reported for a resource the remote no longer knows about.
pub const ABSENT: &str = "NotFound";

/// One status observation: an opaque label plus a human-readable detail
/// (vendor message, failure reason, progress text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub label: String,
    pub detail: String,
}

impl Observation {
    pub fn new(label: impl Into<String>, detail: impl Into<String>) -> Self {
        Self { label: label.into(), detail: detail.into() }
    }

    pub fn absent() -> Self {
        Self::new(ABSENT, "resource not found")
    }

    pub fn is_absent(&self) -> bool {
        self.label == ABSENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateClass {
    Success,
    Failure,
    Transient,
}

/// Target/failure/transient label sets plus timing for one wait.
///
/// `success` is checked first, then `failure`; anything else, including labels
/// never seen before, is transient. `transient` only lists the labels expected
/// in flight so unexpected ones can be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    pub what: String,
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub transient: Vec<String>,
    pub interval: Duration,
    pub deadline: Duration,
}

impl PollSpec {
    pub fn new(what: impl Into<String>, deadline: Duration, interval: Duration) -> Self {
        Self {
            what: what.into(),
            success: Vec::new(),
            failure: Vec::new(),
            transient: Vec::new(),
            interval,
            deadline,
        }
    }

    pub fn succeed_on(mut self, labels: &[&str]) -> Self {
        self.success.extend(labels.iter().map(|s| s.to_string()));
        self
    }

    pub fn fail_on(mut self, labels: &[&str]) -> Self {
        self.failure.extend(labels.iter().map(|s| s.to_string()));
        self
    }

    pub fn transient_on(mut self, labels: &[&str]) -> Self {
        self.transient.extend(labels.iter().map(|s| s.to_string()));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn classify(&self, label: &str) -> StateClass {
        if self.success.iter().any(|s| s == label) {
            StateClass::Success
        } else if self.failure.iter().any(|s| s == label) {
            StateClass::Failure
        } else {
            StateClass::Transient
        }
    }

    /// Whether the label appears in any of the three lists.
    pub fn is_known(&self, label: &str) -> bool {
        self.success.iter().chain(self.failure.iter()).chain(self.transient.iter()).any(|s| s == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PollSpec {
        PollSpec::new("wait", Duration::from_secs(1), Duration::from_millis(10))
            .succeed_on(&["Running"])
            .fail_on(&["Abnormal"])
            .transient_on(&["Creating"])
    }

    #[test]
    fn unknown_labels_are_transient() {
        let s = spec();
        assert_eq!(s.classify("Running"), StateClass::Success);
        assert_eq!(s.classify("Abnormal"), StateClass::Failure);
        assert_eq!(s.classify("Creating"), StateClass::Transient);
        assert_eq!(s.classify("Upgrading"), StateClass::Transient);
        assert!(s.is_known("Creating"));
        assert!(!s.is_known("Upgrading"));
    }

    #[test]
    fn success_wins_over_failure() {
        let s = spec().fail_on(&["Running"]);
        assert_eq!(s.classify("Running"), StateClass::Success);
    }

    #[test]
    fn absent_observation() {
        let o = Observation::absent();
        assert!(o.is_absent());
        assert_eq!(o.label, ABSENT);
        assert!(!Observation::new("Running", "").is_absent());
    }
}
