//! Converge apply: batch windows for vendor-limited bulk requests and the
//! key-presence diff behind declarative sets.

#![forbid(unsafe_code)]

use std::future::Future;
use std::hash::Hash;
use std::ops::Range;

use converge_core::{ConvergeError, ConvergeResult};
use metrics::counter;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Vendor limit on items per bulk request; `CONVERGE_BATCH_SIZE` overrides.
pub fn max_batch_size() -> usize {
    std::env::var("CONVERGE_BATCH_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(100)
}

/// A contiguous slice of a larger ordered sequence, with its position in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWindow<'a, T> {
    pub range: Range<usize>,
    pub items: &'a [T],
}

/// Split into contiguous, order-preserving windows of at most `max` items.
/// Only the last window may be shorter. `max == 0` is treated as 1.
pub fn windows<T>(items: &[T], max: usize) -> Vec<BatchWindow<'_, T>> {
    let max = max.max(1);
    let mut out = Vec::with_capacity(items.len().div_ceil(max));
    let mut start = 0;
    for chunk in items.chunks(max) {
        out.push(BatchWindow { range: start..start + chunk.len(), items: chunk });
        start += chunk.len();
    }
    out
}

/// Plain chunks, for callers that do not need the index ranges.
pub fn partition<T>(items: &[T], max: usize) -> Vec<&[T]> {
    items.chunks(max.max(1)).collect()
}

/// Apply windows strictly in order, stopping at the first failure.
///
/// Returns the number of windows applied. On failure the error names the
/// items already applied and the window that failed; applied windows stay
/// applied and later windows are never attempted.
pub async fn apply_batched<'a, T, F, Fut>(items: &'a [T], max: usize, mut apply: F) -> ConvergeResult<usize>
where
    F: FnMut(BatchWindow<'a, T>) -> Fut,
    Fut: Future<Output = ConvergeResult<()>>,
{
    let ws = windows(items, max);
    let total = ws.len();
    for (i, w) in ws.into_iter().enumerate() {
        let range = w.range.clone();
        counter!("converge_batch_windows_total", 1u64);
        debug!(window = i + 1, of = total, start = range.start, end = range.end, "applying batch window");
        if let Err(e) = apply(w).await {
            warn!(window = i + 1, of = total, start = range.start, end = range.end, error = %e, "batch window failed");
            return Err(ConvergeError::PartialBatchFailure { applied: 0..range.start, failed: range, source: Box::new(e) });
        }
    }
    Ok(total)
}

/// Key-presence delta between a declared and an observed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetDelta<T> {
    pub to_add: Vec<T>,
    pub to_remove: Vec<T>,
}

impl<T> SetDelta<T> {
    pub fn is_empty(&self) -> bool { self.to_add.is_empty() && self.to_remove.is_empty() }
}

/// Items to add are desired keys missing from `current`; items to remove are
/// current keys missing from `desired`. Items whose key is on both sides are
/// left alone even if other fields differ. Input order is kept.
pub fn diff<T, K, F>(desired: &[T], current: &[T], key_of: F) -> SetDelta<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let want: FxHashSet<K> = desired.iter().map(&key_of).collect();
    let have: FxHashSet<K> = current.iter().map(&key_of).collect();
    SetDelta {
        to_add: desired.iter().filter(|d| !have.contains(&key_of(*d))).cloned().collect(),
        to_remove: current.iter().filter(|c| !want.contains(&key_of(*c))).cloned().collect(),
    }
}

/// Reject a set in which two items share a key.
pub fn ensure_unique_keys<T, K, F>(items: &[T], key_of: F) -> ConvergeResult<()>
where
    K: Eq + Hash + std::fmt::Debug,
    F: Fn(&T) -> K,
{
    let mut seen = FxHashSet::default();
    for it in items {
        let k = key_of(it);
        if seen.contains(&k) {
            return Err(ConvergeError::DuplicateKey { key: format!("{:?}", k) });
        }
        seen.insert(k);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn windows_cover_input_in_order() {
        for (n, max) in [(0usize, 3usize), (1, 3), (3, 3), (7, 3), (250, 100), (5, 0)] {
            let items: Vec<usize> = (0..n).collect();
            let ws = windows(&items, max);
            let flat: Vec<usize> = ws.iter().flat_map(|w| w.items.iter().copied()).collect();
            assert_eq!(flat, items, "n={n} max={max}");
            let cap = max.max(1);
            for (i, w) in ws.iter().enumerate() {
                assert!(w.items.len() <= cap);
                assert!(!w.items.is_empty());
                if i + 1 < ws.len() { assert_eq!(w.items.len(), cap); }
                assert_eq!(&items[w.range.clone()], w.items);
            }
            assert_eq!(partition(&items, max).len(), ws.len());
        }
    }

    #[test]
    fn zero_max_is_clamped() {
        let items = [1, 2, 3];
        assert_eq!(partition(&items, 0), vec![&[1][..], &[2][..], &[3][..]]);
    }

    #[tokio::test]
    async fn second_window_failure_stops_and_reports_ranges() {
        let items: Vec<u32> = (0..250).collect();
        let seen = RefCell::new(Vec::new());
        let res = apply_batched(&items, 100, |w| {
            seen.borrow_mut().push(w.items.len());
            let fail = w.range.start == 100;
            async move {
                if fail { Err(ConvergeError::Cancelled { what: "grant".into() }) } else { Ok(()) }
            }
        })
        .await;
        assert_eq!(*seen.borrow(), vec![100, 100]);
        match res {
            Err(ConvergeError::PartialBatchFailure { applied, failed, .. }) => {
                assert_eq!(applied, 0..100);
                assert_eq!(failed, 100..200);
            }
            other => panic!("expected PartialBatchFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_windows_applied_in_order() {
        let items: Vec<u32> = (0..250).collect();
        let seen = RefCell::new(Vec::new());
        let n = apply_batched(&items, 100, |w| {
            seen.borrow_mut().push(w.range.clone());
            async { Ok(()) }
        })
        .await
        .expect("applied");
        assert_eq!(n, 3);
        assert_eq!(*seen.borrow(), vec![0..100, 100..200, 200..250]);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Grant { user: &'static str, role: &'static str, note: &'static str }

    fn g(user: &'static str, role: &'static str, note: &'static str) -> Grant { Grant { user, role, note } }

    #[test]
    fn diff_is_key_presence_only() {
        let desired = vec![g("a", "admin", "new note"), g("b", "view", ""), g("c", "edit", "")];
        let current = vec![g("a", "admin", "old note"), g("d", "view", "")];
        let d = diff(&desired, &current, |x| (x.user, x.role));
        assert_eq!(d.to_add, vec![g("b", "view", ""), g("c", "edit", "")]);
        assert_eq!(d.to_remove, vec![g("d", "view", "")]);
    }

    #[test]
    fn empty_desired_removes_everything() {
        let current = vec![g("a", "admin", ""), g("b", "view", "")];
        let d = diff(&[], &current, |x| (x.user, x.role));
        assert!(d.to_add.is_empty());
        assert_eq!(d.to_remove, current);
        let same = diff(&current, &current, |x| (x.user, x.role));
        assert!(same.is_empty());
    }

    #[test]
    fn duplicate_keys_rejected() {
        let items = vec![g("a", "admin", "1"), g("a", "admin", "2")];
        let err = ensure_unique_keys(&items, |x| (x.user, x.role)).unwrap_err();
        assert!(matches!(err, ConvergeError::DuplicateKey { .. }));
        assert!(ensure_unique_keys(&items[..1], |x| (x.user, x.role)).is_ok());
    }
}
