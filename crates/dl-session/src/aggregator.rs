//! Result aggregator: validates scanned tokens against the registry and
//! keeps the deduplicated, insertion-ordered result set.
//!
//! Every check-and-append happens under one write lock, so concurrent
//! notification callbacks can never insert the same code twice. Each
//! mutation is announced as exactly one [`SessionEvent`].

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use dl_protocol::{CategoryFilter, DiagnosticCode, SessionEvent};
use tokio::sync::broadcast;

use crate::registry::CodeRegistry;

/// Capacity of the event channel created by [`ResultAggregator::new`].
pub const EVENT_CAPACITY: usize = 256;

/// Owner of the result set.
pub struct ResultAggregator {
    registry: Arc<CodeRegistry>,
    results: RwLock<Vec<DiagnosticCode>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ResultAggregator {
    /// Create an aggregator with its own event channel.
    pub fn new(registry: Arc<CodeRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self::with_events(registry, events)
    }

    /// Create an aggregator that publishes on an existing event channel.
    pub fn with_events(registry: Arc<CodeRegistry>, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            registry,
            results: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to result-set changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &CodeRegistry {
        &self.registry
    }

    /// Offer one scanned token. Returns the new entry if it was appended.
    ///
    /// Unknown tokens and codes already in the set are ignored.
    pub fn ingest(&self, token: &str) -> Option<DiagnosticCode> {
        let Some(code) = self.registry.resolve(token) else {
            tracing::trace!(token, "token not in registry, discarded");
            return None;
        };

        let mut results = self.write();
        if results.iter().any(|c| c.code == code.code) {
            return None;
        }
        results.push(code.clone());
        let total = results.len();

        tracing::info!(
            code = %code.code,
            category = %code.category,
            total,
            "diagnostic code detected"
        );
        // Sent under the lock so event order matches mutation order.
        let _ = self.events.send(SessionEvent::CodeDetected {
            code: code.clone(),
            total,
            detected_at: Utc::now(),
        });
        Some(code)
    }

    /// Offer a batch of tokens in order. Returns how many were appended.
    pub fn ingest_all<I, S>(&self, tokens: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tokens
            .into_iter()
            .filter(|t| self.ingest(t.as_ref()).is_some())
            .count()
    }

    /// Codes matching `filter`, in insertion order.
    pub fn filter_by_category(&self, filter: impl Into<CategoryFilter>) -> Vec<DiagnosticCode> {
        let filter = filter.into();
        self.read()
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect()
    }

    /// Copy of the full result set.
    pub fn snapshot(&self) -> Vec<DiagnosticCode> {
        self.read().clone()
    }

    /// Empty the result set. Always announces the change, even if it was empty.
    pub fn clear(&self) {
        let mut results = self.write();
        let removed = results.len();
        results.clear();
        tracing::info!(removed, "result set cleared");
        let _ = self.events.send(SessionEvent::ResultsCleared {
            removed,
            cleared_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<DiagnosticCode>> {
        self.results.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<DiagnosticCode>> {
        self.results.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dl_protocol::CodeCategory;

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new(Arc::new(CodeRegistry::builtin()))
    }

    fn codes(list: &[DiagnosticCode]) -> Vec<&str> {
        list.iter().map(|c| c.code.as_str()).collect()
    }

    #[test]
    fn ingest_known_code() {
        let agg = aggregator();
        let added = agg.ingest("P0300").unwrap();
        assert_eq!(added.category, CodeCategory::Ignition);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn repeated_ingest_is_idempotent() {
        let agg = aggregator();
        assert!(agg.ingest("P0171").is_some());
        for _ in 0..10 {
            assert!(agg.ingest("P0171").is_none());
        }
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn unknown_tokens_leave_set_unchanged() {
        let agg = aggregator();
        agg.ingest("P0300");
        let before = agg.snapshot();
        for token in ["B9999", "P9999", "U1234", "garbage", ""] {
            assert!(agg.ingest(token).is_none());
        }
        assert_eq!(agg.snapshot(), before);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn preserves_encounter_order() {
        let agg = aggregator();
        let added = agg.ingest_all(["P0420", "C1201", "P0300", "C1201", "P0420"]);
        assert_eq!(added, 3);
        assert_eq!(codes(&agg.snapshot()), vec!["P0420", "C1201", "P0300"]);
    }

    #[test]
    fn filter_by_category_is_stable_subsequence() {
        let agg = aggregator();
        agg.ingest_all(["P0125", "P0300", "P0217", "P0301", "C1300"]);

        let cooling = agg.filter_by_category(CodeCategory::Cooling);
        assert_eq!(codes(&cooling), vec!["P0125", "P0217"]);

        let ignition = agg.filter_by_category(CodeCategory::Ignition);
        assert_eq!(codes(&ignition), vec!["P0300", "P0301"]);

        assert!(agg.filter_by_category(CodeCategory::Fuel).is_empty());
        assert_eq!(agg.filter_by_category(CategoryFilter::All), agg.snapshot());
    }

    #[test]
    fn every_category_filter_partitions_the_set() {
        let agg = aggregator();
        agg.ingest_all([
            "P0300", "P0301", "P0171", "P0172", "P0420", "P0100", "P0700", "B1000", "C1201",
            "U0100", "P0125", "P0217", "C1300",
        ]);
        let all = agg.snapshot();
        let mut total = 0;
        for category in CodeCategory::ALL {
            let subset = agg.filter_by_category(category);
            assert!(subset.iter().all(|c| c.category == category));
            let expected: Vec<_> = all.iter().filter(|c| c.category == category).cloned().collect();
            assert_eq!(subset, expected);
            total += subset.len();
        }
        assert_eq!(total, all.len());
    }

    #[test]
    fn clear_empties_regardless_of_size() {
        let agg = aggregator();
        agg.clear();
        assert!(agg.is_empty());

        agg.ingest_all(["P0300", "P0171", "P0420"]);
        agg.clear();
        assert!(agg.is_empty());
        assert!(agg.filter_by_category(CategoryFilter::All).is_empty());

        // Cleared codes can be detected again.
        assert!(agg.ingest("P0300").is_some());
    }

    #[test]
    fn emits_one_event_per_mutation() {
        let agg = aggregator();
        let mut rx = agg.subscribe();

        agg.ingest("P0300");
        agg.ingest("P0300");
        agg.ingest("B9999");
        agg.ingest("P0171");
        agg.clear();

        match rx.try_recv().unwrap() {
            SessionEvent::CodeDetected { code, total, .. } => {
                assert_eq!(code.code, "P0300");
                assert_eq!(total, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.try_recv().unwrap() {
            SessionEvent::CodeDetected { code, total, .. } => {
                assert_eq!(code.code, "P0171");
                assert_eq!(total, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ResultsCleared { removed: 2, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_ingest_never_duplicates() {
        let agg = Arc::new(aggregator());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        agg.ingest_all(["P0300", "P0171", "P0420", "U0100"]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.len(), 4);
    }
}
