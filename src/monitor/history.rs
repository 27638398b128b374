// src/monitor/history.rs

use std::collections::HashMap;
use std::sync::Mutex;

use super::HealthRecord;

/// Where health records are kept, keyed by deployment name.
///
/// Records for one key come back in append order.
pub trait HistoryStore: Send + Sync {
    fn append(&self, key: &str, record: HealthRecord);
    fn records(&self, key: &str) -> Vec<HealthRecord>;
}

/// Process-local history. Lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    inner: Mutex<HashMap<String, Vec<HealthRecord>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistory {
    fn append(&self, key: &str, record: HealthRecord) {
        // A panic elsewhere while holding the lock leaves the map usable.
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(key.to_string()).or_default().push(record);
    }

    fn records(&self, key: &str) -> Vec<HealthRecord> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::HealthStatus;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn record(status: HealthStatus) -> HealthRecord {
        HealthRecord::new(status, PathBuf::from("/d/app"))
    }

    #[test]
    fn keeps_append_order_per_key() {
        let store = InMemoryHistory::new();
        store.append("a", record(HealthStatus::Healthy));
        store.append("b", record(HealthStatus::Error));
        store.append("a", record(HealthStatus::Warning));

        let a: Vec<_> = store.records("a").into_iter().map(|r| r.status).collect();
        assert_eq!(a, [HealthStatus::Healthy, HealthStatus::Warning]);
        assert_eq!(store.records("b").len(), 1);
        assert!(store.records("missing").is_empty());
    }

    #[test]
    fn concurrent_appends_are_not_lost() {
        let store = Arc::new(InMemoryHistory::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        store.append("shared", record(HealthStatus::Healthy));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.records("shared").len(), 400);
    }
}
