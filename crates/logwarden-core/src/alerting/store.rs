//! Alert state store
//!
//! Tracks which rules currently have an open alert. The store is keyed on
//! rule name only; any number of rules may be alerting at the same time.
//! State lives in memory and starts empty on every process start.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, trace};

use crate::error::Result;
use crate::models::{AlertRecord, AlertState};

/// Storage for open alerts, injected into the evaluator
pub trait AlertStateStore: Send + Sync {
    /// Fetch the open alert for a rule
    fn get(&self, rule_name: &str) -> Result<Option<AlertRecord>>;

    /// Open an alert for a rule. Keeps the existing record if one is open.
    fn insert(&self, rule_name: &str) -> Result<()>;

    /// Close the alert for a rule. No-op if none is open.
    fn delete(&self, rule_name: &str) -> Result<()>;

    /// All open alerts
    fn alerting(&self) -> Result<Vec<AlertRecord>>;

    /// Alert state of a rule
    fn lookup(&self, rule_name: &str) -> Result<AlertState> {
        Ok(match self.get(rule_name)? {
            Some(_) => AlertState::Alerting,
            None => AlertState::NotAlerting,
        })
    }
}

type Table = HashMap<String, AlertRecord>;

/// In-memory alert table with snapshot reads and serialized, copy-on-write writes
#[derive(Default)]
pub struct MemoryAlertStore {
    committed: RwLock<Arc<Table>>,
    writer: Mutex<()>,
}

impl MemoryAlertStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a read-only transaction over the last committed state
    pub fn read(&self) -> ReadTxn {
        ReadTxn {
            snapshot: self.committed.read().clone(),
        }
    }

    /// Begin a read-write transaction. Blocks while another write transaction is open.
    pub fn write(&self) -> WriteTxn<'_> {
        let guard = self.writer.lock();
        let table = (**self.committed.read()).clone();
        WriteTxn {
            store: self,
            _guard: guard,
            table,
        }
    }
}

/// Read-only view of the committed state at the time it was opened
pub struct ReadTxn {
    snapshot: Arc<Table>,
}

impl ReadTxn {
    /// Record for a rule
    pub fn get(&self, rule_name: &str) -> Option<&AlertRecord> {
        self.snapshot.get(rule_name)
    }

    /// Number of open alerts
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Whether no alert is open
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }

    /// Iterate over open alerts
    pub fn iter(&self) -> impl Iterator<Item = &AlertRecord> {
        self.snapshot.values()
    }
}

/// Exclusive write transaction. Changes are visible only after [`WriteTxn::commit`];
/// dropping the transaction aborts it.
pub struct WriteTxn<'a> {
    store: &'a MemoryAlertStore,
    _guard: MutexGuard<'a, ()>,
    table: Table,
}

impl WriteTxn<'_> {
    /// Record for a rule, including uncommitted changes
    pub fn get(&self, rule_name: &str) -> Option<&AlertRecord> {
        self.table.get(rule_name)
    }

    /// Insert a record unless one exists for the same rule. Returns whether it was inserted.
    pub fn insert(&mut self, record: AlertRecord) -> bool {
        if self.table.contains_key(&record.rule_name) {
            return false;
        }
        self.table.insert(record.rule_name.clone(), record);
        true
    }

    /// Remove a rule's record, returning it if it existed
    pub fn delete(&mut self, rule_name: &str) -> Option<AlertRecord> {
        self.table.remove(rule_name)
    }

    /// Publish the changes
    pub fn commit(self) {
        *self.store.committed.write() = Arc::new(self.table);
    }

    /// Discard the changes
    pub fn abort(self) {
        trace!("Alert store transaction aborted");
    }
}

impl AlertStateStore for MemoryAlertStore {
    fn get(&self, rule_name: &str) -> Result<Option<AlertRecord>> {
        Ok(self.read().get(rule_name).cloned())
    }

    fn insert(&self, rule_name: &str) -> Result<()> {
        let mut txn = self.write();
        if txn.insert(AlertRecord::open(rule_name)) {
            debug!(rule = rule_name, "Created alert record");
            txn.commit();
        } else {
            debug!(rule = rule_name, "Alert record already exists");
            txn.abort();
        }
        Ok(())
    }

    fn delete(&self, rule_name: &str) -> Result<()> {
        let mut txn = self.write();
        if txn.delete(rule_name).is_some() {
            debug!(rule = rule_name, "Deleted alert record");
            txn.commit();
        } else {
            txn.abort();
        }
        Ok(())
    }

    fn alerting(&self) -> Result<Vec<AlertRecord>> {
        let mut records: Vec<AlertRecord> = self.read().iter().cloned().collect();
        records.sort_by(|a, b| a.rule_name.cmp(&b.rule_name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_then_lookup() {
        let store = MemoryAlertStore::new();
        assert_eq!(store.lookup("cpu-high").unwrap(), AlertState::NotAlerting);

        store.insert("cpu-high").unwrap();
        assert_eq!(store.lookup("cpu-high").unwrap(), AlertState::Alerting);

        store.delete("cpu-high").unwrap();
        assert_eq!(store.lookup("cpu-high").unwrap(), AlertState::NotAlerting);
    }

    #[test]
    fn test_many_rules_alerting_at_once() {
        let store = MemoryAlertStore::new();
        store.insert("a").unwrap();
        store.insert("b").unwrap();
        store.insert("c").unwrap();

        let names: Vec<String> = store
            .alerting()
            .unwrap()
            .into_iter()
            .map(|r| r.rule_name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = MemoryAlertStore::new();
        store.insert("cpu-high").unwrap();
        let first = store.get("cpu-high").unwrap().unwrap();

        store.insert("cpu-high").unwrap();

        assert_eq!(store.alerting().unwrap().len(), 1);
        assert_eq!(store.get("cpu-high").unwrap().unwrap().since, first.since);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let store = MemoryAlertStore::new();
        store.delete("never-alerted").unwrap();
        assert!(store.read().is_empty());
    }

    #[test]
    fn test_uncommitted_write_is_discarded() {
        let store = MemoryAlertStore::new();
        {
            let mut txn = store.write();
            assert!(txn.insert(AlertRecord::open("cpu-high")));
            assert!(txn.get("cpu-high").is_some());
        }
        assert_eq!(store.lookup("cpu-high").unwrap(), AlertState::NotAlerting);

        let mut txn = store.write();
        txn.insert(AlertRecord::open("cpu-high"));
        txn.abort();
        assert_eq!(store.lookup("cpu-high").unwrap(), AlertState::NotAlerting);
    }

    #[test]
    fn test_read_snapshot_is_isolated() {
        let store = MemoryAlertStore::new();
        let before = store.read();

        store.insert("cpu-high").unwrap();

        assert!(before.get("cpu-high").is_none());
        assert!(store.read().get("cpu-high").is_some());
    }

    #[test]
    fn test_concurrent_writers_on_distinct_keys() {
        let store = Arc::new(MemoryAlertStore::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.insert(&format!("rule-{i}")).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.read().len(), 16);
    }
}
