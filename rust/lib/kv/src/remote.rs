use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{KVError, validate_key};
use crate::table::{Item, ScanRequest, TableClient};
use crate::traits::{KVStore, Record};

/// TableStore is a KVStore implementation backed by a remote keyed table.
///
/// Each record is one item with exactly two string attributes: the key
/// column and the value column. Point operations map to single-item calls.
/// `names`, `all_items` and `clear` need a full-table scan, following
/// continuation tokens until a page comes back without one.
///
/// There is no in-process lock. `clear` scans first and then deletes item by
/// item, so a record written between the two phases survives, and a failed
/// delete leaves earlier deletions in place.
pub struct TableStore {
    client: Arc<dyn TableClient>,
    table_name: String,
    key_column: String,
    value_column: String,
}

impl TableStore {
    pub fn new(
        client: Arc<dyn TableClient>,
        table_name: &str,
        key_column: &str,
        value_column: &str,
    ) -> Self {
        Self {
            client,
            table_name: table_name.to_string(),
            key_column: key_column.to_string(),
            value_column: value_column.to_string(),
        }
    }

    /// Scan the whole table, following continuation tokens.
    fn scan_all(&self, projection: Option<Vec<String>>) -> Result<Vec<Item>, KVError> {
        let mut request = ScanRequest {
            projection,
            exclusive_start: None,
        };
        let mut items = Vec::new();
        let mut pages = 0usize;

        loop {
            let page = self.client.scan(&self.table_name, &request)?;
            pages += 1;
            items.extend(page.items);
            match page.continuation {
                Some(token) => request.exclusive_start = Some(token),
                None => break,
            }
        }

        debug!(
            "TableStore: scanned {} items in {} pages from {}",
            items.len(),
            pages,
            self.table_name
        );
        Ok(items)
    }

    fn key_of(&self, item: &Item) -> Result<String, KVError> {
        item.get(&self.key_column).cloned().ok_or_else(|| {
            KVError::Remote(format!(
                "item in {} is missing key attribute {:?}",
                self.table_name, self.key_column
            ))
        })
    }
}

impl KVStore for TableStore {
    fn get(&self, key: &str) -> Result<Option<String>, KVError> {
        let item = self
            .client
            .get_item(&self.table_name, &self.key_column, key)?;
        Ok(item.and_then(|mut item| item.remove(&self.value_column)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KVError> {
        validate_key(key)?;
        let item = HashMap::from([
            (self.key_column.clone(), key.to_string()),
            (self.value_column.clone(), value.to_string()),
        ]);
        self.client
            .put_item(&self.table_name, &self.key_column, item)
    }

    fn delete(&self, key: &str) -> Result<(), KVError> {
        self.client
            .delete_item(&self.table_name, &self.key_column, key)
    }

    fn clear(&self) -> Result<(), KVError> {
        let names = self.names()?;
        for name in &names {
            self.client
                .delete_item(&self.table_name, &self.key_column, name)?;
        }
        debug!("TableStore: cleared {} items from {}", names.len(), self.table_name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, KVError> {
        self.scan_all(Some(vec![self.key_column.clone()]))?
            .iter()
            .map(|item| self.key_of(item))
            .collect()
    }

    fn all_items(&self) -> Result<Vec<Record>, KVError> {
        let mut results = Vec::new();
        for mut item in self.scan_all(None)? {
            let key = self.key_of(&item)?;
            match item.remove(&self.value_column) {
                Some(value) => results.push(Record { key, value }),
                None => warn!(
                    "TableStore: item {:?} in {} has no {:?} attribute, skipping",
                    key, self.table_name, self.value_column
                ),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{MemoryTable, ScanPage};
    use std::sync::Mutex;

    fn store_with(table: Arc<MemoryTable>) -> TableStore {
        TableStore::new(table, "dynamo-test", "testkey", "testvalue")
    }

    fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
        v.sort();
        v
    }

    #[test]
    fn set_get_delete() {
        let store = store_with(Arc::new(MemoryTable::new()));
        store.set("foo", "bar").unwrap();
        assert_eq!(store.get("foo").unwrap().as_deref(), Some("bar"));
        store.set("foo", "baz").unwrap();
        assert_eq!(store.get("foo").unwrap().as_deref(), Some("baz"));
        store.delete("foo").unwrap();
        assert_eq!(store.get("foo").unwrap(), None);
        store.delete("foo").unwrap();
    }

    #[test]
    fn items_have_exactly_two_attributes() {
        let table = Arc::new(MemoryTable::new());
        let store = store_with(Arc::clone(&table));
        store.set("foo", "bar").unwrap();
        let item = table.get_item("dynamo-test", "testkey", "foo").unwrap().unwrap();
        assert_eq!(item.len(), 2);
        assert_eq!(item["testkey"], "foo");
        assert_eq!(item["testvalue"], "bar");
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = store_with(Arc::new(MemoryTable::new()));
        assert!(matches!(store.set("", "v"), Err(KVError::Validation(_))));
    }

    #[test]
    fn paginated_scan_returns_every_record() {
        let table = Arc::new(MemoryTable::new().with_page_size(1));
        let store = store_with(Arc::clone(&table));
        for i in 1..=4 {
            store.set(&format!("key{}", i), &format!("val{}", i)).unwrap();
        }

        assert_eq!(
            sorted(store.names().unwrap()),
            vec!["key1", "key2", "key3", "key4"]
        );
        assert_eq!(
            sorted(store.all_items().unwrap()),
            vec![
                Record::new("key1", "val1"),
                Record::new("key2", "val2"),
                Record::new("key3", "val3"),
                Record::new("key4", "val4"),
            ]
        );
    }

    #[test]
    fn scan_stops_only_when_token_is_absent() {
        let table = Arc::new(MemoryTable::new().with_page_size(1));
        let store = store_with(Arc::clone(&table));
        for i in 1..=4 {
            store.set(&format!("key{}", i), "v").unwrap();
        }
        let before = table.scan_calls();
        assert_eq!(store.all_items().unwrap().len(), 4);
        // Four full pages plus the trailing empty one.
        assert_eq!(table.scan_calls() - before, 5);
    }

    #[test]
    fn clear_removes_every_record_across_pages() {
        let table = Arc::new(MemoryTable::new().with_page_size(2));
        let store = store_with(table);
        for i in 0..5 {
            store.set(&format!("k{}", i), "v").unwrap();
        }
        store.clear().unwrap();
        assert!(store.names().unwrap().is_empty());
        assert!(store.all_items().unwrap().is_empty());
        store.clear().unwrap();
    }

    #[test]
    fn items_without_value_are_skipped() {
        let table = Arc::new(MemoryTable::new());
        let store = store_with(Arc::clone(&table));
        store.set("good", "v").unwrap();
        table
            .put_item(
                "dynamo-test",
                "testkey",
                HashMap::from([("testkey".to_string(), "bad".to_string())]),
            )
            .unwrap();

        assert_eq!(store.all_items().unwrap(), vec![Record::new("good", "v")]);
        assert_eq!(store.get("bad").unwrap(), None);
        assert_eq!(sorted(store.names().unwrap()), vec!["bad", "good"]);
    }

    /// Fails every delete after the first, to observe partial clears.
    struct FlakyDeletes {
        inner: MemoryTable,
        deletes: Mutex<usize>,
    }

    impl TableClient for FlakyDeletes {
        fn get_item(&self, table: &str, key_column: &str, key: &str) -> Result<Option<Item>, KVError> {
            self.inner.get_item(table, key_column, key)
        }

        fn put_item(&self, table: &str, key_column: &str, item: Item) -> Result<(), KVError> {
            self.inner.put_item(table, key_column, item)
        }

        fn delete_item(&self, table: &str, key_column: &str, key: &str) -> Result<(), KVError> {
            let mut deletes = self.deletes.lock().unwrap();
            *deletes += 1;
            if *deletes > 1 {
                return Err(KVError::Remote("throttled".to_string()));
            }
            self.inner.delete_item(table, key_column, key)
        }

        fn scan(&self, table: &str, request: &ScanRequest) -> Result<ScanPage, KVError> {
            self.inner.scan(table, request)
        }
    }

    #[test]
    fn failed_clear_keeps_earlier_deletions() {
        let client = Arc::new(FlakyDeletes {
            inner: MemoryTable::new(),
            deletes: Mutex::new(0),
        });
        let store = TableStore::new(client, "t", "k", "v");
        for key in ["a", "b", "c"] {
            store.set(key, "v").unwrap();
        }

        let err = store.clear().unwrap_err();
        assert_eq!(err, KVError::Remote("throttled".to_string()));
        assert_eq!(sorted(store.names().unwrap()), vec!["b", "c"]);
    }
}
