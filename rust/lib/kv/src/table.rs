use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::KVError;

/// One item in a remote table: attribute name to string value.
pub type Item = HashMap<String, String>;

/// Opaque marker returned by a partial scan. Pass it back in the next
/// `ScanRequest` to continue where the previous page stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parameters of a single scan call.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Restrict returned items to these attributes. `None` returns every attribute.
    pub projection: Option<Vec<String>>,
    /// Resume after this token.
    pub exclusive_start: Option<ContinuationToken>,
}

/// One page of scan results.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    /// Present when more data may remain.
    pub continuation: Option<ContinuationToken>,
}

/// TableClient is the seam to a remote keyed table service.
///
/// Implementations provide per-item get/put/delete and a paginated scan.
/// Provisioning the table is the caller's concern. Deleting a missing item
/// must succeed.
pub trait TableClient: Send + Sync {
    /// Fetch the item whose `key_column` attribute equals `key`.
    fn get_item(&self, table: &str, key_column: &str, key: &str) -> Result<Option<Item>, KVError>;

    /// Create or replace an item. The item must carry `key_column`.
    fn put_item(&self, table: &str, key_column: &str, item: Item) -> Result<(), KVError>;

    /// Delete the item whose `key_column` attribute equals `key`.
    fn delete_item(&self, table: &str, key_column: &str, key: &str) -> Result<(), KVError>;

    /// Return one page of items.
    fn scan(&self, table: &str, request: &ScanRequest) -> Result<ScanPage, KVError>;
}

/// MemoryTable is an in-process TableClient.
///
/// Items are kept per table, ordered by key, so scans are deterministic.
/// With a page size set, every full page carries a continuation token, even
/// when nothing follows; the next scan then returns an empty final page.
pub struct MemoryTable {
    tables: Mutex<HashMap<String, BTreeMap<String, Item>>>,
    page_size: Option<usize>,
    scan_calls: AtomicUsize,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            page_size: None,
            scan_calls: AtomicUsize::new(0),
        }
    }

    /// Limit every scan page to at most `page_size` items (minimum 1).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Number of scan calls served so far.
    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::Relaxed)
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, Item>>>, KVError> {
        self.tables
            .lock()
            .map_err(|e| KVError::Remote(e.to_string()))
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new()
    }
}

fn project(item: &Item, projection: Option<&[String]>) -> Item {
    match projection {
        Some(attrs) => item
            .iter()
            .filter(|(name, _)| attrs.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        None => item.clone(),
    }
}

impl TableClient for MemoryTable {
    fn get_item(&self, table: &str, _key_column: &str, key: &str) -> Result<Option<Item>, KVError> {
        let tables = self.lock()?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn put_item(&self, table: &str, key_column: &str, item: Item) -> Result<(), KVError> {
        let key = item
            .get(key_column)
            .cloned()
            .ok_or_else(|| KVError::Remote(format!("item is missing key attribute {:?}", key_column)))?;
        let mut tables = self.lock()?;
        tables.entry(table.to_string()).or_default().insert(key, item);
        Ok(())
    }

    fn delete_item(&self, table: &str, _key_column: &str, key: &str) -> Result<(), KVError> {
        let mut tables = self.lock()?;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    fn scan(&self, table: &str, request: &ScanRequest) -> Result<ScanPage, KVError> {
        self.scan_calls.fetch_add(1, Ordering::Relaxed);

        let tables = self.lock()?;
        let Some(rows) = tables.get(table) else {
            return Ok(ScanPage::default());
        };

        let start = match &request.exclusive_start {
            Some(token) => Bound::Excluded(token.as_str().to_string()),
            None => Bound::Unbounded,
        };
        let limit = self.page_size.unwrap_or(usize::MAX);

        let mut page = ScanPage::default();
        let mut last_key = None;
        for (key, item) in rows.range((start, Bound::Unbounded)).take(limit) {
            page.items.push(project(item, request.projection.as_deref()));
            last_key = Some(key.clone());
        }

        if page.items.len() == limit {
            page.continuation = last_key.map(ContinuationToken::new);
        }
        Ok(page)
    }
}
