use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{error::Result, names::TypeName, usage::Usage};

/// Type identifier -> JSON-encoded [`TypeName`].
const TYPES: TableDefinition<&str, &[u8]> = TableDefinition::new("types");
/// Type identifier -> next free sequence number in its bucket.
const NEXT_SEQ: TableDefinition<&str, u64> = TableDefinition::new("next_seq");
/// (type identifier, sequence number) -> JSON-encoded [`Usage`].
const USAGES: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("usages");

/// Number of usages a session buffers before writing them out.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Read access to sorted usage buckets, as needed by model training.
pub trait UsageSource {
    fn registered_types(&self) -> Result<BTreeSet<TypeName>>;
    fn read(&self, t: &TypeName) -> Result<Vec<Usage>>;
}

/// Persistent usage buckets, one per declared type.
///
/// Buckets are append-only: every stored usage gets the next sequence
/// number of its type, so reading a bucket returns usages in the order
/// they were stored. Writes go through a [`SortSession`], which batches
/// them into one transaction per flush; a failed flush leaves every
/// committed bucket untouched.
pub struct UsageSorter {
    db: Database,
}

impl UsageSorter {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(TYPES)?;
        txn.open_table(NEXT_SEQ)?;
        txn.open_table(USAGES)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Drop every bucket.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(TYPES)?;
        txn.delete_table(NEXT_SEQ)?;
        txn.delete_table(USAGES)?;
        txn.open_table(TYPES)?;
        txn.open_table(NEXT_SEQ)?;
        txn.open_table(USAGES)?;
        txn.commit()?;
        Ok(())
    }

    /// Start a write-back session buffering up to `capacity` usages.
    pub fn session(&self, capacity: usize) -> SortSession<'_> {
        SortSession {
            sorter: self,
            capacity: capacity.max(1),
            pending: BTreeMap::new(),
            buffered: 0,
            written: 0,
            finished: false,
        }
    }

    /// Store one batch through a short-lived session.
    pub fn store(&self, usages: &[Usage]) -> Result<()> {
        let mut session = self.session(DEFAULT_CACHE_CAPACITY);
        session.store(usages)?;
        session.finish()?;
        Ok(())
    }

    /// Every type with at least one stored usage.
    pub fn registered_types(&self) -> Result<BTreeSet<TypeName>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(TYPES)?;
        let mut result = BTreeSet::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            match serde_json::from_slice::<TypeName>(v.value()) {
                Ok(t) => {
                    result.insert(t);
                }
                Err(e) => tracing::warn!(
                    id = k.value(),
                    "skipping undecodable type entry: {e}"
                ),
            }
        }
        Ok(result)
    }

    /// The full bucket of `t`, empty if nothing was stored for it.
    pub fn read(&self, t: &TypeName) -> Result<Vec<Usage>> {
        let id = t.identifier();
        let txn = self.db.begin_read()?;
        let table = txn.open_table(USAGES)?;

        let mut result = Vec::new();
        for entry in table.range((id.as_str(), 0u64)..=(id.as_str(), u64::MAX))? {
            let (k, v) = entry?;
            match serde_json::from_slice::<Usage>(v.value()) {
                Ok(u) => result.push(u),
                Err(e) => tracing::warn!(
                    id = %id,
                    seq = k.value().1,
                    "skipping malformed usage: {e}"
                ),
            }
        }
        Ok(result)
    }

    /// Number of usages stored for `t`, without decoding them.
    pub fn usage_count(&self, t: &TypeName) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(NEXT_SEQ)?;
        Ok(table
            .get(t.identifier().as_str())?
            .map(|v| v.value())
            .unwrap_or(0))
    }

    fn write(&self, pending: BTreeMap<String, PendingBucket>) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        let txn = self.db.begin_write()?;
        {
            let mut types = txn.open_table(TYPES)?;
            let mut seqs = txn.open_table(NEXT_SEQ)?;
            let mut usages = txn.open_table(USAGES)?;

            for (id, bucket) in &pending {
                let id = id.as_str();
                if types.get(id)?.is_none() {
                    let encoded = serde_json::to_vec(&bucket.r#type)?;
                    types.insert(id, encoded.as_slice())?;
                }

                let mut next = seqs.get(id)?.map(|v| v.value()).unwrap_or(0);
                for usage in &bucket.usages {
                    let encoded = serde_json::to_vec(usage)?;
                    usages.insert((id, next), encoded.as_slice())?;
                    next += 1;
                }
                seqs.insert(id, next)?;
                written += bucket.usages.len();
            }
        }
        txn.commit()?;
        Ok(written)
    }
}

impl UsageSource for UsageSorter {
    fn registered_types(&self) -> Result<BTreeSet<TypeName>> {
        UsageSorter::registered_types(self)
    }

    fn read(&self, t: &TypeName) -> Result<Vec<Usage>> {
        UsageSorter::read(self, t)
    }
}

impl std::fmt::Debug for UsageSorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageSorter").finish_non_exhaustive()
    }
}

struct PendingBucket {
    r#type: TypeName,
    usages: Vec<Usage>,
}

/// A bounded write-back cache in front of a [`UsageSorter`].
///
/// Call [`SortSession::finish`] to flush and observe errors. A session that
/// is dropped without finishing (early return, panic) still flushes what it
/// holds and logs a failure.
pub struct SortSession<'a> {
    sorter: &'a UsageSorter,
    capacity: usize,
    pending: BTreeMap<String, PendingBucket>,
    buffered: usize,
    written: usize,
    finished: bool,
}

impl SortSession<'_> {
    /// Append `usages` to their buckets.
    pub fn store(&mut self, usages: &[Usage]) -> Result<()> {
        for u in usages {
            self.pending
                .entry(u.r#type.identifier())
                .or_insert_with(|| PendingBucket {
                    r#type: u.r#type.clone(),
                    usages: Vec::new(),
                })
                .usages
                .push(u.clone());
            self.buffered += 1;
        }
        if self.buffered >= self.capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Usages waiting to be written.
    pub fn buffered(&self) -> usize {
        self.buffered
    }

    /// Flush and close the session. Returns the number of usages written
    /// over the session's lifetime.
    pub fn finish(mut self) -> Result<usize> {
        self.finished = true;
        self.flush()?;
        Ok(self.written)
    }

    fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        self.buffered = 0;
        self.written += self.sorter.write(pending)?;
        Ok(())
    }
}

impl Drop for SortSession<'_> {
    fn drop(&mut self) {
        if self.finished || self.buffered == 0 {
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!("failed to flush usage cache: {e}");
        }
    }
}
