//! Ordered byte-key/byte-value backend over redb.
//!
//! One table holds the whole keyspace; the key schema in [`crate::keys`]
//! namespaces it. The backend hands out transactional scopes (snapshot
//! reads, commit-or-discard writes), prefix/range cursors, and leased id
//! sequences, and runs a periodic compaction worker for persistent
//! databases. It never interprets keys.

use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};

use engram_core::{Error, Result};

use crate::codec;

const KV_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("engram_kv");

/// How often the compaction worker wakes.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// File name of the database inside the backend directory.
const DATABASE_FILE: &str = "engram.redb";

/// Iteration direction for prefix cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

struct Compactor {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct BackendInner {
    db: RwLock<Database>,
    closed: AtomicBool,
    compactor: Mutex<Option<Compactor>>,
}

/// Shared handle to one open database. Cloning is cheap; all clones refer to
/// the same underlying store and become unusable once any of them is closed.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<BackendInner>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

impl Backend {
    /// Open a database at `path`, or a purely in-memory one for tests.
    ///
    /// In persistent mode the path must be (or become) a directory; the
    /// database file lives inside it. Fails with an Io error when the path
    /// exists but is not a directory or cannot be created.
    pub fn open(path: impl AsRef<Path>, in_memory: bool) -> Result<Backend> {
        let db = if in_memory {
            Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .map_err(Error::storage)?
        } else {
            let dir = path.as_ref();
            match std::fs::metadata(dir) {
                Ok(meta) if !meta.is_dir() => {
                    return Err(Error::Io(format!("{} is not a directory", dir.display())));
                }
                Ok(_) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    std::fs::create_dir_all(dir)?;
                }
                Err(err) => return Err(err.into()),
            }
            Database::create(dir.join(DATABASE_FILE)).map_err(Error::storage)?
        };

        let backend = Backend {
            inner: Arc::new(BackendInner {
                db: RwLock::new(db),
                closed: AtomicBool::new(false),
                compactor: Mutex::new(None),
            }),
        };
        backend.ensure_table()?;

        if !in_memory {
            backend.start_compactor();
        }
        Ok(backend)
    }

    fn ensure_table(&self) -> Result<()> {
        let db = self.inner.db.read();
        let txn = db.begin_write().map_err(Error::storage)?;
        {
            let _ = txn.open_table(KV_TABLE).map_err(Error::storage)?;
        }
        txn.commit().map_err(Error::storage)?;
        Ok(())
    }

    /// Spawn the compaction worker: wake every five minutes, run compaction
    /// cycles in a loop while they report progress, exit on close.
    fn start_compactor(&self) {
        let (stop, wake) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::spawn(move || loop {
            match wake.recv_timeout(COMPACTION_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!(component = "backend", "stopping compaction worker");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => loop {
                    let progressed = {
                        let mut db = inner.db.write();
                        match db.compact() {
                            Ok(progressed) => progressed,
                            Err(err) => {
                                tracing::warn!(
                                    component = "backend",
                                    error = %err,
                                    "compaction cycle failed"
                                );
                                false
                            }
                        }
                    };
                    if !progressed {
                        break;
                    }
                    tracing::debug!(component = "backend", "compaction cycle completed");
                },
            }
        });
        *self.inner.compactor.lock() = Some(Compactor { stop, handle });
    }

    /// Close the backend. Idempotent. Signals the compaction worker and
    /// waits for it to exit; all later operations fail with Closed.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let compactor = self.inner.compactor.lock().take();
        if let Some(compactor) = compactor {
            let _ = compactor.stop.send(());
            let _ = compactor.handle.join();
        }
    }

    /// Whether this backend has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn guard_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Run `f` inside a read-only scope with snapshot isolation.
    pub fn with_read<R>(&self, f: impl FnOnce(&ReadScope) -> Result<R>) -> Result<R> {
        self.guard_open()?;
        let db = self.inner.db.read();
        let txn = db.begin_read().map_err(Error::storage)?;
        let table = txn.open_table(KV_TABLE).map_err(Error::storage)?;
        f(&ReadScope { _txn: txn, table })
    }

    /// Run `f` inside a read-write scope. Commits only when `f` returns Ok;
    /// any error discards every write made in the scope.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut WriteScope<'_>) -> Result<R>) -> Result<R> {
        self.guard_open()?;
        let db = self.inner.db.read();
        let txn = db.begin_write().map_err(Error::storage)?;
        let result = {
            let table = txn.open_table(KV_TABLE).map_err(Error::storage)?;
            let mut scope = WriteScope { table };
            f(&mut scope)
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(Error::storage)?;
                Ok(value)
            }
            Err(err) => {
                let _ = txn.abort();
                Err(err)
            }
        }
    }

    /// Obtain a named monotonic sequence. `bandwidth` controls how many ids
    /// are leased per transaction; it must be at least 1.
    pub fn sequence(&self, name: &[u8], bandwidth: u64) -> Result<Sequence> {
        self.guard_open()?;
        if bandwidth < 1 {
            return Err(Error::validation("sequence bandwidth must be at least 1"));
        }
        Ok(Sequence {
            backend: self.clone(),
            key: name.to_vec(),
            bandwidth,
            next: 0,
            leased: 0,
        })
    }
}

/// A named monotonic counter stored at its name key.
///
/// Draws are leased in ranges of `bandwidth` so most calls to [`next`]
/// avoid a write transaction. [`release`] returns the unused remainder of
/// the current lease so ids are not burned across restarts.
///
/// [`next`]: Sequence::next
/// [`release`]: Sequence::release
pub struct Sequence {
    backend: Backend,
    key: Vec<u8>,
    bandwidth: u64,
    next: u64,
    leased: u64,
}

impl Sequence {
    /// The next value. Strictly increasing across the life of the database.
    pub fn next(&mut self) -> Result<u64> {
        if self.next >= self.leased {
            self.lease()?;
        }
        let value = self.next;
        self.next += 1;
        Ok(value)
    }

    fn lease(&mut self) -> Result<()> {
        let key = self.key.clone();
        let bandwidth = self.bandwidth;
        let start = self.backend.with_write(|scope| {
            let current = match scope.get(&key)? {
                Some(raw) => codec::decode_u64(&raw)?,
                None => 0,
            };
            scope.set(&key, &codec::encode_u64(current + bandwidth))?;
            Ok(current)
        })?;
        self.next = start;
        self.leased = start + bandwidth;
        Ok(())
    }

    /// Return the unused part of the current lease. Idempotent; safe to call
    /// again after a release.
    pub fn release(&mut self) -> Result<()> {
        if self.next >= self.leased {
            return Ok(());
        }
        let key = self.key.clone();
        let next = self.next;
        self.backend
            .with_write(|scope| scope.set(&key, &codec::encode_u64(next)))?;
        self.leased = next;
        Ok(())
    }
}

/// Snapshot-isolated read scope.
pub struct ReadScope {
    _txn: redb::ReadTransaction,
    table: redb::ReadOnlyTable<&'static [u8], &'static [u8]>,
}

impl ReadScope {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .table
            .get(key)
            .map_err(Error::storage)?
            .map(|guard| guard.value().to_vec()))
    }

    /// Cursor over all keys starting with `prefix`, in the given direction.
    pub fn iter_prefix(&self, prefix: &[u8], direction: Direction) -> Result<KvIter<'_>> {
        prefix_iter(&self.table, prefix, direction)
    }

    /// Cursor over `[start, end)`, ascending.
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        range_iter(
            &self.table,
            Bound::Included(start),
            Bound::Excluded(end),
            Direction::Forward,
        )
    }

    /// Cursor over `[start, end]`, descending from `end`.
    pub fn range_rev_inclusive(&self, start: &[u8], end: &[u8]) -> Result<KvIter<'_>> {
        range_iter(
            &self.table,
            Bound::Included(start),
            Bound::Included(end),
            Direction::Reverse,
        )
    }
}

/// Read-write scope. Reads observe the scope's own writes.
pub struct WriteScope<'txn> {
    table: redb::Table<'txn, &'static [u8], &'static [u8]>,
}

impl WriteScope<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .table
            .get(key)
            .map_err(Error::storage)?
            .map(|guard| guard.value().to_vec()))
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.table.insert(key, value).map_err(Error::storage)?;
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.table.remove(key).map_err(Error::storage)?;
        Ok(())
    }

    /// Cursor over all keys starting with `prefix`, in the given direction.
    pub fn iter_prefix(&self, prefix: &[u8], direction: Direction) -> Result<KvIter<'_>> {
        prefix_iter(&self.table, prefix, direction)
    }
}

/// Lazy cursor over a key range. Resources are released on drop.
pub struct KvIter<'i> {
    inner: redb::Range<'i, &'static [u8], &'static [u8]>,
    direction: Direction,
}

impl Iterator for KvIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.direction {
            Direction::Forward => self.inner.next()?,
            Direction::Reverse => self.inner.next_back()?,
        };
        Some(
            entry
                .map(|(key, value)| (key.value().to_vec(), value.value().to_vec()))
                .map_err(Error::storage),
        )
    }
}

fn prefix_iter<'t, T>(table: &'t T, prefix: &[u8], direction: Direction) -> Result<KvIter<'t>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let upper = prefix_end(prefix);
    let upper_bound = match &upper {
        Some(end) => Bound::Excluded(end.as_slice()),
        None => Bound::Unbounded,
    };
    range_iter(table, Bound::Included(prefix), upper_bound, direction)
}

fn range_iter<'t, T>(
    table: &'t T,
    lower: Bound<&[u8]>,
    upper: Bound<&[u8]>,
    direction: Direction,
) -> Result<KvIter<'t>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let inner = table
        .range::<&[u8]>((lower, upper))
        .map_err(Error::storage)?;
    Ok(KvIter { inner, direction })
}

/// The smallest key strictly greater than every key with `prefix`, or None
/// when the prefix is empty or all 0xFF.
fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last == u8::MAX {
            end.pop();
        } else {
            *last += 1;
            return Some(end);
        }
    }
    None
}
