use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::{
    collection::Collection,
    error::Result,
    validation::validate_collection_name,
};

/// Default number of idle readonly handles kept per collection.
pub const DEFAULT_MAX_CACHED_READERS: usize = 5;

/// What the pool needs from a collection handle.
pub trait PooledCollection: Send + Sized + 'static {
    fn open_writable_at(name: &str, path: &Path) -> Result<Self>;
    fn open_readonly_at(name: &str, path: &Path) -> Result<Self>;
    /// Bring a cached readonly handle up to the latest commit.
    fn refresh(&mut self) -> Result<()>;
    fn name(&self) -> &str;
    fn is_writable(&self) -> bool;
}

impl PooledCollection for Collection {
    fn open_writable_at(name: &str, path: &Path) -> Result<Self> {
        let mut collection = Collection::new(name, path);
        collection.open_writable()?;
        Ok(collection)
    }

    fn open_readonly_at(name: &str, path: &Path) -> Result<Self> {
        let mut collection = Collection::new(name, path);
        collection.open_readonly()?;
        Ok(collection)
    }

    fn refresh(&mut self) -> Result<()> {
        Collection::refresh(self)
    }

    fn name(&self) -> &str {
        Collection::name(self)
    }

    fn is_writable(&self) -> bool {
        Collection::is_writable(self)
    }
}

struct Idle<C> {
    writable: HashMap<String, C>,
    readonly: HashMap<String, Vec<C>>,
}

/// Hands out collection handles: at most one writable handle per collection
/// and a bounded cache of idle readonly handles.
///
/// Borrowers own the handle until they give it back with
/// [`CollectionPool::release`]. The internal lock only guards the idle maps;
/// opening, refreshing and dropping handles happen outside it.
pub struct CollectionPool<C: PooledCollection = Collection> {
    root: PathBuf,
    max_cached_readers: usize,
    idle: Mutex<Idle<C>>,
}

impl<C: PooledCollection> CollectionPool<C> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_cached_readers(root, DEFAULT_MAX_CACHED_READERS)
    }

    pub fn with_max_cached_readers(
        root: impl Into<PathBuf>,
        max_cached_readers: usize,
    ) -> Self {
        Self {
            root: root.into(),
            max_cached_readers,
            idle: Mutex::new(Idle {
                writable: HashMap::new(),
                readonly: HashMap::new(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Idle<C>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Borrow the collection's writable handle, opening it if it is not
    /// cached.
    pub fn get_writable(&self, name: &str) -> Result<C> {
        validate_collection_name(name)?;
        let cached = self.lock().writable.remove(name);
        match cached {
            Some(handle) => Ok(handle),
            None => {
                tracing::debug!(collection = name, "opening writable handle");
                C::open_writable_at(name, &self.collection_path(name))
            }
        }
    }

    /// Borrow a readonly handle positioned at the latest commit.
    pub fn get_readonly(&self, name: &str) -> Result<C> {
        validate_collection_name(name)?;
        let cached = self
            .lock()
            .readonly
            .get_mut(name)
            .and_then(|handles| handles.pop());
        match cached {
            Some(mut handle) => {
                handle.refresh()?;
                Ok(handle)
            }
            None => C::open_readonly_at(name, &self.collection_path(name)),
        }
    }

    /// Give a borrowed handle back. `None` is accepted and ignored.
    ///
    /// # Panics
    ///
    /// Panics when a writable handle is returned while another writable
    /// handle for the same collection is already cached.
    pub fn release(&self, handle: impl Into<Option<C>>) {
        let Some(handle) = handle.into() else {
            return;
        };
        let name = handle.name().to_string();

        let surplus = {
            let mut idle = self.lock();
            if handle.is_writable() {
                if idle.writable.contains_key(&name) {
                    Err(handle)
                } else {
                    idle.writable.insert(name.clone(), handle);
                    Ok(None)
                }
            } else {
                let cached = idle.readonly.entry(name.clone()).or_default();
                if cached.len() < self.max_cached_readers {
                    cached.push(handle);
                    Ok(None)
                } else {
                    Ok(Some(handle))
                }
            }
        };

        match surplus {
            Ok(None) => {}
            Ok(Some(dropped)) => drop(dropped),
            Err(_) => panic!(
                "writable handle for collection {name:?} released while one is already cached"
            ),
        }
    }

    /// Take the cached writable handle of a collection without opening a
    /// new one, e.g. to close it at shutdown.
    pub fn take_writable(&self, name: &str) -> Option<C> {
        self.lock().writable.remove(name)
    }

    pub fn cached_readers(&self, name: &str) -> usize {
        self.lock().readonly.get(name).map_or(0, Vec::len)
    }

    /// Whether the collection has a cached handle or a storage directory.
    pub fn exists(&self, name: &str) -> bool {
        {
            let idle = self.lock();
            if idle.writable.contains_key(name)
                || idle.readonly.get(name).is_some_and(|v| !v.is_empty())
            {
                return true;
            }
        }
        validate_collection_name(name).is_ok() && self.collection_path(name).is_dir()
    }

    /// Names of all collections with a storage directory, sorted.
    pub fn list_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if !self.root.is_dir() {
            return Ok(names);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && validate_collection_name(name).is_ok()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::error::Error;

    static OPENED: AtomicUsize = AtomicUsize::new(0);
    static STRESS_LIVE: AtomicUsize = AtomicUsize::new(0);

    /// Test double. Like an index directory lock, opening a second writable
    /// "stress" handle fails while one is alive.
    struct Fake {
        name: String,
        writable: bool,
        dropped: Option<Arc<AtomicUsize>>,
        refreshes: usize,
    }

    impl PooledCollection for Fake {
        fn open_writable_at(name: &str, _path: &Path) -> Result<Self> {
            if name == "stress"
                && STRESS_LIVE
                    .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                return Err(Error::InvalidState("writer locked".into()));
            }
            OPENED.fetch_add(1, Ordering::SeqCst);
            Ok(Fake {
                name: name.to_string(),
                writable: true,
                dropped: None,
                refreshes: 0,
            })
        }

        fn open_readonly_at(name: &str, _path: &Path) -> Result<Self> {
            Ok(Fake {
                name: name.to_string(),
                writable: false,
                dropped: None,
                refreshes: 0,
            })
        }

        fn refresh(&mut self) -> Result<()> {
            self.refreshes += 1;
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn is_writable(&self) -> bool {
            self.writable
        }
    }

    impl Drop for Fake {
        fn drop(&mut self) {
            if let Some(dropped) = &self.dropped {
                dropped.fetch_add(1, Ordering::SeqCst);
            }
            if self.writable && self.name == "stress" {
                STRESS_LIVE.store(0, Ordering::SeqCst);
            }
        }
    }

    fn pool() -> (tempfile::TempDir, CollectionPool<Fake>) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = CollectionPool::new(tmp.path());
        (tmp, pool)
    }

    #[test]
    fn readonly_cache_is_bounded() {
        let (_tmp, pool) = pool();
        let dropped = Arc::new(AtomicUsize::new(0));

        let handles: Vec<Fake> = (0..8)
            .map(|_| {
                let mut h = pool.get_readonly("test").unwrap();
                h.dropped = Some(Arc::clone(&dropped));
                h
            })
            .collect();
        for h in handles {
            pool.release(h);
        }

        assert_eq!(pool.cached_readers("test"), DEFAULT_MAX_CACHED_READERS);
        assert_eq!(dropped.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cached_readers_are_refreshed() {
        let (_tmp, pool) = pool();
        let h = pool.get_readonly("test").unwrap();
        assert_eq!(h.refreshes, 0);
        pool.release(h);
        let h = pool.get_readonly("test").unwrap();
        assert_eq!(h.refreshes, 1);
        assert_eq!(pool.cached_readers("test"), 0);
    }

    #[test]
    fn release_none_is_a_no_op() {
        let (_tmp, pool) = pool();
        pool.release(None);
        assert_eq!(pool.cached_readers("test"), 0);
    }

    #[test]
    fn writable_handle_is_reused() {
        let (_tmp, pool) = pool();
        let before = OPENED.load(Ordering::SeqCst);
        let w = pool.get_writable("reuse").unwrap();
        pool.release(w);
        let w = pool.get_writable("reuse").unwrap();
        pool.release(w);
        assert_eq!(OPENED.load(Ordering::SeqCst) - before, 1);
    }

    #[test]
    #[should_panic(expected = "already cached")]
    fn second_writable_release_panics() {
        let (_tmp, pool) = pool();
        let a = pool.get_writable("dup").unwrap();
        let b = Fake::open_writable_at("dup", Path::new("unused")).unwrap();
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn at_most_one_writer_under_contention() {
        let (_tmp, pool) = pool();
        let pool = Arc::new(pool);
        let borrowed = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let borrowed = Arc::clone(&borrowed);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    let mut done = 0;
                    while done < 100 {
                        let Ok(handle) = pool.get_writable("stress") else {
                            std::thread::yield_now();
                            continue;
                        };
                        let now = borrowed.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::yield_now();
                        borrowed.fetch_sub(1, Ordering::SeqCst);
                        pool.release(handle);
                        done += 1;
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(pool.take_writable("stress").is_some());
    }

    #[test]
    fn exists_and_list_names() {
        let (tmp, pool) = pool();
        std::fs::create_dir(tmp.path().join("beta")).unwrap();
        std::fs::create_dir(tmp.path().join("alpha")).unwrap();
        std::fs::write(tmp.path().join("stray-file"), b"").unwrap();

        assert_eq!(pool.list_names().unwrap(), vec!["alpha", "beta"]);
        assert!(pool.exists("alpha"));
        assert!(!pool.exists("gamma"));

        let w = pool.get_writable("gamma").unwrap();
        pool.release(w);
        assert!(pool.exists("gamma"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_tmp, pool) = pool();
        assert!(pool.get_writable("../escape").is_err());
        assert!(pool.get_readonly("").is_err());
    }
}
