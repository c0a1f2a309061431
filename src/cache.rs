//! Reference-counted sharing of links.
//!
//! [`LinkCache::get_link`] resolves a URI to a [`CacheKey`] and hands out a
//! [`SharedLink`] to the one live [`Link`] for that key, creating it on
//! first use. Closing the last handle of a key tears the link down.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, OnceCell};

use crate::config::{CacheKey, LinkUri};
use crate::error::{Error, Result};
use crate::link::Link;
use crate::qos::QosLink;

/// Builds links from resolved configuration.
pub trait LinkFactory: Send + Sync {
    /// Resolves a URI into its canonical key, filling in defaults.
    fn resolve(&self, uri: &LinkUri) -> Result<CacheKey> {
        Ok(uri.resolve(&[]))
    }

    /// Opens a new link for the key.
    fn create<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Link>>;
}

/// A key's slot. `users` counts handed-out handles plus callers still
/// waiting for the link to open.
struct CacheEntry {
    link: Arc<OnceCell<Arc<Link>>>,
    users: usize,
}

struct CacheInner {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl CacheInner {
    /// Drops one reference; closes the link when it was the last.
    async fn release(&self, key: &CacheKey) -> Result<()> {
        let teardown = {
            let mut entries = self.entries.lock().await;
            let Some(entry) = entries.get_mut(key) else {
                tracing::error!(%key, "release of a link that is not cached");
                return Err(Error::NotCached {
                    key: key.to_string(),
                });
            };

            entry.users -= 1;
            tracing::debug!(%key, users = entry.users, "released cached link");
            if entry.users == 0 {
                entries.remove(key).and_then(|e| e.link.get().cloned())
            } else {
                None
            }
        };

        if let Some(link) = teardown {
            tracing::info!(%key, "closing link, no users left");
            link.close().await?;
        }
        Ok(())
    }

    /// Gives back a reservation whose open failed.
    async fn cancel(&self, key: &CacheKey, slot: &Arc<OnceCell<Arc<Link>>>) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !Arc::ptr_eq(&entry.link, slot) {
            return;
        }
        entry.users -= 1;
        if entry.users == 0 {
            entries.remove(key);
        }
    }
}

/// Shares one link per distinct configuration.
#[derive(Clone)]
pub struct LinkCache {
    inner: Arc<CacheInner>,
    factory: Arc<dyn LinkFactory>,
}

impl LinkCache {
    /// Creates an empty cache using `factory` to open links.
    #[must_use]
    pub fn new(factory: impl LinkFactory + 'static) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
            }),
            factory: Arc::new(factory),
        }
    }

    /// Returns a handle to the link for `uri`, opening it if needed.
    pub async fn get_link(&self, uri: &LinkUri) -> Result<SharedLink> {
        let key = self.factory.resolve(uri)?;
        self.acquire(key).await
    }

    /// Returns a handle to the link for an already resolved key.
    ///
    /// The cache lock only covers the lookup. The link is opened outside
    /// it, and concurrent callers for the same key wait on that one open
    /// instead of starting their own.
    pub async fn acquire(&self, key: CacheKey) -> Result<SharedLink> {
        let slot = {
            let mut entries = self.inner.entries.lock().await;
            let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
                link: Arc::new(OnceCell::new()),
                users: 0,
            });
            entry.users += 1;
            tracing::debug!(%key, users = entry.users, "acquiring cached link");
            Arc::clone(&entry.link)
        };

        let opened = slot
            .get_or_try_init(|| async {
                tracing::info!(%key, "opening link");
                self.factory.create(&key).await.map(Arc::new)
            })
            .await;

        match opened {
            Ok(link) => Ok(SharedLink::new(Arc::clone(link), key, &self.inner)),
            Err(e) => {
                tracing::warn!(%key, "failed to open link: {}", e);
                self.inner.cancel(&key, &slot).await;
                Err(e)
            }
        }
    }

    /// Returns the number of cached links, including ones still opening.
    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    /// Returns true if no link is cached.
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.lock().await.is_empty()
    }

    /// Returns how many handles share the link for `key`.
    pub async fn users(&self, key: &CacheKey) -> Option<usize> {
        self.inner.entries.lock().await.get(key).map(|e| e.users)
    }
}

/// A counted handle to a cached link.
///
/// Call [`close`](Self::close) when done; dropping the handle without
/// closing it keeps the link open.
pub struct SharedLink {
    link: Arc<Link>,
    key: CacheKey,
    cache: Arc<CacheInner>,
}

impl SharedLink {
    fn new(link: Arc<Link>, key: CacheKey, cache: &Arc<CacheInner>) -> Self {
        Self {
            link,
            key,
            cache: Arc::clone(cache),
        }
    }

    /// Returns the shared link.
    #[must_use]
    pub const fn link(&self) -> &Arc<Link> {
        &self.link
    }

    /// Returns the key this link is cached under.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns a request/reply view if the key enables `qos`.
    pub fn qos(&self) -> Result<Option<QosLink>> {
        let timeout: Option<Duration> = self.key.qos_timeout()?;
        Ok(timeout.map(|t| QosLink::new(Arc::clone(&self.link)).with_timeout(t)))
    }

    /// Releases this handle; the last release closes the link.
    pub async fn close(self) -> Result<()> {
        self.cache.release(&self.key).await
    }
}

impl Deref for SharedLink {
    type Target = Link;

    fn deref(&self) -> &Link {
        &self.link
    }
}
