//! Page image loading with in-flight deduplication.
//!
//! One URL is fetched at most once while a load is pending; every caller
//! awaiting it shares the same result. Failed loads are never cached.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use figseg_core::{PageImage, Size};
use figseg_service::{BoxFuture, JobService, ServiceError};
use futures::FutureExt;
use futures::future::Shared;
use snafu::{ResultExt, Snafu};
use tokio::task::AbortHandle;

/// A decoded page image and its natural dimensions.
#[derive(Debug)]
pub struct LoadedPage {
    pub url: String,
    pub natural_size: Size,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub fetches: u64,
    pub hits: u64,
    pub failures: u64,
    pub cached: usize,
    pub pending: usize,
}

#[derive(Debug, Snafu)]
enum PageLoadError {
    #[snafu(display("failed to fetch {url} on `{stage}`: {source}"))]
    Fetch {
        stage: &'static str,
        url: String,
        source: ServiceError,
    },
    #[snafu(display("failed to read image dimensions of {url} on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        url: String,
        source: image::ImageError,
    },
    #[snafu(display("failed to sniff image format of {url} on `{stage}`: {source}"))]
    Sniff {
        stage: &'static str,
        url: String,
        source: std::io::Error,
    },
    #[snafu(display("{url} has an empty natural size on `{stage}`"))]
    EmptyImage { stage: &'static str, url: String },
}

type PageFuture = Shared<BoxFuture<'static, Option<Arc<LoadedPage>>>>;

enum Slot {
    Ready(Arc<LoadedPage>),
    Loading(PageFuture),
}

struct CacheInner {
    service: Arc<dyn JobService>,
    slots: Mutex<HashMap<String, Slot>>,
    prefetches: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
    fetches: AtomicU64,
    hits: AtomicU64,
    failures: AtomicU64,
}

/// Shared handle to the cache of one job's page images.
#[derive(Clone)]
pub struct PageImageCache {
    inner: Arc<CacheInner>,
}

impl PageImageCache {
    pub fn new(service: Arc<dyn JobService>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                service,
                slots: Mutex::new(HashMap::new()),
                prefetches: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                fetches: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the page if it already finished loading.
    pub fn peek(&self, url: &str) -> Option<Arc<LoadedPage>> {
        match lock(&self.inner.slots).get(url) {
            Some(Slot::Ready(page)) => Some(Arc::clone(page)),
            _ => None,
        }
    }

    pub fn is_pending(&self, url: &str) -> bool {
        matches!(lock(&self.inner.slots).get(url), Some(Slot::Loading(_)))
    }

    /// Loads `url`, joining a pending load for the same URL if there is one.
    ///
    /// Resolves to `None` when the fetch or decode fails, or when the cache
    /// is closed.
    pub async fn request(&self, url: &str) -> Option<Arc<LoadedPage>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return None;
        }

        let pending = {
            let mut slots = lock(&self.inner.slots);
            match slots.get(url) {
                Some(Slot::Ready(page)) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(Arc::clone(page));
                }
                Some(Slot::Loading(pending)) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    pending.clone()
                }
                None => {
                    let pending = self.start_load(url.to_string());
                    slots.insert(url.to_string(), Slot::Loading(pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// Starts loading `url` in the background unless it is cached or pending.
    pub fn prefetch(&self, url: &str) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        if lock(&self.inner.slots).contains_key(url) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(url, "no runtime available, skipping prefetch");
            return;
        };

        let cache = self.clone();
        let url = url.to_string();
        let handle = runtime.spawn(async move {
            let _ = cache.request(&url).await;
        });

        let mut prefetches = lock(&self.inner.prefetches);
        prefetches.retain(|handle| !handle.is_finished());
        prefetches.push(handle.abort_handle());
    }

    /// Prefetches the pages around `current`: `behind` before it and `ahead`
    /// after it, skipping `current` itself.
    pub fn prefetch_window(
        &self,
        pages: &[PageImage],
        current: usize,
        behind: usize,
        ahead: usize,
    ) -> usize {
        if current >= pages.len() {
            return 0;
        }

        let start = current.saturating_sub(behind);
        let end = current.saturating_add(ahead).min(pages.len() - 1);
        let mut requested = 0;
        for index in start..=end {
            if index == current {
                continue;
            }
            self.prefetch(&pages[index].image_url);
            requested += 1;
        }
        requested
    }

    /// Aborts background loads and drops every entry.
    ///
    /// Pending `request` futures resolve to `None` once the cache is closed.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for handle in lock(&self.inner.prefetches).drain(..) {
            handle.abort();
        }
        lock(&self.inner.slots).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        let slots = lock(&self.inner.slots);
        let pending = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Loading(_)))
            .count();
        CacheStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            hits: self.inner.hits.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            cached: slots.len() - pending,
            pending,
        }
    }

    fn start_load(&self, url: String) -> PageFuture {
        let inner = Arc::clone(&self.inner);
        let load: BoxFuture<'static, Option<Arc<LoadedPage>>> = Box::pin(async move {
            inner.fetches.fetch_add(1, Ordering::Relaxed);
            let outcome = load_page(inner.service.as_ref(), &url).await;

            let mut slots = lock(&inner.slots);
            if inner.closed.load(Ordering::Acquire) {
                return None;
            }
            match outcome {
                Ok(page) => {
                    let page = Arc::new(page);
                    tracing::debug!(
                        url = %url,
                        width = page.natural_size.width,
                        height = page.natural_size.height,
                        "page image loaded"
                    );
                    slots.insert(url, Slot::Ready(Arc::clone(&page)));
                    Some(page)
                }
                Err(error) => {
                    inner.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(url = %url, error = %error, "page image failed to load");
                    slots.remove(&url);
                    None
                }
            }
        });
        load.shared()
    }
}

async fn load_page(service: &dyn JobService, url: &str) -> Result<LoadedPage, PageLoadError> {
    let bytes = service
        .fetch_page_image(url.to_string())
        .await
        .context(FetchSnafu {
            stage: "fetch-page-image",
            url,
        })?;
    let natural_size = natural_size(&bytes, url)?;
    Ok(LoadedPage {
        url: url.to_string(),
        natural_size,
        bytes,
    })
}

fn natural_size(bytes: &[u8], url: &str) -> Result<Size, PageLoadError> {
    let (width, height) = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .context(SniffSnafu {
            stage: "sniff-page-image-format",
            url,
        })?
        .into_dimensions()
        .context(DecodeSnafu {
            stage: "read-page-image-dimensions",
            url,
        })?;

    let size = Size::new(f64::from(width), f64::from(height));
    if !size.is_drawable() {
        return EmptyImageSnafu {
            stage: "read-page-image-dimensions",
            url,
        }
        .fail();
    }
    Ok(size)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeJobService, png_bytes};

    fn page(number: i64) -> PageImage {
        PageImage::new(number, format!("https://pages.example/{number}.png"))
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_fetch() {
        let fake = Arc::new(FakeJobService::new());
        fake.set_image("https://pages.example/0.png", png_bytes(40, 30));
        fake.set_fetch_delay(Duration::from_millis(20));
        let cache = PageImageCache::new(fake.clone());

        let (first, second) = tokio::join!(
            cache.request("https://pages.example/0.png"),
            cache.request("https://pages.example/0.png"),
        );

        let first = first.expect("first load");
        let second = second.expect("second load");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.natural_size, Size::new(40.0, 30.0));
        assert_eq!(fake.fetch_count("https://pages.example/0.png"), 1);
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn cached_page_is_served_without_refetch() {
        let fake = Arc::new(FakeJobService::new());
        fake.set_image("https://pages.example/0.png", png_bytes(8, 8));
        let cache = PageImageCache::new(fake.clone());

        cache.request("https://pages.example/0.png").await.expect("load");
        assert!(cache.peek("https://pages.example/0.png").is_some());
        cache.request("https://pages.example/0.png").await.expect("hit");

        assert_eq!(fake.fetch_count("https://pages.example/0.png"), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let fake = Arc::new(FakeJobService::new());
        fake.set_image("https://pages.example/0.png", b"not an image".to_vec());
        let cache = PageImageCache::new(fake.clone());

        assert!(cache.request("https://pages.example/0.png").await.is_none());
        assert!(cache.request("https://pages.example/0.png").await.is_none());
        assert_eq!(fake.fetch_count("https://pages.example/0.png"), 2);
        assert_eq!(cache.stats().failures, 2);
        assert_eq!(cache.stats().cached, 0);
    }

    #[tokio::test]
    async fn prefetch_window_skips_current_and_clamps_to_bounds() {
        let fake = Arc::new(FakeJobService::new());
        let pages: Vec<_> = (0..5).map(page).collect();
        for page in &pages {
            fake.set_image(&page.image_url, png_bytes(10, 10));
        }
        let cache = PageImageCache::new(fake.clone());

        assert_eq!(cache.prefetch_window(&pages, 0, 1, 2), 2);
        assert_eq!(cache.prefetch_window(&pages, 4, 1, 2), 1);
        assert_eq!(cache.prefetch_window(&pages, 9, 1, 2), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.peek(&pages[1].image_url).is_some());
        assert!(cache.peek(&pages[3].image_url).is_some());
        assert!(cache.peek(&pages[0].image_url).is_none());
        assert!(cache.peek(&pages[4].image_url).is_none());
    }

    #[tokio::test]
    async fn close_discards_pending_loads() {
        let fake = Arc::new(FakeJobService::new());
        fake.set_image("https://pages.example/0.png", png_bytes(10, 10));
        fake.set_fetch_delay(Duration::from_millis(30));
        let cache = PageImageCache::new(fake.clone());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.request("https://pages.example/0.png").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.close();

        assert!(pending.await.expect("join").is_none());
        assert!(cache.peek("https://pages.example/0.png").is_none());
        assert!(cache.request("https://pages.example/0.png").await.is_none());
    }
}
