//! Endpoint lookup for the indexing service.
//!
//! The service registers a window under a well-known class name. The locator
//! finds that window; [`EndpointCache`] keeps the last handle and re-resolves
//! after invalidation.

use std::sync::{Mutex, MutexGuard};

use crate::ipc::protocol::DEFAULT_ENDPOINT_CLASS;
use crate::{QixError, Result};

/// Opaque reference to the service's message target.
///
/// The service owns the underlying window; this is only a copy of its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(isize);

impl Endpoint {
    pub const fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> isize {
        self.0
    }
}

/// Finds the service endpoint.
pub trait EndpointLocator: Send + Sync {
    /// Identifier being looked up, for diagnostics.
    fn identifier(&self) -> &str;

    /// Look the endpoint up now, without caching.
    ///
    /// # Errors
    /// `ServiceUnavailable` when nothing currently registers the identifier.
    fn locate(&self) -> Result<Endpoint>;

    /// Whether a previously located endpoint still exists.
    fn is_alive(&self, _endpoint: Endpoint) -> bool {
        true
    }
}

/// Cached endpoint with serialized invalidate/re-resolve.
///
/// Share one cache between connections with `Arc` to keep a single
/// process-wide handle.
pub struct EndpointCache<L> {
    locator: L,
    cached: Mutex<Option<Endpoint>>,
}

impl<L: EndpointLocator> EndpointCache<L> {
    pub fn new(locator: L) -> Self {
        Self {
            locator,
            cached: Mutex::new(None),
        }
    }

    pub fn locator(&self) -> &L {
        &self.locator
    }

    /// Cached endpoint, if any, without looking anything up.
    pub fn cached(&self) -> Option<Endpoint> {
        *self.lock()
    }

    /// Return the cached endpoint, or look it up and cache it.
    ///
    /// A cached handle whose window has disappeared is replaced by a fresh
    /// lookup.
    pub fn resolve(&self) -> Result<Endpoint> {
        let mut cached = self.lock();

        if let Some(endpoint) = *cached {
            if self.locator.is_alive(endpoint) {
                return Ok(endpoint);
            }
            tracing::debug!("Cached endpoint {:#x} went stale", endpoint.raw());
            *cached = None;
        }

        let endpoint = self.locator.locate()?;
        tracing::info!(
            "Resolved '{}' to endpoint {:#x}",
            self.locator.identifier(),
            endpoint.raw()
        );
        *cached = Some(endpoint);
        Ok(endpoint)
    }

    /// Drop `stale` from the cache.
    ///
    /// Does nothing if another caller already replaced it, so a fresh
    /// resolution is never discarded. Returns whether the cache was cleared.
    pub fn invalidate(&self, stale: Endpoint) -> bool {
        let mut cached = self.lock();
        if *cached == Some(stale) {
            tracing::debug!("Invalidated endpoint {:#x}", stale.raw());
            *cached = None;
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Endpoint>> {
        // The guarded value is a plain Option; a panic elsewhere cannot leave it torn.
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Locates the service window by its class name.
#[derive(Debug, Clone)]
pub struct WindowLocator {
    class_name: String,
}

impl WindowLocator {
    /// Locator for `class_name`, optionally qualified with a named instance
    /// (`<class>_(<instance>)`).
    pub fn new(class_name: &str, instance: Option<&str>) -> Self {
        let class_name = match instance.filter(|i| !i.is_empty()) {
            Some(instance) => format!("{}_({})", class_name, instance),
            None => class_name.to_string(),
        };
        Self { class_name }
    }

    /// Instance name encoded in the class, e.g. `1.5a` for `QIX_INDEX_SERVICE_(1.5a)`.
    pub fn instance_name(&self) -> Option<&str> {
        self.class_name
            .rsplit_once("_(")
            .and_then(|(_, rest)| rest.strip_suffix(')'))
    }
}

impl Default for WindowLocator {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT_CLASS, None)
    }
}

#[cfg(windows)]
impl EndpointLocator for WindowLocator {
    fn identifier(&self) -> &str {
        &self.class_name
    }

    fn locate(&self) -> Result<Endpoint> {
        use windows::core::PCWSTR;
        use windows::Win32::UI::WindowsAndMessaging::FindWindowW;

        let class = super::transport::to_wide(&self.class_name);
        let hwnd = unsafe { FindWindowW(PCWSTR::from_raw(class.as_ptr()), PCWSTR::null()) }
            .map_err(|_| QixError::ServiceUnavailable(self.class_name.clone()))?;

        if hwnd.is_invalid() {
            return Err(QixError::ServiceUnavailable(self.class_name.clone()));
        }
        Ok(Endpoint::from_raw(hwnd.0 as isize))
    }

    fn is_alive(&self, endpoint: Endpoint) -> bool {
        use windows::Win32::Foundation::HWND;
        use windows::Win32::UI::WindowsAndMessaging::IsWindow;

        unsafe { IsWindow(Some(HWND(endpoint.raw() as *mut _))).as_bool() }
    }
}

/// Stub for non-Windows platforms - the service is never reachable.
#[cfg(not(windows))]
impl EndpointLocator for WindowLocator {
    fn identifier(&self) -> &str {
        &self.class_name
    }

    fn locate(&self) -> Result<Endpoint> {
        tracing::debug!("Window endpoints are only available on Windows");
        Err(QixError::ServiceUnavailable(self.class_name.clone()))
    }

    fn is_alive(&self, _endpoint: Endpoint) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct CountingLocator {
        calls: AtomicUsize,
        alive: AtomicBool,
    }

    impl CountingLocator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                alive: AtomicBool::new(true),
            }
        }
    }

    impl EndpointLocator for CountingLocator {
        fn identifier(&self) -> &str {
            "COUNTING"
        }

        fn locate(&self) -> Result<Endpoint> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Endpoint::from_raw(0x100 + n as isize))
        }

        fn is_alive(&self, _endpoint: Endpoint) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_resolve_is_cached() {
        let cache = EndpointCache::new(CountingLocator::new());
        let first = cache.resolve().unwrap();
        let second = cache.resolve().unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.locator().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_forces_lookup() {
        let cache = EndpointCache::new(CountingLocator::new());
        let first = cache.resolve().unwrap();
        assert!(cache.invalidate(first));
        assert_eq!(cache.cached(), None);

        let second = cache.resolve().unwrap();
        assert_ne!(first, second);
        assert_eq!(cache.locator().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalidate_ignores_replaced_handle() {
        let cache = EndpointCache::new(CountingLocator::new());
        let first = cache.resolve().unwrap();
        cache.invalidate(first);
        let second = cache.resolve().unwrap();

        // A late invalidation of the old handle must not drop the new one
        assert!(!cache.invalidate(first));
        assert_eq!(cache.cached(), Some(second));
    }

    #[test]
    fn test_dead_cached_handle_is_replaced() {
        let cache = EndpointCache::new(CountingLocator::new());
        cache.resolve().unwrap();
        cache.locator().alive.store(false, Ordering::SeqCst);
        cache.resolve().unwrap();
        assert_eq!(cache.locator().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_instance_class_name() {
        let locator = WindowLocator::new("QIX_INDEX_SERVICE", Some("1.5a"));
        assert_eq!(locator.identifier(), "QIX_INDEX_SERVICE_(1.5a)");
        assert_eq!(locator.instance_name(), Some("1.5a"));

        let plain = WindowLocator::new("QIX_INDEX_SERVICE", Some(""));
        assert_eq!(plain.identifier(), "QIX_INDEX_SERVICE");
        assert_eq!(plain.instance_name(), None);
    }

    #[test]
    fn test_unregistered_identifier_is_unavailable() {
        let class = format!("QIX_TEST_UNREGISTERED_{}", std::process::id());
        let locator = WindowLocator::new(&class, None);

        let start = Instant::now();
        let err = locator.locate().unwrap_err();
        assert!(matches!(err, QixError::ServiceUnavailable(ref name) if *name == class));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
