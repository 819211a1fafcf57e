use std::{collections::HashMap, sync::Arc};

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Canonicalizes a URL for identity purposes: lowercase host, strip
/// fragment, strip a single trailing slash from the path. Query strings and
/// scheme are left alone since the ingestion guard already restricts scheme
/// to http/https.
pub fn canonical_url(url: &url::Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let host = canonical.host_str().unwrap_or_default().to_lowercase();
    let _ = canonical.set_host(Some(&host));
    let path = canonical.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        canonical.set_path(path.trim_end_matches('/'));
    }
    canonical.into()
}

/// `content_fingerprint = hash(canonical_url + sha256(raw_bytes))`.
/// Used both as the `FingerprintLock` key and as the dedup key for
/// content-identical resources reached via different URLs.
pub fn content_fingerprint(canonical_url: &str, raw_bytes: &[u8]) -> String {
    let body_digest = Sha256::digest(raw_bytes);
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hasher.update(format!("{body_digest:x}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A fingerprint placeholder usable before the bytes are known, for the
/// lock taken at submission time, so at most one worker processes a given
/// `content_fingerprint` concurrently. The pipeline overwrites
/// `Resource::content_fingerprint` with the real fingerprint once Fetch
/// completes.
pub fn url_only_fingerprint(canonical_url: &str) -> String {
    format!("{:x}", Sha256::digest(canonical_url.as_bytes()))
}

/// Per-fingerprint build lock ensuring at most one worker processes a given
/// `content_fingerprint` at a time. Entries are
/// reference-counted and pruned once the last holder releases, so the map
/// does not grow unbounded across the process lifetime — the same
/// lease-pool shape as the retrieval engine's reranker pool, scaled down to
/// one permit per key instead of N permits total.
#[derive(Default)]
pub struct FingerprintLock {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Holds a fingerprint's lock for the lifetime of the guard; dropping it
/// releases the lock and, if no other worker is waiting, prunes the map
/// entry.
pub struct FingerprintGuard {
    lock: Arc<FingerprintLock>,
    fingerprint: String,
    _guard: OwnedMutexGuard<()>,
}

impl FingerprintLock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires the lock for `fingerprint`, blocking until any other
    /// in-flight attempt for the same fingerprint finishes. Callers should
    /// re-check resource state for a fingerprint match after acquiring,
    /// since a concurrent attempt may have just completed the work.
    pub async fn acquire(self: &Arc<Self>, fingerprint: &str) -> FingerprintGuard {
        let entry = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(fingerprint.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let guard = entry.lock_owned().await;

        FingerprintGuard {
            lock: Arc::clone(self),
            fingerprint: fingerprint.to_string(),
            _guard: guard,
        }
    }
}

impl Drop for FingerprintGuard {
    fn drop(&mut self) {
        let lock = Arc::clone(&self.lock);
        let fingerprint = self.fingerprint.clone();
        tokio::spawn(async move {
            let mut locks = lock.locks.lock().await;
            if let Some(entry) = locks.get(&fingerprint) {
                // strong_count is 2 here (the map's + this local clone) iff
                // no one else is waiting; safe to prune.
                if Arc::strong_count(entry) <= 2 {
                    locks.remove(&fingerprint);
                }
            }
        });
    }
}
