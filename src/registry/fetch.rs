//! Download and cache Topology registry data.

use super::topology::{
    parse_projects, parse_resource_groups, resource_map, ProjectMap, ResourceMap,
    TopologyResource,
};
use crate::output::write_json_atomic;
use crate::utils::config::{
    CACHE_MAX_AGE, DEFAULT_HTTP_TIMEOUT, FETCH_BASE_DELAY, FETCH_MAX_TRIES, PROJECT_CACHE_FILE,
    RESOURCE_CACHE_FILE, TOPOLOGY_PROJECT_DATA_URL, TOPOLOGY_RESOURCE_DATA_URL,
};
use crate::utils::error::{OutputError, RegistryError};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry policy for registry downloads
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_tries: u32,
    /// Delay after the first failure; doubles after every further one
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: FETCH_MAX_TRIES,
            base_delay: FETCH_BASE_DELAY,
        }
    }
}

/// Run `op` until it succeeds or `policy.max_tries` attempts have failed
///
/// The error of the last attempt is returned.
pub fn retry_with_backoff<T, E, F>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_tries.max(1) {
                    return Err(e);
                }
                let delay = policy.base_delay * 2u32.pow(attempt - 1);
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:.0?}",
                    attempt, policy.max_tries, e, delay
                );
                std::thread::sleep(delay);
            }
        }
    }
}

/// Read a cache file if it exists and is younger than `max_age`
///
/// Unreadable or corrupt caches count as missing.
pub fn load_cache<T: DeserializeOwned>(path: &Path, max_age: Duration) -> Option<T> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let age = modified.elapsed().unwrap_or_default();
    if age >= max_age {
        debug!("Cache {} is stale ({:.0?} old)", path.display(), age);
        return None;
    }

    let file = File::open(path).ok()?;
    match serde_json::from_reader(BufReader::new(file)) {
        Ok(value) => {
            debug!("Using cached {}", path.display());
            Some(value)
        }
        Err(e) => {
            warn!("Ignoring unreadable cache {}: {}", path.display(), e);
            None
        }
    }
}

/// Persist a cache file
pub fn store_cache<T: Serialize>(path: &Path, value: &T) -> Result<(), RegistryError> {
    write_json_atomic(value, path, None).map_err(|e| match e {
        OutputError::WriteFailed(io) => RegistryError::Cache(io),
        OutputError::SerializationFailed(json) => RegistryError::CacheFormat(json),
        OutputError::InvalidPath(msg) => RegistryError::Cache(std::io::Error::other(msg)),
    })
}

/// Client for the Topology registry with a local cache
pub struct TopologyClient {
    http: Client,
    cache_dir: PathBuf,
    project_url: String,
    resource_url: String,
    retry: RetryPolicy,
}

impl TopologyClient {
    /// Create a client caching into `cache_dir`
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(RegistryError::RequestFailed)?;

        Ok(Self {
            http,
            cache_dir: cache_dir.into(),
            project_url: TOPOLOGY_PROJECT_DATA_URL.to_string(),
            resource_url: TOPOLOGY_RESOURCE_DATA_URL.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Point at different registry endpoints
    pub fn with_urls(mut self, project_url: impl Into<String>, resource_url: impl Into<String>) -> Self {
        self.project_url = project_url.into();
        self.resource_url = resource_url.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Download an XML document, retrying with exponential backoff
    pub fn fetch_xml(&self, url: &str) -> Result<String, RegistryError> {
        info!("Fetching {}", url);
        retry_with_backoff(self.retry, || {
            let response = self.http.get(url).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(RegistryError::BadStatus(status.as_u16()));
            }
            Ok(response.text()?)
        })
    }

    /// Projects keyed by lower-cased name, from cache when fresh
    pub fn project_map(&self) -> Result<ProjectMap, RegistryError> {
        let cache = self.cache_dir.join(PROJECT_CACHE_FILE);
        if let Some(map) = load_cache(&cache, CACHE_MAX_AGE) {
            return Ok(map);
        }

        let projects = parse_projects(&self.fetch_xml(&self.project_url)?)?;
        self.store(&cache, &projects);
        Ok(projects)
    }

    /// Resources keyed by lower-cased name, from cache when fresh
    pub fn resource_map(&self) -> Result<ResourceMap, RegistryError> {
        let cache = self.cache_dir.join(RESOURCE_CACHE_FILE);
        if let Some(map) = load_cache(&cache, CACHE_MAX_AGE) {
            return Ok(map);
        }

        let resources = resource_map(&self.resources()?);
        self.store(&cache, &resources);
        Ok(resources)
    }

    /// Every resource of the summary, always fetched fresh
    pub fn resources(&self) -> Result<Vec<TopologyResource>, RegistryError> {
        parse_resource_groups(&self.fetch_xml(&self.resource_url)?)
    }

    // Cache write failures are logged, not returned
    fn store<T: Serialize>(&self, path: &Path, value: &T) {
        if let Err(e) = store_cache(path, value) {
            warn!("Could not write cache {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::topology::ProjectInfo;
    use std::cell::Cell;

    fn no_delay(max_tries: u32) -> RetryPolicy {
        RetryPolicy {
            max_tries,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_retry_succeeds_after_failures() {
        let calls = Cell::new(0);
        let result: Result<u32, String> = retry_with_backoff(no_delay(5), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(format!("fail {}", calls.get()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_surfaces_last_error() {
        let calls = Cell::new(0);
        let result: Result<(), String> = retry_with_backoff(no_delay(5), || {
            calls.set(calls.get() + 1);
            Err(format!("fail {}", calls.get()))
        });
        assert_eq!(result, Err("fail 5".to_string()));
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");

        let mut map = ProjectMap::new();
        map.insert("unknown".to_string(), ProjectInfo::unknown());
        store_cache(&path, &map).unwrap();

        let loaded: Option<ProjectMap> = load_cache(&path, Duration::from_secs(60));
        assert_eq!(loaded, Some(map));
    }

    #[test]
    fn test_stale_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        store_cache(&path, &ProjectMap::new()).unwrap();

        let loaded: Option<ProjectMap> = load_cache(&path, Duration::ZERO);
        assert!(loaded.is_none());
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projects.json");
        std::fs::write(&path, "not json").unwrap();

        let loaded: Option<ProjectMap> = load_cache(&path, Duration::from_secs(60));
        assert!(loaded.is_none());
    }

    #[test]
    fn test_fresh_cache_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = ProjectMap::new();
        map.insert("unknown".to_string(), ProjectInfo::unknown());
        store_cache(&dir.path().join(PROJECT_CACHE_FILE), &map).unwrap();

        let client = TopologyClient::new(dir.path())
            .unwrap()
            .with_urls("http://127.0.0.1:9/project", "http://127.0.0.1:9/resource")
            .with_retry(no_delay(1));

        assert_eq!(client.project_map().unwrap(), map);
    }

    #[test]
    fn test_unreachable_registry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = TopologyClient::new(dir.path())
            .unwrap()
            .with_urls("http://127.0.0.1:9/project", "http://127.0.0.1:9/resource")
            .with_retry(no_delay(2));

        assert!(matches!(client.resource_map(), Err(RegistryError::RequestFailed(_))));
        assert!(!dir.path().join(RESOURCE_CACHE_FILE).exists());
    }

    #[test]
    fn test_missing_cache() {
        let loaded: Option<ProjectMap> =
            load_cache(Path::new("/nonexistent/cache.json"), Duration::from_secs(60));
        assert!(loaded.is_none());
    }
}
