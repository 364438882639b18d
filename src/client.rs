//! Metadata client: API version negotiation and key resolution.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::MetadataError;
use crate::metadata::{ApiVersion, Child, MetadataEntry, MetadataKey, MetadataNode, MetadataValue};
use crate::options::{ExpansionPolicy, MetadataOption, OptionTable, Source};
use crate::transport::{Transport, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

type EntryFuture<'a> = Pin<Box<dyn Future<Output = Result<MetadataEntry, MetadataError>> + 'a>>;
type WalkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), MetadataError>> + 'a>>;

/// Directory whose children are indexed key pairs, not named options.
const PUBLIC_KEYS: &str = "public-keys";

/// A client error other than the ones the session-token retry handles means
/// the key is not there.
fn is_missing(status: u16) -> bool {
    (400..500).contains(&status) && status != 401 && status != 403
}

/// Entry point to the metadata service, before an API version is chosen.
///
/// Selecting a version consumes the client and yields a [`VersionedClient`],
/// so every later lookup is pinned to that version.
///
/// # Example
///
/// ```ignore
/// use ec2metadata::{MetadataClient, MetadataError, MetadataKey};
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), MetadataError> {
///     let client = MetadataClient::with_default_timeout()?.latest().await?;
///     let entry = client.resolve(&MetadataKey::new("instance-id")).await?;
///     println!("{:?}", entry.leaves());
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MetadataClient {
    transport: Transport,
    expansion: ExpansionPolicy,
}

impl MetadataClient {
    /// Create a client with the specified timeout and base URL.
    pub fn new(timeout: Duration, base_url: &str) -> Result<Self, MetadataError> {
        Ok(Self {
            transport: Transport::new(timeout, base_url)?,
            expansion: ExpansionPolicy::default(),
        })
    }

    /// Create a client with the default timeout and link-local base URL.
    pub fn with_default_timeout() -> Result<Self, MetadataError> {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing).
    pub fn with_base_url(base_url: &str) -> Result<Self, MetadataError> {
        Self::new(DEFAULT_TIMEOUT, base_url)
    }

    /// Set the maximum size limit for each response body.
    ///
    /// Larger responses fail with `MetadataError::TooLarge`.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.transport.set_max_size(Some(max_size));
        self
    }

    /// Request a session token before the first metadata request instead of
    /// waiting for the service to reject an unauthenticated one.
    pub fn with_token_access(mut self) -> Self {
        self.transport.set_token_access(true);
        self
    }

    /// Replace the directory expansion policy.
    pub fn with_expansion_policy(mut self, expansion: ExpansionPolicy) -> Self {
        self.expansion = expansion;
        self
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    /// List the API versions offered by the service, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::Unavailable` if the service cannot be reached
    /// or does not answer with a version listing.
    pub async fn list_api_versions(&self) -> Result<Vec<ApiVersion>, MetadataError> {
        let body = match self.transport.get("/").await {
            Ok(body) => body,
            Err(MetadataError::Http(status)) => {
                debug!(status, "service root rejected the request");
                return Err(self.unavailable());
            }
            Err(e) => return Err(e),
        };

        let versions = ApiVersion::parse_listing(&body);
        if versions.is_empty() {
            return Err(self.unavailable());
        }
        Ok(versions)
    }

    /// Pin all later lookups to `version`.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::InvalidApiVersion` if the service does not
    /// offer `version`.
    pub async fn set_api_version(
        self,
        version: ApiVersion,
    ) -> Result<VersionedClient, MetadataError> {
        let versions = self.list_api_versions().await?;
        if !versions.contains(&version) {
            return Err(MetadataError::InvalidApiVersion(version.to_string()));
        }
        VersionedClient::open(self, version).await
    }

    /// Pin all later lookups to the newest version the service offers.
    pub async fn latest(self) -> Result<VersionedClient, MetadataError> {
        let version = self
            .list_api_versions()
            .await?
            .pop()
            .ok_or_else(|| self.unavailable())?;
        VersionedClient::open(self, version).await
    }

    fn unavailable(&self) -> MetadataError {
        MetadataError::Unavailable(self.transport.base_url().to_string())
    }
}

/// Outcome of resolving a batch of keys.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Resolved entries, in request order.
    pub entries: Vec<MetadataEntry>,
    /// Keys that were skipped, as `MetadataError::UnknownKey`.
    pub failures: Vec<MetadataError>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A client pinned to one API version.
#[derive(Debug)]
pub struct VersionedClient {
    transport: Transport,
    expansion: ExpansionPolicy,
    version: ApiVersion,
    options: OptionTable,
    discovered: OnceCell<OptionTable>,
}

impl VersionedClient {
    async fn open(client: MetadataClient, version: ApiVersion) -> Result<Self, MetadataError> {
        let MetadataClient {
            transport,
            expansion,
        } = client;

        let path = format!("{}/meta-data/", version);
        let body = match transport.get(&path).await {
            Ok(body) => body,
            Err(MetadataError::Http(404)) => {
                return Err(MetadataError::InvalidApiVersion(version.to_string()))
            }
            Err(e) => return Err(e),
        };

        let options = OptionTable::from_listing(&Child::parse_listing(&body));
        debug!(%version, options = options.len(), "selected API version");

        Ok(Self {
            transport,
            expansion,
            version,
            options,
            discovered: OnceCell::new(),
        })
    }

    /// The API version every lookup resolves against.
    pub fn api_version(&self) -> &ApiVersion {
        &self.version
    }

    /// Top-level `meta-data/` keys, in discovery order.
    pub fn list_top_level_keys(&self) -> Vec<MetadataKey> {
        self.options.defaults().map(|o| o.key.clone()).collect()
    }

    /// The top-level options for this version, plus `user-data`.
    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    /// Every option, including nested `meta-data/` leaves and the `dynamic/`
    /// tree, each under its last path component.
    ///
    /// The walk costs one listing request per directory, so it runs only on
    /// the first call.
    pub async fn discover_options(&self) -> Result<&OptionTable, MetadataError> {
        self.discovered
            .get_or_try_init(|| self.walk_options())
            .await
    }

    async fn walk_options(&self) -> Result<OptionTable, MetadataError> {
        let mut table = self.options.clone();
        let directories: Vec<MetadataKey> = self
            .options
            .defaults()
            .filter(|o| o.expandable && o.name() != PUBLIC_KEYS)
            .map(|o| o.key.clone())
            .collect();
        for key in directories {
            let depth = self.expansion.depth_for(&key);
            self.walk(&mut table, Source::MetaData, Some(key), depth)
                .await?;
        }

        let dynamic = MetadataKey::new(Source::Dynamic.to_string());
        let depth = self.expansion.depth_for(&dynamic);
        self.walk(&mut table, Source::Dynamic, None, depth).await?;

        debug!(options = table.len(), "discovered nested options");
        Ok(table)
    }

    /// Register the leaves below `dir` (or the root of `source`) in `table`.
    fn walk<'a>(
        &'a self,
        table: &'a mut OptionTable,
        source: Source,
        dir: Option<MetadataKey>,
        depth: usize,
    ) -> WalkFuture<'a> {
        Box::pin(async move {
            let path = match &dir {
                Some(dir) => format!("{}/{}/", source, dir),
                None => format!("{}/", source),
            };
            let children = match self.fetch_listing(&path).await {
                Ok(children) => children,
                Err(e) if e.is_recoverable() => {
                    debug!(%path, "skipping unlisted directory");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            for child in children {
                let key = match &dir {
                    Some(dir) => dir.join(&child.name),
                    None => MetadataKey::new(&child.name),
                };
                if !child.expandable {
                    table.add_leaf(key, source);
                } else if depth > 1 {
                    self.walk(&mut *table, source, Some(key), depth - 1).await?;
                }
            }
            Ok(())
        })
    }

    /// Resolve one key.
    ///
    /// `key` may name a top-level option, a nested path such as
    /// `placement/availability-zone`, or the last component of a nested
    /// leaf (`availability-zone`). Directories are expanded into nested
    /// entries according to the expansion policy. The returned entry carries
    /// `key` as requested.
    ///
    /// # Errors
    ///
    /// Returns `MetadataError::UnknownKey` if the key is not offered by this
    /// version or the service answers with a client error for it.
    pub async fn resolve(&self, key: &MetadataKey) -> Result<MetadataEntry, MetadataError> {
        if let Some(option) = self.options.get(key.as_str()) {
            return self.resolve_option(option, key).await;
        }

        if let Some((parent, name)) = key.as_str().rsplit_once('/') {
            let top = parent.split('/').next().unwrap_or_default();
            if self
                .options
                .get(top)
                .is_some_and(|o| o.source == Source::MetaData && o.expandable)
            {
                return self.resolve_nested(key, parent, name).await;
            }
        }

        let options = self.discover_options().await?;
        let option = options
            .get(key.as_str())
            .or_else(|| options.get_key(key, Source::Dynamic))
            .ok_or_else(|| MetadataError::UnknownKey(key.to_string()))?;
        self.resolve_option(option, key).await
    }

    /// Resolve several keys, skipping unknown ones.
    ///
    /// Unknown keys are collected in [`Resolution::failures`]; any other
    /// error aborts the batch.
    pub async fn resolve_all<I, S>(&self, names: I) -> Result<Resolution, MetadataError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolution = Resolution::default();
        for name in names {
            let key = MetadataKey::new(name.as_ref().trim_start_matches("--"));
            match self.resolve(&key).await {
                Ok(entry) => resolution.entries.push(entry),
                Err(e) if e.is_recoverable() => {
                    warn!(%key, "skipping key: {}", e);
                    resolution.failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolution)
    }

    /// Resolve every top-level `meta-data/` key in discovery order.
    pub async fn resolve_defaults(&self) -> Result<Resolution, MetadataError> {
        let names: Vec<String> = self
            .options
            .defaults()
            .map(|o| o.name().to_string())
            .collect();
        self.resolve_all(names).await
    }

    async fn resolve_option(
        &self,
        option: &MetadataOption,
        requested: &MetadataKey,
    ) -> Result<MetadataEntry, MetadataError> {
        let depth = self.expansion.depth_for(&option.key);
        self.resolve_node(requested.clone(), option.path(), depth)
            .await
    }

    /// Resolve `parent/name` below a top-level directory, using the parent's
    /// listing to tell a leaf from a directory.
    async fn resolve_nested(
        &self,
        key: &MetadataKey,
        parent: &str,
        name: &str,
    ) -> Result<MetadataEntry, MetadataError> {
        let parent_path = format!("{}/{}/", Source::MetaData, parent);
        let child = self
            .fetch_listing(&parent_path)
            .await
            .map_err(|e| match e {
                MetadataError::UnknownKey(_) => MetadataError::UnknownKey(key.to_string()),
                e => e,
            })?
            .into_iter()
            .find(|child| child.name == name)
            .ok_or_else(|| MetadataError::UnknownKey(key.to_string()))?;

        let path = if child.expandable {
            format!("{}{}/", parent_path, name)
        } else {
            format!("{}{}", parent_path, name)
        };
        let nesting = key.as_str().matches('/').count();
        let depth = self.expansion.depth_for(key).saturating_sub(nesting).max(1);
        self.resolve_node(key.clone(), path, depth).await
    }

    /// Fetch `path` and, for a directory, resolve its children. With no
    /// depth left, a directory's child names become the value.
    fn resolve_node(&self, key: MetadataKey, path: String, depth: usize) -> EntryFuture<'_> {
        Box::pin(async move {
            let children = match self.fetch_node(&path, &key).await? {
                MetadataNode::Leaf(value) => return Ok(MetadataEntry::scalar(key, value)),
                MetadataNode::Directory(children) => children,
            };

            if depth == 0 {
                let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
                return Ok(MetadataEntry::scalar(key, names.join("\n")));
            }

            let mut entries = Vec::with_capacity(children.len());
            for child in children {
                let child_key = key.join(&child.name);
                let child_path = if child.expandable {
                    format!("{}{}/", path, child.name)
                } else {
                    format!("{}{}", path, child.name)
                };
                match self.resolve_node(child_key, child_path, depth - 1).await {
                    Ok(entry) => entries.push(entry),
                    Err(e) if e.is_recoverable() => warn!(%key, "skipping child: {}", e),
                    Err(e) => return Err(e),
                }
            }

            Ok(MetadataEntry {
                key,
                value: MetadataValue::Directory(entries),
            })
        })
    }

    async fn fetch_node(&self, path: &str, key: &MetadataKey) -> Result<MetadataNode, MetadataError> {
        let body = self.fetch(path, key).await?;
        Ok(MetadataNode::parse(path, &body))
    }

    async fn fetch_listing(&self, path: &str) -> Result<Vec<Child>, MetadataError> {
        let body = self.fetch(path, &MetadataKey::new(path)).await?;
        Ok(Child::parse_listing(&body))
    }

    /// GET a path below the version prefix as raw text.
    async fn fetch(&self, path: &str, key: &MetadataKey) -> Result<String, MetadataError> {
        let url_path = format!("{}/{}", self.version, path);
        match self.transport.get(&url_path).await {
            Err(MetadataError::Http(status)) if is_missing(status) => {
                Err(MetadataError::UnknownKey(key.to_string()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = MetadataClient::with_default_timeout().unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn test_client_custom_base_url() {
        let client = MetadataClient::with_base_url("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_errors_mean_missing() {
        assert!(is_missing(400));
        assert!(is_missing(404));
        assert!(is_missing(410));
        assert!(!is_missing(401));
        assert!(!is_missing(403));
        assert!(!is_missing(500));
    }

    #[test]
    fn test_resolution_completeness() {
        let mut resolution = Resolution::default();
        assert!(resolution.is_complete());
        resolution
            .failures
            .push(MetadataError::UnknownKey("bogus".to_string()));
        assert!(!resolution.is_complete());
    }
}
