//! Where a socket connects to.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::SocketError;

/// The URL a socket connects to, re-evaluated on every attempt.
#[derive(Clone)]
pub enum UrlSource {
    /// A fixed URL string.
    Fixed(String),

    /// A function producing the URL for each attempt.
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl UrlSource {
    /// Creates a source that calls `f` on every connection attempt.
    ///
    /// # Examples
    ///
    /// ```
    /// use reconnecting_socket::UrlSource;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let shard = AtomicUsize::new(0);
    /// let source = UrlSource::dynamic(move || {
    ///     let n = shard.fetch_add(1, Ordering::Relaxed) % 2;
    ///     format!("wss://shard-{}.example.com/feed", n)
    /// });
    ///
    /// assert_eq!(source.resolve().unwrap().host_str(), Some("shard-0.example.com"));
    /// assert_eq!(source.resolve().unwrap().host_str(), Some("shard-1.example.com"));
    /// ```
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        UrlSource::Dynamic(Arc::new(f))
    }

    /// Resolves the current URL.
    ///
    /// Only absolute URLs are accepted.
    pub fn resolve(&self) -> Result<Url, SocketError> {
        let raw = match self {
            UrlSource::Fixed(url) => url.clone(),
            UrlSource::Dynamic(f) => f(),
        };
        Url::parse(&raw).map_err(|source| SocketError::InvalidUrl { url: raw, source })
    }
}

impl From<&str> for UrlSource {
    fn from(url: &str) -> Self {
        UrlSource::Fixed(url.to_string())
    }
}

impl From<String> for UrlSource {
    fn from(url: String) -> Self {
        UrlSource::Fixed(url)
    }
}

impl From<Url> for UrlSource {
    fn from(url: Url) -> Self {
        UrlSource::Fixed(url.into())
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlSource::Fixed(url) => f.debug_tuple("UrlSource::Fixed").field(url).finish(),
            UrlSource::Dynamic(_) => write!(f, "UrlSource::Dynamic"),
        }
    }
}
