//! Credential supply for the relay client.
//!
//! A [`TokenSource`] is consulted once per connect attempt. The token it
//! yields is appended to the connection URL as a `token` query parameter.
//!
//! # Sources
//!
//! - [`TokenSource::Anonymous`]: connect without a credential
//! - [`TokenSource::Static`]: a fixed token string
//! - [`TokenSource::Sync`]: a closure returning the current token
//! - [`TokenSource::Async`]: an async closure (e.g. a refresh-token flow)
//!
//! ```rust,ignore
//! use relay_link::auth::TokenSource;
//!
//! let source = TokenSource::from_async(|| async {
//!     let token = refresh_session().await?;
//!     Ok(token)
//! });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;

/// Authentication-specific errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The source produced no usable token
    #[error("Auth token unavailable")]
    TokenUnavailable,

    /// The server refused the credential
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// The provider itself failed (storage, refresh request, ...)
    #[error("Token provider failed: {0}")]
    ProviderFailed(String),
}

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

type SyncProvider = Arc<dyn Fn() -> AuthResult<String> + Send + Sync>;
type AsyncProvider = Arc<dyn Fn() -> BoxFuture<'static, AuthResult<String>> + Send + Sync>;

/// Supplies the auth credential for each connect attempt.
#[derive(Clone, Default)]
pub enum TokenSource {
    /// No credential; the URL is used as-is.
    #[default]
    Anonymous,
    /// A fixed token.
    Static(String),
    /// Synchronous provider, called on every connect attempt.
    Sync(SyncProvider),
    /// Asynchronous provider, awaited on every connect attempt.
    Async(AsyncProvider),
}

impl TokenSource {
    /// Create a source that always yields `token`.
    pub fn new_static(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// Create a source backed by a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> AuthResult<String> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Create a source backed by an async closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AuthResult<String>> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }

    /// Whether this source supplies a credential at all.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Resolve the current token.
    ///
    /// Returns `Ok(None)` for anonymous sources. A provider yielding a blank
    /// string is reported as [`AuthError::TokenUnavailable`].
    pub async fn fetch(&self) -> AuthResult<Option<String>> {
        let token = match self {
            Self::Anonymous => return Ok(None),
            Self::Static(token) => token.clone(),
            Self::Sync(provider) => provider()?,
            Self::Async(provider) => provider().await?,
        };

        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(AuthError::TokenUnavailable);
        }
        Ok(Some(trimmed.to_string()))
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("TokenSource::Anonymous"),
            Self::Static(_) => f.write_str("TokenSource::Static(<redacted>)"),
            Self::Sync(_) => f.write_str("TokenSource::Sync(..)"),
            Self::Async(_) => f.write_str("TokenSource::Async(..)"),
        }
    }
}

impl From<String> for TokenSource {
    fn from(token: String) -> Self {
        Self::Static(token)
    }
}

impl From<&str> for TokenSource {
    fn from(token: &str) -> Self {
        Self::Static(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_anonymous_yields_none() {
        let source = TokenSource::default();
        assert!(source.is_anonymous());
        assert_eq!(source.fetch().await, Ok(None));
    }

    #[tokio::test]
    async fn test_static_token_is_trimmed() {
        let source = TokenSource::new_static("  abc123 \n");
        assert_eq!(source.fetch().await, Ok(Some("abc123".to_string())));
    }

    #[tokio::test]
    async fn test_blank_token_is_unavailable() {
        let source = TokenSource::from("   ");
        assert_eq!(source.fetch().await, Err(AuthError::TokenUnavailable));
    }

    #[tokio::test]
    async fn test_sync_provider_called_per_fetch() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let source = TokenSource::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{}", n))
        });

        assert_eq!(source.fetch().await, Ok(Some("token-1".to_string())));
        assert_eq!(source.fetch().await, Ok(Some("token-2".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_async_provider_error_propagates() {
        let source = TokenSource::from_async(|| async {
            Err(AuthError::ProviderFailed("keychain locked".to_string()))
        });
        assert_eq!(
            source.fetch().await,
            Err(AuthError::ProviderFailed("keychain locked".to_string()))
        );
    }

    #[test]
    fn test_debug_redacts_static_token() {
        let source = TokenSource::new_static("secret");
        let rendered = format!("{:?}", source);
        assert!(!rendered.contains("secret"));
    }
}
