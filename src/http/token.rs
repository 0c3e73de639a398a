//! Bearer-token sources with refresh support.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// A source of bearer tokens for authenticated requests.
///
/// The request client calls [`TokenSource::token`] on every attempt and
/// [`TokenSource::refresh`] when a response comes back 401. Refresh is
/// awaited inline; the failing request is retried with the new token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The current bearer token.
    async fn token(&self) -> Result<String>;

    /// Force a refresh and return the new token.
    async fn refresh(&self) -> Result<String>;
}

/// A fixed token that cannot really be refreshed.
///
/// `refresh` hands back the same value; a backend that keeps returning
/// 401 will exhaust the client's refresh budget and surface an auth
/// failure.
#[derive(Debug)]
pub struct StaticToken {
    token: RwLock<String>,
}

impl StaticToken {
    /// Create a static token source
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    /// Replace the stored token (e.g. after out-of-band rotation)
    pub async fn set(&self, token: impl Into<String>) {
        *self.token.write().await = token.into();
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.token.read().await.clone())
    }

    async fn refresh(&self) -> Result<String> {
        self.token().await
    }
}

#[cfg(test)]
mod token_tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_roundtrip() {
        let source = StaticToken::new("abc");
        assert_eq!(source.token().await.unwrap(), "abc");
        assert_eq!(source.refresh().await.unwrap(), "abc");

        source.set("def").await;
        assert_eq!(source.token().await.unwrap(), "def");
    }
}
