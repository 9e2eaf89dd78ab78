//! Auth token seam.

use async_trait::async_trait;

/// Supplies the auth token embedded in each connection URL.
///
/// Asked once per connection attempt, so a provider may refresh between
/// reconnects. `None` means the user is signed out.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn auth_token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn auth_token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.is_empty())
    }
}
