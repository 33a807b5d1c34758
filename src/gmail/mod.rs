use async_trait::async_trait;
use thiserror::Error;

pub mod message;

mod client;
pub use client::GmailClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("token exchange failed: {0}")]
    Token(String),

    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Result of a provider send. Either id may be absent; a missing thread id
/// just means replies can never be detected for that run.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
}

/// Tokens returned by the authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageHeaders {
    pub from: Option<String>,
    pub date: Option<String>,
}

/// The mail provider seam. The worker, the reply detector, and the OAuth
/// callback all go through this, so tests can substitute a scripted fake.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Exchange a one-shot authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError>;

    /// Submit a base64url-encoded RFC 5322 message on behalf of the tenant
    /// owning `refresh_token`.
    async fn send_raw(&self, refresh_token: &str, raw: &str) -> Result<SendOutcome, ProviderError>;

    /// List up to `max_results` message ids in a conversation thread.
    async fn list_thread(
        &self,
        refresh_token: &str,
        thread_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError>;

    /// Fetch the `From` and `Date` headers of one message.
    async fn message_headers(
        &self,
        refresh_token: &str,
        message_id: &str,
    ) -> Result<MessageHeaders, ProviderError>;
}
