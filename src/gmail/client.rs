use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{MailProvider, MessageHeaders, ProviderError, SendOutcome, TokenGrant};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Gmail REST client. Every mail call acquires a short-lived access token
/// from the tenant's refresh token first.
pub struct GmailClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

#[derive(Deserialize)]
struct ThreadResponse {
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Deserialize)]
struct ThreadMessage {
    id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    payload: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Deserialize)]
struct Header {
    name: String,
    value: String,
}

impl GmailClient {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        GmailClient {
            http: Client::new(),
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let resp = self.http.post(TOKEN_URL).form(params).send().await?;
        let body: TokenResponse = resp.json().await?;
        if let Some(err) = body.error {
            let detail = body.error_description.unwrap_or_default();
            return Err(ProviderError::Token(format!("{err}: {detail}")));
        }
        Ok(body)
    }

    async fn access_token(&self, refresh_token: &str) -> Result<String, ProviderError> {
        let body = self
            .token_request(&[
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;
        body.access_token
            .ok_or_else(|| ProviderError::Token("response missing access_token".to_string()))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, ProviderError> {
        let body = self
            .token_request(&[
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .await?;
        let access_token = body
            .access_token
            .ok_or_else(|| ProviderError::Token("response missing access_token".to_string()))?;
        Ok(TokenGrant {
            access_token,
            refresh_token: body.refresh_token,
            id_token: body.id_token,
        })
    }

    async fn send_raw(&self, refresh_token: &str, raw: &str) -> Result<SendOutcome, ProviderError> {
        let token = self.access_token(refresh_token).await?;
        let resp = self
            .http
            .post(format!("{GMAIL_BASE}/messages/send"))
            .bearer_auth(token)
            .json(&json!({ "raw": raw }))
            .send()
            .await?;
        let body: SendResponse = Self::check(resp).await?.json().await?;
        Ok(SendOutcome {
            message_id: body.id,
            thread_id: body.thread_id,
        })
    }

    async fn list_thread(
        &self,
        refresh_token: &str,
        thread_id: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ProviderError> {
        let token = self.access_token(refresh_token).await?;
        let resp = self
            .http
            .get(format!("{GMAIL_BASE}/threads/{thread_id}"))
            .query(&[("format", "minimal")])
            .bearer_auth(token)
            .send()
            .await?;
        let body: ThreadResponse = Self::check(resp).await?.json().await?;
        Ok(body
            .messages
            .into_iter()
            .take(max_results as usize)
            .map(|m| m.id)
            .collect())
    }

    async fn message_headers(
        &self,
        refresh_token: &str,
        message_id: &str,
    ) -> Result<MessageHeaders, ProviderError> {
        let token = self.access_token(refresh_token).await?;
        let resp = self
            .http
            .get(format!("{GMAIL_BASE}/messages/{message_id}"))
            .query(&[
                ("format", "metadata"),
                ("metadataHeaders", "From"),
                ("metadataHeaders", "Date"),
            ])
            .bearer_auth(token)
            .send()
            .await?;
        let body: MessageResponse = Self::check(resp).await?.json().await?;
        let mut headers = MessageHeaders::default();
        for h in body.payload.map(|p| p.headers).unwrap_or_default() {
            if h.name.eq_ignore_ascii_case("From") {
                headers.from = Some(h.value);
            } else if h.name.eq_ignore_ascii_case("Date") {
                headers.date = Some(h.value);
            }
        }
        Ok(headers)
    }
}
