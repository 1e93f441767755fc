use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Method, RequestBuilder, Response, StatusCode,
};
use serde_json::{json, Value};

use crate::{
    config::CompanionEnv,
    error::RunnerError,
    server::{HEALTH_CHECK_ENDPOINT, MENU_OPENED_ENDPOINT, MESSAGE_ENDPOINT, RECHECK_ENDPOINT},
};

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client that attaches `Authorization: Bearer <token>` to every request it sends.
///
/// The header is installed as a default on the underlying client, so callers build requests
/// exactly as they would with a plain `reqwest::Client`. The timeout covers the whole round
/// trip.
#[derive(Clone)]
pub struct AuthedClient {
    inner: reqwest::Client,
}

impl AuthedClient {
    pub fn new(token: &str, timeout: Duration) -> Result<Self, RunnerError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| RunnerError::InvalidToken)?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);

        let inner = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            // the control server is always on loopback
            .no_proxy()
            .build()
            .map_err(RunnerError::ClientBuild)?;

        Ok(Self { inner })
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.inner.post(url)
    }
}

/// Typed access to the runner's control server endpoints from a desktop process.
#[derive(Clone)]
pub struct RunnerClient {
    client: AuthedClient,
    base_url: String,
}

impl RunnerClient {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, RunnerError> {
        Ok(Self {
            client: AuthedClient::new(token, timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env(timeout: Duration) -> Result<Self, RunnerError> {
        let env = CompanionEnv::from_env()?;
        Self::new(&env.server_url, &env.auth_token, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<(), RunnerError> {
        self.get(HEALTH_CHECK_ENDPOINT).await
    }

    pub async fn menu_opened(&self) -> Result<(), RunnerError> {
        self.get(MENU_OPENED_ENDPOINT).await
    }

    pub async fn recheck(&self) -> Result<(), RunnerError> {
        self.get(RECHECK_ENDPOINT).await
    }

    pub async fn send_message(&self, method: &str, params: Value) -> Result<(), RunnerError> {
        let response = self
            .client
            .post(&self.endpoint(MESSAGE_ENDPOINT))
            .json(&json!({ "method": method, "params": params }))
            .send()
            .await
            .map_err(RunnerError::Request)?;
        expect_ok(response).await
    }

    async fn get(&self, path: &str) -> Result<(), RunnerError> {
        let response = self
            .client
            .get(&self.endpoint(path))
            .send()
            .await
            .map_err(RunnerError::Request)?;
        expect_ok(response).await
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn expect_ok(response: Response) -> Result<(), RunnerError> {
    let status = response.status();
    // read the body in full so the connection can be reused
    let _ = response.bytes().await;
    if status != StatusCode::OK {
        return Err(RunnerError::UnexpectedStatus(status));
    }
    Ok(())
}
