//! HTTP client used by the operator subcommands (`list`, `show`, `start`, ...).

use anyhow::{anyhow, Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::http::jobs::{JobCommand, JobStatusView, JobsSnapshot};
use crate::http::ErrorBody;

pub struct ControlClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ControlClient {
    pub fn new(base: impl Into<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cronwarden/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get("/health").await
    }

    pub async fn list(&self) -> Result<JobsSnapshot> {
        self.get("/jobs").await
    }

    pub async fn show(&self, name: &str) -> Result<JobStatusView> {
        self.get(&format!("/jobs/{name}")).await
    }

    pub async fn command(&self, name: &str, command: JobCommand) -> Result<JobStatusView> {
        let url = format!("{}/jobs/{name}/{command}", self.base);
        let mut req = self.http.post(&url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("could not reach cronwarden at {}", self.base))?;
        decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .with_context(|| format!("could not reach cronwarden at {}", self.base))?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    match status {
        StatusCode::NOT_FOUND => Err(anyhow!("{message}")),
        _ => Err(anyhow!("{status}: {message}")),
    }
}
