//! Realtime database REST backend.
//!
//! Paths map to `{base_url}/{path}.json`. `PUT` replaces a subtree (a JSON
//! `null` body deletes it) and `GET` returns `null` for missing paths.
//! The REST surface has no push channel, so `watch` polls.

use std::time::Duration;

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::watch;

use super::{RemoteStore, is_empty_value, normalize_path};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// HTTP client for a Firebase-style realtime database.
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    poll_interval: Duration,
}

impl FirebaseStore {
    pub fn new(base_url: &str, config: &SyncConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.timeout())
            .build()
            .map_err(|e| SyncError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: None,
            poll_interval: config.poll_interval(),
        })
    }

    /// Attach a database auth token sent as the `auth` query parameter.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        let path = normalize_path(path);
        if path.is_empty() {
            format!("{}/.json", self.base_url)
        } else {
            format!("{}/{}.json", self.base_url, path)
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token.as_str())]),
            None => builder,
        }
    }

    async fn fetch(&self, path: &str) -> SyncResult<Option<Value>> {
        let response = self
            .request(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(path, response)?;

        let value: Value = response.json().await.map_err(|e| SyncError::Malformed {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(if is_empty_value(&value) { None } else { Some(value) })
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    SyncError::Unavailable(format!("Request error: {}", e))
}

fn check_status(path: &str, response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    debug!("[FirebaseStore] {} returned HTTP {}", path, status);
    Err(classify_status(path, status))
}

fn classify_status(path: &str, status: StatusCode) -> SyncError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SyncError::Rejected(format!("HTTP {} for {}", status, path))
        }
        StatusCode::NOT_FOUND => SyncError::NotFound(path.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            SyncError::Unavailable(format!("HTTP {}", status))
        }
        s if s.is_server_error() => SyncError::Unavailable(format!("HTTP {}", status)),
        _ => SyncError::Rejected(format!("HTTP {} for {}", status, path)),
    }
}

impl RemoteStore for FirebaseStore {
    async fn set(&self, path: &str, value: Value) -> SyncResult<()> {
        let response = self
            .request(self.client.put(self.url(path)))
            .json(&value)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(path, response)?;
        Ok(())
    }

    async fn get(&self, path: &str) -> SyncResult<Option<Value>> {
        self.fetch(path).await
    }

    /// Polls `path` until every receiver is dropped. The channel starts
    /// empty and fills after the first successful poll.
    fn watch(&self, path: &str) -> SyncResult<watch::Receiver<Option<Value>>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::Unavailable(format!("No runtime for polling: {}", e)))?;

        let (tx, rx) = watch::channel(None);
        let store = self.clone();
        let path = normalize_path(path);

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                match store.fetch(&path).await {
                    Ok(latest) => {
                        tx.send_if_modified(|current| {
                            if *current != latest {
                                *current = latest;
                                true
                            } else {
                                false
                            }
                        });
                    }
                    Err(e) => warn!("[FirebaseStore] Poll of {} failed: {}", path, e),
                }
            }
            debug!("[FirebaseStore] Stopped polling {}", path);
        });

        Ok(rx)
    }
}
