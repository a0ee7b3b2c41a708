//! Reddit implementation of the forum client
//!
//! Authenticates with the script-app password grant and talks to the
//! OAuth API. Every response is classified into the closed
//! `PlatformError` taxonomy; the retry policy lives in the delivery
//! client, not here.

use super::forum::{ForumClient, PlatformError, PlatformResult};
use crate::config::ForumConfig;
use crate::types::{ExternalItemId, ForumIdentity, ForumItem, ForumReply, ReplyId};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client as HttpClient, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;

/// Refresh the OAuth token this long before it actually expires
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct RedditClient {
    config: ForumConfig,
    http_client: HttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl RedditClient {
    pub fn new(config: ForumConfig) -> Self {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            config,
            http_client,
            token: Mutex::new(None),
        }
    }

    /// Get a valid access token, fetching a fresh one when needed
    async fn access_token(&self) -> PlatformResult<String> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        log::debug!("Fetching new Reddit access token");

        let response = self
            .http_client
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("User-Agent", &self.config.user_agent)
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        let body = Self::check_response(response).await?;

        let value = body["access_token"]
            .as_str()
            .ok_or_else(|| {
                PlatformError::Fatal("Token response missing access_token".to_string())
            })?
            .to_string();
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);

        let token = CachedToken {
            value: value.clone(),
            expires_at: Utc::now()
                + ChronoDuration::seconds((expires_in - TOKEN_REFRESH_MARGIN_SECS).max(0)),
        };
        *cached = Some(token);

        Ok(value)
    }

    /// Classify an HTTP response, returning the parsed JSON body on success
    async fn check_response(response: Response) -> PlatformResult<Value> {
        let status = response.status();

        if status.is_success() {
            return response.json::<Value>().await.map_err(PlatformError::from);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<f64>().ok())
            .map(Duration::from_secs_f64);

        let body = response.text().await.unwrap_or_default();
        let detail = format!("{}: {}", status, truncate(&body, 200));

        Err(match status.as_u16() {
            429 => PlatformError::RateLimited { retry_after },
            400 | 401 | 403 | 404 => PlatformError::Fatal(detail),
            s if s >= 500 => PlatformError::Transient(detail),
            _ => PlatformError::Unknown(detail),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> PlatformResult<Value> {
        let token = self.access_token().await?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token)
            .header("User-Agent", &self.config.user_agent)
            .query(query)
            .send()
            .await?;

        Self::check_response(response).await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Reddit submissions are addressed as t3_<id> fullnames
fn submission_fullname(item_id: &ExternalItemId) -> String {
    format!("t3_{}", item_id)
}

#[async_trait]
impl ForumClient for RedditClient {
    async fn get_item(&self, item_id: &ExternalItemId) -> PlatformResult<ForumItem> {
        let url = format!("{}/api/info", self.config.base_url);
        let fullname = submission_fullname(item_id);
        let body = self.get_json(&url, &[("id", fullname.as_str())]).await?;

        let child = body["data"]["children"]
            .as_array()
            .and_then(|children| children.first())
            .ok_or_else(|| PlatformError::Fatal(format!("Item {} not found", item_id)))?;

        let data = &child["data"];
        Ok(ForumItem {
            id: item_id.clone(),
            title: data["title"].as_str().unwrap_or("").to_string(),
            body: data["selftext"].as_str().unwrap_or("").to_string(),
            author: data["author"].as_str().unwrap_or("").to_string(),
            url: data["url"].as_str().unwrap_or("").to_string(),
        })
    }

    async fn list_replies(&self, item_id: &ExternalItemId) -> PlatformResult<Vec<ForumReply>> {
        let url = format!("{}/comments/{}", self.config.base_url, item_id);
        let body = self
            .get_json(&url, &[("depth", "1"), ("limit", "100")])
            .await?;

        // The comments endpoint returns two listings: the submission
        // itself and its comment tree
        let comments = body
            .as_array()
            .and_then(|listings| listings.get(1))
            .and_then(|listing| listing["data"]["children"].as_array())
            .cloned()
            .unwrap_or_default();

        let mut replies = Vec::new();
        for child in &comments {
            let data = &child["data"];
            let (Some(id), Some(author)) = (data["id"].as_str(), data["author"].as_str()) else {
                continue;
            };
            replies.push(ForumReply {
                id: ReplyId::new(id),
                author: author.to_string(),
            });
        }

        Ok(replies)
    }

    async fn current_identity(&self) -> PlatformResult<ForumIdentity> {
        let url = format!("{}/api/v1/me", self.config.base_url);
        let body = self.get_json(&url, &[]).await?;

        let username = body["name"]
            .as_str()
            .ok_or_else(|| PlatformError::Fatal("Identity response missing name".to_string()))?
            .to_string();

        Ok(ForumIdentity { username })
    }

    async fn post_reply(&self, item_id: &ExternalItemId, text: &str) -> PlatformResult<ReplyId> {
        let token = self.access_token().await?;
        let url = format!("{}/api/comment", self.config.base_url);
        let fullname = submission_fullname(item_id);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .header("User-Agent", &self.config.user_agent)
            .form(&[
                ("api_type", "json"),
                ("thing_id", fullname.as_str()),
                ("text", text),
            ])
            .send()
            .await?;

        let body = Self::check_response(response).await?;

        // The comment endpoint reports errors inside a 200 body
        if let Some(errors) = body["json"]["errors"].as_array() {
            if let Some(first) = errors.first() {
                let code = first
                    .get(0)
                    .and_then(|c| c.as_str())
                    .unwrap_or("UNKNOWN_ERROR");
                let message = first.get(1).and_then(|m| m.as_str()).unwrap_or("");

                if code.contains("RATELIMIT") {
                    let retry_after = body["json"]["ratelimit"]
                        .as_f64()
                        .map(Duration::from_secs_f64);
                    return Err(PlatformError::RateLimited { retry_after });
                }
                return Err(PlatformError::Fatal(format!("{}: {}", code, message)));
            }
        }

        let reply_id = body["json"]["data"]["things"]
            .as_array()
            .and_then(|things| things.first())
            .and_then(|thing| thing["data"]["id"].as_str())
            .ok_or_else(|| {
                PlatformError::Unknown("Comment response missing reply id".to_string())
            })?;

        log::info!("Posted reply {} on item {}", reply_id, item_id);
        Ok(ReplyId::new(reply_id))
    }
}
