//! # fw-forum-http
//!
//! `ForumClient` over a JSON gateway that fronts the forum's private API.
//!
//! Gateway shape:
//! - listings answer `{"items": [...], "has_more": bool}`
//! - actions answer `{"applied": bool}`
//! - refusals answer 403/409/410/422 with `{"error": "..."}`
//!
//! Anything else (5xx, 429, timeouts, undecodable bodies) is a transport failure.

use async_trait::async_trait;
use bytes::Bytes;
use fw_core::{
    ActionScope, ContentId, ContentItem, ContentParts, ForumClient, MentionEvent, Page, Result,
    UserId, UserProfile, UserQuery, WardenError,
};
use reqwest::{Client, Method, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ActionResponse {
    applied: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorResponse {
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
struct MentionList {
    items: Vec<MentionEvent>,
}

/// HTTP client for the forum gateway
pub struct HttpForumClient {
    client: Client,
    base_url: Url,
    token: SecretString,
}

impl HttpForumClient {
    /// `read_timeout` bounds everything after the connection is up.
    pub fn new(base_url: &str, token: SecretString, connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(connect_timeout + read_timeout)
            .build()
            .map_err(|e| WardenError::Config(format!("http client: {e}")))?;

        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| WardenError::Config(format!("bad forum_api.base_url: {e}")))?;

        Ok(Self { client, base_url, token })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| WardenError::Config(format!("base url cannot take a path: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> Result<reqwest::Response> {
        let path = url.path().to_string();
        let mut request = self.client.request(method.clone(), url).bearer_auth(self.token.expose_secret());
        if let Some(body) = body {
            request = request.json(&body);
        }
        request.send().await.map_err(|e| {
            tracing::debug!(%method, path = %path, error = %e, "Gateway request failed");
            transport(e)
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self.send(Method::GET, url, None).await?;
        match response.status() {
            status if status.is_success() => response.json().await.map_err(transport),
            StatusCode::NOT_FOUND => Err(WardenError::NotFound("resource".into(), response.url().path().to_string())),
            status => {
                tracing::warn!(path = response.url().path(), %status, "Unexpected gateway status");
                Err(WardenError::Transport(format!("gateway answered {status}")))
            }
        }
    }

    async fn action(&self, method: Method, url: Url, body: Option<Value>) -> Result<bool> {
        let response = self.send(method, url, body).await?;
        let status = response.status();
        if status.is_success() {
            let parsed: ActionResponse = response.json().await.map_err(transport)?;
            return Ok(parsed.applied);
        }
        let path = response.url().path().to_string();
        if is_refusal(status) {
            let reason = response.json::<ErrorResponse>().await.unwrap_or_default().error;
            tracing::debug!(path = %path, %status, %reason, "Gateway refused action");
            return Err(WardenError::ActionRejected(format!("{status}: {reason}")));
        }
        tracing::warn!(path = %path, %status, "Unexpected gateway status");
        Err(WardenError::Transport(format!("gateway answered {status}")))
    }

    async fn list(&self, url: Url, page: u32) -> Result<Page<ContentItem>> {
        let mut url = url;
        url.query_pairs_mut().append_pair("page", &page.to_string());
        let raw: Page<ContentParts> = self.get_json(url).await?;
        Ok(Page {
            items: raw.items.into_iter().map(ContentItem::from_parts).collect(),
            has_more: raw.has_more,
        })
    }
}

fn is_refusal(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::CONFLICT | StatusCode::GONE | StatusCode::UNPROCESSABLE_ENTITY
    )
}

fn transport(e: reqwest::Error) -> WardenError {
    if e.is_timeout() {
        WardenError::Transport(format!("timed out: {e}"))
    } else {
        WardenError::Transport(e.to_string())
    }
}

#[async_trait]
impl ForumClient for HttpForumClient {
    async fn list_mentions(&self) -> Result<Vec<MentionEvent>> {
        let list: MentionList = self.get_json(self.url(&["mentions"])?).await?;
        Ok(list.items)
    }

    async fn list_threads(&self, forum: &str, page: u32) -> Result<Page<ContentItem>> {
        self.list(self.url(&["forums", forum, "threads"])?, page).await
    }

    async fn list_posts(&self, forum: &str, thread_id: ContentId, page: u32) -> Result<Page<ContentItem>> {
        let tid = thread_id.to_string();
        self.list(self.url(&["forums", forum, "threads", &tid, "posts"])?, page).await
    }

    async fn list_comments(&self, forum: &str, thread_id: ContentId, post_id: ContentId, page: u32) -> Result<Page<ContentItem>> {
        let (tid, pid) = (thread_id.to_string(), post_id.to_string());
        self.list(self.url(&["forums", forum, "threads", &tid, "posts", &pid, "comments"])?, page).await
    }

    async fn fetch_image(&self, locator: &str) -> Result<Bytes> {
        let mut url = self.url(&["images"])?;
        url.query_pairs_mut().append_pair("locator", locator);
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(WardenError::Transport(format!("image fetch answered {}", response.status())));
        }
        response.bytes().await.map_err(transport)
    }

    async fn delete_content(&self, forum: &str, id: ContentId, scope: ActionScope) -> Result<bool> {
        let id = id.to_string();
        let url = self.url(&["forums", forum, "content", &id, "delete"])?;
        self.action(Method::POST, url, Some(json!({ "scope": scope }))).await
    }

    async fn hide_thread(&self, forum: &str, thread_id: ContentId) -> Result<bool> {
        let tid = thread_id.to_string();
        self.action(Method::POST, self.url(&["forums", forum, "threads", &tid, "hide"])?, None).await
    }

    async fn unhide_thread(&self, forum: &str, thread_id: ContentId) -> Result<bool> {
        let tid = thread_id.to_string();
        self.action(Method::POST, self.url(&["forums", forum, "threads", &tid, "unhide"])?, None).await
    }

    async fn block_user(&self, forum: &str, user_id: UserId, days: u32, reason: &str) -> Result<bool> {
        let uid = user_id.to_string();
        let url = self.url(&["forums", forum, "users", &uid, "block"])?;
        self.action(Method::POST, url, Some(json!({ "days": days, "reason": reason }))).await
    }

    async fn unblock_user(&self, forum: &str, user_id: UserId) -> Result<bool> {
        let uid = user_id.to_string();
        self.action(Method::POST, self.url(&["forums", forum, "users", &uid, "unblock"])?, None).await
    }

    async fn add_to_blacklist(&self, forum: &str, user_id: UserId) -> Result<bool> {
        let uid = user_id.to_string();
        self.action(Method::PUT, self.url(&["forums", forum, "blacklist", &uid])?, None).await
    }

    async fn remove_from_blacklist(&self, forum: &str, user_id: UserId) -> Result<bool> {
        let uid = user_id.to_string();
        self.action(Method::DELETE, self.url(&["forums", forum, "blacklist", &uid])?, None).await
    }

    async fn reply(&self, forum: &str, thread_id: ContentId, content: &str) -> Result<bool> {
        let tid = thread_id.to_string();
        let url = self.url(&["forums", forum, "threads", &tid, "reply"])?;
        self.action(Method::POST, url, Some(json!({ "content": content }))).await
    }

    async fn resolve_user(&self, query: &UserQuery) -> Result<Option<UserProfile>> {
        let mut url = self.url(&["users", "resolve"])?;
        let (key, value) = match query {
            UserQuery::PlatformUid(uid) => ("uid", uid.to_string()),
            UserQuery::Id(id) => ("id", id.to_string()),
            UserQuery::Name(name) => ("name", name.clone()),
        };
        url.query_pairs_mut().append_pair(key, &value);
        match self.get_json::<UserProfile>(url).await {
            Ok(profile) => Ok(Some(profile)),
            Err(WardenError::NotFound(..)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
