// src/services/graphql.rs

//! Fast path: engagement metrics and replies from the site's GraphQL API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Comment, EnrichmentOptions, FastPathConfig, Item, Metrics, StorageState};
use crate::services::enrichment::{FastPath, FastPathResult};
use crate::utils::http::create_async_client;

const OPERATION: &str = "TweetDetail";

fn features() -> Value {
    json!({
        "responsive_web_graphql_exclude_directive_enabled": true,
        "verified_phone_label_enabled": false,
        "creator_subscriptions_tweet_preview_api_enabled": true,
        "responsive_web_graphql_timeline_navigation_enabled": true,
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled": false,
        "tweetypie_unmention_optimization_enabled": true,
        "responsive_web_edit_tweet_api_enabled": true,
        "graphql_is_translatable_rweb_tweet_is_translatable_enabled": true,
        "view_counts_everywhere_api_enabled": true,
        "longform_notetweets_consumption_enabled": true,
        "responsive_web_twitter_article_tweet_consumption_enabled": true,
        "tweet_awards_web_tipping_enabled": false,
        "freedom_of_speech_not_reach_fetch_enabled": true,
        "standardized_nudges_misinfo": true,
        "tweet_with_visibility_results_prefer_gql_limited_actions_policy_enabled": true,
        "rweb_video_timestamps_enabled": true,
        "longform_notetweets_rich_text_read_enabled": true,
        "longform_notetweets_inline_media_enabled": true,
        "responsive_web_enhance_cards_enabled": false
    })
}

fn variables(id: &str, cursor: Option<&str>) -> Value {
    let mut vars = json!({
        "focalTweetId": id,
        "with_rux_injections": false,
        "includePromotedContent": false,
        "withCommunity": true,
        "withQuickPromoteEligibilityTweetFields": true,
        "withBirdwatchNotes": false,
        "withVoice": true,
        "withV2Timeline": true
    });
    if let Some(cursor) = cursor {
        vars["cursor"] = json!(cursor);
        vars["referrer"] = json!("tweet");
    }
    vars
}

/// Counters may arrive as numbers or numeric strings.
fn as_count(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Unwrap `TweetWithVisibilityResults` style wrappers.
fn unwrap_tweet(result: &Value) -> &Value {
    result.get("tweet").unwrap_or(result)
}

fn timeline_entries(data: &Value) -> impl Iterator<Item = &Value> {
    data.pointer("/data/threaded_conversation_with_injections_v2/instructions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|i| i.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
        .filter_map(|i| i.get("entries").and_then(Value::as_array))
        .flatten()
}

fn entry_tweet(entry: &Value) -> Option<&Value> {
    let content = entry.get("content")?;
    let item_content = content
        .pointer("/item/itemContent")
        .or_else(|| content.get("itemContent"))?;
    item_content.pointer("/tweet_results/result").map(unwrap_tweet)
}

fn focal_tweet<'a>(data: &'a Value, id: &str) -> Option<&'a Value> {
    if let Some(result) = data.pointer("/data/tweetResult/result") {
        return Some(unwrap_tweet(result));
    }
    let tweets: Vec<&Value> = timeline_entries(data).filter_map(entry_tweet).collect();
    tweets
        .iter()
        .copied()
        .find(|t| t.get("rest_id").and_then(Value::as_str) == Some(id))
        .or_else(|| tweets.first().copied())
}

fn tweet_metrics(tweet: &Value) -> Metrics {
    let legacy = tweet.get("legacy").unwrap_or(&Value::Null);
    let views = legacy
        .pointer("/views/count")
        .or_else(|| tweet.pointer("/ext_views/count"))
        .or_else(|| tweet.pointer("/views/count"))
        .map(as_count)
        .unwrap_or(0);
    Metrics {
        likes: legacy.get("favorite_count").map(as_count).unwrap_or(0),
        replies: legacy.get("reply_count").map(as_count).unwrap_or(0),
        reposts: legacy.get("retweet_count").map(as_count).unwrap_or(0),
        views,
    }
}

fn entry_comment(entry: &Value) -> Option<Comment> {
    let tweet = entry_tweet(entry)?;
    if let Some(kind) = tweet.get("__typename").and_then(Value::as_str) {
        if kind != "Tweet" {
            return None;
        }
    }
    let legacy = tweet.get("legacy")?;
    let user = tweet
        .pointer("/core/user_results/result/legacy/screen_name")
        .and_then(Value::as_str)?;
    Some(Comment {
        user: user.to_string(),
        text: legacy
            .get("full_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        likes: legacy.get("favorite_count").map(as_count).unwrap_or(0),
    })
}

fn is_reply_entry(entry_id: &str) -> bool {
    !entry_id.contains("cursor")
        && entry_id.contains("tweet")
        && !entry_id.to_lowercase().contains("conversationthread")
}

/// Metrics of the focal post plus replies found in one response page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPage {
    pub metrics: Option<Metrics>,
    pub comments: Vec<Comment>,
    pub bottom_cursor: Option<String>,
}

/// Parse one TweetDetail response. Replies stop at `reply_limit`.
pub fn parse_tweet_detail(data: &Value, id: &str, reply_limit: usize) -> DetailPage {
    let metrics = focal_tweet(data, id).map(tweet_metrics);

    let mut comments = Vec::new();
    let mut bottom_cursor = None;
    for entry in timeline_entries(data) {
        let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or_default();
        if entry_id.contains("cursor-bottom") {
            bottom_cursor = entry
                .pointer("/content/value")
                .or_else(|| entry.pointer("/content/itemContent/value"))
                .and_then(Value::as_str)
                .map(str::to_string);
            continue;
        }
        if entry_id.ends_with(id) || !is_reply_entry(entry_id) || comments.len() >= reply_limit {
            continue;
        }
        if let Some(comment) = entry_comment(entry) {
            comments.push(comment);
        }
    }

    DetailPage {
        metrics,
        comments,
        bottom_cursor,
    }
}

struct GuestToken {
    value: String,
    fetched_at: Instant,
    remaining: Option<u64>,
}

/// How the client authenticates its requests.
enum Credential {
    /// Session cookies: `auth_token` and the `ct0` CSRF token
    Session { auth_token: String, csrf: String },
    Guest,
}

/// Client for the post-detail GraphQL operation.
pub struct GraphqlClient {
    client: Client,
    config: FastPathConfig,
    bearer: String,
    credential: Credential,
    guest: Mutex<Option<GuestToken>>,
}

impl GraphqlClient {
    pub fn new(config: &FastPathConfig, bearer: String, session: Option<&StorageState>) -> Result<Self> {
        let credential = match session.and_then(|s| Some((s.cookie("auth_token")?, s.cookie("ct0")?))) {
            Some((auth, csrf)) => Credential::Session {
                auth_token: auth.value.clone(),
                csrf: csrf.value.clone(),
            },
            None => Credential::Guest,
        };
        Ok(Self {
            client: create_async_client(config)?,
            config: config.clone(),
            bearer,
            credential,
            guest: Mutex::new(None),
        })
    }

    /// Build a client when the fast path is enabled and a bearer token is set.
    pub fn from_env(config: &FastPathConfig, session: Option<&StorageState>) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        match std::env::var(&config.bearer_token_env) {
            Ok(bearer) if !bearer.trim().is_empty() => {
                Ok(Some(Self::new(config, bearer.trim().to_string(), session)?))
            }
            _ => {
                log::info!(
                    "Fast path disabled: {} is not set",
                    config.bearer_token_env
                );
                Ok(None)
            }
        }
    }

    fn endpoint(&self, id: &str, cursor: Option<&str>) -> Result<url::Url> {
        let base = format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.operation_id,
            OPERATION
        );
        let url = url::Url::parse_with_params(
            &base,
            &[
                ("variables", variables(id, cursor).to_string()),
                ("features", features().to_string()),
            ],
        )?;
        Ok(url)
    }

    fn base_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.bearer))
            .map_err(|e| AppError::config(format!("invalid bearer token: {e}")))?;
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert("x-twitter-active-user", HeaderValue::from_static("yes"));
        headers.insert("x-twitter-client-language", HeaderValue::from_static("en"));
        Ok(headers)
    }

    async fn activate_guest(&self) -> Result<String> {
        log::info!("Requesting guest token");
        let body: Value = self
            .client
            .post(&self.config.guest_activate_url)
            .headers(self.base_headers()?)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.get("guest_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AppError::validation("guest activation returned no token"))
    }

    /// Current guest token, refreshed when stale, nearly rate limited or forced.
    async fn guest_token(&self, force: bool) -> Result<String> {
        let mut slot = self.guest.lock().await;
        let ttl = Duration::from_secs(self.config.guest_token_ttl_secs);
        let fresh = slot.as_ref().filter(|token| {
            token.fetched_at.elapsed() < ttl
                && token.remaining.is_none_or(|r| r >= self.config.rate_limit_floor)
        });
        if let (false, Some(token)) = (force, fresh) {
            return Ok(token.value.clone());
        }

        let value = self.activate_guest().await?;
        *slot = Some(GuestToken {
            value: value.clone(),
            fetched_at: Instant::now(),
            remaining: None,
        });
        Ok(value)
    }

    async fn note_rate_limit(&self, remaining: Option<u64>) {
        if let (Credential::Guest, Some(remaining)) = (&self.credential, remaining) {
            if let Some(token) = self.guest.lock().await.as_mut() {
                token.remaining = Some(remaining);
            }
        }
    }

    /// Fetch one page. `Ok(None)` means the request was refused and the
    /// credentials were refreshed.
    async fn fetch_page(&self, id: &str, cursor: Option<&str>) -> Result<Option<Value>> {
        let mut headers = self.base_headers()?;
        match &self.credential {
            Credential::Session { auth_token, csrf } => {
                let cookie = format!("auth_token={auth_token}; ct0={csrf}");
                headers.insert(
                    reqwest::header::COOKIE,
                    HeaderValue::from_str(&cookie)
                        .map_err(|e| AppError::validation(format!("invalid session cookie: {e}")))?,
                );
                headers.insert(
                    "x-csrf-token",
                    HeaderValue::from_str(csrf)
                        .map_err(|e| AppError::validation(format!("invalid csrf token: {e}")))?,
                );
                headers.insert("x-twitter-auth-type", HeaderValue::from_static("OAuth2Session"));
            }
            Credential::Guest => {
                let token = self.guest_token(false).await?;
                headers.insert(
                    "x-guest-token",
                    HeaderValue::from_str(&token)
                        .map_err(|e| AppError::validation(format!("invalid guest token: {e}")))?,
                );
            }
        }

        let response = self
            .client
            .get(self.endpoint(id, cursor)?)
            .headers(headers)
            .send()
            .await?;

        let remaining = response
            .headers()
            .get("x-rate-limit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        self.note_rate_limit(remaining).await;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                log::warn!("Fast path rate limited, pausing");
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_pause_ms)).await;
                self.refresh_guest().await;
                Ok(None)
            }
            StatusCode::FORBIDDEN => {
                log::warn!("Fast path refused post {}", id);
                self.refresh_guest().await;
                Ok(None)
            }
            _ => Ok(Some(response.error_for_status()?.json().await?)),
        }
    }

    async fn refresh_guest(&self) {
        if let Credential::Guest = self.credential {
            if let Err(e) = self.guest_token(true).await {
                log::warn!("Guest token refresh failed: {}", e);
            }
        }
    }

    /// Metrics and up to `reply_limit` replies for one post.
    pub async fn fetch_detail(&self, id: &str, reply_limit: usize) -> Result<FastPathResult> {
        let Some(first) = self.fetch_page(id, None).await? else {
            return Ok(FastPathResult::failed());
        };
        let page = parse_tweet_detail(&first, id, reply_limit);
        let Some(metrics) = page.metrics else {
            return Ok(FastPathResult::failed());
        };

        let mut comments = page.comments;
        let mut cursor = page.bottom_cursor;
        let mut pages = 0;
        while comments.len() < reply_limit && pages < self.config.max_comment_pages {
            let Some(next) = cursor.take() else { break };
            pages += 1;
            let Some(data) = self.fetch_page(id, Some(&next)).await? else {
                break;
            };
            let more = parse_tweet_detail(&data, id, reply_limit - comments.len());
            comments.extend(more.comments);
            cursor = more.bottom_cursor;
        }

        Ok(FastPathResult {
            success: true,
            metrics,
            comments,
        })
    }
}

#[async_trait]
impl FastPath for GraphqlClient {
    async fn fetch(&self, item: &Item, options: &EnrichmentOptions) -> FastPathResult {
        let limit = if options.comments { options.comment_limit } else { 0 };
        match self.fetch_detail(&item.id, limit).await {
            Ok(result) => result,
            Err(e) => {
                log::debug!("Fast path failed for {}: {}", item.id, e);
                FastPathResult::failed()
            }
        }
    }
}
