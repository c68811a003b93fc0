//! Instagram strategy
//!
//! Container-based Graph flow: one child container per attachment,
//! polled until processed, wrapped in a carousel container when the
//! item carries more than one attachment, then published. Instagram has
//! no text-only post, so an item without media is rejected up front.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::types::{MediaAttachment, MediaKind, PlatformId};

use super::{classify_send_error, classify_status, PublishReceipt, PublishRequest, Strategy};

const CONTAINER_POLL_ATTEMPTS: u32 = 20;
const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct InstagramStrategy {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status_code: Option<String>,
}

#[derive(Deserialize)]
struct PermalinkResponse {
    permalink: Option<String>,
}

impl InstagramStrategy {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_form(&self, path: &str, params: &[(&str, String)]) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .form(params)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let created: IdResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Rejected(format!("malformed graph response: {}", e)))?;
        Ok(created.id)
    }

    async fn create_child_container(
        &self,
        request: &PublishRequest<'_>,
        media: &MediaAttachment,
        carousel_item: bool,
    ) -> Result<String> {
        let mut params: Vec<(&str, String)> =
            vec![("access_token", request.credential.access_token.clone())];

        match media.kind {
            MediaKind::Image => params.push(("image_url", media.url.clone())),
            MediaKind::Video => {
                params.push(("media_type", "REELS".to_string()));
                params.push(("video_url", media.url.clone()));
            }
        }
        if carousel_item {
            params.push(("is_carousel_item", "true".to_string()));
        } else {
            // Single-media post: caption lives on the only container.
            params.push(("caption", request.body.to_string()));
            if let Some(location) = &request.options.location_id {
                params.push(("location_id", location.clone()));
            }
        }

        let path = format!("{}/media", request.credential.platform_user_id);
        self.post_form(&path, &params).await
    }

    /// Wait for Graph to finish processing a container. Videos in
    /// particular take a while; an ERROR status means the media itself
    /// was unusable.
    async fn await_container(&self, access_token: &str, container_id: &str) -> Result<()> {
        for _ in 0..CONTAINER_POLL_ATTEMPTS {
            let response = self
                .client
                .get(format!("{}/{}", self.base_url, container_id))
                .query(&[("access_token", access_token), ("fields", "status_code")])
                .send()
                .await
                .map_err(classify_send_error)?;

            let status = response.status();
            let body = response.text().await.map_err(classify_send_error)?;
            if !status.is_success() {
                return Err(classify_status(status, &body));
            }

            let parsed: StatusResponse = serde_json::from_str(&body)
                .map_err(|e| PlatformError::Rejected(format!("malformed status response: {}", e)))?;

            match parsed.status_code.as_deref() {
                Some("FINISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(PlatformError::InvalidMedia(format!(
                        "container {} failed processing",
                        container_id
                    ))
                    .into())
                }
                _ => {
                    debug!(container_id, status = ?parsed.status_code, "container still processing");
                    tokio::time::sleep(CONTAINER_POLL_INTERVAL).await;
                }
            }
        }

        // Still processing after the window; the next pass can retry.
        Err(PlatformError::Timeout(format!(
            "container {} not finished after {} polls",
            container_id, CONTAINER_POLL_ATTEMPTS
        ))
        .into())
    }

    async fn fetch_permalink(&self, access_token: &str, media_id: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, media_id))
            .query(&[("access_token", access_token), ("fields", "permalink")])
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }
        response
            .json::<PermalinkResponse>()
            .await
            .ok()
            .and_then(|p| p.permalink)
    }
}

#[async_trait::async_trait]
impl Strategy for InstagramStrategy {
    fn platform(&self) -> PlatformId {
        PlatformId::Instagram
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        if request.media.is_empty() {
            return Err(PlatformError::InvalidMedia(
                "instagram requires at least one media attachment".to_string(),
            )
            .into());
        }

        let token = &request.credential.access_token;
        let user_id = &request.credential.platform_user_id;
        let carousel = request.media.len() > 1;

        let mut children = Vec::with_capacity(request.media.len());
        for media in request.media {
            let child = self.create_child_container(request, media, carousel).await?;
            self.await_container(token, &child).await?;
            children.push(child);
        }

        let creation_id = if carousel {
            let params: Vec<(&str, String)> = vec![
                ("access_token", token.clone()),
                ("media_type", "CAROUSEL".to_string()),
                ("children", children.join(",")),
                ("caption", request.body.to_string()),
            ];
            let container = self.post_form(&format!("{}/media", user_id), &params).await?;
            self.await_container(token, &container).await?;
            container
        } else {
            children.remove(0)
        };

        let params: Vec<(&str, String)> = vec![
            ("access_token", token.clone()),
            ("creation_id", creation_id),
        ];
        let post_id = self
            .post_form(&format!("{}/media_publish", user_id), &params)
            .await?;
        let url = self.fetch_permalink(token, &post_id).await;

        Ok(PublishReceipt { post_id, url })
    }
}
