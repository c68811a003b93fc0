//! Threads strategy
//!
//! Two-step Graph flow: create a media container, then publish it.
//! Container creation carries the per-platform options (topic tag,
//! reply control, poll, location, ghost, link attachment) and the
//! reply anchor when dispatching a reply.

use serde::Deserialize;
use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::types::{MediaKind, PlatformId, ReplyControl};

use super::{classify_send_error, classify_status, PublishReceipt, PublishRequest, Strategy};

#[derive(Debug)]
pub struct ThreadsStrategy {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct PermalinkResponse {
    permalink: Option<String>,
}

impl ThreadsStrategy {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn reply_control_param(control: ReplyControl) -> &'static str {
        match control {
            ReplyControl::Everyone => "everyone",
            ReplyControl::AccountsYouFollow => "accounts_you_follow",
            ReplyControl::MentionedOnly => "mentioned_only",
        }
    }

    async fn create_container(&self, request: &PublishRequest<'_>) -> Result<String> {
        let user_id = &request.credential.platform_user_id;
        let mut params: Vec<(&str, String)> = vec![
            ("access_token", request.credential.access_token.clone()),
            ("text", request.body.to_string()),
        ];

        match request.media {
            [] => params.push(("media_type", "TEXT".to_string())),
            [single] => match single.kind {
                MediaKind::Image => {
                    params.push(("media_type", "IMAGE".to_string()));
                    params.push(("image_url", single.url.clone()));
                }
                MediaKind::Video => {
                    params.push(("media_type", "VIDEO".to_string()));
                    params.push(("video_url", single.url.clone()));
                }
            },
            _ => {
                return Err(PlatformError::InvalidMedia(
                    "threads accepts at most one attachment per post".to_string(),
                )
                .into())
            }
        }

        let options = request.options;
        if let Some(tag) = &options.topic_tag {
            params.push(("topic_tag", tag.clone()));
        }
        if let Some(control) = options.reply_control {
            params.push(("reply_control", Self::reply_control_param(control).to_string()));
        }
        if let Some(poll) = &options.poll {
            poll.validate()?;
            let labels = ["option_a", "option_b", "option_c", "option_d"];
            let mut attachment = serde_json::Map::new();
            for (label, text) in labels.iter().zip(poll.options.iter()) {
                attachment.insert(label.to_string(), serde_json::Value::String(text.clone()));
            }
            params.push((
                "poll_attachment",
                serde_json::Value::Object(attachment).to_string(),
            ));
        }
        if let Some(location) = &options.location_id {
            params.push(("location_id", location.clone()));
        }
        if options.ghost {
            params.push(("ghost_post", "true".to_string()));
        }
        if let Some(link) = &options.link_attachment {
            params.push(("link_attachment", link.clone()));
        }
        if let Some(reply_to) = &options.reply_to_id {
            params.push(("reply_to_id", reply_to.clone()));
        }

        let response = self
            .client
            .post(format!("{}/{}/threads", self.base_url, user_id))
            .form(&params)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let created: IdResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Rejected(format!("malformed container response: {}", e)))?;
        debug!(container_id = %created.id, "created threads container");
        Ok(created.id)
    }

    async fn publish_container(
        &self,
        request: &PublishRequest<'_>,
        container_id: &str,
    ) -> Result<String> {
        let user_id = &request.credential.platform_user_id;
        let params = [
            ("access_token", request.credential.access_token.as_str()),
            ("creation_id", container_id),
        ];

        let response = self
            .client
            .post(format!("{}/{}/threads_publish", self.base_url, user_id))
            .form(&params)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let published: IdResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Rejected(format!("malformed publish response: {}", e)))?;
        Ok(published.id)
    }

    /// Permalink lookup is best-effort; a missing URL never fails the
    /// publication.
    async fn fetch_permalink(&self, access_token: &str, post_id: &str) -> Option<String> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, post_id))
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
impl Strategy for ThreadsStrategy {
    fn platform(&self) -> PlatformId {
        PlatformId::Threads
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let container_id = self.create_container(request).await?;
        let post_id = self.publish_container(request, &container_id).await?;
        let url = self
            .fetch_permalink(&request.credential.access_token, &post_id)
            .await;

        Ok(PublishReceipt { post_id, url })
    }
}
