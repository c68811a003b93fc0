//! Mastodon strategy
//!
//! Media is hosted at a URL in our store, so each attachment is
//! downloaded and re-uploaded to the instance before the status is
//! posted. Options Mastodon has no equivalent for (topic tags, polls as
//! modelled here, ghost posts) are ignored rather than rejected.

use serde::Deserialize;
use tracing::debug;

use crate::error::{PlatformError, Result};
use crate::types::{MediaAttachment, PlatformId};

use super::{classify_send_error, classify_status, PublishReceipt, PublishRequest, Strategy};

#[derive(Debug)]
pub struct MastodonStrategy {
    client: reqwest::Client,
    instance_url: String,
}

#[derive(Deserialize)]
struct MediaResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    id: String,
    url: Option<String>,
}

impl MastodonStrategy {
    pub fn new(instance_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            instance_url: instance_url.trim_end_matches('/').to_string(),
        }
    }

    async fn upload_media(&self, access_token: &str, media: &MediaAttachment) -> Result<String> {
        let download = self
            .client
            .get(&media.url)
            .send()
            .await
            .map_err(classify_send_error)?;
        if !download.status().is_success() {
            return Err(PlatformError::InvalidMedia(format!(
                "attachment at position {} could not be fetched ({})",
                media.position,
                download.status()
            ))
            .into());
        }
        let bytes = download.bytes().await.map_err(classify_send_error)?;

        let file_name = media
            .url
            .rsplit('/')
            .next()
            .unwrap_or("attachment")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(file_name);
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(alt) = &media.alt_text {
            form = form.text("description", alt.clone());
        }

        let response = self
            .client
            .post(format!("{}/api/v2/media", self.instance_url))
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;
        // 202 means the instance is still processing; the id is usable.
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let uploaded: MediaResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Rejected(format!("malformed media response: {}", e)))?;
        debug!(media_id = %uploaded.id, position = media.position, "uploaded attachment");
        Ok(uploaded.id)
    }
}

#[async_trait::async_trait]
impl Strategy for MastodonStrategy {
    fn platform(&self) -> PlatformId {
        PlatformId::Mastodon
    }

    async fn publish(&self, request: &PublishRequest<'_>) -> Result<PublishReceipt> {
        let token = &request.credential.access_token;

        let mut media_ids = Vec::with_capacity(request.media.len());
        for media in request.media {
            media_ids.push(self.upload_media(token, media).await?);
        }

        let mut payload = serde_json::json!({ "status": request.body });
        if !media_ids.is_empty() {
            payload["media_ids"] = serde_json::json!(media_ids);
        }
        if let Some(reply_to) = &request.options.reply_to_id {
            payload["in_reply_to_id"] = serde_json::json!(reply_to);
        }

        let response = self
            .client
            .post(format!("{}/api/v1/statuses", self.instance_url))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_send_error)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let posted: StatusResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Rejected(format!("malformed status response: {}", e)))?;

        Ok(PublishReceipt {
            post_id: posted.id,
            url: posted.url,
        })
    }
}
