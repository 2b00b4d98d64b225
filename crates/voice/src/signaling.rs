//! HTTP offer/answer exchange against the realtime calls endpoint.

use crate::config::VoiceConfig;
use crate::error::{Result, VoiceError};
use crate::transport::SignalingClient;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Posts the local SDP offer and returns the remote SDP answer.
#[derive(Debug)]
pub struct HttpSignaling {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpSignaling {
    pub fn new(
        endpoint: Url,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key,
        })
    }

    pub fn from_config(config: &VoiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret().to_string()));
        Self::new(
            config.signaling_url.clone(),
            config.model.clone(),
            api_key,
            config.signaling_timeout,
        )
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("model", &self.model);
        url
    }
}

#[async_trait]
impl SignalingClient for HttpSignaling {
    #[instrument(name = "signaling", skip_all, fields(model = %self.model))]
    async fn exchange_offer(&self, offer_sdp: &str) -> Result<String> {
        let mut request = self
            .client
            .post(self.request_url())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        debug!(offer_bytes = offer_sdp.len(), "Posting SDP offer.");
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Signaling endpoint rejected the offer.");
            return Err(VoiceError::SignalingRejected {
                status: status.as_u16(),
                body,
            });
        }

        let answer = response.text().await?;
        if answer.trim().is_empty() {
            return Err(VoiceError::Signaling(
                "endpoint returned an empty answer".to_string(),
            ));
        }
        debug!(answer_bytes = answer.len(), "Received SDP answer.");
        Ok(answer)
    }
}
