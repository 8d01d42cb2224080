use std::time::Duration;

use async_trait::async_trait;
use paperfeeder_shared::{EmailSettings, PaperFeederError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{Delivery, DeliveryReceipt, RenderedEmail};

/// User-Agent string for email requests.
const USER_AGENT: &str = concat!("PaperFeeder/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct SendBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Sends the digest through the Resend email API.
#[derive(Debug, Clone)]
pub struct ResendDelivery {
    client: Client,
    endpoint: String,
    api_key: String,
    from: String,
    to: String,
}

impl ResendDelivery {
    pub fn new(settings: &EmailSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| PaperFeederError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            from: settings.from.clone(),
            to: settings.to.clone(),
        })
    }
}

#[async_trait]
impl Delivery for ResendDelivery {
    fn name(&self) -> &str {
        "resend"
    }

    #[instrument(skip_all, fields(to = %self.to))]
    async fn deliver(&self, email: &RenderedEmail) -> Result<DeliveryReceipt> {
        let body = SendBody {
            from: &self.from,
            to: [self.to.as_str()],
            subject: &email.subject,
            html: &email.html,
            text: &email.text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaperFeederError::Delivery(format!("email request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(300)
                .collect();
            return Err(PaperFeederError::Delivery(format!(
                "email API returned HTTP {status}: {detail}"
            )));
        }

        let id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|r| r.id);
        info!(id = ?id, "email accepted");

        Ok(DeliveryReceipt::Emailed {
            to: self.to.clone(),
            id,
        })
    }
}
