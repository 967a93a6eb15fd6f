//! Open, click and delivery events. Each write is idempotent per
//! (campaign, subscriber) pair, and unknown pairs are silently ignored so
//! callers cannot tell which pairs exist. Click links are signed, so the
//! redirect only follows targets that were put into an email.

use crate::{
    domain::{JobKey, TrackingEvent, TrackingOutcome},
    storage::{DeliveryQueue, Stores},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use std::{fmt, sync::Arc};
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Invalid redirect target: {0}")]
    InvalidTarget(String),
    #[error("The link signature does not match")]
    InvalidSignature,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Signs the target of a click link together with the pair it was
/// rendered for.
#[derive(Clone)]
pub struct LinkSigner {
    mac: HmacSha256,
}

impl LinkSigner {
    pub fn new(secret: &Secret<String>) -> Result<Self, anyhow::Error> {
        let mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid hmac secret: {e}"))?;

        Ok(Self { mac })
    }

    pub fn sign(&self, key: JobKey, target: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(key, target).finalize().into_bytes())
    }

    pub fn verify(&self, key: JobKey, target: &str, signature: &str) -> bool {
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        self.mac(key, target).verify_slice(&signature).is_ok()
    }

    fn mac(&self, key: JobKey, target: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(key.campaign_id.as_bytes());
        mac.update(key.subscriber_id.as_bytes());
        mac.update(target.as_bytes());
        mac
    }
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSigner").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Tracker {
    queue: Arc<dyn DeliveryQueue>,
    signer: LinkSigner,
}

impl Tracker {
    pub fn new(stores: &Stores, signer: LinkSigner) -> Self {
        Self {
            queue: stores.queue.clone(),
            signer,
        }
    }

    #[tracing::instrument(name = "Recording open", skip(self))]
    pub async fn record_open(
        &self,
        key: JobKey,
        now: OffsetDateTime,
    ) -> Result<TrackingOutcome, anyhow::Error> {
        self.queue.record(key, TrackingEvent::Opened, now).await
    }

    /// Records the click and returns where to send the caller. The redirect
    /// target is returned even when recording fails.
    #[tracing::instrument(name = "Recording click", skip(self, signature))]
    pub async fn record_click(
        &self,
        key: JobKey,
        target: &str,
        signature: &str,
        now: OffsetDateTime,
    ) -> Result<Url, TrackingError> {
        if !self.signer.verify(key, target, signature) {
            return Err(TrackingError::InvalidSignature);
        }
        let target = parse_target(target)?;

        if let Err(e) = self.queue.record(key, TrackingEvent::Clicked, now).await {
            tracing::error!(
                error.cause_chain = ?e,
                error.message = %e,
                "Failed to record a click. Redirecting anyway."
            );
        }

        Ok(target)
    }

    #[tracing::instrument(name = "Recording delivery", skip(self))]
    pub async fn record_delivery(
        &self,
        key: JobKey,
        now: OffsetDateTime,
    ) -> Result<TrackingOutcome, anyhow::Error> {
        self.queue.record(key, TrackingEvent::Delivered, now).await
    }
}

fn parse_target(target: &str) -> Result<Url, TrackingError> {
    let url = Url::parse(target).map_err(|e| TrackingError::InvalidTarget(e.to_string()))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(TrackingError::InvalidTarget(format!(
            "`{other}` links are not redirected"
        ))),
    }
}
