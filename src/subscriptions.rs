use crate::{
    campaign_renderer::{render_confirmation, TrackingLinks},
    domain::{
        JobKey, NewSubscriber, Subscriber, TrackingEvent, UnsubscribeToken, VerificationToken,
    },
    email_client::MailTransport,
    storage::{DeliveryQueue, Stores, SubscriberStore},
};
use anyhow::Context;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Token is not authorized")]
    UnknownToken,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Subscriber-facing flows: signup, verification and unsubscribe. Every
/// operation can be repeated safely.
#[derive(Clone)]
pub struct SubscriptionManager {
    subscribers: Arc<dyn SubscriberStore>,
    queue: Arc<dyn DeliveryQueue>,
    transport: Arc<dyn MailTransport>,
    links: TrackingLinks,
}

impl SubscriptionManager {
    pub fn new(stores: &Stores, transport: Arc<dyn MailTransport>, links: TrackingLinks) -> Self {
        Self {
            subscribers: stores.subscribers.clone(),
            queue: stores.queue.clone(),
            transport,
            links,
        }
    }

    #[tracing::instrument(
        name = "Adding a new subscriber",
        skip(self, new_subscriber),
        fields(
            subscriber_email = %new_subscriber.email,
            subscriber_name = %new_subscriber.name
        )
    )]
    pub async fn subscribe(&self, new_subscriber: NewSubscriber) -> Result<(), SubscribeError> {
        let existing = self
            .subscribers
            .find_by_email(&new_subscriber.email)
            .await?;

        let subscriber = match existing {
            None => self.subscribers.insert(new_subscriber).await?,
            Some(subscriber) if !subscriber.is_active => {
                let token = VerificationToken::generate();
                self.subscribers
                    .reactivate(subscriber.id, &token)
                    .await?;
                Subscriber {
                    is_active: true,
                    is_verified: false,
                    verification_token: token,
                    ..subscriber
                }
            }
            Some(subscriber) if !subscriber.is_verified => subscriber,
            Some(_) => {
                tracing::info!("The subscriber is already verified");
                return Ok(());
            }
        };

        self.send_confirmation_email(&subscriber).await?;

        Ok(())
    }

    #[tracing::instrument(name = "Send a confirmation email to a new subscriber", skip_all)]
    async fn send_confirmation_email(&self, subscriber: &Subscriber) -> Result<(), anyhow::Error> {
        let link = self.links.confirmation(&subscriber.verification_token);
        let email = render_confirmation(&subscriber.name, &link)?
            .into_outgoing(subscriber.email.clone(), None);

        self.transport
            .send(&email)
            .await
            .context("Failed to send a confirmation email")?;

        Ok(())
    }

    #[tracing::instrument(name = "Confirm a pending subscriber", skip_all)]
    pub async fn confirm(&self, token: &VerificationToken) -> Result<(), SubscribeError> {
        let subscriber = self
            .subscribers
            .find_by_verification_token(token)
            .await?
            .ok_or(SubscribeError::UnknownToken)?;

        if !self.subscribers.mark_verified(subscriber.id).await? {
            tracing::info!(subscriber_id = %subscriber.id, "The subscriber was already verified");
        }

        Ok(())
    }

    /// Deactivates the subscriber. When the link came from a campaign email,
    /// the unsubscribe is also attributed to that campaign, once.
    #[tracing::instrument(name = "Unsubscribe a subscriber", skip(self, token))]
    pub async fn unsubscribe(
        &self,
        token: &UnsubscribeToken,
        campaign_id: Option<Uuid>,
        now: OffsetDateTime,
    ) -> Result<(), SubscribeError> {
        let subscriber = self
            .subscribers
            .find_by_unsubscribe_token(token)
            .await?
            .ok_or(SubscribeError::UnknownToken)?;

        self.subscribers.deactivate(subscriber.id).await?;

        if let Some(campaign_id) = campaign_id {
            let key = JobKey {
                campaign_id,
                subscriber_id: subscriber.id,
            };
            self.queue
                .record(key, TrackingEvent::Unsubscribed, now)
                .await?;
        }

        Ok(())
    }
}
