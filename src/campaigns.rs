//! Campaign lifecycle: the admin operations and the status changes made on
//! behalf of the dispatcher. Every status change is a conditional write on
//! the campaign row, so concurrent admins and dispatchers cannot both win.

use crate::{
    configuration::CampaignSettings,
    domain::{
        Attachment, Campaign, CampaignCounters, CampaignDraft, CampaignStats, CampaignStatus,
        NewAttachment, QueueHealth,
    },
    storage::{CampaignStore, DeliveryQueue, StatusChange, Stores, SubscriberStore},
};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("{0}")]
    Validation(String),
    #[error("The campaign has no eligible recipients")]
    EmptyAudience,
    #[error("Campaign not found")]
    NotFound,
    #[error("Cannot {action} a campaign that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: CampaignStatus,
    },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Result of starting a campaign's delivery.
#[derive(Clone, Debug)]
pub struct Dispatch {
    pub campaign: Campaign,
    pub enqueued: u64,
}

#[derive(Clone)]
pub struct CampaignManager {
    campaigns: Arc<dyn CampaignStore>,
    subscribers: Arc<dyn SubscriberStore>,
    queue: Arc<dyn DeliveryQueue>,
    max_attachments_bytes: i64,
}

impl CampaignManager {
    pub fn new(stores: &Stores, settings: &CampaignSettings) -> Self {
        Self {
            campaigns: stores.campaigns.clone(),
            subscribers: stores.subscribers.clone(),
            queue: stores.queue.clone(),
            max_attachments_bytes: settings.max_attachments_bytes,
        }
    }

    #[tracing::instrument(name = "Creating campaign", skip(self, draft), fields(title = %draft.title.as_ref()))]
    pub async fn create(
        &self,
        draft: CampaignDraft,
        now: OffsetDateTime,
    ) -> Result<Campaign, CampaignError> {
        let campaign = Campaign::from_draft(draft, now);
        self.campaigns.insert(&campaign).await?;
        Ok(campaign)
    }

    #[tracing::instrument(name = "Updating campaign", skip(self, draft))]
    pub async fn update(
        &self,
        id: Uuid,
        draft: CampaignDraft,
        now: OffsetDateTime,
    ) -> Result<Campaign, CampaignError> {
        if !self.campaigns.update_draft(id, &draft, now).await? {
            return Err(self.refusal(id, "edit").await);
        }
        self.get(id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get(id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list(
        &self,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<Campaign>, CampaignError> {
        let campaigns = match status {
            Some(status) => self.campaigns.list_by_status(status).await?,
            None => self.campaigns.list().await?,
        };
        Ok(campaigns)
    }

    #[tracing::instrument(name = "Scheduling campaign", skip(self))]
    pub async fn schedule(
        &self,
        id: Uuid,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<Campaign, CampaignError> {
        if scheduled_at <= now {
            return Err(CampaignError::Validation(
                "The scheduled time must be in the future".into(),
            ));
        }

        if !self.campaigns.schedule(id, scheduled_at, now).await? {
            return Err(self.refusal(id, "schedule").await);
        }
        self.get(id).await
    }

    /// Snapshots the audience and moves the campaign to SENDING. Without
    /// eligible recipients a scheduled campaign falls back to DRAFT.
    #[tracing::instrument(name = "Sending campaign now", skip(self))]
    pub async fn send_now(&self, id: Uuid, now: OffsetDateTime) -> Result<Dispatch, CampaignError> {
        let campaign = self.get(id).await?;

        match self.start_dispatch(campaign, now).await {
            Err(CampaignError::EmptyAudience) => {
                self.return_to_draft(id, now).await?;
                Err(CampaignError::EmptyAudience)
            }
            result => result,
        }
    }

    /// Starts every scheduled campaign whose time has come. A due campaign
    /// without recipients goes back to DRAFT with the reason recorded.
    #[tracing::instrument(skip(self))]
    pub async fn start_due(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, anyhow::Error> {
        let mut started = Vec::new();

        for campaign in self.campaigns.due_scheduled(now).await? {
            let id = campaign.id;
            match self.start_dispatch(campaign, now).await {
                Ok(_) => started.push(id),
                Err(CampaignError::EmptyAudience) => {
                    tracing::warn!(campaign_id = %id, "Due campaign has no eligible recipients");
                    self.return_to_draft(id, now).await?;
                }
                // Cancelled or edited in the meantime.
                Err(CampaignError::InvalidTransition { .. } | CampaignError::NotFound) => {}
                Err(CampaignError::UnexpectedError(e)) => return Err(e),
                Err(e) => return Err(e.into()),
            }
        }

        Ok(started)
    }

    async fn start_dispatch(
        &self,
        campaign: Campaign,
        now: OffsetDateTime,
    ) -> Result<Dispatch, CampaignError> {
        if !CampaignStatus::DISPATCHABLE.contains(&campaign.status) {
            return Err(CampaignError::InvalidTransition {
                action: "send",
                status: campaign.status,
            });
        }

        // Jobs left over from an interrupted start keep their original
        // snapshot.
        let mut enqueued = 0;
        if self.queue.count_jobs(campaign.id).await? == 0 {
            let recipients = self
                .subscribers
                .find_eligible(campaign.campaign_type.audience())
                .await?;

            if recipients.is_empty() {
                return Err(CampaignError::EmptyAudience);
            }

            let ids: Vec<_> = recipients.iter().map(|s| s.id).collect();
            enqueued = self.queue.enqueue(campaign.id, &ids, now).await?;
        }

        let started = self
            .campaigns
            .transition(
                campaign.id,
                StatusChange {
                    from: CampaignStatus::DISPATCHABLE,
                    to: CampaignStatus::Sending,
                    at: now,
                    note: None,
                },
            )
            .await?;

        if !started {
            return Err(self.refusal(campaign.id, "send").await);
        }

        tracing::info!(campaign_id = %campaign.id, enqueued, "Campaign delivery started");

        Ok(Dispatch {
            campaign: self.get(campaign.id).await?,
            enqueued,
        })
    }

    async fn return_to_draft(&self, id: Uuid, now: OffsetDateTime) -> Result<bool, anyhow::Error> {
        self.campaigns
            .transition(
                id,
                StatusChange {
                    from: &[CampaignStatus::Scheduled],
                    to: CampaignStatus::Draft,
                    at: now,
                    note: Some(CampaignError::EmptyAudience.to_string()),
                },
            )
            .await
    }

    /// Pending jobs stay in the queue but are no longer claimed.
    #[tracing::instrument(name = "Cancelling campaign", skip(self))]
    pub async fn cancel(&self, id: Uuid, now: OffsetDateTime) -> Result<Campaign, CampaignError> {
        let cancelled = self
            .campaigns
            .transition(
                id,
                StatusChange {
                    from: CampaignStatus::CANCELLABLE,
                    to: CampaignStatus::Cancelled,
                    at: now,
                    note: None,
                },
            )
            .await?;

        if !cancelled {
            return Err(self.refusal(id, "cancel").await);
        }
        self.get(id).await
    }

    #[tracing::instrument(name = "Deleting campaign", skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), CampaignError> {
        if !self.campaigns.delete(id, &[CampaignStatus::Sending]).await? {
            return Err(self.refusal(id, "delete").await);
        }
        Ok(())
    }

    pub async fn stats(&self, id: Uuid) -> Result<CampaignStats, CampaignError> {
        let campaign = self.get(id).await?;
        let jobs = self.queue.job_counts(id).await?;

        Ok(CampaignStats::new(
            campaign.id,
            campaign.status,
            campaign.last_error,
            campaign.counters,
            jobs,
        ))
    }

    /// Overwrites the campaign counters with values recomputed from its jobs.
    #[tracing::instrument(name = "Reconciling campaign stats", skip(self))]
    pub async fn reconcile(&self, id: Uuid) -> Result<CampaignStats, CampaignError> {
        let jobs = self.queue.job_counts(id).await?;
        let counters = CampaignCounters {
            total_sent: jobs.total_sent(),
            total_delivered: jobs.delivered,
            total_opened: jobs.ever_opened,
            total_clicked: jobs.ever_clicked,
            total_unsubscribed: jobs.unsubscribed,
        };

        if !self.campaigns.replace_counters(id, counters).await? {
            return Err(CampaignError::NotFound);
        }
        self.stats(id).await
    }

    #[tracing::instrument(name = "Adding attachment", skip(self, attachment))]
    pub async fn add_attachment(
        &self,
        campaign_id: Uuid,
        attachment: NewAttachment,
        now: OffsetDateTime,
    ) -> Result<Attachment, CampaignError> {
        let campaign = self.get(campaign_id).await?;
        if !campaign.status.is_editable() {
            return Err(CampaignError::InvalidTransition {
                action: "attach files to",
                status: campaign.status,
            });
        }

        self.campaigns
            .add_attachment(campaign_id, attachment, self.max_attachments_bytes, now)
            .await?
            .ok_or_else(|| {
                CampaignError::Validation(format!(
                    "Attachments of a campaign may not exceed {} bytes in total",
                    self.max_attachments_bytes
                ))
            })
    }

    pub async fn attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, CampaignError> {
        self.get(campaign_id).await?;
        Ok(self.campaigns.list_attachments(campaign_id).await?)
    }

    #[tracing::instrument(name = "Removing attachment", skip(self))]
    pub async fn remove_attachment(
        &self,
        campaign_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<(), CampaignError> {
        if !self
            .campaigns
            .remove_attachment(campaign_id, attachment_id)
            .await?
        {
            return Err(CampaignError::NotFound);
        }
        Ok(())
    }

    pub async fn queue_health(&self, now: OffsetDateTime) -> Result<QueueHealth, CampaignError> {
        Ok(self.queue.health(now).await?)
    }

    /// Moves every SENDING campaign without pending jobs to SENT.
    #[tracing::instrument(skip(self))]
    pub async fn complete_drained(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, anyhow::Error> {
        let mut completed = Vec::new();

        for campaign in self
            .campaigns
            .list_by_status(CampaignStatus::Sending)
            .await?
        {
            if self.queue.pending_count(campaign.id).await? > 0 {
                continue;
            }

            let moved = self
                .campaigns
                .transition(
                    campaign.id,
                    StatusChange {
                        from: &[CampaignStatus::Sending],
                        to: CampaignStatus::Sent,
                        at: now,
                        note: None,
                    },
                )
                .await?;

            if moved {
                tracing::info!(campaign_id = %campaign.id, "Campaign sent");
                completed.push(campaign.id);
            }
        }

        Ok(completed)
    }

    /// Stops a campaign whose deliveries keep failing because the mail
    /// transport itself is unusable.
    #[tracing::instrument(skip(self))]
    pub async fn escalate(
        &self,
        id: Uuid,
        reason: String,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        self.campaigns
            .transition(
                id,
                StatusChange {
                    from: &[CampaignStatus::Sending],
                    to: CampaignStatus::Error,
                    at: now,
                    note: Some(reason),
                },
            )
            .await
    }

    /// Explains why a conditional write on the campaign did not apply.
    async fn refusal(&self, id: Uuid, action: &'static str) -> CampaignError {
        match self.campaigns.get(id).await {
            Ok(Some(campaign)) => CampaignError::InvalidTransition {
                action,
                status: campaign.status,
            },
            Ok(None) => CampaignError::NotFound,
            Err(e) => CampaignError::UnexpectedError(e),
        }
    }
}
