use crate::{
    campaign_renderer::{render_campaign, TrackingLinks},
    campaigns::CampaignManager,
    configuration::{DispatcherSettings, Settings},
    domain::{Campaign, CampaignStatus, ClaimedJob, ResolvedContent},
    email_client::{MailTransport, SendError},
    storage::{ContentResolver, JobOutcome, Stores},
};
use anyhow::Context;
use std::{collections::HashMap, sync::Arc, time::Duration};
use time::OffsetDateTime;
use tracing::Span;
use uuid::Uuid;

pub async fn run_worker_until_stopped(
    config: Settings,
    stores: Stores,
) -> Result<(), anyhow::Error> {
    let dispatcher = Dispatcher::from_settings(&config, stores)?;
    worker_loop(&dispatcher).await
}

async fn worker_loop(dispatcher: &Dispatcher) -> Result<(), anyhow::Error> {
    loop {
        match dispatcher.run_cycle(OffsetDateTime::now_utc()).await {
            Ok(ExecutionOutcome::BatchProcessed(_)) => {
                tokio::time::sleep(dispatcher.settings.inter_batch_delay()).await
            }
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::time::sleep(dispatcher.settings.poll_interval()).await
            }
            Err(_) => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    BatchProcessed(usize),
    EmptyQueue,
}

/// How a single claimed job ended in this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Retried { outage: bool },
    Failed { outage: bool },
    Bounced,
    Skipped,
    /// The campaign was cancelled or deleted after the claim.
    Abandoned,
    /// Another worker took over the job after our claim expired.
    ClaimLost,
}

/// Drains the delivery queue one batch per cycle: renders each claimed job
/// for its recipient, hands it to the mail transport and records the outcome.
#[derive(Clone)]
pub struct Dispatcher {
    stores: Stores,
    campaigns: CampaignManager,
    transport: Arc<dyn MailTransport>,
    links: TrackingLinks,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        stores: Stores,
        campaigns: CampaignManager,
        transport: Arc<dyn MailTransport>,
        links: TrackingLinks,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            stores,
            campaigns,
            transport,
            links,
            settings,
        }
    }

    pub fn from_settings(config: &Settings, stores: Stores) -> Result<Self, anyhow::Error> {
        config.dispatcher.validate().map_err(anyhow::Error::msg)?;
        let campaigns = CampaignManager::new(&stores, &config.campaigns);
        let transport = Arc::new(config.email_client.client()?);
        let links = config.application.tracking_links()?;

        Ok(Self::new(
            stores,
            campaigns,
            transport,
            links,
            config.dispatcher.clone(),
        ))
    }

    /// One dispatch cycle: start due campaigns, process one batch, then
    /// settle campaigns whose queue is drained.
    #[tracing::instrument(skip(self), err)]
    pub async fn run_cycle(&self, now: OffsetDateTime) -> Result<ExecutionOutcome, anyhow::Error> {
        self.campaigns.start_due(now).await?;

        let batch = self
            .stores
            .queue
            .claim_batch(
                i64::from(self.settings.batch_size),
                now,
                self.settings.visibility_timeout(),
            )
            .await?;

        let mut cache = BatchCache::default();
        let mut tallies: HashMap<Uuid, OutageTally> = HashMap::new();

        for job in &batch {
            let delivery = self.try_execute_task(job, &mut cache, now).await?;

            let tally = tallies.entry(job.key.campaign_id).or_default();
            tally.jobs += 1;
            if delivery == (Delivery::Failed { outage: true }) {
                tally.exhausted_outages += 1;
            }
        }

        for (campaign_id, tally) in tallies {
            if tally.jobs > 0 && tally.jobs == tally.exhausted_outages {
                let reason = format!(
                    "The mail transport was unreachable for all {} deliveries of the last batch",
                    tally.jobs
                );
                if self.campaigns.escalate(campaign_id, reason, now).await? {
                    tracing::error!(%campaign_id, "Campaign stopped: mail transport outage");
                }
            }
        }

        self.campaigns.complete_drained(now).await?;

        Ok(if batch.is_empty() {
            ExecutionOutcome::EmptyQueue
        } else {
            ExecutionOutcome::BatchProcessed(batch.len())
        })
    }

    #[tracing::instrument(
        skip_all,
        fields(
            campaign_id = %job.key.campaign_id,
            subscriber_id = %job.key.subscriber_id,
            subscriber_email = tracing::field::Empty
        )
    )]
    async fn try_execute_task(
        &self,
        job: &ClaimedJob,
        cache: &mut BatchCache,
        now: OffsetDateTime,
    ) -> Result<Delivery, anyhow::Error> {
        let Some(campaign) = cache.campaign(&self.campaigns, job.key.campaign_id).await? else {
            return Ok(Delivery::Abandoned);
        };
        if campaign.status != CampaignStatus::Sending {
            return Ok(Delivery::Abandoned);
        }

        let subscriber = self
            .stores
            .subscribers
            .find_by_id(job.key.subscriber_id)
            .await?;

        let subscriber = match subscriber {
            Some(subscriber)
                if subscriber.is_active || !self.settings.recheck_eligibility_before_send =>
            {
                subscriber
            }
            _ => {
                let outcome = JobOutcome::Skipped {
                    reason: "The subscriber is no longer active".into(),
                };
                return self.finish(job, outcome, Delivery::Skipped, now).await;
            }
        };
        Span::current().record("subscriber_email", tracing::field::display(&subscriber.email));

        let content = cache
            .content(self.stores.content.as_ref(), &campaign)
            .await?;

        let email = match render_campaign(&campaign, &subscriber, content, &self.links) {
            Ok(rendered) => rendered.into_outgoing(subscriber.email.clone(), Some(job.key)),
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to render the campaign for a subscriber"
                );
                let outcome = JobOutcome::Failed {
                    error: format!("{e:#}"),
                };
                return self
                    .finish(job, outcome, Delivery::Failed { outage: false }, now)
                    .await;
            }
        };

        match self.transport.send(&email).await {
            Ok(receipt) => {
                let outcome = JobOutcome::Sent {
                    message_id: receipt.message_id,
                };
                self.finish(job, outcome, Delivery::Sent, now).await
            }
            Err(SendError::Rejected(reason)) => {
                tracing::warn!(%reason, "The mail transport rejected the recipient");
                let outcome = JobOutcome::Bounced { error: reason };
                self.finish(job, outcome, Delivery::Bounced, now).await
            }
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to deliver a campaign to a subscriber"
                );
                self.retry_or_fail(job, e, now).await
            }
        }
    }

    async fn retry_or_fail(
        &self,
        job: &ClaimedJob,
        e: SendError,
        now: OffsetDateTime,
    ) -> Result<Delivery, anyhow::Error> {
        let outage = e.is_outage();
        let error = format!("{:#}", anyhow::Error::from(e));
        let retries = job.retry_count + 1;

        if retries >= i32::from(self.settings.max_retries) {
            let outcome = JobOutcome::Failed { error };
            self.finish(job, outcome, Delivery::Failed { outage }, now)
                .await
        } else {
            let outcome = JobOutcome::Retry {
                next_attempt_at: now + backoff(self.settings.backoff_base(), retries),
                error,
            };
            self.finish(job, outcome, Delivery::Retried { outage }, now)
                .await
        }
    }

    async fn finish(
        &self,
        job: &ClaimedJob,
        outcome: JobOutcome,
        delivery: Delivery,
        now: OffsetDateTime,
    ) -> Result<Delivery, anyhow::Error> {
        let applied = self
            .stores
            .queue
            .complete(job, outcome, now)
            .await
            .context("Failed to record the delivery outcome")?;

        if applied {
            Ok(delivery)
        } else {
            tracing::warn!("The claim expired before the outcome could be recorded");
            Ok(Delivery::ClaimLost)
        }
    }
}

/// `base * 2^retries`, saturating.
fn backoff(base: Duration, retries: i32) -> Duration {
    let exponent = u32::try_from(retries).unwrap_or(0);
    base.saturating_mul(2u32.saturating_pow(exponent))
}

#[derive(Default)]
struct OutageTally {
    jobs: usize,
    exhausted_outages: usize,
}

/// Campaigns and their content are read once per batch. Content is resolved
/// at send time so changes made after enqueueing show up in the email.
#[derive(Default)]
struct BatchCache {
    campaigns: HashMap<Uuid, Option<Campaign>>,
    content: HashMap<Uuid, ResolvedContent>,
}

impl BatchCache {
    async fn campaign(
        &mut self,
        campaigns: &CampaignManager,
        id: Uuid,
    ) -> Result<Option<Campaign>, anyhow::Error> {
        if let Some(cached) = self.campaigns.get(&id) {
            return Ok(cached.clone());
        }

        let campaign = match campaigns.get(id).await {
            Ok(campaign) => Some(campaign),
            Err(crate::campaigns::CampaignError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        self.campaigns.insert(id, campaign.clone());

        Ok(campaign)
    }

    async fn content(
        &mut self,
        resolver: &dyn ContentResolver,
        campaign: &Campaign,
    ) -> Result<&ResolvedContent, anyhow::Error> {
        if !self.content.contains_key(&campaign.id) {
            let selection = &campaign.content;
            let content = ResolvedContent {
                events: resolver.resolve_events(&selection.event_ids).await?,
                places: resolver.resolve_places(&selection.place_ids).await?,
                posts: resolver.resolve_posts(&selection.post_ids).await?,
            };
            self.content.insert(campaign.id, content);
        }

        self.content
            .get(&campaign.id)
            .context("Resolved content went missing from the batch cache")
    }
}
