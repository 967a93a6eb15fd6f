//! Repository interfaces for the delivery pipeline.
//!
//! Every mutation that several actors may race on (dispatcher workers,
//! tracking pings, admin actions) is a single conditional write keyed by the
//! campaign id or by the (campaign, subscriber) pair. Implementations must
//! apply it atomically; callers never read-then-write.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::domain::{
    Attachment, AudienceFilter, Campaign, CampaignCounters, CampaignDraft, CampaignStatus,
    ClaimedJob, EventSummary, JobCounts, JobKey, NewAttachment, NewSubscriber, PlaceSummary,
    PostSummary, QueueHealth, Subscriber, SubscriberEmail, TrackingEvent,
    TrackingOutcome, UnsubscribeToken, VerificationToken,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn insert(&self, subscriber: NewSubscriber) -> Result<Subscriber, anyhow::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscriber>, anyhow::Error>;

    async fn find_by_email(
        &self,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, anyhow::Error>;

    /// Active, verified subscribers matching the filter.
    async fn find_eligible(&self, filter: AudienceFilter)
        -> Result<Vec<Subscriber>, anyhow::Error>;

    async fn find_by_unsubscribe_token(
        &self,
        token: &UnsubscribeToken,
    ) -> Result<Option<Subscriber>, anyhow::Error>;

    async fn find_by_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<Option<Subscriber>, anyhow::Error>;

    /// Returns `false` when the subscriber was already verified.
    async fn mark_verified(&self, id: Uuid) -> Result<bool, anyhow::Error>;

    /// Soft-deletes the subscriber. Returns `false` when it was already
    /// inactive.
    async fn deactivate(&self, id: Uuid) -> Result<bool, anyhow::Error>;

    /// Brings an inactive subscriber back as unverified, with a fresh
    /// verification token.
    async fn reactivate(
        &self,
        id: Uuid,
        verification_token: &VerificationToken,
    ) -> Result<bool, anyhow::Error>;
}

/// Conditional campaign status change: applied only while the campaign is in
/// one of `from`.
#[derive(Clone, Debug)]
pub struct StatusChange {
    pub from: &'static [CampaignStatus],
    pub to: CampaignStatus,
    pub at: OffsetDateTime,
    pub note: Option<String>,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert(&self, campaign: &Campaign) -> Result<(), anyhow::Error>;

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, anyhow::Error>;

    async fn list(&self) -> Result<Vec<Campaign>, anyhow::Error>;

    async fn list_by_status(&self, status: CampaignStatus)
        -> Result<Vec<Campaign>, anyhow::Error>;

    /// Scheduled campaigns whose `scheduled_at` is not after `now`, earliest
    /// first.
    async fn due_scheduled(&self, now: OffsetDateTime) -> Result<Vec<Campaign>, anyhow::Error>;

    /// Replaces the editable fields while the campaign is still editable.
    async fn update_draft(
        &self,
        id: Uuid,
        draft: &CampaignDraft,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error>;

    /// Sets `scheduled_at` and moves DRAFT/SCHEDULED to SCHEDULED.
    async fn schedule(
        &self,
        id: Uuid,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error>;

    async fn transition(&self, id: Uuid, change: StatusChange) -> Result<bool, anyhow::Error>;

    /// Overwrites the aggregate counters with values recomputed from the
    /// delivery jobs.
    async fn replace_counters(
        &self,
        id: Uuid,
        counters: CampaignCounters,
    ) -> Result<bool, anyhow::Error>;

    /// Deletes the campaign with its jobs and attachments unless it is in one
    /// of `blocked`.
    async fn delete(
        &self,
        id: Uuid,
        blocked: &'static [CampaignStatus],
    ) -> Result<bool, anyhow::Error>;

    /// Adds attachment metadata unless the campaign's total attachment size
    /// would exceed `cap_bytes`. Returns `None` when the cap is hit.
    async fn add_attachment(
        &self,
        campaign_id: Uuid,
        attachment: NewAttachment,
        cap_bytes: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Attachment>, anyhow::Error>;

    async fn list_attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, anyhow::Error>;

    async fn remove_attachment(
        &self,
        campaign_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<bool, anyhow::Error>;
}

/// How a claimed job left the dispatcher.
#[derive(Clone, Debug)]
pub enum JobOutcome {
    Sent { message_id: Option<String> },
    Retry {
        next_attempt_at: OffsetDateTime,
        error: String,
    },
    Failed { error: String },
    Bounced { error: String },
    Skipped { reason: String },
}

#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    /// Creates one PENDING job per subscriber. Pairs that already have a job
    /// are left untouched. Returns the number of jobs created.
    async fn enqueue(
        &self,
        campaign_id: Uuid,
        subscriber_ids: &[Uuid],
        now: OffsetDateTime,
    ) -> Result<u64, anyhow::Error>;

    async fn count_jobs(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error>;

    /// Atomically claims up to `batch_size` claimable jobs of SENDING
    /// campaigns, preferring campaigns scheduled earlier. A claim expires
    /// after `visibility_timeout`.
    async fn claim_batch(
        &self,
        batch_size: i64,
        now: OffsetDateTime,
        visibility_timeout: Duration,
    ) -> Result<Vec<ClaimedJob>, anyhow::Error>;

    /// Applies the outcome if the claim is still held. `Sent` also bumps the
    /// campaign's `total_sent`. Returns `false` when the claim was lost.
    async fn complete(
        &self,
        job: &ClaimedJob,
        outcome: JobOutcome,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error>;

    /// Sets the event timestamp on a sent job if it is still empty and bumps
    /// the matching campaign counter by one.
    async fn record(
        &self,
        key: JobKey,
        event: TrackingEvent,
        now: OffsetDateTime,
    ) -> Result<TrackingOutcome, anyhow::Error>;

    async fn pending_count(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error>;

    async fn job_counts(&self, campaign_id: Uuid) -> Result<JobCounts, anyhow::Error>;

    async fn health(&self, now: OffsetDateTime) -> Result<QueueHealth, anyhow::Error>;
}

/// Read access to the content items embedded in campaigns. Missing ids are
/// omitted from the result; order follows the requested ids.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn resolve_events(&self, ids: &[Uuid]) -> Result<Vec<EventSummary>, anyhow::Error>;

    async fn resolve_places(&self, ids: &[Uuid]) -> Result<Vec<PlaceSummary>, anyhow::Error>;

    async fn resolve_posts(&self, ids: &[Uuid]) -> Result<Vec<PostSummary>, anyhow::Error>;
}

/// Store handles shared by the API and the dispatcher.
#[derive(Clone)]
pub struct Stores {
    pub subscribers: Arc<dyn SubscriberStore>,
    pub campaigns: Arc<dyn CampaignStore>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub content: Arc<dyn ContentResolver>,
}

impl Stores {
    pub fn postgres(store: PgStore) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self::from_shared(store)
    }

    fn from_shared<T>(store: Arc<T>) -> Self
    where
        T: SubscriberStore + CampaignStore + DeliveryQueue + ContentResolver + 'static,
    {
        Self {
            subscribers: store.clone(),
            campaigns: store.clone(),
            queue: store.clone(),
            content: store,
        }
    }
}

/// Orders resolved rows like the requested ids and drops unknown ones.
pub(crate) fn in_request_order<T>(ids: &[Uuid], mut rows: Vec<T>, id_of: impl Fn(&T) -> Uuid) -> Vec<T> {
    let mut ordered = Vec::with_capacity(rows.len());
    for id in ids {
        if let Some(position) = rows.iter().position(|row| id_of(row) == *id) {
            ordered.push(rows.swap_remove(position));
        }
    }
    ordered
}
