use super::{
    in_request_order, CampaignStore, ContentResolver, DeliveryQueue, JobOutcome, StatusChange,
    SubscriberStore,
};
use crate::domain::{
    Attachment, AudienceFilter, Campaign, CampaignCounters, CampaignDraft, CampaignStatus,
    ClaimedJob, DeliveryJob, EventSummary, JobCounts, JobKey, JobStatus, NewAttachment,
    NewSubscriber, PlaceSummary, PostSummary, QueueHealth, Subscriber, SubscriberEmail,
    TrackingEvent, TrackingOutcome, UnsubscribeToken, VerificationToken,
};
use anyhow::anyhow;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use time::OffsetDateTime;
use uuid::Uuid;

/// Process-local implementation of every store trait. One lock guards the
/// whole state, which makes each operation atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    subscribers: HashMap<Uuid, Subscriber>,
    campaigns: HashMap<Uuid, Campaign>,
    jobs: HashMap<JobKey, DeliveryJob>,
    attachments: Vec<Attachment>,
    events: HashMap<Uuid, EventSummary>,
    places: HashMap<Uuid, PlaceSummary>,
    posts: HashMap<Uuid, PostSummary>,
}

impl InMemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, State>, anyhow::Error> {
        self.state
            .lock()
            .map_err(|_| anyhow!("In-memory store lock is poisoned"))
    }

    pub fn put_event(&self, event: EventSummary) -> Result<(), anyhow::Error> {
        self.lock()?.events.insert(event.id, event);
        Ok(())
    }

    pub fn put_place(&self, place: PlaceSummary) -> Result<(), anyhow::Error> {
        self.lock()?.places.insert(place.id, place);
        Ok(())
    }

    pub fn put_post(&self, post: PostSummary) -> Result<(), anyhow::Error> {
        self.lock()?.posts.insert(post.id, post);
        Ok(())
    }

    pub fn remove_event(&self, id: Uuid) -> Result<(), anyhow::Error> {
        self.lock()?.events.remove(&id);
        Ok(())
    }

    /// Snapshot of a job, for inspection in tests and tooling.
    pub fn job(&self, key: JobKey) -> Result<Option<DeliveryJob>, anyhow::Error> {
        Ok(self.lock()?.jobs.get(&key).cloned())
    }

    pub fn jobs_of(&self, campaign_id: Uuid) -> Result<Vec<DeliveryJob>, anyhow::Error> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|job| job.key.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

impl State {
    fn subscriber_by(&self, predicate: impl Fn(&Subscriber) -> bool) -> Option<Subscriber> {
        self.subscribers.values().find(|s| predicate(s)).cloned()
    }

    fn counters_mut(&mut self, campaign_id: Uuid) -> Option<&mut CampaignCounters> {
        self.campaigns
            .get_mut(&campaign_id)
            .map(|campaign| &mut campaign.counters)
    }
}

#[async_trait]
impl SubscriberStore for InMemoryStore {
    async fn insert(&self, subscriber: NewSubscriber) -> Result<Subscriber, anyhow::Error> {
        let mut state = self.lock()?;

        if state
            .subscribers
            .values()
            .any(|s| s.email == subscriber.email)
        {
            return Err(anyhow!("Subscriber `{}` already exists", subscriber.email));
        }

        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            email: subscriber.email,
            name: subscriber.name,
            is_verified: false,
            is_active: true,
            verification_token: VerificationToken::generate(),
            unsubscribe_token: UnsubscribeToken::generate(),
            preferences: subscriber.preferences,
            subscribed_at: OffsetDateTime::now_utc(),
        };
        state.subscribers.insert(subscriber.id, subscriber.clone());

        Ok(subscriber)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscriber>, anyhow::Error> {
        Ok(self.lock()?.subscribers.get(&id).cloned())
    }

    async fn find_by_email(
        &self,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        Ok(self.lock()?.subscriber_by(|s| &s.email == email))
    }

    async fn find_eligible(
        &self,
        filter: AudienceFilter,
    ) -> Result<Vec<Subscriber>, anyhow::Error> {
        let state = self.lock()?;
        let mut eligible: Vec<_> = state
            .subscribers
            .values()
            .filter(|s| s.is_eligible() && filter.matches(&s.preferences))
            .cloned()
            .collect();
        eligible.sort_by_key(|s| s.subscribed_at);

        Ok(eligible)
    }

    async fn find_by_unsubscribe_token(
        &self,
        token: &UnsubscribeToken,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        let token = token.expose_secret();
        Ok(self
            .lock()?
            .subscriber_by(|s| s.unsubscribe_token.expose_secret() == token))
    }

    async fn find_by_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        let token = token.expose_secret();
        Ok(self
            .lock()?
            .subscriber_by(|s| s.verification_token.expose_secret() == token))
    }

    async fn mark_verified(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.subscribers.get_mut(&id) {
            Some(subscriber) if !subscriber.is_verified => {
                subscriber.is_verified = true;
                true
            }
            _ => false,
        })
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.subscribers.get_mut(&id) {
            Some(subscriber) if subscriber.is_active => {
                subscriber.is_active = false;
                true
            }
            _ => false,
        })
    }

    async fn reactivate(
        &self,
        id: Uuid,
        verification_token: &VerificationToken,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.subscribers.get_mut(&id) {
            Some(subscriber) if !subscriber.is_active => {
                subscriber.is_active = true;
                subscriber.is_verified = false;
                subscriber.verification_token = verification_token.clone();
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl CampaignStore for InMemoryStore {
    async fn insert(&self, campaign: &Campaign) -> Result<(), anyhow::Error> {
        self.lock()?.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, anyhow::Error> {
        Ok(self.lock()?.campaigns.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Campaign>, anyhow::Error> {
        let mut campaigns: Vec<_> = self.lock()?.campaigns.values().cloned().collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn list_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, anyhow::Error> {
        Ok(self
            .lock()?
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn due_scheduled(&self, now: OffsetDateTime) -> Result<Vec<Campaign>, anyhow::Error> {
        let mut due: Vec<_> = self
            .lock()?
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| c.scheduled_at);
        Ok(due)
    }

    async fn update_draft(
        &self,
        id: Uuid,
        draft: &CampaignDraft,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.campaigns.get_mut(&id) {
            Some(campaign) if campaign.status.is_editable() => {
                campaign.title = draft.title.as_ref().to_string();
                campaign.subject = draft.subject.as_ref().to_string();
                campaign.content_html = draft.content_html.clone();
                campaign.campaign_type = draft.campaign_type;
                campaign.content = draft.content.clone();
                campaign.updated_at = now;
                true
            }
            _ => false,
        })
    }

    async fn schedule(
        &self,
        id: Uuid,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.campaigns.get_mut(&id) {
            Some(campaign) if campaign.status.is_editable() => {
                campaign.status = CampaignStatus::Scheduled;
                campaign.scheduled_at = Some(scheduled_at);
                campaign.updated_at = now;
                true
            }
            _ => false,
        })
    }

    async fn transition(&self, id: Uuid, change: StatusChange) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.campaigns.get_mut(&id) {
            Some(campaign) if change.from.contains(&campaign.status) => {
                campaign.status = change.to;
                campaign.updated_at = change.at;
                if change.to == CampaignStatus::Sending {
                    campaign.sending_started_at = Some(change.at);
                }
                if change.to.is_terminal() {
                    campaign.completed_at = Some(change.at);
                }
                if change.note.is_some() {
                    campaign.last_error = change.note;
                }
                true
            }
            _ => false,
        })
    }

    async fn replace_counters(
        &self,
        id: Uuid,
        counters: CampaignCounters,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.lock()?.counters_mut(id) {
            Some(current) => {
                *current = counters;
                true
            }
            None => false,
        })
    }

    async fn delete(
        &self,
        id: Uuid,
        blocked: &'static [CampaignStatus],
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;

        match state.campaigns.get(&id) {
            Some(campaign) if !blocked.contains(&campaign.status) => {
                state.campaigns.remove(&id);
                state.jobs.retain(|key, _| key.campaign_id != id);
                state.attachments.retain(|a| a.campaign_id != id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_attachment(
        &self,
        campaign_id: Uuid,
        attachment: NewAttachment,
        cap_bytes: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Attachment>, anyhow::Error> {
        let mut state = self.lock()?;

        let used: i64 = state
            .attachments
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .map(|a| a.size_bytes)
            .sum();
        if used + attachment.size_bytes > cap_bytes {
            return Ok(None);
        }

        let attachment = attachment.into_attachment(campaign_id, now);
        state.attachments.push(attachment.clone());

        Ok(Some(attachment))
    }

    async fn list_attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, anyhow::Error> {
        Ok(self
            .lock()?
            .attachments
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn remove_attachment(
        &self,
        campaign_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;
        let before = state.attachments.len();
        state
            .attachments
            .retain(|a| !(a.campaign_id == campaign_id && a.id == attachment_id));

        Ok(state.attachments.len() < before)
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryStore {
    async fn enqueue(
        &self,
        campaign_id: Uuid,
        subscriber_ids: &[Uuid],
        now: OffsetDateTime,
    ) -> Result<u64, anyhow::Error> {
        let mut state = self.lock()?;
        let mut created = 0;

        for &subscriber_id in subscriber_ids {
            let key = JobKey {
                campaign_id,
                subscriber_id,
            };
            if !state.jobs.contains_key(&key) {
                state.jobs.insert(key, DeliveryJob::pending(key, now));
                created += 1;
            }
        }

        Ok(created)
    }

    async fn count_jobs(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error> {
        Ok(self
            .lock()?
            .jobs
            .keys()
            .filter(|key| key.campaign_id == campaign_id)
            .count() as i64)
    }

    async fn claim_batch(
        &self,
        batch_size: i64,
        now: OffsetDateTime,
        visibility_timeout: Duration,
    ) -> Result<Vec<ClaimedJob>, anyhow::Error> {
        let mut state = self.lock()?;
        let State { campaigns, jobs, .. } = &mut *state;

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .filter_map(|job| {
                let campaign = campaigns.get(&job.key.campaign_id)?;
                (campaign.status == CampaignStatus::Sending).then(|| {
                    let priority = campaign.scheduled_at.or(campaign.sending_started_at);
                    (priority, job.created_at, job.key)
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            // Campaigns without any timestamp go last.
            match (a.0, b.0) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(a.1.cmp(&b.1))
        });

        let claimed_until = now + visibility_timeout;
        let claimed = candidates
            .into_iter()
            .take(usize::try_from(batch_size).unwrap_or(0))
            .filter_map(|(_, _, key)| {
                let job = jobs.get_mut(&key)?;
                let claim_token = Uuid::new_v4();
                job.claimed_until = Some(claimed_until);
                job.claim_token = Some(claim_token);
                Some(ClaimedJob {
                    key,
                    retry_count: job.retry_count,
                    claim_token,
                })
            })
            .collect();

        Ok(claimed)
    }

    async fn complete(
        &self,
        claimed: &ClaimedJob,
        outcome: JobOutcome,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.lock()?;

        let Some(job) = state.jobs.get_mut(&claimed.key) else {
            return Ok(false);
        };
        if job.status != JobStatus::Pending || job.claim_token != Some(claimed.claim_token) {
            return Ok(false);
        }

        job.claimed_until = None;
        job.claim_token = None;
        let sent = matches!(outcome, JobOutcome::Sent { .. });
        match outcome {
            JobOutcome::Sent { message_id } => {
                job.status = JobStatus::Sent;
                job.sent_at = Some(now);
                job.message_id = message_id;
            }
            JobOutcome::Retry {
                next_attempt_at,
                error,
            } => {
                job.retry_count += 1;
                job.next_attempt_at = next_attempt_at;
                job.last_error = Some(error);
            }
            JobOutcome::Failed { error } => {
                job.retry_count += 1;
                job.status = JobStatus::Failed;
                job.last_error = Some(error);
            }
            JobOutcome::Bounced { error } => {
                job.status = JobStatus::Bounced;
                job.last_error = Some(error);
            }
            JobOutcome::Skipped { reason } => {
                job.status = JobStatus::Skipped;
                job.last_error = Some(reason);
            }
        }

        if sent {
            if let Some(counters) = state.counters_mut(claimed.key.campaign_id) {
                counters.total_sent += 1;
            }
        }

        Ok(true)
    }

    async fn record(
        &self,
        key: JobKey,
        event: TrackingEvent,
        now: OffsetDateTime,
    ) -> Result<TrackingOutcome, anyhow::Error> {
        let mut state = self.lock()?;

        let Some(job) = state.jobs.get_mut(&key) else {
            return Ok(TrackingOutcome::Ignored);
        };
        if !job.status.was_sent() {
            return Ok(TrackingOutcome::Ignored);
        }

        let slot = match event {
            TrackingEvent::Delivered => &mut job.delivered_at,
            TrackingEvent::Opened => &mut job.opened_at,
            TrackingEvent::Clicked => &mut job.clicked_at,
            TrackingEvent::Unsubscribed => &mut job.unsubscribed_at,
        };
        if slot.is_some() {
            return Ok(TrackingOutcome::Ignored);
        }
        *slot = Some(now);

        match event {
            TrackingEvent::Opened if job.status == JobStatus::Sent => {
                job.status = JobStatus::Opened
            }
            TrackingEvent::Clicked => job.status = JobStatus::Clicked,
            _ => {}
        }

        if let Some(counters) = state.counters_mut(key.campaign_id) {
            match event {
                TrackingEvent::Delivered => counters.total_delivered += 1,
                TrackingEvent::Opened => counters.total_opened += 1,
                TrackingEvent::Clicked => counters.total_clicked += 1,
                TrackingEvent::Unsubscribed => counters.total_unsubscribed += 1,
            }
        }

        Ok(TrackingOutcome::Recorded)
    }

    async fn pending_count(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error> {
        Ok(self
            .lock()?
            .jobs
            .values()
            .filter(|job| job.key.campaign_id == campaign_id && job.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn job_counts(&self, campaign_id: Uuid) -> Result<JobCounts, anyhow::Error> {
        let state = self.lock()?;
        let mut counts = JobCounts::default();
        state
            .jobs
            .values()
            .filter(|job| job.key.campaign_id == campaign_id)
            .for_each(|job| counts.add(job));

        Ok(counts)
    }

    async fn health(&self, now: OffsetDateTime) -> Result<QueueHealth, anyhow::Error> {
        let state = self.lock()?;
        let mut health = QueueHealth::default();
        let mut oldest: Option<OffsetDateTime> = None;

        for job in state.jobs.values() {
            let sending = state
                .campaigns
                .get(&job.key.campaign_id)
                .is_some_and(|c| c.status == CampaignStatus::Sending);

            match job.status {
                JobStatus::Pending if sending => {
                    health.pending += 1;
                    if job.claimed_until.is_some_and(|until| until > now) {
                        health.claimed += 1;
                    }
                    oldest = Some(oldest.map_or(job.created_at, |o| o.min(job.created_at)));
                }
                JobStatus::Failed => health.failed += 1,
                _ => {}
            }
        }
        health.oldest_pending_age_seconds = oldest.map(|o| (now - o).whole_seconds());

        Ok(health)
    }
}

#[async_trait]
impl ContentResolver for InMemoryStore {
    async fn resolve_events(&self, ids: &[Uuid]) -> Result<Vec<EventSummary>, anyhow::Error> {
        let state = self.lock()?;
        let rows = ids.iter().filter_map(|id| state.events.get(id).cloned()).collect();
        Ok(in_request_order(ids, rows, |e: &EventSummary| e.id))
    }

    async fn resolve_places(&self, ids: &[Uuid]) -> Result<Vec<PlaceSummary>, anyhow::Error> {
        let state = self.lock()?;
        let rows = ids.iter().filter_map(|id| state.places.get(id).cloned()).collect();
        Ok(in_request_order(ids, rows, |p: &PlaceSummary| p.id))
    }

    async fn resolve_posts(&self, ids: &[Uuid]) -> Result<Vec<PostSummary>, anyhow::Error> {
        let state = self.lock()?;
        let rows = ids.iter().filter_map(|id| state.posts.get(id).cloned()).collect();
        Ok(in_request_order(ids, rows, |p: &PostSummary| p.id))
    }
}
