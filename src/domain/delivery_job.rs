use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Sent,
    Opened,
    Clicked,
    Failed,
    Bounced,
    /// The subscriber left the audience between enqueue and send.
    Skipped,
}

impl JobStatus {
    /// Statuses of jobs whose email went out. `total_sent` counts these.
    pub const SENT_FAMILY: &'static [JobStatus] =
        &[JobStatus::Sent, JobStatus::Opened, JobStatus::Clicked];

    pub fn was_sent(&self) -> bool {
        Self::SENT_FAMILY.contains(self)
    }
}

impl AsRef<str> for JobStatus {
    fn as_ref(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Sent => "sent",
            JobStatus::Opened => "opened",
            JobStatus::Clicked => "clicked",
            JobStatus::Failed => "failed",
            JobStatus::Bounced => "bounced",
            JobStatus::Skipped => "skipped",
        }
    }
}

/// Identity of a delivery job. There is at most one job per pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct DeliveryJob {
    pub key: JobKey,
    pub status: JobStatus,
    pub retry_count: i32,
    pub next_attempt_at: OffsetDateTime,
    pub claimed_until: Option<OffsetDateTime>,
    pub claim_token: Option<Uuid>,
    pub message_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub sent_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    pub opened_at: Option<OffsetDateTime>,
    pub clicked_at: Option<OffsetDateTime>,
    pub unsubscribed_at: Option<OffsetDateTime>,
}

impl DeliveryJob {
    pub fn pending(key: JobKey, now: OffsetDateTime) -> Self {
        Self {
            key,
            status: JobStatus::Pending,
            retry_count: 0,
            next_attempt_at: now,
            claimed_until: None,
            claim_token: None,
            message_id: None,
            last_error: None,
            created_at: now,
            sent_at: None,
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            unsubscribed_at: None,
        }
    }

    pub fn is_claimable(&self, now: OffsetDateTime) -> bool {
        self.status == JobStatus::Pending
            && self.next_attempt_at <= now
            && self.claimed_until.map_or(true, |until| until <= now)
    }
}

/// A job handed to one dispatcher worker. Outcome updates only apply while
/// `claim_token` still matches the stored one, so a worker whose claim
/// expired cannot overwrite the result of the worker that reclaimed the job.
#[derive(Clone, Copy, Debug)]
pub struct ClaimedJob {
    pub key: JobKey,
    pub retry_count: i32,
    pub claim_token: Uuid,
}

/// Job totals per status for one campaign.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub sent: i64,
    pub opened: i64,
    pub clicked: i64,
    pub failed: i64,
    pub bounced: i64,
    pub skipped: i64,
    pub delivered: i64,
    pub ever_opened: i64,
    pub ever_clicked: i64,
    pub unsubscribed: i64,
}

impl JobCounts {
    pub fn add(&mut self, job: &DeliveryJob) {
        match job.status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Sent => self.sent += 1,
            JobStatus::Opened => self.opened += 1,
            JobStatus::Clicked => self.clicked += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Bounced => self.bounced += 1,
            JobStatus::Skipped => self.skipped += 1,
        }
        self.delivered += i64::from(job.delivered_at.is_some());
        self.ever_opened += i64::from(job.opened_at.is_some());
        self.ever_clicked += i64::from(job.clicked_at.is_some());
        self.unsubscribed += i64::from(job.unsubscribed_at.is_some());
    }

    pub fn total_sent(&self) -> i64 {
        self.sent + self.opened + self.clicked
    }
}

/// Result of an idempotent tracking write. `Ignored` covers both repeated
/// events and unknown (campaign, subscriber) pairs; callers must not tell
/// them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingOutcome {
    Recorded,
    Ignored,
}

impl From<bool> for TrackingOutcome {
    fn from(recorded: bool) -> Self {
        if recorded {
            TrackingOutcome::Recorded
        } else {
            TrackingOutcome::Ignored
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingEvent {
    Delivered,
    Opened,
    Clicked,
    Unsubscribed,
}
