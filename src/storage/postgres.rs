use super::{
    in_request_order, CampaignStore, ContentResolver, DeliveryQueue, JobOutcome, StatusChange,
    SubscriberStore,
};
use crate::domain::{
    Attachment, AudienceFilter, Campaign, CampaignCounters, CampaignDraft, CampaignStatus,
    ClaimedJob, ContentSelection, EventSummary, Frequency, JobCounts, JobKey, JobStatus,
    NewAttachment, NewSubscriber, PlaceSummary, PostSummary, Preferences, QueueHealth,
    Subscriber, SubscriberEmail, SubscriberName, TrackingEvent, TrackingOutcome,
    UnsubscribeToken, VerificationToken,
};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL implementation of the store traits. Conditional writes are
/// single statements; the claim uses `FOR UPDATE SKIP LOCKED` so concurrent
/// dispatchers never receive the same job.
#[derive(Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

const SUBSCRIBER_COLUMNS: &str = r#"
    id, email, name, is_verified, is_active, verification_token, unsubscribe_token,
    pref_events, pref_places, pref_offers, pref_news, frequency, subscribed_at
"#;

#[derive(FromRow)]
struct SubscriberRow {
    id: Uuid,
    email: String,
    name: String,
    is_verified: bool,
    is_active: bool,
    verification_token: String,
    unsubscribe_token: String,
    pref_events: bool,
    pref_places: bool,
    pref_offers: bool,
    pref_news: bool,
    frequency: String,
    subscribed_at: OffsetDateTime,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = anyhow::Error;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Subscriber {
            id: row.id,
            email: SubscriberEmail::parse(row.email).map_err(|e| anyhow!(e))?,
            name: SubscriberName::parse(row.name).map_err(|e| anyhow!(e))?,
            is_verified: row.is_verified,
            is_active: row.is_active,
            verification_token: VerificationToken::parse(row.verification_token)
                .map_err(|e| anyhow!(e))?,
            unsubscribe_token: UnsubscribeToken::parse(row.unsubscribe_token)
                .map_err(|e| anyhow!(e))?,
            preferences: Preferences {
                events: row.pref_events,
                places: row.pref_places,
                offers: row.pref_offers,
                news: row.pref_news,
                frequency: Frequency::try_from(row.frequency).map_err(|e| anyhow!(e))?,
            },
            subscribed_at: row.subscribed_at,
        })
    }
}

fn into_subscribers(rows: Vec<SubscriberRow>) -> Result<Vec<Subscriber>, anyhow::Error> {
    rows.into_iter().map(Subscriber::try_from).collect()
}

impl PgStore {
    async fn find_subscriber_where(
        &self,
        condition: &str,
        value: &str,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE {condition} = $1");
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(value)
            .fetch_optional(&self.db_pool)
            .await
            .with_context(|| format!("Failed to fetch subscriber by {condition}"))?
            .map(Subscriber::try_from)
            .transpose()
    }
}

#[async_trait]
impl SubscriberStore for PgStore {
    #[tracing::instrument(name = "Saving new subscriber", skip_all)]
    async fn insert(&self, subscriber: NewSubscriber) -> Result<Subscriber, anyhow::Error> {
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

        sqlx::query(
            r#"
            INSERT INTO subscribers (
                id, email, name, is_verified, is_active, verification_token, unsubscribe_token,
                pref_events, pref_places, pref_offers, pref_news, frequency, subscribed_at
            )
            VALUES ($1, $2, $3, FALSE, TRUE, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(subscriber.id)
        .bind(subscriber.email.as_ref())
        .bind(subscriber.name.as_ref())
        .bind(subscriber.verification_token.expose_secret())
        .bind(subscriber.unsubscribe_token.expose_secret())
        .bind(subscriber.preferences.events)
        .bind(subscriber.preferences.places)
        .bind(subscriber.preferences.offers)
        .bind(subscriber.preferences.news)
        .bind(subscriber.preferences.frequency.as_ref())
        .bind(subscriber.subscribed_at)
        .execute(&self.db_pool)
        .await
        .context("Failed to insert subscriber")?;

        Ok(subscriber)
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Subscriber>, anyhow::Error> {
        let sql = format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = $1");
        sqlx::query_as::<_, SubscriberRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to fetch subscriber by id")?
            .map(Subscriber::try_from)
            .transpose()
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_email(
        &self,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        self.find_subscriber_where("email", email.as_ref()).await
    }

    #[tracing::instrument(skip(self))]
    async fn find_eligible(
        &self,
        filter: AudienceFilter,
    ) -> Result<Vec<Subscriber>, anyhow::Error> {
        let preference = filter
            .category
            .map(|category| format!("AND {}", category.column()))
            .unwrap_or_default();
        let sql = format!(
            r#"
            SELECT {SUBSCRIBER_COLUMNS}
            FROM subscribers
            WHERE is_active AND is_verified {preference}
            ORDER BY subscribed_at
            "#
        );

        let rows = sqlx::query_as::<_, SubscriberRow>(&sql)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to fetch eligible subscribers")?;

        into_subscribers(rows)
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_unsubscribe_token(
        &self,
        token: &UnsubscribeToken,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        self.find_subscriber_where("unsubscribe_token", token.expose_secret())
            .await
    }

    #[tracing::instrument(skip_all)]
    async fn find_by_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<Option<Subscriber>, anyhow::Error> {
        self.find_subscriber_where("verification_token", token.expose_secret())
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn mark_verified(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE subscribers SET is_verified = TRUE WHERE id = $1 AND NOT is_verified",
        )
        .bind(id)
        .execute(&self.db_pool)
        .await
        .context("Failed to mark subscriber as verified")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn deactivate(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let result =
            sqlx::query("UPDATE subscribers SET is_active = FALSE WHERE id = $1 AND is_active")
                .bind(id)
                .execute(&self.db_pool)
                .await
                .context("Failed to deactivate subscriber")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, verification_token))]
    async fn reactivate(
        &self,
        id: Uuid,
        verification_token: &VerificationToken,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscribers
            SET is_active = TRUE, is_verified = FALSE, verification_token = $2
            WHERE id = $1 AND NOT is_active
            "#,
        )
        .bind(id)
        .bind(verification_token.expose_secret())
        .execute(&self.db_pool)
        .await
        .context("Failed to reactivate subscriber")?;

        Ok(result.rows_affected() == 1)
    }
}

const CAMPAIGN_COLUMNS: &str = r#"
    id, title, subject, content_html, campaign_type, status, scheduled_at,
    event_ids, place_ids, post_ids,
    total_sent, total_delivered, total_opened, total_clicked, total_unsubscribed,
    last_error, created_at, updated_at, sending_started_at, completed_at
"#;

#[derive(FromRow)]
struct CampaignRow {
    id: Uuid,
    title: String,
    subject: String,
    content_html: String,
    campaign_type: String,
    status: String,
    scheduled_at: Option<OffsetDateTime>,
    event_ids: Vec<Uuid>,
    place_ids: Vec<Uuid>,
    post_ids: Vec<Uuid>,
    total_sent: i64,
    total_delivered: i64,
    total_opened: i64,
    total_clicked: i64,
    total_unsubscribed: i64,
    last_error: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    sending_started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = anyhow::Error;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        Ok(Campaign {
            id: row.id,
            title: row.title,
            subject: row.subject,
            content_html: row.content_html,
            campaign_type: row.campaign_type.try_into().map_err(|e: String| anyhow!(e))?,
            status: CampaignStatus::try_from(row.status).map_err(|e| anyhow!(e))?,
            scheduled_at: row.scheduled_at,
            content: ContentSelection {
                event_ids: row.event_ids,
                place_ids: row.place_ids,
                post_ids: row.post_ids,
            },
            counters: CampaignCounters {
                total_sent: row.total_sent,
                total_delivered: row.total_delivered,
                total_opened: row.total_opened,
                total_clicked: row.total_clicked,
                total_unsubscribed: row.total_unsubscribed,
            },
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sending_started_at: row.sending_started_at,
            completed_at: row.completed_at,
        })
    }
}

fn into_campaigns(rows: Vec<CampaignRow>) -> Result<Vec<Campaign>, anyhow::Error> {
    rows.into_iter().map(Campaign::try_from).collect()
}

fn status_names(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_ref().to_string()).collect()
}

#[derive(FromRow)]
struct AttachmentRow {
    id: Uuid,
    campaign_id: Uuid,
    file_name: String,
    size_bytes: i64,
    mime_type: String,
    storage_path: String,
    created_at: OffsetDateTime,
}

impl From<AttachmentRow> for Attachment {
    fn from(row: AttachmentRow) -> Self {
        Attachment {
            id: row.id,
            campaign_id: row.campaign_id,
            file_name: row.file_name,
            size_bytes: row.size_bytes,
            mime_type: row.mime_type,
            storage_path: row.storage_path,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    #[tracing::instrument(name = "Saving new campaign", skip_all, fields(campaign_id = %campaign.id))]
    async fn insert(&self, campaign: &Campaign) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, title, subject, content_html, campaign_type, status, scheduled_at,
                event_ids, place_ids, post_ids, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.title)
        .bind(&campaign.subject)
        .bind(&campaign.content_html)
        .bind(campaign.campaign_type.as_ref())
        .bind(campaign.status.as_ref())
        .bind(campaign.scheduled_at)
        .bind(&campaign.content.event_ids)
        .bind(&campaign.content.place_ids)
        .bind(&campaign.content.post_ids)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.db_pool)
        .await
        .context("Failed to insert campaign")?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, anyhow::Error> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to fetch campaign")?
            .map(Campaign::try_from)
            .transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Campaign>, anyhow::Error> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC");
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list campaigns")?;

        into_campaigns(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, anyhow::Error> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = $1");
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(status.as_ref())
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to list campaigns by status")?;

        into_campaigns(rows)
    }

    #[tracing::instrument(skip(self))]
    async fn due_scheduled(&self, now: OffsetDateTime) -> Result<Vec<Campaign>, anyhow::Error> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'scheduled' AND scheduled_at <= $1
            ORDER BY scheduled_at
            "#
        );
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(now)
            .fetch_all(&self.db_pool)
            .await
            .context("Failed to fetch due campaigns")?;

        into_campaigns(rows)
    }

    #[tracing::instrument(skip(self, draft))]
    async fn update_draft(
        &self,
        id: Uuid,
        draft: &CampaignDraft,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET title = $2, subject = $3, content_html = $4, campaign_type = $5,
                event_ids = $6, place_ids = $7, post_ids = $8, updated_at = $9
            WHERE id = $1 AND status = ANY($10)
            "#,
        )
        .bind(id)
        .bind(draft.title.as_ref())
        .bind(draft.subject.as_ref())
        .bind(&draft.content_html)
        .bind(draft.campaign_type.as_ref())
        .bind(&draft.content.event_ids)
        .bind(&draft.content.place_ids)
        .bind(&draft.content.post_ids)
        .bind(now)
        .bind(status_names(CampaignStatus::EDITABLE))
        .execute(&self.db_pool)
        .await
        .context("Failed to update campaign")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn schedule(
        &self,
        id: Uuid,
        scheduled_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'scheduled', scheduled_at = $2, updated_at = $3
            WHERE id = $1 AND status = ANY($4)
            "#,
        )
        .bind(id)
        .bind(scheduled_at)
        .bind(now)
        .bind(status_names(CampaignStatus::EDITABLE))
        .execute(&self.db_pool)
        .await
        .context("Failed to schedule campaign")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn transition(&self, id: Uuid, change: StatusChange) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2::text,
                updated_at = $3,
                sending_started_at = CASE WHEN $2::text = 'sending' THEN $3 ELSE sending_started_at END,
                completed_at = CASE WHEN $2::text IN ('sent', 'cancelled', 'error') THEN $3 ELSE completed_at END,
                last_error = COALESCE($4, last_error)
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(change.to.as_ref())
        .bind(change.at)
        .bind(change.note)
        .bind(status_names(change.from))
        .execute(&self.db_pool)
        .await
        .context("Failed to change campaign status")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn replace_counters(
        &self,
        id: Uuid,
        counters: CampaignCounters,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET total_sent = $2, total_delivered = $3, total_opened = $4,
                total_clicked = $5, total_unsubscribed = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(counters.total_sent)
        .bind(counters.total_delivered)
        .bind(counters.total_opened)
        .bind(counters.total_clicked)
        .bind(counters.total_unsubscribed)
        .execute(&self.db_pool)
        .await
        .context("Failed to replace campaign counters")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(
        &self,
        id: Uuid,
        blocked: &'static [CampaignStatus],
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND NOT (status = ANY($2))")
            .bind(id)
            .bind(status_names(blocked))
            .execute(&self.db_pool)
            .await
            .context("Failed to delete campaign")?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self, attachment))]
    async fn add_attachment(
        &self,
        campaign_id: Uuid,
        attachment: NewAttachment,
        cap_bytes: i64,
        now: OffsetDateTime,
    ) -> Result<Option<Attachment>, anyhow::Error> {
        let attachment = attachment.into_attachment(campaign_id, now);

        let result = sqlx::query(
            r#"
            INSERT INTO campaign_attachments (
                id, campaign_id, file_name, size_bytes, mime_type, storage_path, created_at
            )
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE (
                SELECT COALESCE(SUM(size_bytes), 0)
                FROM campaign_attachments
                WHERE campaign_id = $2
            ) + $4 <= $8
            "#,
        )
        .bind(attachment.id)
        .bind(attachment.campaign_id)
        .bind(&attachment.file_name)
        .bind(attachment.size_bytes)
        .bind(&attachment.mime_type)
        .bind(&attachment.storage_path)
        .bind(attachment.created_at)
        .bind(cap_bytes)
        .execute(&self.db_pool)
        .await
        .context("Failed to insert attachment")?;

        Ok((result.rows_affected() == 1).then_some(attachment))
    }

    #[tracing::instrument(skip(self))]
    async fn list_attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, anyhow::Error> {
        let rows = sqlx::query_as::<_, AttachmentRow>(
            r#"
            SELECT id, campaign_id, file_name, size_bytes, mime_type, storage_path, created_at
            FROM campaign_attachments
            WHERE campaign_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to list attachments")?;

        Ok(rows.into_iter().map(Attachment::from).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn remove_attachment(
        &self,
        campaign_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<bool, anyhow::Error> {
        let result =
            sqlx::query("DELETE FROM campaign_attachments WHERE id = $1 AND campaign_id = $2")
                .bind(attachment_id)
                .bind(campaign_id)
                .execute(&self.db_pool)
                .await
                .context("Failed to remove attachment")?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(FromRow)]
struct ClaimedRow {
    campaign_id: Uuid,
    subscriber_id: Uuid,
    retry_count: i32,
    claim_token: Uuid,
}

#[derive(FromRow)]
struct JobCountsRow {
    pending: i64,
    sent: i64,
    opened: i64,
    clicked: i64,
    failed: i64,
    bounced: i64,
    skipped: i64,
    delivered: i64,
    ever_opened: i64,
    ever_clicked: i64,
    unsubscribed: i64,
}

#[derive(FromRow)]
struct HealthRow {
    pending: i64,
    claimed: i64,
    oldest_pending: Option<OffsetDateTime>,
    failed: i64,
}

fn tracked_columns(event: TrackingEvent) -> (&'static str, &'static str, &'static str) {
    match event {
        TrackingEvent::Delivered => ("delivered_at", "total_delivered", "status"),
        TrackingEvent::Opened => (
            "opened_at",
            "total_opened",
            "CASE WHEN status = 'sent' THEN 'opened' ELSE status END",
        ),
        TrackingEvent::Clicked => ("clicked_at", "total_clicked", "'clicked'"),
        TrackingEvent::Unsubscribed => ("unsubscribed_at", "total_unsubscribed", "status"),
    }
}

#[async_trait]
impl DeliveryQueue for PgStore {
    #[tracing::instrument(skip(self, subscriber_ids), fields(subscribers = subscriber_ids.len()))]
    async fn enqueue(
        &self,
        campaign_id: Uuid,
        subscriber_ids: &[Uuid],
        now: OffsetDateTime,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO delivery_jobs (campaign_id, subscriber_id, status, next_attempt_at, created_at)
            SELECT $1, subscriber_id, 'pending', $3, $3
            FROM UNNEST($2::uuid[]) AS subscriber_id
            ON CONFLICT (campaign_id, subscriber_id) DO NOTHING
            "#,
        )
        .bind(campaign_id)
        .bind(subscriber_ids)
        .bind(now)
        .execute(&self.db_pool)
        .await
        .context("Failed to enqueue delivery jobs")?;

        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self))]
    async fn count_jobs(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_jobs WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(&self.db_pool)
                .await
                .context("Failed to count delivery jobs")?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn claim_batch(
        &self,
        batch_size: i64,
        now: OffsetDateTime,
        visibility_timeout: Duration,
    ) -> Result<Vec<ClaimedJob>, anyhow::Error> {
        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH candidates AS (
                SELECT j.campaign_id, j.subscriber_id
                FROM delivery_jobs j
                JOIN campaigns c ON c.id = j.campaign_id
                WHERE j.status = 'pending'
                    AND c.status = 'sending'
                    AND j.next_attempt_at <= $1
                    AND (j.claimed_until IS NULL OR j.claimed_until <= $1)
                ORDER BY COALESCE(c.scheduled_at, c.sending_started_at) ASC NULLS LAST,
                    j.created_at ASC
                LIMIT $2
                FOR UPDATE OF j SKIP LOCKED
            )
            UPDATE delivery_jobs j
            SET claimed_until = $3, claim_token = gen_random_uuid()
            FROM candidates
            WHERE j.campaign_id = candidates.campaign_id
                AND j.subscriber_id = candidates.subscriber_id
            RETURNING j.campaign_id, j.subscriber_id, j.retry_count, j.claim_token
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .bind(now + visibility_timeout)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to claim delivery jobs")?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                key: JobKey {
                    campaign_id: row.campaign_id,
                    subscriber_id: row.subscriber_id,
                },
                retry_count: row.retry_count,
                claim_token: row.claim_token,
            })
            .collect())
    }

    #[tracing::instrument(skip(self, job), fields(campaign_id = %job.key.campaign_id, subscriber_id = %job.key.subscriber_id))]
    async fn complete(
        &self,
        job: &ClaimedJob,
        outcome: JobOutcome,
        now: OffsetDateTime,
    ) -> Result<bool, anyhow::Error> {
        const CLAIM_HELD: &str = r#"
            campaign_id = $1 AND subscriber_id = $2 AND claim_token = $3 AND status = 'pending'
        "#;

        let rows_affected = match outcome {
            JobOutcome::Sent { message_id } => {
                let sql = format!(
                    r#"
                    WITH updated AS (
                        UPDATE delivery_jobs
                        SET status = 'sent', sent_at = $4, message_id = $5,
                            claimed_until = NULL, claim_token = NULL
                        WHERE {CLAIM_HELD}
                        RETURNING campaign_id
                    ), bumped AS (
                        UPDATE campaigns SET total_sent = total_sent + 1
                        WHERE id IN (SELECT campaign_id FROM updated)
                    )
                    SELECT COUNT(*) FROM updated
                    "#
                );
                let (count,): (i64,) = sqlx::query_as(&sql)
                    .bind(job.key.campaign_id)
                    .bind(job.key.subscriber_id)
                    .bind(job.claim_token)
                    .bind(now)
                    .bind(message_id)
                    .fetch_one(&self.db_pool)
                    .await
                    .context("Failed to mark delivery job as sent")?;
                count as u64
            }
            JobOutcome::Retry {
                next_attempt_at,
                error,
            } => {
                let sql = format!(
                    r#"
                    UPDATE delivery_jobs
                    SET retry_count = retry_count + 1, next_attempt_at = $4, last_error = $5,
                        claimed_until = NULL, claim_token = NULL
                    WHERE {CLAIM_HELD}
                    "#
                );
                sqlx::query(&sql)
                    .bind(job.key.campaign_id)
                    .bind(job.key.subscriber_id)
                    .bind(job.claim_token)
                    .bind(next_attempt_at)
                    .bind(error)
                    .execute(&self.db_pool)
                    .await
                    .context("Failed to reschedule delivery job")?
                    .rows_affected()
            }
            JobOutcome::Failed { error } => {
                self.finish(job, JobStatus::Failed, 1, error).await?
            }
            JobOutcome::Bounced { error } => {
                self.finish(job, JobStatus::Bounced, 0, error).await?
            }
            JobOutcome::Skipped { reason } => {
                self.finish(job, JobStatus::Skipped, 0, reason).await?
            }
        };

        Ok(rows_affected == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn record(
        &self,
        key: JobKey,
        event: TrackingEvent,
        now: OffsetDateTime,
    ) -> Result<TrackingOutcome, anyhow::Error> {
        let (column, counter, status) = tracked_columns(event);
        let sql = format!(
            r#"
            WITH updated AS (
                UPDATE delivery_jobs
                SET {column} = $3, status = {status}
                WHERE campaign_id = $1 AND subscriber_id = $2
                    AND {column} IS NULL
                    AND status IN ('sent', 'opened', 'clicked')
                RETURNING campaign_id
            ), bumped AS (
                UPDATE campaigns SET {counter} = {counter} + 1
                WHERE id IN (SELECT campaign_id FROM updated)
            )
            SELECT COUNT(*) FROM updated
            "#
        );

        let (count,): (i64,) = sqlx::query_as(&sql)
            .bind(key.campaign_id)
            .bind(key.subscriber_id)
            .bind(now)
            .fetch_one(&self.db_pool)
            .await
            .with_context(|| format!("Failed to record {column}"))?;

        Ok(TrackingOutcome::from(count == 1))
    }

    #[tracing::instrument(skip(self))]
    async fn pending_count(&self, campaign_id: Uuid) -> Result<i64, anyhow::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM delivery_jobs WHERE campaign_id = $1 AND status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count pending jobs")?;

        Ok(count)
    }

    #[tracing::instrument(skip(self))]
    async fn job_counts(&self, campaign_id: Uuid) -> Result<JobCounts, anyhow::Error> {
        let row = sqlx::query_as::<_, JobCountsRow>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'sent') AS sent,
                COUNT(*) FILTER (WHERE status = 'opened') AS opened,
                COUNT(*) FILTER (WHERE status = 'clicked') AS clicked,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'bounced') AS bounced,
                COUNT(*) FILTER (WHERE status = 'skipped') AS skipped,
                COUNT(delivered_at) AS delivered,
                COUNT(opened_at) AS ever_opened,
                COUNT(clicked_at) AS ever_clicked,
                COUNT(unsubscribed_at) AS unsubscribed
            FROM delivery_jobs
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to count delivery jobs by status")?;

        Ok(JobCounts {
            pending: row.pending,
            sent: row.sent,
            opened: row.opened,
            clicked: row.clicked,
            failed: row.failed,
            bounced: row.bounced,
            skipped: row.skipped,
            delivered: row.delivered,
            ever_opened: row.ever_opened,
            ever_clicked: row.ever_clicked,
            unsubscribed: row.unsubscribed,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn health(&self, now: OffsetDateTime) -> Result<QueueHealth, anyhow::Error> {
        let row = sqlx::query_as::<_, HealthRow>(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE j.status = 'pending' AND c.status = 'sending') AS pending,
                COUNT(*) FILTER (
                    WHERE j.status = 'pending' AND c.status = 'sending' AND j.claimed_until > $1
                ) AS claimed,
                MIN(j.created_at) FILTER (
                    WHERE j.status = 'pending' AND c.status = 'sending'
                ) AS oldest_pending,
                COUNT(*) FILTER (WHERE j.status = 'failed') AS failed
            FROM delivery_jobs j
            JOIN campaigns c ON c.id = j.campaign_id
            "#,
        )
        .bind(now)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to compute queue health")?;

        Ok(QueueHealth {
            pending: row.pending,
            claimed: row.claimed,
            oldest_pending_age_seconds: row
                .oldest_pending
                .map(|oldest| (now - oldest).whole_seconds()),
            failed: row.failed,
        })
    }
}

impl PgStore {
    async fn finish(
        &self,
        job: &ClaimedJob,
        status: JobStatus,
        retry_increment: i32,
        error: String,
    ) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET status = $4, retry_count = retry_count + $5, last_error = $6,
                claimed_until = NULL, claim_token = NULL
            WHERE campaign_id = $1 AND subscriber_id = $2 AND claim_token = $3
                AND status = 'pending'
            "#,
        )
        .bind(job.key.campaign_id)
        .bind(job.key.subscriber_id)
        .bind(job.claim_token)
        .bind(status.as_ref())
        .bind(retry_increment)
        .bind(error)
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("Failed to mark delivery job as {}", status.as_ref()))?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContentResolver for PgStore {
    #[tracing::instrument(skip(self))]
    async fn resolve_events(&self, ids: &[Uuid]) -> Result<Vec<EventSummary>, anyhow::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, EventSummary>(
            r#"
            SELECT id, title, starts_at, location, url, is_cancelled
            FROM events
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to resolve events")?;

        Ok(in_request_order(ids, rows, |e| e.id))
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_places(&self, ids: &[Uuid]) -> Result<Vec<PlaceSummary>, anyhow::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PlaceSummary>(
            "SELECT id, name, category, address, url FROM places WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to resolve places")?;

        Ok(in_request_order(ids, rows, |p| p.id))
    }

    #[tracing::instrument(skip(self))]
    async fn resolve_posts(&self, ids: &[Uuid]) -> Result<Vec<PostSummary>, anyhow::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, PostSummary>(
            "SELECT id, title, excerpt, url FROM posts WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to resolve posts")?;

        Ok(in_request_order(ids, rows, |p| p.id))
    }
}
