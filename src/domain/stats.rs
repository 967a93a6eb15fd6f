use super::{CampaignCounters, CampaignStatus, JobCounts};
use serde::Serialize;
use uuid::Uuid;

/// Campaign statistics as shown to admins. Rates are percentages of
/// `total_sent`, rounded to two decimals.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub last_error: Option<String>,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
    pub total_unsubscribed: i64,
    pub pending: i64,
    pub failed: i64,
    pub bounced: i64,
    pub skipped: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub unsubscribe_rate: f64,
}

impl CampaignStats {
    pub fn new(
        campaign_id: Uuid,
        status: CampaignStatus,
        last_error: Option<String>,
        counters: CampaignCounters,
        jobs: JobCounts,
    ) -> Self {
        let sent = counters.total_sent;

        Self {
            campaign_id,
            status,
            last_error,
            total_sent: sent,
            total_delivered: counters.total_delivered,
            total_opened: counters.total_opened,
            total_clicked: counters.total_clicked,
            total_unsubscribed: counters.total_unsubscribed,
            pending: jobs.pending,
            failed: jobs.failed,
            bounced: jobs.bounced,
            skipped: jobs.skipped,
            delivery_rate: percentage(counters.total_delivered, sent),
            open_rate: percentage(counters.total_opened, sent),
            click_rate: percentage(counters.total_clicked, sent),
            unsubscribe_rate: percentage(counters.total_unsubscribed, sent),
        }
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        return 0.0;
    }

    let ratio = part as f64 * 100.0 / whole as f64;
    (ratio * 100.0).round() / 100.0
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueHealth {
    /// Pending jobs of campaigns that are currently sending.
    pub pending: i64,
    /// Pending jobs currently held by a dispatcher worker.
    pub claimed: i64,
    pub oldest_pending_age_seconds: Option<i64>,
    pub failed: i64,
}
