use crate::{
    app_state::AppState,
    domain::{JobKey, TrackingOutcome},
    utils::{e500, HttpError},
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/mail", post(mail_event))
}

/// Postmark webhook. Only `Delivery` records are acted upon; everything else
/// is acknowledged so the transport stops retrying it.
#[tracing::instrument(
    name = "Handling mail transport webhook",
    skip(app_state, record),
    fields(record_type = %record.record_type, message_id = ?record.message_id)
)]
async fn mail_event(
    State(app_state): State<AppState>,
    Json(record): Json<WebhookRecord>,
) -> Result<StatusCode, HttpError<anyhow::Error>> {
    if record.record_type != "Delivery" {
        return Ok(StatusCode::OK);
    }

    let (Some(campaign_id), Some(subscriber_id)) =
        (record.metadata.campaign_id, record.metadata.subscriber_id)
    else {
        tracing::warn!("Delivery record without campaign metadata");
        return Ok(StatusCode::OK);
    };

    let key = JobKey {
        campaign_id,
        subscriber_id,
    };
    let outcome = app_state
        .tracker
        .record_delivery(key, OffsetDateTime::now_utc())
        .await
        .map_err(e500)?;

    if outcome == TrackingOutcome::Ignored {
        tracing::info!(%campaign_id, %subscriber_id, "Delivery already recorded or unknown");
    }

    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WebhookRecord {
    record_type: String,
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Default, Deserialize)]
struct Metadata {
    campaign_id: Option<Uuid>,
    subscriber_id: Option<Uuid>,
}
