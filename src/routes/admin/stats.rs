use crate::{
    app_state::AppState,
    campaigns::CampaignError,
    domain::{CampaignStats, QueueHealth},
};
use axum::{
    extract::{Path, State},
    Json,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub(super) async fn campaign_stats(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>, CampaignError> {
    Ok(Json(app_state.campaigns.stats(id).await?))
}

pub(super) async fn reconcile_stats(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignStats>, CampaignError> {
    Ok(Json(app_state.campaigns.reconcile(id).await?))
}

pub(super) async fn queue_health(
    State(app_state): State<AppState>,
) -> Result<Json<QueueHealth>, CampaignError> {
    let health = app_state
        .campaigns
        .queue_health(OffsetDateTime::now_utc())
        .await?;

    Ok(Json(health))
}
