use crate::{
    app_state::AppState,
    campaigns::{CampaignError, Dispatch},
    domain::{Campaign, CampaignDraft, CampaignStatus, CampaignType, ContentSelection},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[tracing::instrument(name = "Listing campaigns", skip(app_state))]
pub(super) async fn list_campaigns(
    State(app_state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Campaign>>, CampaignError> {
    Ok(Json(app_state.campaigns.list(filter.status).await?))
}

pub(super) async fn get_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, CampaignError> {
    Ok(Json(app_state.campaigns.get(id).await?))
}

pub(super) async fn create_campaign(
    State(app_state): State<AppState>,
    Json(body): Json<CampaignBody>,
) -> Result<(StatusCode, Json<Campaign>), CampaignError> {
    let draft = body.try_into().map_err(CampaignError::Validation)?;
    let campaign = app_state
        .campaigns
        .create(draft, OffsetDateTime::now_utc())
        .await?;

    Ok((StatusCode::CREATED, Json(campaign)))
}

pub(super) async fn update_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CampaignBody>,
) -> Result<Json<Campaign>, CampaignError> {
    let draft = body.try_into().map_err(CampaignError::Validation)?;
    let campaign = app_state
        .campaigns
        .update(id, draft, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(campaign))
}

pub(super) async fn delete_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, CampaignError> {
    app_state.campaigns.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn schedule_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ScheduleBody>,
) -> Result<Json<Campaign>, CampaignError> {
    let campaign = app_state
        .campaigns
        .schedule(id, body.scheduled_at, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(campaign))
}

/// Only enqueues; the dispatcher delivers in the background.
pub(super) async fn send_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchResponse>), CampaignError> {
    let Dispatch { campaign, enqueued } = app_state
        .campaigns
        .send_now(id, OffsetDateTime::now_utc())
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchResponse { campaign, enqueued }),
    ))
}

pub(super) async fn cancel_campaign(
    State(app_state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>, CampaignError> {
    let campaign = app_state
        .campaigns
        .cancel(id, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(campaign))
}

#[derive(Debug, Deserialize)]
pub(super) struct ListFilter {
    status: Option<CampaignStatus>,
}

#[derive(Deserialize)]
pub(super) struct CampaignBody {
    title: String,
    subject: String,
    content_html: String,
    campaign_type: CampaignType,
    #[serde(default)]
    content: ContentSelection,
}

impl TryFrom<CampaignBody> for CampaignDraft {
    type Error = String;

    fn try_from(body: CampaignBody) -> Result<Self, Self::Error> {
        CampaignDraft::parse(
            body.title,
            body.subject,
            body.content_html,
            body.campaign_type,
            body.content,
        )
    }
}

#[derive(Deserialize)]
pub(super) struct ScheduleBody {
    #[serde(with = "time::serde::rfc3339")]
    scheduled_at: OffsetDateTime,
}

#[derive(Serialize)]
pub(super) struct DispatchResponse {
    campaign: Campaign,
    enqueued: u64,
}
