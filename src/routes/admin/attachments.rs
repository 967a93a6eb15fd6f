use crate::{
    app_state::AppState,
    campaigns::CampaignError,
    domain::{Attachment, NewAttachment},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

pub(super) async fn list_attachments(
    State(app_state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> Result<Json<Vec<Attachment>>, CampaignError> {
    Ok(Json(app_state.campaigns.attachments(campaign_id).await?))
}

#[tracing::instrument(
    name = "Attaching file metadata",
    skip(app_state, body),
    fields(file_name = %body.file_name, size_bytes = body.size_bytes)
)]
pub(super) async fn add_attachment(
    State(app_state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
    Json(body): Json<AttachmentBody>,
) -> Result<(StatusCode, Json<Attachment>), CampaignError> {
    let attachment = NewAttachment::parse(
        body.file_name,
        body.size_bytes,
        body.mime_type,
        body.storage_path,
    )
    .map_err(CampaignError::Validation)?;

    let attachment = app_state
        .campaigns
        .add_attachment(campaign_id, attachment, OffsetDateTime::now_utc())
        .await?;

    Ok((StatusCode::CREATED, Json(attachment)))
}

pub(super) async fn remove_attachment(
    State(app_state): State<AppState>,
    Path((campaign_id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, CampaignError> {
    app_state
        .campaigns
        .remove_attachment(campaign_id, attachment_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct AttachmentBody {
    file_name: String,
    size_bytes: i64,
    mime_type: String,
    storage_path: String,
}
