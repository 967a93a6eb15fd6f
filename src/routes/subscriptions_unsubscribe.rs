use crate::{app_state::AppState, domain::UnsubscribeToken, subscriptions::SubscribeError};
use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// `GET` serves the link in the email body, `POST` serves mail clients
/// honouring `List-Unsubscribe-Post`.
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/subscriptions/unsubscribe",
        get(unsubscribe).post(unsubscribe),
    )
}

#[tracing::instrument(
    name = "Unsubscribe a subscriber",
    skip(app_state, parameters),
    fields(campaign_id = ?parameters.campaign)
)]
async fn unsubscribe(
    State(app_state): State<AppState>,
    Query(parameters): Query<Parameters>,
) -> Result<&'static str, SubscribeError> {
    let token =
        UnsubscribeToken::parse(parameters.token).map_err(SubscribeError::ValidationError)?;

    app_state
        .subscriptions
        .unsubscribe(&token, parameters.campaign, OffsetDateTime::now_utc())
        .await?;

    Ok("You have been unsubscribed. You will not receive any further newsletters.")
}

#[derive(Deserialize)]
struct Parameters {
    token: String,
    campaign: Option<Uuid>,
}
