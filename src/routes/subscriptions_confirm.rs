use crate::{app_state::AppState, domain::VerificationToken, subscriptions::SubscribeError};
use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new().route("/subscriptions/confirm", get(confirm))
}

#[tracing::instrument(name = "Confirm a pending subscriber", skip(app_state, parameters))]
async fn confirm(
    State(app_state): State<AppState>,
    Query(parameters): Query<Parameters>,
) -> Result<(), SubscribeError> {
    let token = VerificationToken::parse(parameters.subscription_token)
        .map_err(SubscribeError::ValidationError)?;

    app_state.subscriptions.confirm(&token).await
}

#[derive(Deserialize)]
struct Parameters {
    subscription_token: String,
}
