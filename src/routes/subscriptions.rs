use crate::{
    app_state::AppState,
    domain::{Frequency, NewSubscriber, Preferences, SubscriberEmail, SubscriberName},
    subscriptions::SubscribeError,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Form, Router,
};
use serde::Deserialize;

pub fn router() -> Router<AppState> {
    Router::new().route("/subscriptions", post(subscribe))
}

#[tracing::instrument(
    name = "Adding a new subscriber",
    skip(app_state, form),
    fields(subscriber_email = %form.email, subscriber_name = %form.name)
)]
async fn subscribe(
    State(app_state): State<AppState>,
    Form(form): Form<FormData>,
) -> Result<StatusCode, SubscribeError> {
    let new_subscriber = form.try_into().map_err(SubscribeError::ValidationError)?;
    app_state.subscriptions.subscribe(new_subscriber).await?;

    Ok(StatusCode::OK)
}

/// Unchecked preference boxes are simply absent from the form, so every
/// category defaults to opted in.
#[derive(Deserialize)]
struct FormData {
    name: String,
    email: String,
    events: Option<bool>,
    places: Option<bool>,
    offers: Option<bool>,
    news: Option<bool>,
    frequency: Option<String>,
}

impl TryFrom<FormData> for NewSubscriber {
    type Error = String;

    fn try_from(form: FormData) -> Result<Self, Self::Error> {
        let email = SubscriberEmail::parse(form.email)?;
        let name = SubscriberName::parse(form.name)?;
        let defaults = Preferences::default();
        let frequency = form
            .frequency
            .map(Frequency::try_from)
            .transpose()?
            .unwrap_or(defaults.frequency);

        Ok(Self {
            email,
            name,
            preferences: Preferences {
                events: form.events.unwrap_or(defaults.events),
                places: form.places.unwrap_or(defaults.places),
                offers: form.offers.unwrap_or(defaults.offers),
                news: form.news.unwrap_or(defaults.news),
                frequency,
            },
        })
    }
}

impl IntoResponse for SubscribeError {
    fn into_response(self) -> Response {
        match self {
            Self::ValidationError(_) => {
                tracing::warn!(error.message = %self, "Rejected subscription request");
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            Self::UnknownToken => {
                tracing::warn!(error.message = %self, "Rejected subscription request");
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            Self::UnexpectedError(ref e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, "Subscription request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
