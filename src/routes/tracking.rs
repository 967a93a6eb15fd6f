use crate::{app_state::AppState, domain::JobKey, tracking::TrackingError};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// 1x1 transparent GIF.
const PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/track/open/:campaign_id/:subscriber_id", get(open))
        .route("/track/click/:campaign_id/:subscriber_id", get(click))
}

/// Always answers with the pixel. A failed write only costs one open.
#[tracing::instrument(name = "Tracking open", skip(app_state))]
async fn open(
    State(app_state): State<AppState>,
    Path((campaign_id, subscriber_id)): Path<(Uuid, Uuid)>,
) -> Response {
    let key = JobKey {
        campaign_id,
        subscriber_id,
    };

    if let Err(e) = app_state
        .tracker
        .record_open(key, OffsetDateTime::now_utc())
        .await
    {
        tracing::error!(error.cause_chain = ?e, error.message = %e, "Failed to record an open");
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (
                header::CACHE_CONTROL,
                "no-store, no-cache, must-revalidate, max-age=0",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        PIXEL,
    )
        .into_response()
}

#[tracing::instrument(name = "Tracking click", skip(app_state, parameters))]
async fn click(
    State(app_state): State<AppState>,
    Path((campaign_id, subscriber_id)): Path<(Uuid, Uuid)>,
    Query(parameters): Query<Parameters>,
) -> Result<Redirect, TrackingError> {
    let key = JobKey {
        campaign_id,
        subscriber_id,
    };

    let target = app_state
        .tracker
        .record_click(
            key,
            &parameters.url,
            &parameters.sig,
            OffsetDateTime::now_utc(),
        )
        .await?;

    Ok(Redirect::to(target.as_str()))
}

#[derive(Deserialize)]
struct Parameters {
    url: String,
    #[serde(default)]
    sig: String,
}

impl IntoResponse for TrackingError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidTarget(_) | Self::InvalidSignature => {
                tracing::warn!(error.message = %self, "Refused to redirect");
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            Self::UnexpectedError(ref e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, "Tracking failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
