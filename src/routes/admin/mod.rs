use crate::{app_state::AppState, campaigns::CampaignError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};

mod attachments;
mod campaigns;
mod stats;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/admin/campaigns/:id",
            get(campaigns::get_campaign)
                .put(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route(
            "/admin/campaigns/:id/schedule",
            post(campaigns::schedule_campaign),
        )
        .route("/admin/campaigns/:id/send", post(campaigns::send_campaign))
        .route(
            "/admin/campaigns/:id/cancel",
            post(campaigns::cancel_campaign),
        )
        .route("/admin/campaigns/:id/stats", get(stats::campaign_stats))
        .route(
            "/admin/campaigns/:id/stats/reconcile",
            post(stats::reconcile_stats),
        )
        .route(
            "/admin/campaigns/:id/attachments",
            get(attachments::list_attachments).post(attachments::add_attachment),
        )
        .route(
            "/admin/campaigns/:id/attachments/:attachment_id",
            delete(attachments::remove_attachment),
        )
        .route("/admin/queue/health", get(stats::queue_health))
}

impl IntoResponse for CampaignError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EmptyAudience | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::UnexpectedError(ref e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, "Campaign operation failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        tracing::warn!(error.message = %self, "Refused campaign operation");
        (status, self.to_string()).into_response()
    }
}
