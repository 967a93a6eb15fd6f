use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt::{Debug, Display};

pub fn e500<T>(error: T) -> HttpError<T>
where
    T: Debug + Display,
{
    HttpError::InternalServerError(error)
}

/// Errors of handlers that have no dedicated error enum.
#[derive(Debug, thiserror::Error)]
pub enum HttpError<T>
where
    T: Debug + Display,
{
    #[error("Something went wrong")]
    InternalServerError(T),
}

impl<T> IntoResponse for HttpError<T>
where
    T: Debug + Display,
{
    fn into_response(self) -> Response {
        match self {
            Self::InternalServerError(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
