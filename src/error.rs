use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::borrow::Cow;

#[derive(Debug)]
pub enum AppError {
    InternalServerError(anyhow::Error),
    ResponseStatusError(StatusCode, Cow<'static, str>),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct AppErrorResponse {
            status: u16,
            message: Cow<'static, str>,
        }

        match self {
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "request failed");
                AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    .into_response()
            }
            AppError::ResponseStatusError(code, s) => {
                let mut response = (
                    code,
                    Json(AppErrorResponse {
                        status: code.as_u16(),
                        message: s,
                    }),
                )
                    .into_response();
                if code == StatusCode::UNAUTHORIZED {
                    response
                        .headers_mut()
                        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                }
                response
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::InternalServerError(e.into())
    }
}

impl AppError {
    pub fn from(code: StatusCode, s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::ResponseStatusError(code, s.into())
    }

    pub fn not_found(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::NOT_FOUND, s)
    }

    /// Duplicate or already-in-state. Answered with 400 like the rest of the API's
    /// client errors.
    pub fn conflict(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::BAD_REQUEST, s)
    }

    pub fn forbidden(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::FORBIDDEN, s)
    }

    pub fn unauthorized(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::UNAUTHORIZED, s)
    }

    pub fn capacity_exceeded(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::BAD_REQUEST, s)
    }

    pub fn bad_request(s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::from(StatusCode::BAD_REQUEST, s)
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> StatusCode {
        match self {
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ResponseStatusError(code, _) => *code,
        }
    }

    #[cfg(test)]
    pub(crate) fn message(&self) -> &str {
        match self {
            AppError::InternalServerError(_) => "Internal Server Error",
            AppError::ResponseStatusError(_, s) => s,
        }
    }
}
