use axum::Router;
use serde::Serialize;
use std::borrow::Cow;

pub mod activity;
pub mod admin;
pub mod auth;
pub mod club;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: Cow<'static, str>,
}

impl MessageResponse {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub message: Cow<'static, str>,
    pub id: i32,
}

impl CreatedResponse {
    pub fn new(message: impl Into<Cow<'static, str>>, id: i32) -> Self {
        Self {
            message: message.into(),
            id,
        }
    }
}

pub fn app() -> Router {
    Router::new()
        .merge(auth::app())
        .merge(activity::app())
        .merge(club::app())
        .nest("/admin", admin::app())
}
