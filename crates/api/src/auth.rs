use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const OWNER_HEADER: &str = "x-owner-id";

/// 上游网关认证后写入的调用方标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|owner| !owner.is_empty())
            .map(|owner| OwnerId(owner.to_string()))
            .ok_or(ApiError::MissingOwner)
    }
}
