//! Caller resolution. Authentication itself happens in front of this service;
//! the fronting layer passes the signed-in user's id in a header.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use verso_core::model::Caller;

use crate::error::ApiError;
use crate::AppState;

/// The caller of the current request. Missing header means anonymous.
pub struct CurrentCaller(pub Caller);

impl FromRequestParts<Arc<AppState>> for CurrentCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = state.config.web.identity_header.as_str();
        let Some(value) = parts.headers.get(header) else {
            return Ok(Self(Caller::Anonymous));
        };

        let user_id: i64 = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| ApiError::bad_request(format!("invalid {header} header")))?;

        Ok(Self(state.accounts.caller_for(user_id).await?))
    }
}
