use crate::{
    error::{Error, SignedLinkError},
    invite_manager::InviteManager,
};
use axum::{
    extract::RawQuery,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::{info, warn};

fn rejection(err: &Error) -> Response {
    match err {
        Error::SignedLink(SignedLinkError::LinkExpired) => {
            (StatusCode::GONE, "LinkExpired").into_response()
        }
        Error::SignedLink(SignedLinkError::InvalidSignature) => {
            (StatusCode::FORBIDDEN, "InvalidSignature").into_response()
        }
        Error::SignedLink(SignedLinkError::MissingExpiration) => {
            (StatusCode::BAD_REQUEST, "MissingExpiration").into_response()
        }
        Error::SignedLink(SignedLinkError::MalformedUrl(_)) => {
            (StatusCode::BAD_REQUEST, "MalformedUrl").into_response()
        }
        Error::SignedLink(SignedLinkError::InvalidParameter(_)) => {
            (StatusCode::BAD_REQUEST, "InvalidParameter").into_response()
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub async fn accept_invitation_route(
    Extension(invite_manager): Extension<Arc<InviteManager>>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let query = match query {
        Some(query) => query,
        None => return (StatusCode::BAD_REQUEST, "MalformedUrl").into_response(),
    };
    match invite_manager.accept_invitation_query(&query) {
        Ok(accepted_invitation) => {
            info!("Invitation accepted for user {}", accepted_invitation.user_id);
            (StatusCode::OK, Json(accepted_invitation)).into_response()
        }
        Err(err) => {
            warn!("{}", err);
            rejection(&err)
        }
    }
}
