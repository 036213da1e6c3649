use std::borrow::Cow;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tracing::debug;
use unseal_core::{AccessRequest, Authorization, Error, Verb};

use crate::error::{AppError, attach_correlation};
use crate::models::ListQuery;
use crate::state::AppState;
use crate::telemetry::CorrelationId;

pub const TOKEN_HEADER: &str = "x-vault-token";

/// Client token from `X-Vault-Token`, falling back to a bearer credential.
pub fn client_token(headers: &HeaderMap) -> Option<&str> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
    };
    header(TOKEN_HEADER)
        .filter(|value| !value.is_empty())
        .or_else(|| {
            header(AUTHORIZATION.as_str())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        })
}

/// Mount-relative request path used for policy matching.
///
/// Percent escapes are decoded so rules see the same names the route
/// extractors hand to handlers. Escapes that do not decode to UTF-8 are
/// rejected.
pub fn request_path(path: &str) -> Result<Cow<'_, str>, AppError> {
    let path = path.strip_prefix("/v1/").unwrap_or(path);
    percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| AppError::bad_request("request path is not valid UTF-8"))
}

pub async fn http_layer(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    match authorize_request(&state, &req) {
        Ok(authorization) => {
            req.extensions_mut().insert(authorization);
            next.run(req).await
        }
        Err(err) => {
            let err = match req.extensions().get::<CorrelationId>() {
                Some(correlation) => attach_correlation(err, correlation),
                None => err,
            };
            err.into_response()
        }
    }
}

fn authorize_request(state: &AppState, req: &Request<Body>) -> Result<Authorization, AppError> {
    let path = request_path(req.uri().path())?;
    let path = path.as_ref();
    let Some(token) = client_token(req.headers()) else {
        debug!(path, "request without client token");
        return Err(AppError::permission_denied());
    };
    let list = ListQuery::from_uri(req.uri()).is_list();
    let request = AccessRequest::new(path, Verb::from_method(req.method().as_str()), list);

    state
        .broker
        .authorizer()
        .authorize(token, &request)
        .map_err(|err| match err {
            Error::Unavailable(_) => AppError::from(err),
            other => {
                debug!(path, error = %other, "request rejected");
                AppError::permission_denied()
            }
        })
}
