//! Error synthesis: what a [`Fault`] turns into.
//!
//! ```text
//!               restarts < cap
//! backend fault ---------------> Retrying ---> (classify again)
//!        |       restarts = cap
//!        +---------------------> SyntheticPage --+
//! code 801 --------------------> ForceRedirect --+--> Delivered
//! purge not allowed -----------> Refused --------+
//! ```

use axum::http::{header, uri::Authority, HeaderValue, StatusCode};
use bytes::Bytes;

use super::context::{RequestContext, MAX_RESTARTS};
use super::deliver::EdgeResponse;
use super::Fault;

pub const ERROR_PAGE_CONTENT_TYPE: &str = "text/html; charset=utf-8";

pub const ERROR_PAGE: &str = "<!DOCTYPE html>
<html>
  <head>
    <meta charset=\"utf-8\">
    <title>Service unavailable</title>
  </head>
  <body>
    <h1>Service unavailable</h1>
    <p>We are having trouble serving this page right now. Please try again shortly.</p>
  </body>
</html>
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    Retrying,
    ForceRedirect,
    Refused,
    SyntheticPage,
}

impl ErrorState {
    #[must_use]
    pub const fn enter(fault: &Fault, restarts: u8) -> Self {
        match fault {
            Fault::Forbidden => Self::Refused,
            Fault::InsecureTransport => Self::ForceRedirect,
            Fault::Unavailable { .. } | Fault::Transport { .. } | Fault::Upstream { .. } => {
                if restarts < MAX_RESTARTS {
                    Self::Retrying
                } else {
                    Self::SyntheticPage
                }
            }
        }
    }

    /// The terminal response for this state; `None` while retrying.
    #[must_use]
    pub fn render(self, ctx: &RequestContext) -> Option<EdgeResponse> {
        match self {
            Self::Retrying => None,
            Self::Refused => Some(EdgeResponse::synthetic(
                StatusCode::FORBIDDEN,
                Some("text/plain; charset=utf-8"),
                Bytes::from_static(b"Forbidden"),
            )),
            Self::ForceRedirect => Some(redirect_to_https(ctx)),
            Self::SyntheticPage => Some(EdgeResponse::synthetic(
                StatusCode::SERVICE_UNAVAILABLE,
                Some(ERROR_PAGE_CONTENT_TYPE),
                Bytes::from_static(ERROR_PAGE.as_bytes()),
            )),
        }
    }
}

fn redirect_to_https(ctx: &RequestContext) -> EdgeResponse {
    let host = ctx
        .host()
        .and_then(|h| h.parse::<Authority>().ok())
        .map(|a| a.host().to_string())
        .unwrap_or_default();
    let path = ctx.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let location = format!("https://{host}{path}");

    let mut response = EdgeResponse::synthetic(StatusCode::MOVED_PERMANENTLY, None, Bytes::new());
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            response.headers.insert(header::LOCATION, value);
        }
        Err(e) => {
            tracing::warn!(location = %location, error = %e, "cannot build redirect location");
        }
    }
    response
}
