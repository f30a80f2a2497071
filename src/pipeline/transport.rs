//! Sending one request to one backend.
//!
//! The whole exchange, headers and body, is bounded by the backend's
//! request timeout. A timeout is reported like any other transport
//! failure.

use std::time::Instant;

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};

use super::headers::strip_response_hop_by_hop;
use crate::backend::Backend;
use crate::server::HttpClient;

#[derive(Debug)]
pub struct BackendRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct BackendResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub latency_ms: u64,
}

#[allow(clippy::cast_possible_truncation)]
pub async fn send(
    client: &HttpClient,
    backend: &Backend,
    request: &BackendRequest,
) -> Result<BackendResponse, String> {
    let start = Instant::now();
    let path = request.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{path}", backend.base_url());

    let mut builder = hyper::Request::builder().method(request.method.clone()).uri(&url);
    for (key, value) in &request.headers {
        builder = builder.header(key, value);
    }
    let req = builder
        .body(Full::new(request.body.clone()))
        .map_err(|e| e.to_string())?;

    let exchange = async {
        let response = client.request(req).await.map_err(|e| e.to_string())?;
        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("body read error: {e}"))?
            .to_bytes();
        strip_response_hop_by_hop(&mut headers, &request.method);
        Ok::<_, String>((status, headers, body))
    };

    let result = tokio::time::timeout(backend.timeout, exchange).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok((status, headers, body))) => {
            tracing::info!(
                correlation_id = %request.correlation_id,
                backend = %backend.name,
                status = status.as_u16(),
                latency_ms,
                "backend responded"
            );
            Ok(BackendResponse {
                status,
                headers,
                body,
                latency_ms,
            })
        }
        Ok(Err(error)) => {
            tracing::warn!(
                correlation_id = %request.correlation_id,
                backend = %backend.name,
                error = %error,
                latency_ms,
                "backend request failed"
            );
            Err(error)
        }
        Err(_) => {
            tracing::warn!(
                correlation_id = %request.correlation_id,
                backend = %backend.name,
                latency_ms,
                "backend request timed out"
            );
            Err("request timed out".into())
        }
    }
}
