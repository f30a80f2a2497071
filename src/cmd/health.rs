//! `edgeward health`: query the status endpoint of a running node.
//!
//! Prints backend verdicts and cache statistics as formatted text, or
//! the raw JSON payload with `--json`.

use http_body_util::BodyExt;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::cli::HealthArgs;
use crate::error::EdgewardError;
use crate::health::StatusResponse;

pub async fn execute(args: HealthArgs) -> Result<(), EdgewardError> {
    let uri: hyper::Uri =
        args.url.parse().map_err(
            |e: hyper::http::uri::InvalidUri| EdgewardError::UriParse {
                source: Box::new(e),
            },
        )?;

    let connector = hyper_util::client::legacy::connect::HttpConnector::new();
    let client = Client::builder(TokioExecutor::new()).build(connector);

    let req = hyper::Request::builder()
        .uri(uri)
        .body(http_body_util::Full::new(bytes::Bytes::new()))
        .map_err(|e| EdgewardError::HttpRequest {
            source: Box::new(e),
        })?;

    let response = tokio::time::timeout(std::time::Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| EdgewardError::HttpRequest {
            source: "status request timed out after 10s".into(),
        })?
        .map_err(|e| EdgewardError::HttpRequest {
            source: Box::new(e),
        })?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| EdgewardError::HttpRequest {
            source: Box::new(e),
        })?
        .to_bytes();

    if !status.is_success() {
        return Err(EdgewardError::HealthCheckFailed(status));
    }

    if args.json {
        println!("{}", String::from_utf8_lossy(&body));
        return Ok(());
    }

    match serde_json::from_slice::<StatusResponse>(&body) {
        Ok(report) => print!("{}", render(&report, &args.url)),
        Err(e) => {
            eprintln!("Failed to parse status response: {e}");
            println!("{}", String::from_utf8_lossy(&body));
        }
    }

    Ok(())
}

fn render(report: &StatusResponse, url: &str) -> String {
    let mark = if report.status == "healthy" { '\u{2713}' } else { '!' };
    let mut out = format!(
        "{mark} {} is {} ({url})\n  uptime:         {}\n  config:         {} {} (loaded {}s ago)\n\n",
        report.identity,
        report.status,
        format_uptime(report.uptime_seconds),
        report.config.source,
        report.config.version,
        report.config.loaded_ago_seconds,
    );

    for b in &report.backends {
        let verdict = if b.healthy { "healthy" } else { "sick" };
        let probed = b
            .last_probed_ago_ms
            .map_or_else(|| "never probed".to_string(), |ms| format!("probed {ms}ms ago"));
        out.push_str(&format!(
            "  {:<10} {:<9} {:<21} {verdict:<7} {}/{} {probed}\n",
            b.id, b.role, b.address, b.successes, b.window
        ));
    }

    let s = &report.stats;
    out.push_str(&format!(
        "\n  cache:          {} objects, {} saint entries, {} fetches in flight\n",
        report.cache.objects, report.cache.saint_entries, report.cache.fetches_in_flight
    ));
    out.push_str(&format!(
        "  requests:       {} hit, {} stale, {} miss, {} pass, {} synthetic\n",
        s.hits, s.stale, s.misses, s.passes, s.synthetic
    ));
    out.push_str(&format!(
        "                  {} restarts, {} purges\n",
        s.restarts, s.purges
    ));
    out
}

fn format_uptime(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
