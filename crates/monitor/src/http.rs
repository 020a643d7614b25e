//! Pull-based exposition endpoint
//!
//! Mount [`router`] into an application's axum server to expose the default
//! client at [`DEFAULT_METRICS_PATH`]:
//!
//! ```no_run
//! # async fn run() -> std::io::Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
//! axum::serve(listener, pulsearc_monitor::http::router()).await
//! # }
//! ```
//!
//! Every scrape is itself counted in the scraped client's registry:
//! `promhttp_metric_handler_requests_total{code}` and
//! `promhttp_metric_handler_requests_in_flight`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{IntCounterVec, IntGauge, Opts, TEXT_FORMAT};
use tracing::{debug, warn};

use crate::client::Client;
use crate::global::{default_client, DEFAULT_METRICS_PATH};
use crate::registry::{is_already_registered, CollectorRegistry};

const SCRAPES_NAME: &str = "promhttp_metric_handler_requests_total";
const IN_FLIGHT_NAME: &str = "promhttp_metric_handler_requests_in_flight";

/// Scrape counters of one client
pub(crate) struct ScrapeMetrics {
    requests: IntCounterVec,
    in_flight: IntGauge,
}

impl ScrapeMetrics {
    /// Build and register the scrape collectors.
    ///
    /// `AlreadyReg` keeps the local collectors working unexposed; any other
    /// failure disables scrape accounting for the client.
    pub(crate) fn register(registry: &dyn CollectorRegistry) -> Option<Self> {
        let requests = IntCounterVec::new(
            Opts::new(SCRAPES_NAME, "Total number of scrapes by HTTP status code."),
            &["code"],
        )
        .ok()?;
        let in_flight = IntGauge::new(IN_FLIGHT_NAME, "Current number of scrapes being served.").ok()?;

        for code in ["200", "500"] {
            requests.with_label_values(&[code]);
        }

        for result in [
            registry.register(Box::new(requests.clone())),
            registry.register(Box::new(in_flight.clone())),
        ] {
            match result {
                Ok(()) => {}
                Err(err) if is_already_registered(&err) => {
                    debug!(error = %err, "scrape metrics already registered");
                }
                Err(err) => {
                    warn!(error = %err, "failed to register scrape metrics");
                    return None;
                }
            }
        }

        Some(Self { requests, in_flight })
    }
}

/// Router serving the default client at [`DEFAULT_METRICS_PATH`].
///
/// The default client is looked up per request, so a later
/// [`set_default`](crate::set_default) is picked up without rebuilding the
/// router.
#[must_use]
pub fn router() -> Router {
    Router::new().route(DEFAULT_METRICS_PATH, get(|| async { render(&default_client()) }))
}

/// Router serving `client` at `path`.
///
/// # Panics
/// Panics if `path` does not start with `/`.
#[must_use]
pub fn router_for(client: Client, path: &str) -> Router {
    Router::new().route(path, get(serve_client)).with_state(client)
}

async fn serve_client(State(client): State<Client>) -> Response {
    render(&client)
}

fn render(client: &Client) -> Response {
    let scrape = client.scrape_metrics();
    if let Some(scrape) = scrape {
        scrape.in_flight.inc();
    }

    let (code, response) = match client.encode_text() {
        Ok(body) => (StatusCode::OK, ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response()),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics snapshot");
            let code = StatusCode::INTERNAL_SERVER_ERROR;
            (code, (code, err.to_string()).into_response())
        }
    };

    if let Some(scrape) = scrape {
        scrape.in_flight.dec();
        scrape.requests.with_label_values(&[code.as_str()]).inc();
    }
    response
}
