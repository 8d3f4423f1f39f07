//! Publisher and subscriber endpoints.
//!
//! Both endpoints resolve the target channel through the relay's acceptor
//! and answer with plain HTTP semantics: publisher responses carry a stats
//! body negotiated from the `Accept` header, subscriber responses carry the
//! delivered message with its `Etag` and `Last-Modified` stamp.

use crate::config::Config;
use crate::metrics::{self, ParkedPollGuard};
use anyhow::Result;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use relay_core::{Channel, Message, QueryParamAcceptor, Relay, StatsFormat, Subscription};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const VARY_VALUE: &str = "If-None-Match, If-Modified-Since";

/// Shared server state.
pub struct AppState {
    /// The channel engine.
    pub relay: Arc<Relay>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with the query-parameter acceptor from the
    /// configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let acceptor = QueryParamAcceptor::new(config.endpoints.channel_param.clone());
        Self {
            relay: Relay::new(acceptor, config.relay_config()),
            config,
        }
    }
}

/// Build the relay router: publisher and subscriber endpoints plus health.
#[must_use]
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.endpoints.publisher_path, any(publisher_handler))
        .route(
            &state.config.endpoints.subscriber_path,
            any(subscriber_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Spawn the garbage collection tick when the configuration asks for one.
pub fn spawn_gc(relay: Arc<Relay>) {
    if !relay.gc_enabled() {
        return;
    }
    let period = relay.config().gc_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tick.tick().await;
            let evicted = relay.gc();
            if evicted > 0 {
                metrics::record_evictions(evicted);
            }
            metrics::set_active_channels(relay.len());
        }
    });
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    spawn_gc(Arc::clone(&state.relay));

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Relay listening on {}", addr);
    info!(
        publisher = %config.endpoints.publisher_path,
        subscriber = %config.endpoints.subscriber_path,
        "Endpoints mounted"
    );

    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Publisher endpoint.
///
/// - GET     Yields a 404 if the channel does not exist, 200 otherwise
/// - PUT     Creates the channel if needed and yields 200
/// - POST    Publishes the request body to the channel (creating it if
///           needed); 201 when at least one parked subscriber received the
///           message immediately, 202 when it was only queued
/// - DELETE  Deletes the channel, waking parked subscribers with a 410;
///           200 if the channel existed, 404 otherwise
///
/// Any other method is answered with a 405. Every 2xx response body is the
/// channel's stats in the encoding requested via the `Accept` header.
async fn publisher_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let Some(cid) = state.relay.accept(&parts) else {
        warn!(uri = %parts.uri, "Publisher request rejected by acceptor");
        return StatusCode::NOT_FOUND.into_response();
    };

    match parts.method {
        Method::GET => match state.relay.get(&cid) {
            Some(channel) => {
                debug!(channel = %cid, "Channel information retrieved");
                stats_response(StatusCode::OK, &channel, &parts.headers)
            }
            None => {
                debug!(channel = %cid, "Channel information requested for unknown channel");
                StatusCode::NOT_FOUND.into_response()
            }
        },

        Method::PUT => {
            let (channel, created) = state.relay.channel(&cid);
            if created {
                info!(channel = %cid, "Channel created");
                metrics::record_channel_created();
                metrics::set_active_channels(state.relay.len());
            } else {
                debug!(channel = %cid, "Channel already exists");
            }
            stats_response(StatusCode::OK, &channel, &parts.headers)
        }

        Method::POST => {
            let payload = match axum::body::to_bytes(body, state.config.limits.max_body_bytes).await
            {
                Ok(payload) => payload,
                Err(e) => {
                    error!(channel = %cid, error = %e, "Failed to read publish body");
                    metrics::record_error("body_read");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            };

            let content_type = state.relay.config().content_type.clone().or_else(|| {
                parts
                    .headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            });

            let (channel, created) = state.relay.channel(&cid);
            if created {
                info!(channel = %cid, "Channel created");
                metrics::record_channel_created();
                metrics::set_active_channels(state.relay.len());
            }

            let delivered = channel.publish(Message::new(200, content_type, payload), true);
            metrics::record_publish(delivered);

            let status = if delivered > 0 {
                debug!(channel = %cid, delivered, "Message published and delivered");
                StatusCode::CREATED
            } else {
                debug!(channel = %cid, "Message queued");
                StatusCode::ACCEPTED
            };
            stats_response(status, &channel, &parts.headers)
        }

        Method::DELETE => match state.relay.delete(&cid) {
            Some(channel) => {
                metrics::set_active_channels(state.relay.len());
                stats_response(StatusCode::OK, &channel, &parts.headers)
            }
            None => {
                debug!(channel = %cid, "Delete of unknown channel");
                StatusCode::NOT_FOUND.into_response()
            }
        },

        _ => {
            warn!(channel = %cid, method = %parts.method, "Unsupported publisher method");
            StatusCode::METHOD_NOT_ALLOWED.into_response()
        }
    }
}

/// Subscriber endpoint. GET only.
///
/// `If-Modified-Since` and `If-None-Match` select the requested message; in
/// their absence the oldest queued message is served. When nothing is
/// available and long polling is configured, the request parks until a
/// publish arrives or the poll timeout fires (304). Responses carry `Etag`
/// and `Last-Modified` for the client's next request, and always `Vary` on
/// the two conditional headers.
async fn subscriber_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let (parts, _body) = req.into_parts();

    if parts.method != Method::GET {
        warn!(method = %parts.method, "Non-GET subscriber request");
        return with_vary(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let Some(cid) = state.relay.accept(&parts) else {
        warn!(uri = %parts.uri, "Subscriber request rejected by acceptor");
        return with_vary(StatusCode::NOT_FOUND.into_response());
    };

    let since = parts
        .headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
        .unwrap_or(0);
    let etag = parts
        .headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);

    let channel = match state.relay.get(&cid) {
        Some(channel) => channel,
        None if state.relay.config().allow_channel_creation => {
            let (channel, created) = state.relay.channel(&cid);
            if created {
                info!(channel = %cid, "Channel created by subscriber");
                metrics::record_channel_created();
                metrics::set_active_channels(state.relay.len());
            }
            channel
        }
        None => {
            warn!(channel = %cid, "Subscription to a non-existent channel");
            return with_vary(StatusCode::FORBIDDEN.into_response());
        }
    };

    debug!(channel = %cid, since, etag, "New subscription");

    let message = match channel.subscribe(since, etag) {
        Subscription::Ready(message) => {
            metrics::record_delivery();
            Some(message)
        }
        Subscription::Empty => None,
        Subscription::Parked(slot) => {
            let _parked = ParkedPollGuard::new();
            let token = slot.token();
            let poll_timeout = state.relay.config().poll_timeout;
            if poll_timeout.is_zero() {
                slot.recv().await
            } else {
                match tokio::time::timeout(poll_timeout, slot.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        channel.unsubscribe(token);
                        metrics::record_poll_timeout();
                        debug!(channel = %cid, "Subscription timed out");
                        None
                    }
                }
            }
        }
    };

    match message {
        Some(message) => {
            debug!(channel = %cid, status = message.status, "Delivering message");
            with_vary(message_response(&message))
        }
        None => with_vary(StatusCode::NOT_MODIFIED.into_response()),
    }
}

fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::VARY, HeaderValue::from_static(VARY_VALUE));
    response
}

/// Render a channel's stats as the body of a publisher response, encoded
/// per the request's `Accept` header.
fn stats_response(status: StatusCode, channel: &Channel, headers: &HeaderMap) -> Response {
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let (format, content_type) = StatsFormat::negotiate(accept);
    let body = format.render(channel.stats(), Utc::now().timestamp());
    (status, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

/// Render a delivered message, stamping it for the client's next request.
fn message_response(message: &Message) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(message.status).unwrap_or(StatusCode::OK))
        .header(header::ETAG, message.etag().to_string())
        .header(header::LAST_MODIFIED, http_date(message.time()));
    if let Some(content_type) = &message.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    match builder.body(Body::from(message.payload.clone())) {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to render message response");
            metrics::record_error("render");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Parse an HTTP-date header value into epoch seconds.
fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.timestamp())
}

/// Format epoch seconds as an HTTP-date.
fn http_date(seconds: i64) -> String {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .map(|date| date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_date_round_trip() {
        let formatted = http_date(784_111_777);
        assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date(&formatted), Some(784_111_777));
    }

    #[test]
    fn test_parse_http_date_garbage() {
        assert_eq!(parse_http_date("not a date"), None);
        assert_eq!(parse_http_date(""), None);
    }

    #[test]
    fn test_http_date_epoch() {
        // Synthetic messages carry zero stamps.
        assert_eq!(http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
