//! Integration tests for the relay HTTP surface.
//!
//! Each test serves the real router on an ephemeral port and drives it with
//! a plain HTTP client: publisher lifecycle, conditional polling, long-poll
//! delivery and timeout, concurrency conflicts, and channel teardown.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use relay_server::config::Config;
use relay_server::handlers::{app, AppState};
use tokio::net::TcpListener;

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.relay.polling_timeout_ms = 500;
    config.relay.gc_interval_secs = 0;
    config.metrics.enabled = false;
    config
}

async fn serve(config: Config) -> String {
    init_tracing();
    let state = Arc::new(AppState::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn publisher_lifecycle() {
    let base = serve(test_config()).await;
    let client = reqwest::Client::new();

    // No channel parameter: the acceptor rejects the request.
    let res = client.get(format!("{base}/pub")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 404);

    // Unknown channel.
    let res = client
        .get(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);

    // Create, with a plain stats body.
    let res = client
        .put(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "text/plain"
    );
    let body = res.text().await.unwrap();
    assert!(body.starts_with("queued messages: 0\n"), "body: {body}");
    assert!(body.contains("last published: -1 sec. ago"));

    // Now visible to GET; PUT again touches, does not reset.
    let res = client
        .get(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    // Unsupported method.
    let res = client
        .patch(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 405);

    // Delete, then delete again.
    let res = client
        .delete(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let res = client
        .delete(format!("{base}/pub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn post_then_conditional_poll() {
    let base = serve(test_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/pub?channel=t"))
        .header("content-type", "application/json")
        .body(r#"{"n":1}"#)
        .send()
        .await
        .unwrap();
    // Nobody parked: queued only.
    assert_eq!(res.status().as_u16(), 202);
    assert!(res.text().await.unwrap().starts_with("queued messages: 1\n"));

    // No conditional headers: the oldest queued message is served.
    let res = client
        .get(format!("{base}/sub?channel=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(
        res.headers().get("vary").unwrap(),
        "If-None-Match, If-Modified-Since"
    );
    let etag = res.headers().get("etag").unwrap().to_str().unwrap().to_string();
    let last_modified = res
        .headers()
        .get("last-modified")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(res.text().await.unwrap(), r#"{"n":1}"#);

    // Stamped re-poll parks and times out with a 304.
    let res = client
        .get(format!("{base}/sub?channel=t"))
        .header("if-none-match", etag)
        .header("if-modified-since", last_modified)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 304);
    assert_eq!(
        res.headers().get("vary").unwrap(),
        "If-None-Match, If-Modified-Since"
    );
}

#[tokio::test]
async fn long_poll_delivery() {
    let mut config = test_config();
    config.relay.polling_timeout_ms = 5_000;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/pub?channel=live"))
        .send()
        .await
        .unwrap();

    let subscriber = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/sub?channel=live"))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let res = client
        .post(format!("{base}/pub?channel=live"))
        .body("breaking news")
        .send()
        .await
        .unwrap();
    // The parked subscriber received it in the same instant.
    assert_eq!(res.status().as_u16(), 201);

    let res = subscriber.await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "breaking news");
}

#[tokio::test]
async fn delete_wakes_parked_subscriber_with_gone() {
    let mut config = test_config();
    config.relay.polling_timeout_ms = 5_000;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/pub?channel=doomed"))
        .send()
        .await
        .unwrap();

    let subscriber = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/sub?channel=doomed"))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let res = client
        .delete(format!("{base}/pub?channel=doomed"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);

    let res = subscriber.await.unwrap();
    assert_eq!(res.status().as_u16(), 410);
    // Synthetics still carry the stamp headers, zeroed.
    assert_eq!(res.headers().get("etag").unwrap(), "0");
    assert_eq!(res.text().await.unwrap(), "");

    // And the channel is gone from the map.
    let res = client
        .get(format!("{base}/pub?channel=doomed"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 404);
}

#[tokio::test]
async fn filo_turns_second_subscriber_away() {
    let mut config = test_config();
    config.relay.concurrency_mode = relay_core::ConcurrencyMode::Filo;
    config.relay.polling_timeout_ms = 5_000;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/pub?channel=solo"))
        .send()
        .await
        .unwrap();

    let first = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/sub?channel=solo"))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    // The newcomer conflicts immediately; the parked one is unaffected.
    let res = client
        .get(format!("{base}/sub?channel=solo"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 409);

    let res = client
        .post(format!("{base}/pub?channel=solo"))
        .body("for the first")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);

    let res = first.await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "for the first");
}

#[tokio::test]
async fn lifo_displaces_parked_subscribers() {
    let mut config = test_config();
    config.relay.concurrency_mode = relay_core::ConcurrencyMode::Lifo;
    config.relay.polling_timeout_ms = 5_000;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    client
        .put(format!("{base}/pub?channel=latest"))
        .send()
        .await
        .unwrap();

    let first = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/sub?channel=latest"))
                .send()
                .await
                .unwrap()
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = {
        let client = client.clone();
        let base = base.clone();
        tokio::spawn(async move {
            client
                .get(format!("{base}/sub?channel=latest"))
                .send()
                .await
                .unwrap()
        })
    };

    // The earlier subscriber is kicked with a conflict.
    let res = first.await.unwrap();
    assert_eq!(res.status().as_u16(), 409);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let res = client
        .post(format!("{base}/pub?channel=latest"))
        .body("for the latest")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 201);

    let res = second.await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(res.text().await.unwrap(), "for the latest");
}

#[tokio::test]
async fn subscriber_edges() {
    let base = serve(test_config()).await;
    let client = reqwest::Client::new();

    // Non-GET.
    let res = client.post(format!("{base}/sub?channel=t")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 405);
    assert_eq!(
        res.headers().get("vary").unwrap(),
        "If-None-Match, If-Modified-Since"
    );

    // Acceptor rejection.
    let res = client.get(format!("{base}/sub")).send().await.unwrap();
    assert_eq!(res.status().as_u16(), 404);

    // Channel creation disallowed for subscribers by default.
    let res = client
        .get(format!("{base}/sub?channel=missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 403);
}

#[tokio::test]
async fn subscriber_channel_creation_with_interval_polling() {
    let mut config = test_config();
    config.relay.allow_channel_creation = true;
    config.relay.polling_mechanism = relay_core::PollingMechanism::Interval;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    // Interval polling on a fresh channel answers immediately.
    let res = client
        .get(format!("{base}/sub?channel=fresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 304);

    // The subscriber's request created the channel.
    let res = client
        .get(format!("{base}/pub?channel=fresh"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
}

#[tokio::test]
async fn stats_bodies() {
    let base = serve(test_config()).await;
    let client = reqwest::Client::new();

    for n in 0..2 {
        let res = client
            .post(format!("{base}/pub?channel=stats"))
            .body(format!("m{n}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 202);
    }

    let res = client
        .get(format!("{base}/pub?channel=stats"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status().as_u16(), 200);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/json"
    );
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["queued"], 2);
    assert_eq!(stats["published"], 2);
    assert_eq!(stats["delivered"], 0);
    assert_eq!(stats["subscribers"], 0);
    assert_eq!(stats["lastRequested"], 0);
    assert!(stats["lastPublished"].as_i64().unwrap() > 0);

    // An unknown Accept subtype falls back to the plain template.
    let res = client
        .get(format!("{base}/pub?channel=stats"))
        .header("accept", "application/xml")
        .send()
        .await
        .unwrap();
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "application/plain"
    );
    assert!(res.text().await.unwrap().starts_with("queued messages: 2\n"));
}

#[tokio::test]
async fn health_endpoint() {
    let base = serve(test_config()).await;
    let res = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(res.status().as_u16(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}
