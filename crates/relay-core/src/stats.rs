//! Channel statistics and their wire rendering.
//!
//! Stats bodies accompany every successful publisher response, encoded
//! according to the request's `Accept` header.

use serde::Serialize;

/// A snapshot of one channel's counters.
///
/// All fields are monotonic except `subscribers` and `queued`. Field order
/// matters: it is the order of the JSON rendering.
#[derive(Debug, Default, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Messages currently held in the history queue.
    pub queued: usize,
    /// Time of the last subscriber request, seconds since the epoch.
    pub last_requested: i64,
    /// Time of the last publish, seconds since the epoch.
    pub last_published: i64,
    /// Subscribers currently parked on the channel.
    pub subscribers: usize,
    /// Messages published since creation.
    pub published: u64,
    /// Messages handed to subscribers, parked or polling.
    pub delivered: u64,
    /// Creation time of the channel. Not part of the wire rendering.
    #[serde(skip)]
    pub created: i64,
}

/// Negotiated stats encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsFormat {
    /// The six-line human-readable template.
    Plain,
    /// A flat JSON object with raw epoch stamps.
    Json,
}

impl StatsFormat {
    /// Negotiate an encoding from an `Accept` header value.
    ///
    /// Valid accept types are `{text | application} / {plain | json}`. An
    /// unrecognized type falls back to `text/plain` wholesale; an
    /// unrecognized subtype keeps the type and falls back to `plain`. The
    /// returned string is the content-type to echo on the response.
    #[must_use]
    pub fn negotiate(accept: Option<&str>) -> (Self, String) {
        let accept = accept.unwrap_or("").trim().to_ascii_lowercase();
        let (typ, subtype) = match accept.split_once('/') {
            Some((t @ ("text" | "application"), s)) => (t, s),
            _ => ("text", "plain"),
        };
        let (format, subtype) = match subtype {
            "json" => (Self::Json, "json"),
            _ => (Self::Plain, "plain"),
        };
        (format, format!("{typ}/{subtype}"))
    }

    /// Render a stats snapshot.
    ///
    /// Plain mode reports the `last_*` stamps as ages relative to `now`,
    /// with `-1` meaning never. JSON mode reports them raw.
    #[must_use]
    pub fn render(self, stats: Stats, now: i64) -> String {
        match self {
            Self::Plain => {
                let age = |stamp: i64| if stamp > 0 { now - stamp } else { -1 };
                format!(
                    "queued messages: {}\n\
                     last requested: {} sec. ago (-1=never)\n\
                     last published: {} sec. ago (-1=never)\n\
                     active subscribers: {}\n\
                     total published: {}\n\
                     total delivered: {}",
                    stats.queued,
                    age(stats.last_requested),
                    age(stats.last_published),
                    stats.subscribers,
                    stats.published,
                    stats.delivered,
                )
            }
            // Stats is a flat struct of primitives; serialization cannot fail.
            Self::Json => serde_json::to_string(&stats).unwrap_or_default(),
        }
    }
}
