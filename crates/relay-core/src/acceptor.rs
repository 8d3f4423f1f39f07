//! Acceptors: pre-flight mapping from a request to a channel id.
//!
//! An acceptor both authenticates a publisher/subscriber request and
//! extracts the channel id it targets. Returning `None` rejects the
//! request; the handlers answer such requests with a 404. Authentication
//! policies are layered here, by implementing the trait (or using a bare
//! closure) around whatever the deployment needs.

use http::request::Parts;

/// Maps a request to the channel it addresses.
pub trait Acceptor: Send + Sync {
    /// The channel id for this request, or `None` to reject it.
    fn resolve(&self, parts: &Parts) -> Option<String>;
}

impl<F> Acceptor for F
where
    F: Fn(&Parts) -> Option<String> + Send + Sync,
{
    fn resolve(&self, parts: &Parts) -> Option<String> {
        self(parts)
    }
}

/// Accepts every request onto one fixed channel.
#[derive(Debug, Clone)]
pub struct StaticAcceptor {
    channel: String,
}

impl StaticAcceptor {
    /// Create an acceptor that always resolves to `channel`.
    #[must_use]
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

impl Acceptor for StaticAcceptor {
    fn resolve(&self, _parts: &Parts) -> Option<String> {
        Some(self.channel.clone())
    }
}

/// Accepts every request, reading the channel id from a query parameter.
///
/// A missing or empty parameter rejects the request.
#[derive(Debug, Clone)]
pub struct QueryParamAcceptor {
    param: String,
}

impl QueryParamAcceptor {
    /// Create an acceptor reading the channel id from `param`.
    #[must_use]
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl Acceptor for QueryParamAcceptor {
    fn resolve(&self, parts: &Parts) -> Option<String> {
        let query = parts.uri.query().unwrap_or("");
        form_urlencoded::parse(query.as_bytes())
            .find(|(name, _)| name == self.param.as_str())
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}
