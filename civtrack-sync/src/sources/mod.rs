//! Source adapters for the external datasets
//!
//! Each adapter returns either a fully parsed structure or a typed
//! [`SourceError`]; partial or garbled payloads are never handed upward.
//! Adapters never retry: retry policy belongs to the orchestrator.

pub mod ballots_client;
pub mod graph_client;
pub mod http;
pub mod rate_limiter;

pub use ballots_client::BallotsClient;
pub use graph_client::GraphClient;
pub use http::{HttpFetcher, HttpSettings};
pub use rate_limiter::RateLimiter;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use thiserror::Error;

use crate::models::{BallotDetail, BallotListPage};

/// Source adapter errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// A redirect pointed away from the expected endpoint shape: the session is
    /// archived or not published
    #[error("session {session} unavailable (redirected to {location})")]
    SessionUnavailable { session: u32, location: String },

    /// Payload looked like markup instead of JSON
    #[error("unexpected content type '{content_type}' from {url}")]
    UnexpectedContentType { url: String, content_type: String },

    #[error("timeout")]
    Timeout { url: String },

    #[error("too many redirects (more than {max}) from {url}")]
    TooManyRedirects { url: String, max: usize },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl SourceError {
    /// Failures worth another attempt by the orchestrator
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout { .. } | SourceError::Network(_) => true,
            SourceError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Parliamentary-votes provider
#[async_trait]
pub trait BallotSource: Send + Sync {
    /// List every ballot of a legislative session
    async fn fetch_list(&self, session: u32) -> Result<BallotListPage, SourceError>;

    /// Fetch the individual votes of one ballot
    async fn fetch_detail(&self, record_id: &str, session: u32)
        -> Result<BallotDetail, SourceError>;

    /// Public page of a ballot, used when the list carries no `sourceUrl`
    fn canonical_url(&self, record_id: &str, session: u32) -> String;
}

/// Knowledge graph holding death dates
#[async_trait]
pub trait DeathDateSource: Send + Sync {
    /// Death dates keyed by external identifier
    ///
    /// Ids without a known death date, and ids of failed batches, are simply
    /// absent from the map.
    async fn fetch_death_dates(&self, external_ids: &[String]) -> HashMap<String, NaiveDate>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_displays_as_timeout() {
        let err = SourceError::Timeout {
            url: "http://localhost/16/ballot/2/json".to_string(),
        };
        assert_eq!(err.to_string(), "timeout");
        assert!(err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        let server_error = SourceError::Http {
            status: 503,
            url: String::new(),
        };
        let not_found = SourceError::Http {
            status: 404,
            url: String::new(),
        };
        let markup = SourceError::UnexpectedContentType {
            url: String::new(),
            content_type: "text/html".to_string(),
        };

        assert!(server_error.is_transient());
        assert!(!not_found.is_transient());
        assert!(!markup.is_transient());
        assert!(!SourceError::Parse("eof".to_string()).is_transient());
    }
}
