//! Parliamentary-votes provider client
//!
//! - `GET {base}/{session}/ballots/json` lists a session's ballots
//! - `GET {base}/{session}/ballot/{id}/json` returns one ballot's votes
//!
//! An archived session is served as a redirect to some other page. Any
//! redirect whose target does not keep the endpoint shape for the same session
//! fails with `SessionUnavailable` before the target is requested.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use super::{BallotSource, HttpFetcher, HttpSettings, SourceError};
use crate::models::{BallotDetail, BallotListPage};

static LIST_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)/ballots/json/?$").expect("valid list path regex"));
static DETAIL_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d+)/ballot/[^/]+/json/?$").expect("valid detail path regex"));

pub struct BallotsClient {
    base_url: String,
    fetcher: HttpFetcher,
}

impl BallotsClient {
    pub fn new(base_url: &str, settings: &HttpSettings) -> Result<Self, SourceError> {
        Url::parse(base_url).map_err(|e| SourceError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fetcher: HttpFetcher::new(settings)?,
        })
    }

    pub fn list_url(&self, session: u32) -> Result<Url, SourceError> {
        self.endpoint(&format!("{}/ballots/json", session))
    }

    pub fn detail_url(&self, record_id: &str, session: u32) -> Result<Url, SourceError> {
        self.endpoint(&format!("{}/ballot/{}/json", session, record_id))
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        let raw = format!("{}/{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| SourceError::InvalidUrl(format!("{}: {}", raw, e)))
    }
}

/// Accept a redirect only when it keeps `pattern` for the same session
fn session_guard(pattern: &'static Regex, session: u32) -> impl Fn(&Url) -> Result<(), SourceError> {
    move |target: &Url| {
        let same_session = pattern
            .captures(target.path())
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            == Some(session);

        if same_session {
            Ok(())
        } else {
            tracing::warn!(session, location = %target, "Redirect leaves the session endpoint");
            Err(SourceError::SessionUnavailable {
                session,
                location: target.to_string(),
            })
        }
    }
}

#[async_trait]
impl BallotSource for BallotsClient {
    async fn fetch_list(&self, session: u32) -> Result<BallotListPage, SourceError> {
        let url = self.list_url(session)?;
        let page: BallotListPage = self
            .fetcher
            .get_json(url, session_guard(&LIST_PATH, session))
            .await?;

        tracing::info!(session, ballots = page.ballots.len(), "Fetched ballot list");
        Ok(page)
    }

    async fn fetch_detail(
        &self,
        record_id: &str,
        session: u32,
    ) -> Result<BallotDetail, SourceError> {
        let url = self.detail_url(record_id, session)?;
        let detail: BallotDetail = self
            .fetcher
            .get_json(url, session_guard(&DETAIL_PATH, session))
            .await?;

        tracing::debug!(session, ballot_id = %record_id, votes = detail.votes.len(), "Fetched ballot detail");
        Ok(detail)
    }

    fn canonical_url(&self, record_id: &str, session: u32) -> String {
        format!("{}/{}/ballot/{}", self.base_url, session, record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BallotsClient {
        BallotsClient::new("https://provider.test/api/", &HttpSettings::default()).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let client = client();
        assert_eq!(
            client.list_url(16).unwrap().as_str(),
            "https://provider.test/api/16/ballots/json"
        );
        assert_eq!(
            client.detail_url("1234", 16).unwrap().as_str(),
            "https://provider.test/api/16/ballot/1234/json"
        );
        assert_eq!(
            client.canonical_url("1234", 16),
            "https://provider.test/api/16/ballot/1234"
        );
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = BallotsClient::new("not a url", &HttpSettings::default());
        assert!(matches!(result, Err(SourceError::InvalidUrl(_))));
    }

    #[test]
    fn test_list_guard_accepts_same_session_shape() {
        let guard = session_guard(&LIST_PATH, 16);
        let https = Url::parse("https://other-host.test/api/16/ballots/json").unwrap();
        let slash = Url::parse("https://provider.test/16/ballots/json/").unwrap();
        assert!(guard(&https).is_ok());
        assert!(guard(&slash).is_ok());
    }

    #[test]
    fn test_list_guard_rejects_archive_page() {
        let guard = session_guard(&LIST_PATH, 12);
        let archive = Url::parse("https://provider.test/archives/legislature-12").unwrap();
        match guard(&archive) {
            Err(SourceError::SessionUnavailable { session, location }) => {
                assert_eq!(session, 12);
                assert!(location.contains("archives"));
            }
            other => panic!("expected SessionUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_list_guard_rejects_other_session() {
        let guard = session_guard(&LIST_PATH, 12);
        let moved = Url::parse("https://provider.test/16/ballots/json").unwrap();
        assert!(guard(&moved).is_err());
    }

    #[test]
    fn test_detail_guard() {
        let guard = session_guard(&DETAIL_PATH, 16);
        assert!(guard(&Url::parse("https://p.test/16/ballot/9/json").unwrap()).is_ok());
        assert!(guard(&Url::parse("https://p.test/16/ballots/json").unwrap()).is_err());
    }
}
