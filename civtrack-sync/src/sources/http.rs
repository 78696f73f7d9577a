//! Shared HTTP plumbing for the source adapters
//!
//! Redirects are followed by hand so every hop can be checked against the
//! endpoint shape the caller expects. Payloads are validated before parsing:
//! provider-side redirects to human-facing pages return HTML with a 200, and
//! that must fail as `UnexpectedContentType` rather than as a JSON parse error.

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Url};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};

use super::SourceError;
use civtrack_common::config::TomlConfig;

/// Transport settings shared by every adapter
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub user_agent: String,
}

impl HttpSettings {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            timeout: config.sync.request_timeout(),
            max_redirects: config.sync.max_redirects,
            user_agent: config.providers.user_agent.clone(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from_config(&TomlConfig::default())
    }
}

/// JSON GET client with manual redirect handling
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_redirects: usize,
}

impl HttpFetcher {
    pub fn new(settings: &HttpSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            max_redirects: settings.max_redirects,
        })
    }

    /// GET `url` and parse the JSON body
    ///
    /// `accept_redirect` is consulted for every redirect target before it is
    /// requested; returning an error stops immediately with that error.
    pub async fn get_json<T, G>(&self, url: Url, accept_redirect: G) -> Result<T, SourceError>
    where
        T: DeserializeOwned,
        G: Fn(&Url) -> Result<(), SourceError> + Send + Sync,
    {
        let started = Instant::now();
        let mut current = url;

        for hop in 0..=self.max_redirects {
            tracing::debug!(url = %current, hop, "GET");

            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| transport_error(e, &current))?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| SourceError::Http {
                        status: status.as_u16(),
                        url: current.to_string(),
                    })?;
                let next = current.join(location).map_err(|e| {
                    SourceError::InvalidUrl(format!("bad redirect '{}': {}", location, e))
                })?;

                accept_redirect(&next)?;

                tracing::debug!(from = %current, to = %next, status = status.as_u16(), "Following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(SourceError::Http {
                    status: status.as_u16(),
                    url: current.to_string(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response
                .bytes()
                .await
                .map_err(|e| transport_error(e, &current))?;

            validate_payload(content_type.as_deref(), &body, &current)?;

            let parsed = serde_json::from_slice(&body)
                .map_err(|e| SourceError::Parse(format!("{}: {}", current, e)))?;

            tracing::debug!(
                url = %current,
                bytes = body.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fetched JSON"
            );
            return Ok(parsed);
        }

        Err(SourceError::TooManyRedirects {
            url: current.to_string(),
            max: self.max_redirects,
        })
    }
}

/// Reject payloads that look like markup rather than structured data
pub fn validate_payload(
    content_type: Option<&str>,
    body: &[u8],
    url: &Url,
) -> Result<(), SourceError> {
    if let Some(ct) = content_type {
        let lowered = ct.to_ascii_lowercase();
        if lowered.contains("text/html") || lowered.contains("xhtml") {
            return Err(SourceError::UnexpectedContentType {
                url: url.to_string(),
                content_type: ct.to_string(),
            });
        }
    }

    let body = body.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(body);
    let first = body.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'<') {
        return Err(SourceError::UnexpectedContentType {
            url: url.to_string(),
            content_type: content_type.unwrap_or("markup").to_string(),
        });
    }

    Ok(())
}

fn transport_error(err: reqwest::Error, url: &Url) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout {
            url: url.to_string(),
        }
    } else {
        SourceError::Network(err.to_string())
    }
}
