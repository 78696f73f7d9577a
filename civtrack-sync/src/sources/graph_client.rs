//! Knowledge-graph client for death dates
//!
//! Ids are sent in batches through `GET {sparql}?query=…&format=json`. Queries
//! match persons on one fixed identifier property and return their date of
//! death (P570). Each batch waits on the injected [`RateLimiter`]. A failed
//! batch is logged and contributes nothing; remaining batches still run.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use super::{DeathDateSource, HttpFetcher, HttpSettings, RateLimiter, SourceError};

const DATE_OF_DEATH_PROPERTY: &str = "P570";

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<DeathDateBinding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeathDateBinding {
    person: Option<SparqlTerm>,
    external_id: SparqlTerm,
    death_date: SparqlTerm,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

pub struct GraphClient {
    sparql_url: Url,
    property: String,
    batch_size: usize,
    fetcher: HttpFetcher,
    rate_limiter: Arc<RateLimiter>,
}

impl GraphClient {
    pub fn new(
        sparql_url: &str,
        property: &str,
        batch_size: usize,
        settings: &HttpSettings,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, SourceError> {
        let sparql_url = Url::parse(sparql_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{}: {}", sparql_url, e)))?;

        Ok(Self {
            sparql_url,
            property: property.to_string(),
            batch_size: batch_size.max(1),
            fetcher: HttpFetcher::new(settings)?,
            rate_limiter,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// SPARQL selecting `?person ?externalId ?deathDate` for the given ids
    pub fn build_query(&self, external_ids: &[String]) -> String {
        let values = external_ids
            .iter()
            .map(|id| format!("\"{}\"", escape_literal(id)))
            .collect::<Vec<_>>()
            .join(" ");

        format!(
            "SELECT ?person ?externalId ?deathDate WHERE {{ \
             VALUES ?externalId {{ {values} }} \
             ?person wdt:{property} ?externalId . \
             ?person wdt:{death} ?deathDate . }}",
            values = values,
            property = self.property,
            death = DATE_OF_DEATH_PROPERTY,
        )
    }

    fn query_url(&self, query: &str) -> Url {
        let mut url = self.sparql_url.clone();
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("format", "json");
        url
    }

    async fn fetch_batch(&self, external_ids: &[String]) -> Result<HashMap<String, NaiveDate>, SourceError> {
        self.rate_limiter.wait().await;

        let url = self.query_url(&self.build_query(external_ids));
        let response: SparqlResponse = self.fetcher.get_json(url, |_| Ok(())).await?;

        let mut dates = HashMap::new();
        for binding in response.results.bindings {
            let Some(date) = parse_graph_date(&binding.death_date.value) else {
                tracing::warn!(
                    external_id = %binding.external_id.value,
                    person = binding.person.as_ref().map(|p| p.value.as_str()).unwrap_or("-"),
                    value = %binding.death_date.value,
                    "Unparseable death date in graph response"
                );
                continue;
            };

            // Several statements for one person: keep the earliest
            dates
                .entry(binding.external_id.value)
                .and_modify(|existing: &mut NaiveDate| {
                    if date < *existing {
                        *existing = date;
                    }
                })
                .or_insert(date);
        }

        Ok(dates)
    }
}

#[async_trait]
impl DeathDateSource for GraphClient {
    async fn fetch_death_dates(&self, external_ids: &[String]) -> HashMap<String, NaiveDate> {
        let mut result = HashMap::new();
        let total_batches = external_ids.len().div_ceil(self.batch_size);

        for (batch, ids) in external_ids.chunks(self.batch_size).enumerate() {
            match self.fetch_batch(ids).await {
                Ok(dates) => {
                    tracing::debug!(batch, total_batches, found = dates.len(), "Death-date batch fetched");
                    result.extend(dates);
                }
                Err(e) => {
                    tracing::warn!(
                        batch,
                        total_batches,
                        ids = ids.len(),
                        error = %e,
                        "Death-date batch failed; continuing with remaining batches"
                    );
                }
            }
        }

        tracing::info!(
            requested = external_ids.len(),
            found = result.len(),
            "Death dates fetched from knowledge graph"
        );
        result
    }
}

/// `1952-07-14T00:00:00Z` / `+1952-07-14T00:00:00Z` → 1952-07-14
fn parse_graph_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim_start_matches('+');
    let date_part = value.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> GraphClient {
        GraphClient::new(
            "https://graph.test/sparql",
            "P4123",
            50,
            &HttpSettings::default(),
            Arc::new(RateLimiter::new(Duration::ZERO)),
        )
        .unwrap()
    }

    #[test]
    fn test_query_lists_every_id_on_fixed_property() {
        let query = client().build_query(&["PA1".to_string(), "PA2".to_string()]);
        assert!(query.contains("VALUES ?externalId { \"PA1\" \"PA2\" }"));
        assert!(query.contains("wdt:P4123 ?externalId"));
        assert!(query.contains("wdt:P570 ?deathDate"));
    }

    #[test]
    fn test_query_escapes_quotes() {
        let query = client().build_query(&["a\"b".to_string()]);
        assert!(query.contains("\"a\\\"b\""));
    }

    #[test]
    fn test_query_url_carries_format() {
        let client = client();
        let url = client.query_url("SELECT 1");
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("format").map(String::as_str), Some("json"));
        assert_eq!(pairs.get("query").map(String::as_str), Some("SELECT 1"));
    }

    #[test]
    fn test_binding_person_is_optional() {
        let response: SparqlResponse = serde_json::from_value(serde_json::json!({
            "results": { "bindings": [
                {
                    "person": { "type": "uri", "value": "http://www.wikidata.org/entity/Q1" },
                    "externalId": { "type": "literal", "value": "PA1" },
                    "deathDate": { "type": "literal", "value": "2021-02-03T00:00:00Z" }
                },
                {
                    "externalId": { "type": "literal", "value": "PA2" },
                    "deathDate": { "type": "literal", "value": "2020-01-01T00:00:00Z" }
                }
            ]}
        }))
        .unwrap();

        let bindings = response.results.bindings;
        assert_eq!(
            bindings[0].person.as_ref().map(|p| p.value.as_str()),
            Some("http://www.wikidata.org/entity/Q1")
        );
        assert!(bindings[1].person.is_none());
        assert_eq!(bindings[1].external_id.value, "PA2");
    }

    #[test]
    fn test_parse_graph_dates() {
        assert_eq!(
            parse_graph_date("2021-02-03T00:00:00Z"),
            NaiveDate::from_ymd_opt(2021, 2, 3)
        );
        assert_eq!(
            parse_graph_date("+1950-12-31T00:00:00Z"),
            NaiveDate::from_ymd_opt(1950, 12, 31)
        );
        assert_eq!(parse_graph_date("unknown"), None);
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let client = GraphClient::new(
            "https://graph.test/sparql",
            "P4123",
            0,
            &HttpSettings::default(),
            Arc::new(RateLimiter::new(Duration::ZERO)),
        )
        .unwrap();
        assert_eq!(client.batch_size(), 1);
    }
}
