//! Remote records from the parliamentary-votes provider
//!
//! Field names follow the provider's camelCase JSON. These are cached
//! projections; the provider stays the source of truth.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// `GET /{session}/ballots/json` response body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BallotListPage {
    #[serde(default)]
    pub ballots: Vec<BallotSummary>,
}

/// One ballot ("scrutin") as listed by the provider
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BallotSummary {
    /// Provider identifier, unique within a session (numeric or string on the wire)
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub votes_for: u32,
    #[serde(default)]
    pub votes_against: u32,
    #[serde(default)]
    pub votes_abstain: u32,
    pub outcome: BallotOutcome,
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Binary result of a ballot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BallotOutcome {
    #[serde(alias = "adopte", alias = "adopté")]
    Adopted,
    #[serde(alias = "rejete", alias = "rejeté")]
    Rejected,
}

impl BallotOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BallotOutcome::Adopted => "adopted",
            BallotOutcome::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "adopted" => Some(BallotOutcome::Adopted),
            "rejected" => Some(BallotOutcome::Rejected),
            _ => None,
        }
    }
}

/// `GET /{session}/ballot/{id}/json` response body
///
/// A missing `votes` key deserializes to an empty list; the orchestrator
/// reports that as an item error.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BallotDetail {
    #[serde(default)]
    pub votes: Vec<RemoteVote>,
}

/// One voter's position on a ballot
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVote {
    pub voter_slug: String,
    pub position: VotePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VotePosition {
    For,
    Against,
    Abstain,
    Absent,
}

impl VotePosition {
    pub fn as_str(&self) -> &'static str {
        match self {
            VotePosition::For => "for",
            VotePosition::Against => "against",
            VotePosition::Abstain => "abstain",
            VotePosition::Absent => "absent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "for" => Some(VotePosition::For),
            "against" => Some(VotePosition::Against),
            "abstain" => Some(VotePosition::Abstain),
            "absent" => Some(VotePosition::Absent),
            _ => None,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_page_accepts_numeric_ids() {
        let json = r#"{
            "ballots": [{
                "id": 42,
                "title": "Motion de censure",
                "date": "2023-03-20",
                "votesFor": 278,
                "votesAgainst": 0,
                "votesAbstain": 0,
                "outcome": "rejected",
                "sourceUrl": "https://example.org/16/scrutin/42"
            }]
        }"#;

        let page: BallotListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.ballots.len(), 1);
        let ballot = &page.ballots[0];
        assert_eq!(ballot.id, "42");
        assert_eq!(ballot.votes_for, 278);
        assert_eq!(ballot.outcome, BallotOutcome::Rejected);
        assert_eq!(ballot.date, NaiveDate::from_ymd_opt(2023, 3, 20).unwrap());
    }

    #[test]
    fn test_missing_counts_default_to_zero() {
        let json = r#"{"id": "7", "title": "t", "date": "2024-01-02", "outcome": "adopté"}"#;
        let ballot: BallotSummary = serde_json::from_str(json).unwrap();
        assert_eq!(ballot.votes_against, 0);
        assert_eq!(ballot.outcome, BallotOutcome::Adopted);
        assert!(ballot.source_url.is_none());
    }

    #[test]
    fn test_detail_without_votes_is_empty() {
        let detail: BallotDetail = serde_json::from_str("{}").unwrap();
        assert!(detail.votes.is_empty());
    }

    #[test]
    fn test_unknown_position_rejected() {
        let json = r#"{"votes": [{"voterSlug": "a", "position": "maybe"}]}"#;
        assert!(serde_json::from_str::<BallotDetail>(json).is_err());
    }

    #[test]
    fn test_position_text_matches_serde() {
        for position in [
            VotePosition::For,
            VotePosition::Against,
            VotePosition::Abstain,
            VotePosition::Absent,
        ] {
            assert_eq!(VotePosition::parse(position.as_str()), Some(position));
            let json = serde_json::to_string(&position).unwrap();
            assert_eq!(json, format!("\"{}\"", position.as_str()));
        }
    }
}
