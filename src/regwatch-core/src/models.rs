use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regulatory region a document is tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Jurisdiction {
    Us,
    Eu,
    India,
    Asia,
    #[default]
    Global,
}

impl Jurisdiction {
    pub const ALL: [Jurisdiction; 5] = [
        Jurisdiction::Us,
        Jurisdiction::Eu,
        Jurisdiction::India,
        Jurisdiction::Asia,
        Jurisdiction::Global,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Jurisdiction::Us => "US",
            Jurisdiction::Eu => "EU",
            Jurisdiction::India => "INDIA",
            Jurisdiction::Asia => "ASIA",
            Jurisdiction::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown jurisdiction code: {0}")]
pub struct UnknownJurisdiction(pub String);

impl FromStr for Jurisdiction {
    type Err = UnknownJurisdiction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Jurisdiction::Us),
            "EU" => Ok(Jurisdiction::Eu),
            "INDIA" => Ok(Jurisdiction::India),
            "ASIA" => Ok(Jurisdiction::Asia),
            "GLOBAL" => Ok(Jurisdiction::Global),
            _ => Err(UnknownJurisdiction(s.to_string())),
        }
    }
}

/// Four-level risk label used both for display and for listing thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Minimum risk score a document needs to pass a `min_risk` filter
    pub fn threshold(&self) -> f64 {
        match self {
            RiskLevel::Low => 0.25,
            RiskLevel::Medium => 0.5,
            RiskLevel::High => 0.75,
            RiskLevel::Critical => 0.9,
        }
    }

    /// Label for a score. These cut-offs are not the same as `threshold`.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            RiskLevel::Critical
        } else if score >= 0.7 {
            RiskLevel::High
        } else if score >= 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Low" => Ok(RiskLevel::Low),
            "Medium" => Ok(RiskLevel::Medium),
            "High" => Ok(RiskLevel::High),
            "Critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

/// Document represents an ingested filing, article or alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    #[serde(default)]
    pub jurisdiction: Jurisdiction,
    /// Display date as supplied by the source (e.g. filing date)
    #[serde(default)]
    pub date: String,
    /// Ingestion instant, drives recency ordering
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Document {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        jurisdiction: Jurisdiction,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            source: source.into(),
            jurisdiction,
            date: timestamp.format("%Y-%m-%d").to_string(),
            timestamp,
            keywords: Vec::new(),
            risk_score: 0.0,
            doc_type: None,
            url: None,
        }
    }

    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = risk_score.clamp(0.0, 1.0);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// IngestRequest represents a document submitted for ingestion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub id: Option<String>, // Generated if not provided
    #[serde(default)]
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub source: String,
    /// Inferred from content when absent
    #[serde(default)]
    pub jurisdiction: Option<Jurisdiction>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub risk_score: Option<f64>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Precomputed embedding, stored as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// QueryRequest represents a ranked hybrid query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

/// One ranked hit of a hybrid query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub title: String,
    pub date: String,
    pub source: String,
    pub jurisdiction: Jurisdiction,
    pub score: f64,
    pub risk_score: f64,
    pub excerpt: String,
}

/// QueryResponse wraps ranked results for the REST surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<QueryResult>,
    pub total: usize,
}

/// Query parameters of the latest-documents listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub min_risk: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl LatestQuery {
    pub const DEFAULT_LIMIT: usize = 10;
}

/// One entry of the latest-documents listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub date: String,
    pub source: String,
    pub jurisdiction: Jurisdiction,
    pub risk_score: f64,
    pub keywords: Vec<String>,
    pub summary: String,
}

/// SetEmbeddingRequest carries a vector for an existing document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetEmbeddingRequest {
    pub vector: Vec<f32>,
}

/// ErrorResponse represents an API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Truncate to `max_chars` characters, appending `...` when anything was cut
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jurisdiction_codes_roundtrip() {
        for j in Jurisdiction::ALL {
            assert_eq!(j.code().parse::<Jurisdiction>().unwrap(), j);
        }
        assert_eq!("eu".parse::<Jurisdiction>().unwrap(), Jurisdiction::Eu);
        assert!("MARS".parse::<Jurisdiction>().is_err());
    }

    #[test]
    fn test_jurisdiction_serializes_as_code() {
        let json = serde_json::to_string(&Jurisdiction::India).unwrap();
        assert_eq!(json, "\"INDIA\"");
        let parsed: Jurisdiction = serde_json::from_str("\"GLOBAL\"").unwrap();
        assert_eq!(parsed, Jurisdiction::Global);
    }

    #[test]
    fn test_risk_level_thresholds() {
        assert_eq!(RiskLevel::Low.threshold(), 0.25);
        assert_eq!(RiskLevel::Medium.threshold(), 0.5);
        assert_eq!(RiskLevel::High.threshold(), 0.75);
        assert_eq!(RiskLevel::Critical.threshold(), 0.9);
        assert_eq!("High".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("Severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(0.95), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(0.4), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.39), RiskLevel::Low);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 200), "short");
        let long = "a".repeat(250);
        let truncated = truncate_text(&long, 200);
        assert_eq!(truncated.len(), 203);
        assert!(truncated.ends_with("..."));

        // Exactly at the limit is not truncated
        let exact = "b".repeat(200);
        assert_eq!(truncate_text(&exact, 200), exact);

        // Counts characters, not bytes
        let accented = "é".repeat(10);
        assert_eq!(truncate_text(&accented, 4), "éééé...");
    }

    #[test]
    fn test_query_request_defaults() {
        let req: QueryRequest = serde_json::from_str(r#"{"query": "aml"}"#).unwrap();
        assert_eq!(req.top_k, 5);
        assert!(req.jurisdiction.is_none());
    }
}
