//! Compliance risk assessment.
//!
//! The classifier itself is an external collaborator behind [`RiskClassifier`].
//! [`KeywordRiskClassifier`] is the offline implementation used when no
//! remote classifier is configured, and as the fallback when one fails.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{risk_key, ResultCache};
use crate::models::{Jurisdiction, RiskLevel};

/// Risk assessment of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub jurisdiction: Jurisdiction,
    #[serde(default, alias = "risk_categories")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub summary: String,
}

impl RiskAssessment {
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.risk_score)
    }
}

#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn score(&self, document_id: &str, content: &str) -> Result<RiskAssessment>;
}

/// Watched phrases and the risk level each one signals
pub const COMPLIANCE_KEYWORDS: &[(&str, RiskLevel)] = &[
    ("insider trading", RiskLevel::Critical),
    ("money laundering", RiskLevel::Critical),
    ("market manipulation", RiskLevel::Critical),
    ("fraud", RiskLevel::Critical),
    ("sanctions violation", RiskLevel::High),
    ("bribery", RiskLevel::High),
    ("corruption", RiskLevel::High),
    ("material weakness", RiskLevel::High),
    ("enforcement action", RiskLevel::High),
    ("data breach", RiskLevel::High),
    ("aml", RiskLevel::High),
    ("accounting irregularities", RiskLevel::High),
    ("restatement", RiskLevel::Medium),
    ("conflict of interest", RiskLevel::Medium),
    ("whistleblower", RiskLevel::Medium),
    ("investigation", RiskLevel::Medium),
    ("penalty", RiskLevel::Medium),
    ("kyc", RiskLevel::Medium),
    ("gdpr", RiskLevel::Medium),
    ("mifid", RiskLevel::Medium),
    ("disclosure", RiskLevel::Low),
    ("esg reporting", RiskLevel::Low),
    ("audit", RiskLevel::Low),
    ("basel", RiskLevel::Low),
];

const US_TERMS: &[&str] = &[
    "sec", "finra", "dodd-frank", "securities act", "exchange act", "federal reserve", "cftc",
    "us treasury", "fasb", "us gaap", "sarbanes-oxley", "sox", "united states",
];

const EU_TERMS: &[&str] = &[
    "esma", "eba", "ecb", "mifid", "gdpr", "emir", "european union", "eu",
    "european commission", "ifrs", "brexit", "european central bank",
];

const INDIA_TERMS: &[&str] = &[
    "sebi", "rbi", "companies act india", "indian securities", "nse india", "bse india",
    "reserve bank of india", "ministry of corporate affairs india", "fema india",
    "indian regulatory", "indian compliance", "india",
];

const ASIA_TERMS: &[&str] = &[
    "mas singapore", "hkma", "csrc china", "jfsa japan", "bank of japan", "pboc", "korean fsc",
    "asian regulatory", "apac compliance", "asian markets", "singapore exchange",
    "hong kong exchange", "tokyo exchange", "shanghai exchange", "asian development bank",
    "asean",
];

/// Numeric weight of a keyword's risk level
fn level_weight(level: RiskLevel) -> f64 {
    level.threshold()
}

/// Infer a jurisdiction from regulator names, falling back to currency hints
pub fn categorize_jurisdiction(content: &str) -> Jurisdiction {
    let lowered = content.to_lowercase();
    let count = |terms: &[&str]| terms.iter().filter(|t| lowered.contains(*t)).count();

    let counts = [
        (Jurisdiction::Us, count(US_TERMS)),
        (Jurisdiction::Eu, count(EU_TERMS)),
        (Jurisdiction::India, count(INDIA_TERMS)),
        (Jurisdiction::Asia, count(ASIA_TERMS)),
    ];

    // First jurisdiction with the highest count wins ties
    let mut best = (Jurisdiction::Global, 0);
    for (jurisdiction, n) in counts {
        if n > best.1 {
            best = (jurisdiction, n);
        }
    }
    if best.1 > 0 {
        return best.0;
    }

    if lowered.contains("dollar") || content.contains('$') {
        Jurisdiction::Us
    } else if lowered.contains("euro") || content.contains('€') {
        Jurisdiction::Eu
    } else if lowered.contains("rupee") || content.contains('₹') {
        Jurisdiction::India
    } else if lowered.contains("yen") || content.contains('¥') || lowered.contains("yuan") {
        Jurisdiction::Asia
    } else {
        Jurisdiction::Global
    }
}

/// Offline classifier scoring documents by watched-phrase matches
#[derive(Debug, Clone, Default)]
pub struct KeywordRiskClassifier;

impl KeywordRiskClassifier {
    pub fn assess(&self, content: &str) -> RiskAssessment {
        let lowered = content.to_lowercase();
        let matches: Vec<(&str, f64)> = COMPLIANCE_KEYWORDS
            .iter()
            .filter(|(keyword, _)| lowered.contains(keyword))
            .map(|(keyword, level)| (*keyword, level_weight(*level)))
            .collect();

        let mut categories: Vec<String> = Vec::new();
        for (keyword, _) in &matches {
            let category = keyword.split_whitespace().next().unwrap_or(*keyword);
            if !categories.iter().any(|c| c == category) {
                categories.push(category.to_string());
            }
        }

        let risk_score = if matches.is_empty() {
            0.1
        } else {
            let max = matches.iter().map(|(_, w)| *w).fold(0.0, f64::max);
            let mean = matches.iter().map(|(_, w)| *w).sum::<f64>() / matches.len() as f64;
            0.7 * max + 0.3 * mean
        };

        let summary = if matches.is_empty() {
            "No specific compliance risks identified in this document.".to_string()
        } else {
            let listed: Vec<&str> = matches.iter().take(3).map(|(k, _)| *k).collect();
            let verdict = if risk_score > 0.7 {
                "This document indicates high compliance risk and requires immediate review."
            } else if risk_score > 0.4 {
                "This document indicates moderate compliance risk and should be reviewed."
            } else {
                "This document indicates low compliance risk but should still be monitored."
            };
            format!(
                "Document contains {} compliance-related keywords including {}. {}",
                matches.len(),
                listed.join(", "),
                verdict
            )
        };

        RiskAssessment {
            risk_score,
            jurisdiction: categorize_jurisdiction(content),
            categories,
            key_findings: matches
                .iter()
                .map(|(k, _)| format!("Found potential {} issue", k))
                .collect(),
            summary,
        }
    }
}

#[async_trait]
impl RiskClassifier for KeywordRiskClassifier {
    async fn score(&self, _document_id: &str, content: &str) -> Result<RiskAssessment> {
        Ok(self.assess(content))
    }
}

/// Memoizes assessments by document id, with keyword analysis as fallback.
///
/// Short documents skip the wrapped classifier entirely.
pub struct CachedRiskClassifier {
    inner: Arc<dyn RiskClassifier>,
    cache: Arc<ResultCache>,
    ttl: Duration,
    fallback: KeywordRiskClassifier,
    short_content_chars: usize,
}

impl CachedRiskClassifier {
    pub fn new(inner: Arc<dyn RiskClassifier>, cache: Arc<ResultCache>, ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            ttl,
            fallback: KeywordRiskClassifier,
            short_content_chars: 200,
        }
    }
}

#[async_trait]
impl RiskClassifier for CachedRiskClassifier {
    async fn score(&self, document_id: &str, content: &str) -> Result<RiskAssessment> {
        let key = risk_key(document_id);
        if let Some(assessment) = self.cache.get_json::<RiskAssessment>(&key).await {
            return Ok(assessment);
        }

        let assessment = if content.chars().count() < self.short_content_chars {
            self.fallback.assess(content)
        } else {
            match self.inner.score(document_id, content).await {
                Ok(assessment) => assessment,
                Err(e) => {
                    tracing::warn!(
                        "Risk classifier failed for {}, using keyword analysis: {}",
                        document_id,
                        e
                    );
                    self.fallback.assess(content)
                }
            }
        };

        let assessment = RiskAssessment {
            risk_score: assessment.risk_score.clamp(0.0, 1.0),
            ..assessment
        };
        self.cache.set_json(&key, &assessment, self.ttl).await;
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier {
        score: f64,
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RiskClassifier for FixedClassifier {
        async fn score(&self, _document_id: &str, _content: &str) -> Result<RiskAssessment> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("classifier unavailable");
            }
            Ok(RiskAssessment {
                risk_score: self.score,
                jurisdiction: Jurisdiction::Eu,
                categories: vec!["AML".to_string()],
                key_findings: Vec::new(),
                summary: "fixed".to_string(),
            })
        }
    }

    fn long_text() -> String {
        "The committee reviewed quarterly operations in detail. ".repeat(5)
    }

    #[test]
    fn test_no_keywords_gives_base_risk() {
        let assessment = KeywordRiskClassifier.assess("Routine quarterly filing.");
        assert_eq!(assessment.risk_score, 0.1);
        assert!(assessment.categories.is_empty());
        assert_eq!(
            assessment.summary,
            "No specific compliance risks identified in this document."
        );
    }

    #[test]
    fn test_keyword_score_blends_max_and_mean() {
        let assessment =
            KeywordRiskClassifier.assess("Possible insider trading; audit scheduled.");
        // Critical 0.9 and Low 0.25: 0.7 * 0.9 + 0.3 * 0.575
        let expected = 0.7 * 0.9 + 0.3 * ((0.9 + 0.25) / 2.0);
        assert!((assessment.risk_score - expected).abs() < 1e-12);
        assert_eq!(assessment.categories, vec!["insider", "audit"]);
        assert_eq!(assessment.key_findings.len(), 2);
        assert!(assessment.summary.contains("requires immediate review"));
        assert_eq!(assessment.level(), RiskLevel::High);
    }

    #[test]
    fn test_jurisdiction_from_regulators() {
        assert_eq!(categorize_jurisdiction("FINRA and the CFTC announced"), Jurisdiction::Us);
        assert_eq!(categorize_jurisdiction("ESMA guidance under MiFID"), Jurisdiction::Eu);
        assert_eq!(categorize_jurisdiction("SEBI circular"), Jurisdiction::India);
        assert_eq!(categorize_jurisdiction("HKMA notice"), Jurisdiction::Asia);
    }

    #[test]
    fn test_jurisdiction_from_currency() {
        assert_eq!(categorize_jurisdiction("fined 5 million rupees"), Jurisdiction::India);
        assert_eq!(categorize_jurisdiction("a penalty of ¥300m"), Jurisdiction::Asia);
        assert_eq!(categorize_jurisdiction("nothing to note"), Jurisdiction::Global);
    }

    #[tokio::test]
    async fn test_cached_classifier_memoizes_by_document() {
        let inner = Arc::new(FixedClassifier {
            score: 0.8,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResultCache::in_memory(16));
        let classifier = CachedRiskClassifier::new(inner.clone(), cache.clone(), Duration::from_secs(300));

        let first = classifier.score("DOC-1", &long_text()).await.unwrap();
        let second = classifier.score("DOC-1", &long_text()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.risk_score, 0.8);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get(&risk_key("DOC-1")).await.is_some());
    }

    #[tokio::test]
    async fn test_cached_classifier_falls_back_on_failure() {
        let inner = Arc::new(FixedClassifier {
            score: 0.8,
            fail: true,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResultCache::in_memory(16));
        let classifier = CachedRiskClassifier::new(inner.clone(), cache, Duration::from_secs(300));

        let text = format!("{} Evidence of money laundering.", long_text());
        let assessment = classifier.score("DOC-2", &text).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(assessment.categories, vec!["money"]);
    }

    #[tokio::test]
    async fn test_short_content_skips_inner_classifier() {
        let inner = Arc::new(FixedClassifier {
            score: 0.8,
            fail: false,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ResultCache::in_memory(16));
        let classifier = CachedRiskClassifier::new(inner.clone(), cache, Duration::from_secs(300));

        let assessment = classifier.score("DOC-3", "short note").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(assessment.risk_score, 0.1);
    }

    #[test]
    fn test_assessment_accepts_risk_categories_alias() {
        let json = r#"{"risk_score": 0.5, "jurisdiction": "US", "risk_categories": ["AML"]}"#;
        let assessment: RiskAssessment = serde_json::from_str(json).unwrap();
        assert_eq!(assessment.categories, vec!["AML"]);
    }
}
