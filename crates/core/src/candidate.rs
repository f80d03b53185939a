use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// One monitorable record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// Stable key; may be absent for rows imported without an id column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Page to inspect. Only absolute `http`/`https` URLs are actionable.
    #[serde(default, rename = "targetUrl", alias = "target_url")]
    pub target_url: Option<String>,
    /// Days since the record went out, used by the filter engine.
    #[serde(default, rename = "daysOut", alias = "days_out")]
    pub days_out: Option<i64>,
    /// Import columns we do not interpret, kept so a rewrite does not drop them.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Why a candidate's target cannot be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// No URL at all (or only whitespace).
    #[error("missing target url")]
    Missing,
    /// Not parseable as an absolute URL.
    #[error("invalid target url {0:?}")]
    Unparseable(String),
    /// Parsed, but not `http`/`https`.
    #[error("unsupported url scheme {0:?}")]
    Scheme(String),
}

impl Candidate {
    /// Build a candidate with the three interpreted fields.
    pub fn new(
        identifier: impl Into<String>,
        target_url: impl Into<String>,
        days_out: Option<i64>,
    ) -> Self {
        Self {
            identifier: Some(identifier.into()),
            target_url: Some(target_url.into()),
            days_out,
            extra: serde_json::Map::new(),
        }
    }

    /// Key used by the dedup cache: the trimmed target URL.
    pub fn dedup_key(&self) -> Option<&str> {
        self.target_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Label for logs; falls back to the URL, then to a placeholder.
    pub fn label(&self) -> &str {
        self.identifier
            .as_deref()
            .or(self.target_url.as_deref())
            .unwrap_or("<unnamed>")
    }

    /// Parse the target as an absolute `http(s)` URL.
    pub fn target(&self) -> Result<Url, TargetError> {
        let raw = self.dedup_key().ok_or(TargetError::Missing)?;
        let url = Url::parse(raw).map_err(|_| TargetError::Unparseable(raw.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(TargetError::Scheme(other.to_string())),
        }
        if !url.has_host() {
            return Err(TargetError::Unparseable(raw.to_string()));
        }
        Ok(url)
    }
}

/// A candidate confirmed to carry the submission marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    /// Identifier of the matched candidate, when it had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Target URL; this is what the dedup cache keys on.
    #[serde(rename = "targetUrl", alias = "target_url")]
    pub target_url: String,
    /// When the match was reported.
    #[serde(rename = "matchedAt", alias = "matched_at")]
    pub matched_at: DateTime<Utc>,
    /// Whatever the inspection side attached to the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl MatchRecord {
    /// Record a match for `candidate` at the current time.
    pub fn for_candidate(candidate: &Candidate, payload: Option<serde_json::Value>) -> Option<Self> {
        Some(Self {
            identifier: candidate.identifier.clone(),
            target_url: candidate.dedup_key()?.to_string(),
            matched_at: Utc::now(),
            payload,
        })
    }
}

/// Coarse sweep progress, persisted for external display.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    /// Candidates admitted so far in this sweep.
    pub current: usize,
    /// Size of the filtered candidate list.
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_accepts_http_and_https() {
        let c = Candidate::new("a", "https://sis.example.edu/students/1", None);
        assert_eq!(c.target().unwrap().host_str(), Some("sis.example.edu"));
        let c = Candidate::new("b", "  http://localhost:8080/x  ", None);
        assert!(c.target().is_ok());
    }

    #[test]
    fn target_rejects_missing_relative_and_other_schemes() {
        let mut c = Candidate::new("a", "", None);
        assert_eq!(c.target(), Err(TargetError::Missing));
        c.target_url = None;
        assert_eq!(c.target(), Err(TargetError::Missing));
        c.target_url = Some("/students/1".into());
        assert!(matches!(c.target(), Err(TargetError::Unparseable(_))));
        c.target_url = Some("ftp://files.example.edu/x".into());
        assert_eq!(c.target(), Err(TargetError::Scheme("ftp".into())));
    }

    #[test]
    fn extra_columns_survive_a_round_trip() {
        let raw = r#"{"identifier":"s1","targetUrl":"https://x.test/1","daysOut":4,"advisor":"Kim"}"#;
        let c: Candidate = serde_json::from_str(raw).unwrap();
        assert_eq!(c.days_out, Some(4));
        assert_eq!(c.extra.get("advisor").and_then(|v| v.as_str()), Some("Kim"));
        let back = serde_json::to_value(&c).unwrap();
        assert_eq!(back["advisor"], "Kim");
        assert_eq!(back["targetUrl"], "https://x.test/1");
    }

    #[test]
    fn match_record_requires_a_target() {
        let mut c = Candidate::new("s1", " https://x.test/1 ", None);
        let rec = MatchRecord::for_candidate(&c, None).unwrap();
        assert_eq!(rec.target_url, "https://x.test/1");
        c.target_url = None;
        assert!(MatchRecord::for_candidate(&c, None).is_none());
    }
}
