use std::sync::OnceLock;

use regex::Regex;

use crate::candidate::Candidate;

/// Comparison operator of a filter expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `=`
    Eq,
}

impl CompareOp {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "=" => Some(Self::Eq),
            _ => None,
        }
    }

    fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Gt => lhs > rhs,
            Self::Lt => lhs < rhs,
            Self::Ge => lhs >= rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
        }
    }
}

/// Result of parsing a raw filter string.
///
/// Parsing never fails: a malformed expression becomes [`ParsedFilter::Fallback`],
/// which keeps every candidate but remembers why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedFilter {
    /// `all` or empty.
    All,
    /// `daysOut <op> value`.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Right-hand side.
        value: i64,
    },
    /// Unparseable expression, treated as `All`.
    Fallback {
        /// The raw expression as configured.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ParsedFilter {
    /// Whether `candidate` is retained by this filter.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        match self {
            ParsedFilter::All | ParsedFilter::Fallback { .. } => true,
            ParsedFilter::Compare { op, value } => candidate
                .days_out
                .is_some_and(|days| op.holds(days, *value)),
        }
    }
}

fn expr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([><]=?|=)\s*(\d+)\s*$").unwrap_or_else(|err| unreachable!("{err}"))
    })
}

/// Parse a raw filter string (`all`, empty, or `<op><int>`).
pub fn parse_filter(raw: &str) -> ParsedFilter {
    let normalized = raw.trim().to_ascii_lowercase();
    if normalized.is_empty() || normalized == "all" {
        return ParsedFilter::All;
    }

    let Some(caps) = expr_regex().captures(&normalized) else {
        return ParsedFilter::Fallback {
            raw: raw.to_string(),
            reason: "expected `all` or <op><number> with op one of > < >= <= =".to_string(),
        };
    };

    let Some(op) = CompareOp::from_token(&caps[1]) else {
        return ParsedFilter::Fallback {
            raw: raw.to_string(),
            reason: format!("unknown operator {:?}", &caps[1]),
        };
    };
    match caps[2].parse::<i64>() {
        Ok(value) => ParsedFilter::Compare { op, value },
        Err(err) => ParsedFilter::Fallback {
            raw: raw.to_string(),
            reason: format!("bad number {:?}: {err}", &caps[2]),
        },
    }
}

/// Keep the candidates `filter` retains, in input order.
pub fn apply_filter(candidates: Vec<Candidate>, filter: &ParsedFilter) -> Vec<Candidate> {
    match filter {
        ParsedFilter::All | ParsedFilter::Fallback { .. } => candidates,
        ParsedFilter::Compare { .. } => candidates
            .into_iter()
            .filter(|c| filter.matches(c))
            .collect(),
    }
}

/// Parse `raw` and apply it, warning when the expression falls back to `all`.
pub fn filter_candidates(candidates: Vec<Candidate>, raw: &str) -> Vec<Candidate> {
    let filter = parse_filter(raw);
    if let ParsedFilter::Fallback { raw, reason } = &filter {
        log::warn!("ignoring filter {raw:?} ({reason}); monitoring every candidate");
    }
    apply_filter(candidates, &filter)
}
