//! PII detection and redaction: an ordered list of compiled detectors,
//! applied to every string attribute and log body. Built-ins (email, phone,
//! SSN, credit card, secret) are compiled once at construction from a fixed
//! pattern table; `kind = "custom"` rules add caller-supplied regexes to the
//! same list.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use common::config::{PiiAction, PiiDetectorConfig};
use common::error::CoreError;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap());
static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap());
static SECRET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:api[_-]?key|secret|token|password)\s*[:=]\s*['"]?[A-Za-z0-9._\-]{6,}['"]?"#).unwrap());

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter(|c| c.is_ascii_digit()).filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| if i % 2 == 1 { let doubled = d * 2; if doubled > 9 { doubled - 9 } else { doubled } } else { d })
        .sum();
    sum % 10 == 0
}

struct Detector {
    kind: String,
    regex: Regex,
    action: PiiAction,
    /// Only `kind = "credit_card"` requires a secondary Luhn check on the
    /// regex match before treating it as PII -- the digit-run regex alone
    /// matches plenty of non-card numeric strings.
    requires_luhn: bool,
}

impl Detector {
    fn built_in(kind: &str, action: PiiAction) -> Option<Self> {
        let (regex, requires_luhn) = match kind {
            "email" => (EMAIL_RE.clone(), false),
            "phone" => (PHONE_RE.clone(), false),
            "ssn" => (SSN_RE.clone(), false),
            "credit_card" => (CREDIT_CARD_RE.clone(), true),
            "secret" => (SECRET_RE.clone(), false),
            _ => return None,
        };
        Some(Detector { kind: kind.to_string(), regex, action, requires_luhn })
    }

    fn matches(&self, candidate: &str) -> bool {
        !self.requires_luhn || luhn_valid(candidate)
    }
}

/// Applies every detector in order to `text`. Returns the transformed text
/// and `true` iff any detector with `action = drop_item` matched -- the
/// caller drops the whole item in that case rather than trusting a partially
/// redacted string.
pub struct PiiDetectors {
    detectors: Vec<Detector>,
}

impl PiiDetectors {
    pub fn compile(configs: &[PiiDetectorConfig]) -> Result<Self, CoreError> {
        let mut detectors = Vec::with_capacity(configs.len());
        for config in configs {
            let detector = if config.kind == "custom" {
                let pattern = config.pattern.as_deref().ok_or_else(|| CoreError::Config("custom PII detector missing `pattern`".into()))?;
                let regex = Regex::new(pattern).map_err(|e| CoreError::Config(format!("bad PII regex {pattern:?}: {e}")))?;
                Detector { kind: "custom".to_string(), regex, action: config.action, requires_luhn: false }
            } else {
                Detector::built_in(&config.kind, config.action)
                    .ok_or_else(|| CoreError::Config(format!("unknown PII detector kind {:?}", config.kind)))?
            };
            detectors.push(detector);
        }
        Ok(PiiDetectors { detectors })
    }

    pub fn redact(&self, text: &str) -> (String, bool) {
        let mut current = text.to_string();
        for detector in &self.detectors {
            if detector.regex.find_iter(&current).any(|m| detector.matches(m.as_str())) {
                if detector.action == PiiAction::DropItem {
                    return (current, true);
                }
                let kind = detector.kind.clone();
                let action = detector.action;
                current = detector
                    .regex
                    .replace_all(&current, |caps: &regex::Captures| {
                        let matched = &caps[0];
                        if !detector.matches(matched) {
                            return matched.to_string();
                        }
                        match action {
                            PiiAction::Redact => format!("[REDACTED:{kind}]"),
                            PiiAction::Hash => format!("sha256:{:x}", Sha256::digest(matched.as_bytes())),
                            PiiAction::DropItem => unreachable!(),
                        }
                    })
                    .to_string();
            }
        }
        (current, false)
    }
}
