//! PII redaction for audited parameters.
//!
//! Two passes over every parameter tree: field-name based (a normalised
//! sensitive-key set) and content based (strings that lexically look like an
//! email or phone number are redacted regardless of key). Audit rows only
//! ever see the output of this module.

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Field names that always carry PII, after normalising the key to lowercase
/// and stripping `_`, `-`, and whitespace.
const SENSITIVE_FIELDS: &[&str] = &[
    "email",
    "firstname",
    "lastname",
    "phone",
    "mobile",
    "address",
    "city",
    "state",
    "postalcode",
    "zipcode",
    "ssn",
    "taxid",
    "dateofbirth",
    "dob",
];

/// How a sensitive value is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionStrategy {
    /// Replace the whole value with `***`.
    Mask,
    /// Replace with a short SHA-256 tag.
    Hash,
    /// Keep the last `keep` characters.
    Truncate { keep: usize },
}

impl Default for RedactionStrategy {
    fn default() -> Self {
        RedactionStrategy::Truncate { keep: 4 }
    }
}

/// Compiled redactor. Construct once and share.
pub struct PiiRedactor {
    strategy: RedactionStrategy,
    email_re: Regex,
    digit_run_re: Regex,
}

fn normalise_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-') && !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

fn is_sensitive_field(key: &str) -> bool {
    let normalised = normalise_key(key);
    SENSITIVE_FIELDS.iter().any(|field| normalised == *field)
}

impl PiiRedactor {
    pub fn new(strategy: RedactionStrategy) -> Self {
        Self {
            strategy,
            email_re: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"),
            digit_run_re: Regex::new(r"^[\d\s()+.-]{10,}$").expect("digit run regex"),
        }
    }

    /// Redact a full parameter tree.
    pub fn redact_params(&self, params: &Value) -> Value {
        self.redact_value(params, false)
    }

    fn redact_value(&self, value: &Value, key_sensitive: bool) -> Value {
        match value {
            Value::String(s) => self.redact_string(s, key_sensitive),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.redact_value(item, key_sensitive))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(
                        key.clone(),
                        self.redact_value(item, key_sensitive || is_sensitive_field(key)),
                    );
                }
                Value::Object(out)
            }
            // Numbers under a sensitive key still leak; stringify and redact.
            Value::Number(n) if key_sensitive => self.redact_string(&n.to_string(), true),
            _ => value.clone(),
        }
    }

    fn redact_string(&self, s: &str, key_sensitive: bool) -> Value {
        // Content rules win: they produce a recognisable shape.
        if self.email_re.is_match(s) {
            return Value::String(redact_email(s));
        }
        let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= 10 && self.digit_run_re.is_match(s) {
            return Value::String(format!("***{}", &digits[digits.len() - 4..]));
        }
        if key_sensitive {
            return Value::String(self.apply_strategy(s));
        }
        Value::String(s.to_string())
    }

    fn apply_strategy(&self, s: &str) -> String {
        match self.strategy {
            RedactionStrategy::Mask => "***".to_string(),
            RedactionStrategy::Hash => {
                let mut hasher = Sha256::new();
                hasher.update(s.as_bytes());
                let digest = hex::encode(hasher.finalize());
                format!("[hash:{}]", &digest[..8])
            }
            RedactionStrategy::Truncate { keep } => {
                if s.chars().count() <= keep {
                    "***".to_string()
                } else {
                    let tail: String = s
                        .chars()
                        .rev()
                        .take(keep)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect();
                    format!("***{tail}")
                }
            }
        }
    }
}

impl Default for PiiRedactor {
    fn default() -> Self {
        Self::new(RedactionStrategy::default())
    }
}

/// `jane@acme.io` becomes `j***@acme.io`.
fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().unwrap_or('*');
            format!("{first}***@{domain}")
        }
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_email_redacted_by_content() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({"anything": "jane@acme.io"}));
        assert_eq!(out["anything"], json!("j***@acme.io"));
    }

    #[test]
    fn test_phone_redacted_by_content() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({"note": "+1 (555) 867-5309 x"}));
        // Not a pure phone string (trailing text), so untouched...
        assert_eq!(out["note"], json!("+1 (555) 867-5309 x"));

        let out = redactor.redact_params(&json!({"note": "+1 (555) 867-5309"}));
        assert_eq!(out["note"], json!("***5309"));
    }

    #[test]
    fn test_sensitive_field_truncated() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({"last_name": "Featherstone"}));
        assert_eq!(out["last_name"], json!("***tone"));
    }

    #[test]
    fn test_key_normalisation() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({
            "First-Name": "Jane",
            "POSTAL CODE": "94105-1234"
        }));
        assert_eq!(out["First-Name"], json!("***"));
        // Content rule does not fire (only 9 digits); field rule does.
        assert_eq!(out["POSTAL CODE"], json!("***1234"));
    }

    #[test]
    fn test_mask_and_hash_strategies() {
        let mask = PiiRedactor::new(RedactionStrategy::Mask);
        let out = mask.redact_params(&json!({"city": "Rotterdam"}));
        assert_eq!(out["city"], json!("***"));

        let hash = PiiRedactor::new(RedactionStrategy::Hash);
        let out = hash.redact_params(&json!({"city": "Rotterdam"}));
        let tag = out["city"].as_str().unwrap();
        assert!(tag.starts_with("[hash:"));
        assert!(tag.ends_with(']'));
    }

    #[test]
    fn test_sensitive_number_is_stringified() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({"ssn": 123456789}));
        assert_eq!(out["ssn"], json!("***6789"));
    }

    #[test]
    fn test_nested_sensitive_context_propagates() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({
            "address": {"line1": "1 Main St", "city": "Springfield"}
        }));
        assert_eq!(out["address"]["line1"], json!("***n St"));
    }

    #[test]
    fn test_non_sensitive_values_untouched() {
        let redactor = PiiRedactor::default();
        let input = json!({
            "industry": "Fintech",
            "score": 88,
            "tags": ["warm", "inbound"]
        });
        assert_eq!(redactor.redact_params(&input), input);
    }

    #[test]
    fn test_no_raw_email_or_long_digit_run_survives() {
        let redactor = PiiRedactor::default();
        let out = redactor.redact_params(&json!({
            "email": "someone@example.com",
            "phone": "4155551234567"
        }));
        let serialised = out.to_string();
        let email_re = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
        let digits_re = Regex::new(r"\d{10,}").unwrap();
        assert!(!email_re.is_match(&serialised), "{serialised}");
        assert!(!digits_re.is_match(&serialised), "{serialised}");
    }
}
