//! Strict classifier reply schema and the acceptance rule.
//!
//! The classifier must answer with exactly
//! `{"businesses": [{website, companyName, isCompanyWebsite, confidence,
//! extractedFrom, city, stateProvince, country, categories}]}`.
//! Anything else is a hard error: no alternate shapes, no scanning free text
//! for embedded JSON.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{NewBusinessEntry, SearchHit};
use crate::website::hosts_match;

/// Acceptance rule: a company website at or above the confidence threshold.
#[inline]
pub fn accepts(is_company_website: bool, confidence: f64, threshold: f64) -> bool {
    is_company_website && confidence >= threshold
}

/// One classified hit in a classifier reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClassifiedBusiness {
    pub website: String,
    #[serde(deserialize_with = "Option::deserialize")]
    pub company_name: Option<String>,
    pub is_company_website: bool,
    pub confidence: f64,
    #[serde(deserialize_with = "Option::deserialize")]
    pub extracted_from: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub city: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub state_province: Option<String>,
    #[serde(deserialize_with = "Option::deserialize")]
    pub country: Option<String>,
    pub categories: Vec<String>,
}

impl ClassifiedBusiness {
    pub fn is_accepted(&self, threshold: f64) -> bool {
        accepts(self.is_company_website, self.confidence, threshold)
    }

    /// Directory fields carried by this classification.
    pub fn to_new_entry(&self) -> NewBusinessEntry {
        NewBusinessEntry {
            website: self.website.clone(),
            company_name: self.company_name.clone(),
            city: self.city.clone(),
            state_province: self.state_province.clone(),
            country: self.country.clone(),
            categories: self
                .categories
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

/// The complete classifier reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassifierReply {
    pub businesses: Vec<ClassifiedBusiness>,
}

impl ClassifierReply {
    /// Parse and validate a raw classifier reply.
    pub fn parse_strict(raw: &str) -> Result<Self> {
        let reply: ClassifierReply = serde_json::from_str(raw.trim())
            .map_err(|e| Error::Classification(format!("non-conforming reply: {}", e)))?;

        for (idx, business) in reply.businesses.iter().enumerate() {
            if business.website.trim().is_empty() {
                return Err(Error::Classification(format!(
                    "businesses[{}]: website is empty",
                    idx
                )));
            }
            if !business.confidence.is_finite() || !(0.0..=1.0).contains(&business.confidence) {
                return Err(Error::Classification(format!(
                    "businesses[{}]: confidence {} outside [0, 1]",
                    idx, business.confidence
                )));
            }
        }

        Ok(reply)
    }

    /// A batch reply must carry exactly one entry per hit.
    pub fn validate_for_batch(&self, expected: usize) -> Result<()> {
        if self.businesses.len() != expected {
            return Err(Error::Classification(format!(
                "reply lists {} businesses for a batch of {}",
                self.businesses.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Entry for the hit at `position` (0-based within its batch).
    ///
    /// A single-entry reply always maps to its first entry. Otherwise the
    /// entry whose website host matches the hit wins, falling back to the
    /// positional entry.
    pub fn entry_for(&self, url: &str, position: usize) -> Option<&ClassifiedBusiness> {
        if self.businesses.len() == 1 {
            return self.businesses.first();
        }
        self.businesses
            .iter()
            .find(|b| hosts_match(&b.website, url))
            .or_else(|| self.businesses.get(position))
    }
}

/// Everything the classifier needs to judge one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub industry: Option<String>,
    pub location: Option<String>,
    pub hits: Vec<SearchHit>,
}

/// A rendered classifier prompt together with the request it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierPrompt {
    pub system: String,
    pub user: String,
    pub request: ClassificationRequest,
}

impl ClassifierPrompt {
    /// Prompt text as kept in audit rows.
    pub fn audit_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn business(website: &str, is_company: bool, confidence: f64) -> serde_json::Value {
        json!({
            "website": website,
            "companyName": "Acme Plumbing",
            "isCompanyWebsite": is_company,
            "confidence": confidence,
            "extractedFrom": "title",
            "city": "Springfield",
            "stateProvince": null,
            "country": "US",
            "categories": ["plumbing"]
        })
    }

    #[test]
    fn test_accepts_rule() {
        assert!(accepts(true, 0.7, 0.7));
        assert!(accepts(true, 0.92, 0.7));
        assert!(!accepts(true, 0.69, 0.7));
        assert!(!accepts(false, 0.99, 0.7));
    }

    #[test]
    fn test_parse_valid_reply() {
        let raw = json!({"businesses": [business("acmeplumbing.com", true, 0.92)]}).to_string();
        let reply = ClassifierReply::parse_strict(&raw).unwrap();
        assert_eq!(reply.businesses.len(), 1);
        let b = &reply.businesses[0];
        assert_eq!(b.company_name.as_deref(), Some("Acme Plumbing"));
        assert_eq!(b.state_province, None);
        assert!(b.is_accepted(0.7));
    }

    #[test]
    fn test_parse_rejects_alternate_top_level_key() {
        let raw = json!({"results": [business("acmeplumbing.com", true, 0.92)]}).to_string();
        let err = ClassifierReply::parse_strict(&raw).unwrap_err();
        assert!(matches!(err, Error::Classification(_)));
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let mut entry = business("acmeplumbing.com", true, 0.92);
        entry.as_object_mut().unwrap().remove("city");
        let raw = json!({"businesses": [entry]}).to_string();
        assert!(ClassifierReply::parse_strict(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let mut entry = business("acmeplumbing.com", true, 0.92);
        entry["reasoning"] = json!("looks legit");
        let raw = json!({"businesses": [entry]}).to_string();
        assert!(ClassifierReply::parse_strict(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_prose_wrapped_json() {
        let raw = format!(
            "Here you go:\n```json\n{}\n```",
            json!({"businesses": [business("acmeplumbing.com", true, 0.92)]})
        );
        assert!(ClassifierReply::parse_strict(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_out_of_range_confidence() {
        let raw = json!({"businesses": [business("acmeplumbing.com", true, 1.5)]}).to_string();
        let err = ClassifierReply::parse_strict(&raw).unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn test_parse_rejects_empty_website() {
        let raw = json!({"businesses": [business("  ", true, 0.9)]}).to_string();
        assert!(ClassifierReply::parse_strict(&raw).is_err());
    }

    #[test]
    fn test_validate_for_batch_count() {
        let raw = json!({"businesses": [business("acmeplumbing.com", true, 0.92)]}).to_string();
        let reply = ClassifierReply::parse_strict(&raw).unwrap();
        assert!(reply.validate_for_batch(1).is_ok());
        assert!(reply.validate_for_batch(2).is_err());
    }

    #[test]
    fn test_entry_for_matches_host_before_position() {
        let raw = json!({"businesses": [
            business("directoryhub.com", false, 0.4),
            business("acmeplumbing.com", true, 0.92),
        ]})
        .to_string();
        let reply = ClassifierReply::parse_strict(&raw).unwrap();

        let acme = reply.entry_for("https://www.acmeplumbing.com/", 0).unwrap();
        assert_eq!(acme.website, "acmeplumbing.com");

        let fallback = reply.entry_for("https://unknown.example/", 0).unwrap();
        assert_eq!(fallback.website, "directoryhub.com");
    }

    #[test]
    fn test_entry_for_single_entry_reply() {
        let raw = json!({"businesses": [business("acmeplumbing.com", true, 0.92)]}).to_string();
        let reply = ClassifierReply::parse_strict(&raw).unwrap();
        assert!(reply.entry_for("https://other.example", 3).is_some());
    }

    #[test]
    fn test_to_new_entry_drops_blank_categories() {
        let mut entry = business("acmeplumbing.com", true, 0.92);
        entry["categories"] = json!(["plumbing", " ", "heating "]);
        let b: ClassifiedBusiness = serde_json::from_value(entry).unwrap();
        assert_eq!(
            b.to_new_entry().categories,
            vec!["plumbing".to_string(), "heating".to_string()]
        );
    }
}
