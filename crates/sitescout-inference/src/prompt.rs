//! Classifier prompt construction.

use sitescout_core::{ClassificationRequest, ClassifierPrompt};

/// System instructions fixing the reply schema.
pub const SYSTEM_PROMPT: &str = r#"You classify web search results for a business directory.

For every search result you receive, decide whether its URL is the official website of a single company (not a directory, marketplace, review site, news article or social profile).

Reply with one JSON object and nothing else, in exactly this shape:
{"businesses": [{"website": string, "companyName": string|null, "isCompanyWebsite": boolean, "confidence": number, "extractedFrom": string|null, "city": string|null, "stateProvince": string|null, "country": string|null, "categories": [string]}]}

Rules:
- Return exactly one entry per search result, in the order given.
- "website" is the bare domain of the result URL.
- "confidence" is between 0 and 1.
- "extractedFrom" names where the company name came from: "title", "snippet" or "url".
- Use null for anything you cannot determine. Never add other keys."#;

/// Render the user message for one batch.
pub fn render_user_prompt(request: &ClassificationRequest) -> String {
    let mut out = String::new();

    if let Some(industry) = request.industry.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("Industry: {}\n", industry.trim()));
    }
    if let Some(location) = request.location.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("Location: {}\n", location.trim()));
    }
    if !out.is_empty() {
        out.push('\n');
    }

    out.push_str(&format!("Search results ({}):\n", request.hits.len()));
    for (idx, hit) in request.hits.iter().enumerate() {
        out.push_str(&format!(
            "{}. title: {}\n   url: {}\n",
            idx + 1,
            hit.title.trim(),
            hit.url.trim()
        ));
        if !hit.snippet.trim().is_empty() {
            out.push_str(&format!("   snippet: {}\n", hit.snippet.trim()));
        }
    }
    out
}

/// Build the full prompt for one batch.
pub fn build_prompt(request: &ClassificationRequest) -> ClassifierPrompt {
    ClassifierPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user: render_user_prompt(request),
        request: request.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescout_core::SearchHit;

    fn request() -> ClassificationRequest {
        ClassificationRequest {
            industry: Some("plumbing".into()),
            location: Some("Springfield, IL".into()),
            hits: vec![
                SearchHit::new("Acme Plumbing – 24/7 Service", "acmeplumbing.com", "Call now"),
                SearchHit::new("Best Plumbers in Springfield – Top 10", "directoryhub.com", ""),
            ],
        }
    }

    #[test]
    fn test_user_prompt_lists_hits_in_order() {
        let text = render_user_prompt(&request());
        let acme = text.find("acmeplumbing.com").unwrap();
        let hub = text.find("directoryhub.com").unwrap();
        assert!(acme < hub);
        assert!(text.contains("Search results (2):"));
        assert!(text.contains("snippet: Call now"));
    }

    #[test]
    fn test_user_prompt_includes_context() {
        let text = render_user_prompt(&request());
        assert!(text.starts_with("Industry: plumbing\nLocation: Springfield, IL\n"));
    }

    #[test]
    fn test_user_prompt_without_context() {
        let req = ClassificationRequest {
            hits: vec![SearchHit::new("Acme", "acme.com", "")],
            ..Default::default()
        };
        let text = render_user_prompt(&req);
        assert!(text.starts_with("Search results (1):"));
        assert!(!text.contains("snippet:"));
    }

    #[test]
    fn test_build_prompt_carries_request() {
        let prompt = build_prompt(&request());
        assert_eq!(prompt.system, SYSTEM_PROMPT);
        assert_eq!(prompt.request.hits.len(), 2);
        assert!(prompt.audit_text().contains("\"businesses\""));
    }
}
