//! Mapping of endpoint failures onto the crate error type.

use sitescout_core::Error;

use super::types::ErrorDetail;

/// Why a completion request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    UnknownModel,
    RateLimited,
    PromptTooLarge,
    Upstream,
    Other,
}

impl FailureKind {
    pub fn classify(status: u16, detail: &ErrorDetail) -> Self {
        let code = detail.code.as_deref().unwrap_or_default();
        match status {
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            _ if code == "model_not_found" || detail.kind == "model_not_found" => {
                Self::UnknownModel
            }
            404 => Self::UnknownModel,
            400 if code.contains("context_length") || detail.kind.contains("context_length") => {
                Self::PromptTooLarge
            }
            500..=599 => Self::Upstream,
            _ => Self::Other,
        }
    }

    /// Failures where sending the same request later may succeed.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Upstream)
    }

    /// Credential and model problems are deployment mistakes, not
    /// per-batch classification failures.
    pub fn into_error(self, status: u16, detail: &ErrorDetail) -> Error {
        let message = if detail.message.is_empty() {
            format!("endpoint returned {}", status)
        } else {
            format!("endpoint returned {}: {}", status, detail.message)
        };
        match self {
            Self::Unauthorized | Self::UnknownModel => Error::Config(message),
            _ => Error::Classification(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(kind: &str, code: Option<&str>) -> ErrorDetail {
        ErrorDetail {
            message: "nope".to_string(),
            kind: kind.to_string(),
            code: code.map(str::to_string),
        }
    }

    #[test]
    fn test_classify() {
        let plain = ErrorDetail::default();
        assert_eq!(FailureKind::classify(401, &plain), FailureKind::Unauthorized);
        assert_eq!(FailureKind::classify(429, &plain), FailureKind::RateLimited);
        assert_eq!(
            FailureKind::classify(400, &detail("invalid_request_error", Some("model_not_found"))),
            FailureKind::UnknownModel
        );
        assert_eq!(
            FailureKind::classify(400, &detail("invalid_request_error", Some("context_length_exceeded"))),
            FailureKind::PromptTooLarge
        );
        assert_eq!(FailureKind::classify(503, &plain), FailureKind::Upstream);
        assert_eq!(FailureKind::classify(418, &plain), FailureKind::Other);
    }

    #[test]
    fn test_transient() {
        assert!(FailureKind::RateLimited.is_transient());
        assert!(FailureKind::Upstream.is_transient());
        assert!(!FailureKind::Unauthorized.is_transient());
    }

    #[test]
    fn test_into_error() {
        let err = FailureKind::Unauthorized.into_error(401, &detail("", None));
        assert!(matches!(err, Error::Config(_)));

        let err = FailureKind::RateLimited.into_error(429, &ErrorDetail::default());
        assert!(matches!(err, Error::Classification(_)));
        assert!(err.to_string().contains("endpoint returned 429"));
    }
}
