use serde::{Deserialize, Serialize};

/// Envelope for every JSON response the API returns.
///
/// Error responses always carry a stable machine-readable `code` next to the
/// human-readable `error` string, so clients can branch without parsing
/// messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(message: &str, code: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_omits_error_fields() {
        let json = serde_json::to_value(ApiResponse::success(42)).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
        assert!(json.get("code").is_none());
    }

    #[test]
    fn error_envelope_carries_code() {
        let json = serde_json::to_value(ApiResponse::<()>::error("nope", "NOT_FOUND")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nope");
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
