//! Queue payload.

use serde::{Deserialize, Serialize};

/// A validated submission waiting to be emailed.
///
/// Serialized as `{fromName, fromAddress, subject, body}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub from_name: String,
    pub from_address: String,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_camel_case_keys() {
        let request = SendEmailRequest {
            from_name: "Alice".into(),
            from_address: "alice@example.com".into(),
            subject: "Personal Site Contact Form".into(),
            body: "Hello there!".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["fromName"], "Alice");
        assert_eq!(json["fromAddress"], "alice@example.com");
        assert_eq!(json["subject"], "Personal Site Contact Form");
        assert_eq!(json["body"], "Hello there!");
    }

    #[test]
    fn missing_field_fails_to_decode() {
        let err = serde_json::from_str::<SendEmailRequest>(r#"{"fromName":"A","subject":"s","body":"b"}"#);
        assert!(err.is_err());
    }
}
