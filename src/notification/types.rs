use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Notification channels a request can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelKind {
    InApp,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::InApp => "IN_APP",
            ChannelKind::Email => "EMAIL",
        }
    }

    /// Map a wire token (`IN_APP`, `EMAIL`) to a channel.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("IN_APP") {
            Some(ChannelKind::InApp)
        } else if token.eq_ignore_ascii_case("EMAIL") {
            Some(ChannelKind::Email)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "notification requested" event, transient.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRequest {
    pub task_id: String,
    pub correlation_id: String,
    /// Requested channels, de-duplicated, in first-seen order
    pub types: Vec<ChannelKind>,
    /// Tokens that did not map to any channel
    pub unmapped: Vec<String>,
}

impl NotificationRequest {
    pub fn new(
        task_id: impl Into<String>,
        correlation_id: impl Into<String>,
        types: impl IntoIterator<Item = ChannelKind>,
    ) -> Self {
        let mut request = Self {
            task_id: task_id.into(),
            correlation_id: correlation_id.into(),
            types: Vec::new(),
            unmapped: Vec::new(),
        };
        for kind in types {
            request.push(kind);
        }
        request
    }

    /// Build from string tokens, keeping unknown ones aside.
    pub fn from_tokens<I, S>(task_id: impl Into<String>, correlation_id: impl Into<String>, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut request = Self::new(task_id, correlation_id, std::iter::empty());
        for token in tokens {
            match ChannelKind::parse(token.as_ref()) {
                Some(kind) => request.push(kind),
                None => request.unmapped.push(token.as_ref().to_string()),
            }
        }
        request
    }

    fn push(&mut self, kind: ChannelKind) {
        if !self.types.contains(&kind) {
            self.types.push(kind);
        }
    }

    pub fn includes(&self, kind: ChannelKind) -> bool {
        self.types.contains(&kind)
    }

    /// Every raw token the caller sent, mapped ones first.
    pub fn requested_tokens(&self) -> Vec<String> {
        self.types
            .iter()
            .map(|k| k.as_str().to_string())
            .chain(self.unmapped.iter().cloned())
            .collect()
    }

    /// Reject empty identifiers before any side effect.
    pub fn validate(&self) -> Result<(), NotifyError> {
        require_id("taskId", &self.task_id)?;
        require_id("correlationId", &self.correlation_id)
    }
}

/// Queue message body handed from the email channel to email delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailIntent {
    pub task_id: String,
    pub correlation_id: String,
}

impl EmailIntent {
    pub fn new(task_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Parse and validate a queue body. Malformed bodies are `Validation` errors.
    pub fn from_body(body: &str) -> Result<Self, NotifyError> {
        let intent: EmailIntent = serde_json::from_str(body)
            .map_err(|e| NotifyError::Validation(format!("malformed email intent: {}", e)))?;
        require_id("taskId", &intent.task_id)?;
        require_id("correlationId", &intent.correlation_id)?;
        Ok(intent)
    }

    pub fn to_body(&self) -> Result<String, NotifyError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn require_id(name: &str, value: &str) -> Result<(), NotifyError> {
    if value.trim().is_empty() {
        return Err(NotifyError::Validation(format!("{} must not be empty", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tokens_dedupes_and_keeps_unmapped() {
        let request =
            NotificationRequest::from_tokens("T1", "C1", ["IN_APP", "SMS", "EMAIL", "IN_APP"]);
        assert_eq!(request.types, vec![ChannelKind::InApp, ChannelKind::Email]);
        assert_eq!(request.unmapped, vec!["SMS".to_string()]);
        assert_eq!(request.requested_tokens(), vec!["IN_APP", "EMAIL", "SMS"]);
    }

    #[test]
    fn test_parse_accepts_case_and_whitespace() {
        assert_eq!(ChannelKind::parse(" email "), Some(ChannelKind::Email));
        assert_eq!(ChannelKind::parse("in_app"), Some(ChannelKind::InApp));
        assert_eq!(ChannelKind::parse("PUSH"), None);
    }

    #[test]
    fn test_validate_rejects_empty_ids() {
        let request = NotificationRequest::new("", "C1", [ChannelKind::Email]);
        assert!(matches!(request.validate(), Err(NotifyError::Validation(_))));

        let request = NotificationRequest::new("T1", "  ", [ChannelKind::Email]);
        assert!(request.validate().is_err());

        assert!(NotificationRequest::new("T1", "C1", []).validate().is_ok());
    }

    #[test]
    fn test_email_intent_wire_format() {
        let body = EmailIntent::new("T1", "C1").to_body().unwrap();
        assert_eq!(body, r#"{"taskId":"T1","correlationId":"C1"}"#);
        assert_eq!(EmailIntent::from_body(&body).unwrap(), EmailIntent::new("T1", "C1"));
    }

    #[test]
    fn test_email_intent_rejects_malformed_body() {
        assert!(matches!(
            EmailIntent::from_body("not json"),
            Err(NotifyError::Validation(_))
        ));
        assert!(EmailIntent::from_body(r#"{"taskId":"T1"}"#).is_err());
        assert!(EmailIntent::from_body(r#"{"taskId":"","correlationId":"C1"}"#).is_err());
    }

    #[test]
    fn test_channel_kind_serde() {
        let json = serde_json::to_string(&[ChannelKind::InApp, ChannelKind::Email]).unwrap();
        assert_eq!(json, r#"["IN_APP","EMAIL"]"#);
    }
}
