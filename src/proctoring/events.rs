use serde::{Deserialize, Serialize};

/// Colour of the status indicator dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    Inactive,
    Active,
    Warning,
    Error,
    Terminated,
}

/// Notifications a session publishes to its presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Status {
        indicator: Indicator,
        text: String,
    },
    Started,
    Stopped,
    Warning {
        warning_count: u32,
        max_warnings: u32,
        message: String,
    },
    Terminated {
        violation_count: u32,
    },
    RedirectScheduled {
        url: String,
        delay_secs: u64,
    },
    Redirect {
        url: String,
    },
    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn status(indicator: Indicator, text: impl Into<String>) -> Self {
        SessionEvent::Status {
            indicator,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged() {
        let json = serde_json::to_string(&SessionEvent::Warning {
            warning_count: 1,
            max_warnings: 2,
            message: "Face detection violation detected.".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"warning\""));
        assert!(json.contains("\"warning_count\":1"));

        let json = serde_json::to_string(&SessionEvent::Started).unwrap();
        assert_eq!(json, r#"{"type":"started"}"#);
    }

    #[test]
    fn test_status_event_roundtrip() {
        let event = SessionEvent::status(Indicator::Error, "Proctoring: Connection Error");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"indicator\":\"error\""));
        assert_eq!(serde_json::from_str::<SessionEvent>(&json).unwrap(), event);
    }
}
