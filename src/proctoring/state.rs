use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Inactive,
    Starting,
    Active,
    Warning,
    Terminated,
}

impl SessionState {
    /// Sampling runs in both Active and Warning.
    pub fn is_monitoring(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Warning)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::Inactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        assert_eq!(SessionState::default(), SessionState::Inactive);
    }

    #[test]
    fn test_monitoring_states() {
        assert!(SessionState::Active.is_monitoring());
        assert!(SessionState::Warning.is_monitoring());
        assert!(!SessionState::Starting.is_monitoring());
        assert!(!SessionState::Inactive.is_monitoring());
        assert!(!SessionState::Terminated.is_monitoring());
    }

    #[test]
    fn test_only_terminated_is_terminal() {
        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::Inactive.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Warning).unwrap();
        assert_eq!(json, "\"Warning\"");

        let state: SessionState = serde_json::from_str("\"Terminated\"").unwrap();
        assert_eq!(state, SessionState::Terminated);
    }
}
