//! Terminal rendering of session events: status line, warning and
//! termination notices.

use colored::*;

use crate::proctoring::{Indicator, SessionEvent};

/// Renders one event as terminal text. `None` for events with no visible
/// output.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Status { indicator, text } => {
            Some(format!("{} {}", dot(*indicator), text))
        }
        SessionEvent::Started => Some(format!(
            "{} {}",
            "📹".green(),
            "Camera proctoring is now active".green()
        )),
        SessionEvent::Stopped => None,
        SessionEvent::Warning {
            warning_count,
            max_warnings,
            message,
        } => Some(render_warning(*warning_count, *max_warnings, message)),
        SessionEvent::Terminated { violation_count } => Some(render_termination(*violation_count)),
        SessionEvent::RedirectScheduled { url, delay_secs } => Some(format!(
            "  You will be redirected to {} in {}s.",
            url, delay_secs
        )),
        SessionEvent::Redirect { url } => Some(format!("{} Redirecting to {}", "→".cyan(), url)),
        SessionEvent::Error { message } => {
            Some(format!("{} {}", "Camera Error:".red().bold(), message))
        }
    }
}

fn dot(indicator: Indicator) -> ColoredString {
    match indicator {
        Indicator::Active => "●".green(),
        Indicator::Warning => "●".yellow(),
        Indicator::Inactive | Indicator::Error | Indicator::Terminated => "●".red(),
    }
}

fn render_warning(warning_count: u32, max_warnings: u32, message: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "⚠️  Proctoring Warning".yellow().bold()));
    out.push_str(&format!("{}\n", "─".repeat(60).yellow()));
    out.push_str(&format!("  {}\n", message));
    out.push_str(&format!(
        "  Warning Count: {}/{}\n",
        warning_count.to_string().yellow(),
        max_warnings
    ));
    out.push_str(&format!(
        "  Note: After {} warnings, your contest will be automatically terminated.",
        max_warnings
    ));
    out
}

fn render_termination(violation_count: u32) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\n", "🚫 Contest Terminated".red().bold()));
    out.push_str(&format!("{}\n", "═".repeat(60).red()));
    out.push_str("  Your contest has been terminated due to multiple proctoring violations.\n");
    out.push_str(&format!(
        "  Total Violations: {}\n",
        violation_count.to_string().red()
    ));
    out.push_str("  Reason: Face detection violations");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(event: &SessionEvent) -> String {
        colored::control::set_override(false);
        render(event).unwrap_or_default()
    }

    #[test]
    fn test_warning_shows_count() {
        let text = plain(&SessionEvent::Warning {
            warning_count: 1,
            max_warnings: 2,
            message: "Face detection violation detected.".into(),
        });
        assert!(text.contains("Warning Count: 1/2"));
        assert!(text.contains("Face detection violation detected."));
    }

    #[test]
    fn test_termination_shows_total() {
        let text = plain(&SessionEvent::Terminated { violation_count: 3 });
        assert!(text.contains("Contest Terminated"));
        assert!(text.contains("Total Violations: 3"));
    }

    #[test]
    fn test_status_line() {
        let text = plain(&SessionEvent::status(Indicator::Active, "Proctoring: Active ✓"));
        assert!(text.ends_with("Proctoring: Active ✓"));
    }

    #[test]
    fn test_stopped_is_silent() {
        assert!(render(&SessionEvent::Stopped).is_none());
    }
}
