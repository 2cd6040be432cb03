//! Shared utility functions for CLI commands

use std::time::Duration;

/// Format an operation duration: "850ms", "2.4s", "1m12s"
#[must_use]
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Truncate text to at most `max_chars` characters, marking the cut with "..."
///
/// Counts characters, not bytes, so multi-byte text never splits mid-character.
#[must_use]
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed_millis() {
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0ms");
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
    }

    #[test]
    fn test_format_elapsed_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(2400)), "2.4s");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "59.0s");
    }

    #[test]
    fn test_format_elapsed_minutes() {
        assert_eq!(format_elapsed(Duration::from_secs(72)), "1m12s");
    }

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("Install complete", 30), "Install complete");
        assert_eq!(truncate("", 5), "");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("Rollback to revision 12", 12), "Rollback ...");
        assert_eq!(truncate("déploiement", 6), "dép...");
    }
}
