use std::fmt::Write;

use crate::diff::{ChangeKind, ChangeSet};
use crate::models::DIARY_DATE_FORMAT;

const KEYCAP: char = '\u{20e3}';

fn marker(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Appeared => "✅",
        ChangeKind::Disappeared => "❌",
    }
}

/// Renders a grade change notification, or `None` when there is nothing to send.
pub fn format_changes(changes: &ChangeSet, display_name: Option<&str>) -> Option<String> {
    if changes.is_empty() {
        return None;
    }

    let mut output = String::new();
    let _ = writeln!(output, "🔔 Grade changes");
    if let Some(name) = display_name {
        let _ = writeln!(output, "🧒 {name}");
    }

    for (date, subjects) in changes.dates() {
        let _ = writeln!(output);
        let _ = writeln!(output, "📅 {}", date.format(DIARY_DATE_FORMAT));
        for (subject, lines) in subjects {
            let _ = writeln!(output, "📚 {subject}");
            for line in lines {
                let _ = writeln!(
                    output,
                    "{} {}{} {}",
                    marker(line.kind),
                    line.value,
                    KEYCAP,
                    line.label
                );
            }
        }
    }

    Some(output.trim_end().to_string())
}

pub fn format_rollover(period_label: &str) -> String {
    format!("🔔 Grading period changed: {period_label}")
}
