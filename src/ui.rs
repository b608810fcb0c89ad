use colored::{ColoredString, Colorize};
use converge::{Action, Status};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Colored lifecycle status
pub fn status(status: Status) -> ColoredString {
    let text = status.to_string();
    match status {
        Status::Ready => text.green(),
        Status::Deleted => text.dimmed(),
        Status::Failed => text.red().bold(),
        Status::Pending => text.normal(),
        Status::Creating | Status::Updating | Status::Deleting => text.yellow(),
    }
}

/// Marker for what happened to a resource
pub fn action_icon(action: Action) -> ColoredString {
    match action {
        Action::Created => "+".green(),
        Action::Updated => "~".yellow(),
        Action::Deleted => "-".red(),
        Action::NoChange => "=".dimmed(),
        Action::Skipped => "○".yellow(),
        Action::Failed => "✗".red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_keep_their_text() {
        colored::control::set_override(false);
        assert_eq!(status(Status::Ready).to_string(), "ready");
        assert_eq!(status(Status::Failed).to_string(), "failed");
        assert_eq!(action_icon(Action::Created).to_string(), "+");
        assert_eq!(action_icon(Action::Deleted).to_string(), "-");
    }
}
