//! CLI output formatting utilities.
//!
//! Answers go to stdout; status, tool activity and errors go to stderr so
//! the answer can be piped.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        eprintln!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        eprintln!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print a tool invocation.
    pub fn tool_start(name: &str, args: &Value) {
        eprintln!(
            "  {} {} {}",
            style("[tool]").dim(),
            style(name).bold(),
            style(preview(&args.to_string(), 120)).dim()
        );
    }

    /// Print a completed tool invocation.
    pub fn tool_done(name: &str, output: &str) {
        eprintln!(
            "  {} {} {}",
            style("✓").green(),
            name,
            style(format!("({} chars)", output.chars().count())).dim()
        );
    }

    /// Print a failed tool invocation or run error.
    pub fn tool_failed(message: &str) {
        eprintln!("  {} {}", style("✗").red(), message);
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Collapse whitespace and truncate with an ellipsis.
fn preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("a\nb", 10), "a b");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }
}
