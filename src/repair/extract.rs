//! extract.rs
//!
//! Render-failure summarization.
//!
//! Structured tracebacks carry far more signal than stray "error" lines,
//! so the strategies run in priority order and the first match wins.

use regex::Regex;

/* ============================================================
   Strategy table
   ============================================================ */

type Strategy = fn(&str) -> Option<String>;

const STRATEGIES: &[Strategy] = &[
    from_traceback,
    from_syntax_error,
    from_name_error,
    from_error_lines,
];

/// Isolate the most relevant error fragment from raw render output.
pub fn summarize(stdout: &str, stderr: &str) -> String {
    let combined = if stdout.trim().is_empty() {
        stderr.to_string()
    } else {
        format!("{stderr}\n{stdout}")
    };
    let clean = strip_ansi(&combined);

    let mut summary = STRATEGIES
        .iter()
        .find_map(|strategy| strategy(&clean))
        .unwrap_or_else(|| tail_chars(&clean, 1000).to_string());

    if let Some(location) = failing_statement(&clean) {
        summary.push_str("\n\n");
        summary.push_str(&location);
    }

    summary
}

/* ============================================================
   Strategies
   ============================================================ */

fn from_traceback(text: &str) -> Option<String> {
    text.find("Traceback").map(|pos| text[pos..].to_string())
}

fn from_syntax_error(text: &str) -> Option<String> {
    text.find("SyntaxError").map(|pos| {
        let start = clamp_boundary(text, pos.saturating_sub(200));
        text[start..].to_string()
    })
}

fn from_name_error(text: &str) -> Option<String> {
    text.find("NameError").map(|pos| {
        let start = clamp_boundary(text, pos.saturating_sub(500));
        text[start..].to_string()
    })
}

fn from_error_lines(text: &str) -> Option<String> {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| l.to_lowercase().contains("error"))
        .collect();
    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(10);
    Some(lines[start..].join("\n"))
}

/* ============================================================
   Failing-statement extraction
   ============================================================ */

/// Pull the source line the render tool's own traceback formatting points
/// at, so the patcher sees the exact failing statement.
fn failing_statement(text: &str) -> Option<String> {
    // plain interpreter tracebacks: File "scene.py", line 42, in construct
    let file_re = Regex::new(r#"File "[^"]*scene\.py", line (\d+)"#).ok()?;
    if let Some(caps) = file_re.captures(text) {
        let line_num = caps.get(1)?.as_str();
        let match_end = caps.get(0)?.end();
        let code = text[match_end..]
            .lines()
            .nth(1)
            .map(str::trim)
            .filter(|l| !l.is_empty());
        return Some(match code {
            Some(code) => format!("failing statement (scene.py:{line_num}):\n{code}"),
            None => format!("failure location: scene.py:{line_num}"),
        });
    }

    // rich-style frames: scene.py:42 ... ❱ 42 │ self.play(...)
    let loc_re = Regex::new(r"scene\.py:(\d+)").ok()?;
    let caps = loc_re.captures(text)?;
    let line_num = caps.get(1)?.as_str();

    let frame_re = Regex::new(&format!(r"❱\s*{line_num}\s*│?\s*(.+)")).ok()?;
    if let Some(frame) = frame_re.captures(text) {
        let code = frame.get(1)?.as_str().trim();
        return Some(format!("failing statement (scene.py:{line_num}):\n{code}"));
    }

    Some(format!("failure location: scene.py:{line_num}"))
}

/* ============================================================
   Helpers
   ============================================================ */

fn strip_ansi(text: &str) -> String {
    match Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])") {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

fn clamp_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn tail_chars(s: &str, n: usize) -> &str {
    let total = s.chars().count();
    if total <= n {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceback_beats_generic_error_lines() {
        let stderr = "some error happened earlier\nTraceback (most recent call last):\n  File \"scene.py\", line 3, in construct\n    self.play(Create(c))\nNameError: name 'c' is not defined";
        let summary = summarize("", stderr);
        assert!(summary.starts_with("Traceback"));
        assert!(summary.contains("NameError"));
        assert!(!summary.starts_with("some error"));
    }

    #[test]
    fn syntax_error_window_keeps_leading_context() {
        let prefix = "x".repeat(300);
        let stderr = format!("{prefix}\nSyntaxError: invalid syntax");
        let summary = summarize("", &stderr);
        assert!(summary.contains("SyntaxError"));
        assert!(summary.len() > "SyntaxError: invalid syntax".len());
        assert!(summary.len() < stderr.len());
    }

    #[test]
    fn generic_error_lines_keep_only_the_last_ten() {
        let stderr: String = (0..15)
            .map(|i| format!("error number {i}\n"))
            .collect();
        let summary = summarize("", &stderr);
        assert!(!summary.contains("error number 4"));
        assert!(summary.contains("error number 5"));
        assert!(summary.contains("error number 14"));
    }

    #[test]
    fn fallback_returns_output_tail() {
        let stderr = format!("{}END", "a".repeat(2000));
        let summary = summarize("", &stderr);
        assert!(summary.len() <= 1000);
        assert!(summary.ends_with("END"));
    }

    #[test]
    fn ansi_escapes_are_stripped_before_matching() {
        let stderr = "\x1b[31mTraceback (most recent call last):\x1b[0m\nValueError: bad";
        let summary = summarize("", stderr);
        assert!(summary.starts_with("Traceback"));
        assert!(!summary.contains('\x1b'));
    }

    #[test]
    fn failing_statement_is_attached_from_traceback() {
        let stderr = "Traceback (most recent call last):\n  File \"scene.py\", line 7, in construct\n    self.play(Create(missing))\nNameError: name 'missing' is not defined";
        let summary = summarize("", stderr);
        assert!(summary.contains("failing statement (scene.py:7)"));
        assert!(summary.contains("self.play(Create(missing))"));
    }
}
