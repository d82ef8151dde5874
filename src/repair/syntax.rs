//! syntax.rs
//!
//! Candidate source validation and cheap rule-based repair.

use tree_sitter::{Node, Parser};

/* ============================================================
   Diagnostic
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    /// 1-based line of the offending statement.
    pub line: usize,
    pub message: String,
    /// Offending line text with a column marker, when resolvable.
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxDiagnostic {
    Ok,
    Invalid(SyntaxIssue),
}

/* ============================================================
   Checker
   ============================================================ */

/// Parse `source` and report validity. A parse failure is data, never a
/// panic; safe on arbitrary collaborator output.
pub fn check(source: &str) -> SyntaxDiagnostic {
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_python::language()).is_err() {
        return SyntaxDiagnostic::Invalid(SyntaxIssue {
            line: 1,
            message: "parser unavailable".into(),
            context: None,
        });
    }

    let tree = match parser.parse(source, None) {
        Some(t) => t,
        None => {
            return SyntaxDiagnostic::Invalid(SyntaxIssue {
                line: 1,
                message: "parse did not complete".into(),
                context: None,
            })
        }
    };

    let root = tree.root_node();
    if !root.has_error() {
        return SyntaxDiagnostic::Ok;
    }

    let node = first_error_node(root).unwrap_or(root);
    let row = node.start_position().row;
    let column = node.start_position().column;
    let line_text = source.lines().nth(row).unwrap_or("");

    SyntaxDiagnostic::Invalid(SyntaxIssue {
        line: row + 1,
        message: classify_line(line_text),
        context: Some(format!("{line_text}\n{}^", " ".repeat(column))),
    })
}

fn first_error_node(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error_node(child) {
            return Some(found);
        }
    }

    // has_error set but no flagged descendant; report the node itself
    Some(node)
}

/// Derive a patcher-recognizable message from the flagged line.
fn classify_line(line: &str) -> String {
    let opens = line.matches('(').count();
    let closes = line.matches(')').count();
    if opens > closes {
        return "'(' was never closed".into();
    }
    if closes > opens {
        return "unmatched ')'".into();
    }

    let opens = line.matches('[').count();
    let closes = line.matches(']').count();
    if opens > closes {
        return "'[' was never closed".into();
    }
    if closes > opens {
        return "unmatched ']'".into();
    }

    if line.matches('"').count() % 2 == 1 || line.matches('\'').count() % 2 == 1 {
        return "unterminated string literal".into();
    }

    "invalid syntax".into()
}

/* ============================================================
   Rule-based patcher
   ============================================================ */

#[derive(Debug, Clone)]
pub struct PatchResult {
    pub patched: String,
    pub changed: bool,
}

/// Attempt a deterministic single-line repair for `issue`.
///
/// Only the reported line may change. Categories outside unbalanced
/// parens/brackets and unterminated strings are a no-op, signalling the
/// caller to escalate to the model patcher.
pub fn try_fix(source: &str, issue: &SyntaxIssue) -> PatchResult {
    let unchanged = || PatchResult {
        patched: source.to_string(),
        changed: false,
    };

    if issue.line == 0 {
        return unchanged();
    }
    let idx = issue.line - 1;

    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let line = match lines.get(idx) {
        Some(l) => l.clone(),
        None => return unchanged(),
    };

    let fixed = if issue.message.contains("'(' was never closed") || issue.message.contains("unmatched ')'") {
        balance_line(&line, '(', ')')
    } else if issue.message.contains("'[' was never closed") || issue.message.contains("unmatched ']'") {
        balance_line(&line, '[', ']')
    } else if issue.message.contains("unterminated string") {
        close_string(&line)
    } else {
        None
    };

    match fixed {
        Some(new_line) => {
            lines[idx] = new_line;
            PatchResult {
                patched: lines.join("\n"),
                changed: true,
            }
        }
        None => unchanged(),
    }
}

/// Balance `open`/`close` on a single line: append the deficit of closers
/// at line end, or strip the excess closers from the end of the line.
fn balance_line(line: &str, open: char, close: char) -> Option<String> {
    let opens = line.matches(open).count();
    let closes = line.matches(close).count();

    if opens > closes {
        let deficit = opens - closes;
        return Some(format!(
            "{}{}",
            line.trim_end(),
            close.to_string().repeat(deficit)
        ));
    }

    if closes > opens {
        let mut excess = closes - opens;
        let kept: Vec<char> = line
            .chars()
            .rev()
            .filter(|&c| {
                if c == close && excess > 0 {
                    excess -= 1;
                    false
                } else {
                    true
                }
            })
            .collect();
        return Some(kept.into_iter().rev().collect());
    }

    None
}

fn close_string(line: &str) -> Option<String> {
    if line.matches('"').count() % 2 == 1 {
        return Some(format!("{}\"", line.trim_end()));
    }
    if line.matches('\'').count() % 2 == 1 {
        return Some(format!("{}'", line.trim_end()));
    }
    None
}

/* ============================================================
   Error window for fix prompts
   ============================================================ */

/// The flagged line plus surrounding context, marked for the patcher.
pub fn error_window(source: &str, error_line: usize, context_lines: usize) -> String {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() || error_line == 0 {
        return String::new();
    }

    let start = error_line.saturating_sub(context_lines + 1);
    let end = (error_line + context_lines).min(lines.len());

    let mut out = Vec::new();
    for i in start..end {
        let marker = if i + 1 == error_line { ">>" } else { "  " };
        out.push(format!("{marker} line {}: {}", i + 1, lines[i]));
    }
    out.join("\n")
}

/* ============================================================
   Tests
   ============================================================ */
