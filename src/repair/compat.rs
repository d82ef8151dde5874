//! compat.rs
//!
//! Deprecated animation-API detection and mechanical rewriting.
//!
//! Purely textual: the table encodes known-bad call shapes for the render
//! library, not language semantics. Unfixable matches are surfaced to the
//! caller and left for the renderer to report as runtime errors.

use regex::Regex;

/* ============================================================
   Compatibility table
   ============================================================ */

struct CompatRule {
    label: &'static str,
    pattern: &'static str,
    /// Regex replacement template; `None` marks an advisory rule whose
    /// fix is not mechanically safe.
    rewrite: Option<&'static str>,
    suggestion: &'static str,
    note: &'static str,
}

const COMPAT_RULES: &[CompatRule] = &[
    CompatRule {
        label: "ShowCreation",
        pattern: r"\bShowCreation\b",
        rewrite: Some("Create"),
        suggestion: "Create",
        note: "ShowCreation was removed from the current API; Create draws the mobject",
    },
    CompatRule {
        label: "self.camera.frame.animate",
        pattern: r"self\.camera\.frame\.animate",
        rewrite: Some("self.camera.animate"),
        suggestion: "self.camera.animate",
        note: "MovingCameraScene animates the camera object directly",
    },
    CompatRule {
        label: "FadeInFrom",
        pattern: r"\bFadeInFrom\(\s*([^,()]+?)\s*,\s*([^()]+?)\s*\)",
        rewrite: Some("FadeIn($1, shift=$2)"),
        suggestion: "FadeIn(mobject, shift=direction)",
        note: "FadeInFrom was folded into FadeIn's shift argument",
    },
    CompatRule {
        label: "FadeOutAndShift",
        pattern: r"\bFadeOutAndShift\(\s*([^,()]+?)\s*,\s*([^()]+?)\s*\)",
        rewrite: Some("FadeOut($1, shift=$2)"),
        suggestion: "FadeOut(mobject, shift=direction)",
        note: "FadeOutAndShift was folded into FadeOut's shift argument",
    },
    CompatRule {
        label: "get_graph",
        pattern: r"\.get_graph\(",
        rewrite: Some(".plot("),
        suggestion: "axes.plot(...)",
        note: "Axes.get_graph was renamed to Axes.plot",
    },
    CompatRule {
        label: "ApplyMethod",
        pattern: r"\bApplyMethod\b",
        rewrite: None,
        suggestion: ".animate syntax",
        note: "argument shapes are ambiguous; rewrite by hand with mobject.animate",
    },
    CompatRule {
        label: "LaggedStartMap",
        pattern: r"\bLaggedStartMap\b",
        rewrite: None,
        suggestion: "individual Write() calls in a loop",
        note: "LaggedStartMap misbehaves on current releases",
    },
    CompatRule {
        label: "TransformFromCopy",
        pattern: r"\bTransformFromCopy\b",
        rewrite: None,
        suggestion: "ReplacementTransform",
        note: "verify against the current release before keeping this call",
    },
];

/* ============================================================
   Scanner
   ============================================================ */

#[derive(Debug, Clone)]
pub struct ApiIssue {
    /// 1-based line of the match.
    pub line: usize,
    pub matched: String,
    pub suggestion: String,
    pub note: String,
    pub mechanical: bool,
    label: &'static str,
}

/// Scan the full source against the compatibility table. An empty result
/// is the compatible state.
pub fn scan(source: &str) -> Vec<ApiIssue> {
    let mut issues = Vec::new();

    for rule in COMPAT_RULES {
        let re = match Regex::new(rule.pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };

        for m in re.find_iter(source) {
            let line = source[..m.start()].matches('\n').count() + 1;
            issues.push(ApiIssue {
                line,
                matched: m.as_str().to_string(),
                suggestion: rule.suggestion.to_string(),
                note: rule.note.to_string(),
                mechanical: rule.rewrite.is_some(),
                label: rule.label,
            });
        }
    }

    issues.sort_by_key(|i| i.line);
    issues
}

/* ============================================================
   Auto-rewriter
   ============================================================ */

#[derive(Debug, Clone)]
pub struct RewriteResult {
    pub patched: String,
    pub fixes_applied: Vec<String>,
    pub unresolved: Vec<ApiIssue>,
}

/// Apply every mechanically-safe substitution implied by `issues` across
/// the whole source. Advisory issues are passed back unpatched. Running
/// the rewriter on already-fixed source changes nothing.
pub fn rewrite(source: &str, issues: &[ApiIssue]) -> RewriteResult {
    let mut patched = source.to_string();
    let mut fixes_applied = Vec::new();
    let mut unresolved = Vec::new();

    let mut seen_labels: Vec<&'static str> = Vec::new();

    for issue in issues {
        if !issue.mechanical {
            unresolved.push(issue.clone());
            continue;
        }
        if seen_labels.contains(&issue.label) {
            continue;
        }
        seen_labels.push(issue.label);

        let rule = match COMPAT_RULES.iter().find(|r| r.label == issue.label) {
            Some(r) => r,
            None => continue,
        };
        let template = match rule.rewrite {
            Some(t) => t,
            None => continue,
        };
        let re = match Regex::new(rule.pattern) {
            Ok(re) => re,
            Err(_) => continue,
        };

        let count = re.find_iter(&patched).count();
        if count == 0 {
            continue;
        }

        patched = re.replace_all(&patched, template).into_owned();
        fixes_applied.push(format!(
            "{} -> {} ({count} occurrence{})",
            rule.label,
            rule.suggestion,
            if count == 1 { "" } else { "s" }
        ));
    }

    RewriteResult {
        patched,
        fixes_applied,
        unresolved,
    }
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_source_scans_empty() {
        let src = "self.play(Create(circle))\nself.play(FadeOut(circle))";
        assert!(scan(src).is_empty());
    }

    #[test]
    fn removed_creation_symbol_is_rewritten_once() {
        let src = "self.play(ShowCreation(circle))";
        let issues = scan(src);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 1);

        let result = rewrite(src, &issues);
        assert_eq!(result.patched, "self.play(Create(circle))");
        assert_eq!(result.fixes_applied.len(), 1);
        assert!(result.fixes_applied[0].starts_with("ShowCreation -> Create"));
    }

    #[test]
    fn camera_frame_animate_is_rewritten() {
        let src = "self.play(self.camera.frame.animate.scale(0.5))";
        let result = rewrite(src, &scan(src));
        assert_eq!(result.patched, "self.play(self.camera.animate.scale(0.5))");
    }

    #[test]
    fn fade_in_from_is_reconstructed_with_shift() {
        let src = "self.play(FadeInFrom(label, DOWN))";
        let result = rewrite(src, &scan(src));
        assert_eq!(result.patched, "self.play(FadeIn(label, shift=DOWN))");
    }

    #[test]
    fn advisory_rules_are_left_unpatched() {
        let src = "self.play(ApplyMethod(square.shift, UP))";
        let issues = scan(src);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].mechanical);

        let result = rewrite(src, &issues);
        assert_eq!(result.patched, src);
        assert!(result.fixes_applied.is_empty());
        assert_eq!(result.unresolved.len(), 1);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let src = "self.play(ShowCreation(a))\nself.play(FadeInFrom(b, LEFT))\ng = axes.get_graph(f)";
        let first = rewrite(src, &scan(src));
        let second = rewrite(&first.patched, &scan(&first.patched));
        assert_eq!(second.patched, first.patched);
        assert!(second.fixes_applied.is_empty());
    }

    #[test]
    fn occurrences_are_counted_per_rule() {
        let src = "ShowCreation(a)\nShowCreation(b)";
        let result = rewrite(src, &scan(src));
        assert_eq!(result.fixes_applied.len(), 1);
        assert!(result.fixes_applied[0].contains("2 occurrences"));
    }

    #[test]
    fn match_lines_are_one_based() {
        let src = "x = 1\nself.play(ShowCreation(a))";
        let issues = scan(src);
        assert_eq!(issues[0].line, 2);
    }
}
