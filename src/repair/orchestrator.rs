//! orchestrator.rs
//!
//! The repair loop: an explicit state machine driving one candidate from
//! draft through syntax validation, API normalization, rendering, and
//! error-driven regeneration to a terminal success or failure.
//!
//! Collaborator failures never propagate out of the loop; every error is
//! folded into a diagnostic or an outcome, because one broken topic must
//! not abort the rest of a batch.

use chrono::Utc;
use similar::{ChangeTag, TextDiff};

use crate::llm::prompt::{FixContext, FixMode};
use crate::llm::Generator;
use crate::model::{
    AnimationResult, AttemptRecord, Budget, CandidateSource, FixKind, RenderOutcome,
};
use crate::render::runner::SceneRenderer;
use crate::repair::patcher::ModelPatcher;
use crate::repair::{compat, extract, syntax};

/// Cooperative checkpoint: called at each major transition with
/// `(topic_index, attempt_index, message)`. Returning `false` asks the
/// loop to stop without consuming further budget.
pub type ProgressFn<'a> = dyn FnMut(usize, usize, &str) -> bool + 'a;

enum Phase {
    Validating,
    Fixing(syntax::SyntaxIssue),
    Rendering,
    RuntimeFixing(RenderOutcome),
    Succeeded(RenderOutcome),
    Failed(String),
}

pub struct RepairLoop<'a> {
    generator: &'a dyn Generator,
    renderer: &'a dyn SceneRenderer,
    budget: Budget,
    topic_index: usize,
    topic_name: String,
    context: FixContext<'a>,
    progress: Option<&'a mut ProgressFn<'a>>,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        generator: &'a dyn Generator,
        renderer: &'a dyn SceneRenderer,
        budget: Budget,
        topic_index: usize,
        topic_name: impl Into<String>,
        context: FixContext<'a>,
    ) -> Self {
        Self {
            generator,
            renderer,
            budget,
            topic_index,
            topic_name: topic_name.into(),
            context,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a mut ProgressFn<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Drive `initial` to a terminal state. Never panics, never returns
    /// an error: the result value carries the whole story.
    pub fn run(mut self, initial: CandidateSource) -> AnimationResult {
        let mut current = initial;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut phase = Phase::Validating;

        loop {
            phase = match phase {
                Phase::Validating => self.validate(&mut current, &mut attempts),
                Phase::Fixing(issue) => self.fix_syntax(issue, &mut current, &mut attempts),
                Phase::Rendering => self.render(&current, &attempts),
                Phase::RuntimeFixing(outcome) => {
                    self.fix_runtime(outcome, &mut current, &mut attempts)
                }
                Phase::Succeeded(outcome) => {
                    let _ = self.notify(attempts.len(), "render succeeded");
                    return AnimationResult {
                        topic_index: self.topic_index,
                        topic_name: self.topic_name,
                        success: true,
                        final_source: Some(current.into_text()),
                        artifact: outcome.artifact,
                        attempts,
                        failure_reason: None,
                    };
                }
                Phase::Failed(reason) => {
                    let _ = self.notify(attempts.len(), &format!("failed: {}", first_line(&reason)));
                    return AnimationResult {
                        topic_index: self.topic_index,
                        topic_name: self.topic_name,
                        success: false,
                        final_source: Some(current.into_text()),
                        artifact: None,
                        attempts,
                        failure_reason: Some(reason),
                    };
                }
            };
        }
    }

    /* ---------- phases ---------- */

    fn validate(&mut self, current: &mut CandidateSource, attempts: &mut Vec<AttemptRecord>) -> Phase {
        match syntax::check(current.as_str()) {
            syntax::SyntaxDiagnostic::Ok => {
                self.compat_gate(current, attempts);
                Phase::Rendering
            }
            syntax::SyntaxDiagnostic::Invalid(issue) => {
                if self.budget.syntax_left() == 0 {
                    Phase::Failed(format!(
                        "syntax-fix budget exhausted: line {}: {}",
                        issue.line, issue.message
                    ))
                } else {
                    Phase::Fixing(issue)
                }
            }
        }
    }

    /// Best-effort API normalization on the way into a render. Consumes
    /// no budget; whatever it cannot fix is left for the renderer to
    /// surface as a runtime error.
    fn compat_gate(&mut self, current: &mut CandidateSource, attempts: &mut Vec<AttemptRecord>) {
        let issues = compat::scan(current.as_str());
        if issues.is_empty() {
            return;
        }

        let result = compat::rewrite(current.as_str(), &issues);

        for issue in &result.unresolved {
            let _ = self.notify(
                attempts.len(),
                &format!(
                    "api issue left for render: line {}: {} (suggest {})",
                    issue.line, issue.matched, issue.suggestion
                ),
            );
        }

        if result.patched != current.as_str() {
            let detail = format!("api normalization: {}", result.fixes_applied.join("; "));
            push_record(attempts, FixKind::ApiFix, detail, current.as_str(), &result.patched);
            *current = CandidateSource::new(result.patched);
        }
    }

    fn fix_syntax(
        &mut self,
        issue: syntax::SyntaxIssue,
        current: &mut CandidateSource,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Phase {
        if !self.notify(
            attempts.len(),
            &format!(
                "syntax error at line {} ({} model fixes left): {}",
                issue.line,
                self.budget.syntax_left(),
                issue.message
            ),
        ) {
            return Phase::Failed("cancelled by caller".into());
        }

        let rule = syntax::try_fix(current.as_str(), &issue);
        if rule.changed && rule.patched != current.as_str() {
            let detail = format!("rule-based repair: {} (line {})", issue.message, issue.line);
            push_record(attempts, FixKind::SyntaxFix, detail, current.as_str(), &rule.patched);
            *current = CandidateSource::new(rule.patched);
            return Phase::Validating;
        }

        if !self.budget.take_syntax() {
            return Phase::Failed(format!(
                "syntax-fix budget exhausted: line {}: {}",
                issue.line, issue.message
            ));
        }

        let error_text = format!(
            "line {}: {}\n\ncontext:\n{}",
            issue.line,
            issue.message,
            syntax::error_window(current.as_str(), issue.line, 3)
        );

        let patcher = ModelPatcher::new(self.generator);
        match patcher.fix(current, &error_text, FixMode::Syntax, &self.context) {
            Ok(fixed) => {
                let detail = format!("model repair: {} (line {})", issue.message, issue.line);
                push_record(attempts, FixKind::SyntaxFix, detail, current.as_str(), fixed.as_str());
                *current = fixed;
                Phase::Validating
            }
            Err(e) => Phase::Failed(format!("generation failed during syntax fix: {e}")),
        }
    }

    fn render(&mut self, current: &CandidateSource, attempts: &[AttemptRecord]) -> Phase {
        if !self.notify(attempts.len(), "rendering candidate") {
            return Phase::Failed("cancelled by caller".into());
        }

        let outcome = self.renderer.render(current);
        if outcome.success {
            if outcome.artifact.is_some() {
                Phase::Succeeded(outcome)
            } else {
                Phase::Failed("renderer reported success but no artifact was found".into())
            }
        } else {
            Phase::RuntimeFixing(outcome)
        }
    }

    fn fix_runtime(
        &mut self,
        outcome: RenderOutcome,
        current: &mut CandidateSource,
        attempts: &mut Vec<AttemptRecord>,
    ) -> Phase {
        let summary = outcome
            .error_summary
            .clone()
            .unwrap_or_else(|| extract::summarize(&outcome.stdout, &outcome.stderr));

        if self.budget.runtime_left() == 0 {
            return Phase::Failed(summary);
        }

        if !self.notify(
            attempts.len(),
            &format!(
                "render failed ({} runtime fixes left): {}",
                self.budget.runtime_left(),
                first_line(&summary)
            ),
        ) {
            return Phase::Failed("cancelled by caller".into());
        }

        self.budget.take_runtime();

        let patcher = ModelPatcher::new(self.generator);
        match patcher.fix(current, &summary, FixMode::Runtime, &self.context) {
            Ok(fixed) => {
                let detail = format!("runtime repair: {}", first_line(&summary));
                push_record(attempts, FixKind::RuntimeFix, detail, current.as_str(), fixed.as_str());
                *current = fixed;
                // model output is never rendered without re-checking syntax
                Phase::Validating
            }
            Err(e) => Phase::Failed(format!("generation failed during runtime fix: {e}")),
        }
    }

    /* ---------- helpers ---------- */

    fn notify(&mut self, attempt_index: usize, message: &str) -> bool {
        match self.progress.as_mut() {
            Some(cb) => cb(self.topic_index, attempt_index, message),
            None => true,
        }
    }
}

fn push_record(
    attempts: &mut Vec<AttemptRecord>,
    kind: FixKind,
    detail: String,
    before: &str,
    after: &str,
) {
    let detail = format!("{detail} ({})", diff_stat(before, after));
    attempts.push(AttemptRecord {
        index: attempts.len(),
        kind,
        detail,
        source_before: before.to_string(),
        source_after: after.to_string(),
        at: Utc::now().to_rfc3339(),
    });
}

fn diff_stat(before: &str, after: &str) -> String {
    let diff = TextDiff::from_lines(before, after);
    let mut added = 0usize;
    let mut removed = 0usize;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    format!("+{added}/-{removed} lines")
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;

    const VALID_SCENE: &str = "from manim import *\n\nclass GeneratedScene(Scene):\n    def construct(self):\n        self.wait(1)\n";

    struct ScriptedGenerator {
        replies: RefCell<VecDeque<String>>,
        calls: Cell<usize>,
    }

    impl ScriptedGenerator {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().map(|s| s.to_string()).collect()),
                calls: Cell::new(0),
            }
        }
    }

    impl Generator for ScriptedGenerator {
        fn generate(&self, _: &str, _: &str, _: u32, _: f32) -> Result<String, String> {
            self.calls.set(self.calls.get() + 1);
            self.replies
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| "no scripted reply left".to_string())
        }
    }

    struct ScriptedRenderer {
        outcomes: RefCell<VecDeque<RenderOutcome>>,
        calls: Cell<usize>,
        seen: RefCell<Vec<String>>,
    }

    impl ScriptedRenderer {
        fn new(outcomes: Vec<RenderOutcome>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                calls: Cell::new(0),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl SceneRenderer for ScriptedRenderer {
        fn render(&self, source: &CandidateSource) -> RenderOutcome {
            self.calls.set(self.calls.get() + 1);
            self.seen.borrow_mut().push(source.as_str().to_string());
            self.outcomes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| RenderOutcome::failure("no scripted outcome left"))
        }
    }

    fn rendered_ok() -> RenderOutcome {
        RenderOutcome {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            error_summary: None,
            artifact: Some(PathBuf::from("media/videos/scene/480p15/GeneratedScene.mp4")),
        }
    }

    fn rendered_err(summary: &str) -> RenderOutcome {
        RenderOutcome::failure(summary)
    }

    fn ctx() -> FixContext<'static> {
        FixContext {
            topic: None,
            storyboard: None,
            reference: "",
        }
    }

    fn repair_loop<'a>(
        gen: &'a ScriptedGenerator,
        renderer: &'a ScriptedRenderer,
        budget: Budget,
    ) -> RepairLoop<'a> {
        RepairLoop::new(gen, renderer, budget, 0, "Topic", ctx())
    }

    #[test]
    fn clean_candidate_renders_on_the_first_try() {
        let gen = ScriptedGenerator::new(&[]);
        let renderer = ScriptedRenderer::new(vec![rendered_ok()]);

        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(VALID_SCENE));

        assert!(result.success);
        assert!(result.artifact.is_some());
        assert!(result.attempts.is_empty());
        assert_eq!(renderer.calls.get(), 1);
        assert_eq!(gen.calls.get(), 0);
    }

    #[test]
    fn rule_based_repair_spends_no_model_call() {
        let gen = ScriptedGenerator::new(&[]);
        let renderer = ScriptedRenderer::new(vec![rendered_ok()]);

        let broken = "from manim import *\n\nclass GeneratedScene(Scene):\n    def construct(self):\n        self.wait(1";
        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(broken));

        assert!(result.success);
        assert_eq!(gen.calls.get(), 0);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].kind, FixKind::SyntaxFix);
        assert!(result.attempts[0].detail.contains("rule-based"));
    }

    #[test]
    fn syntax_model_calls_never_exceed_the_budget() {
        // unfixable by rules, and every model reply is broken again
        let broken = "def f(:\n    pass";
        let gen = ScriptedGenerator::new(&[broken, broken, broken]);
        let renderer = ScriptedRenderer::new(vec![]);

        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(broken));

        assert!(!result.success);
        assert_eq!(gen.calls.get(), 3);
        assert_eq!(renderer.calls.get(), 0);
        assert!(result
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("syntax-fix budget exhausted"));
    }

    #[test]
    fn api_gate_normalizes_before_the_first_render() {
        let gen = ScriptedGenerator::new(&[]);
        let renderer = ScriptedRenderer::new(vec![rendered_ok()]);

        let src = "from manim import *\n\nclass GeneratedScene(Scene):\n    def construct(self):\n        self.play(ShowCreation(Circle()))\n";
        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(src));

        assert!(result.success);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].kind, FixKind::ApiFix);

        let seen = renderer.seen.borrow();
        assert!(seen[0].contains("Create(Circle())"));
        assert!(!seen[0].contains("ShowCreation"));
    }

    #[test]
    fn two_render_failures_then_success_within_budget() {
        // scenario: runtime budget 2, third render succeeds
        let gen = ScriptedGenerator::new(&[VALID_SCENE, VALID_SCENE]);
        let renderer = ScriptedRenderer::new(vec![
            rendered_err("NameError: name 'c' is not defined"),
            rendered_err("ValueError: bad run_time"),
            rendered_ok(),
        ]);

        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(VALID_SCENE));

        assert!(result.success);
        assert!(result.artifact.is_some());
        assert_eq!(renderer.calls.get(), 3);
        assert_eq!(result.attempts.len(), 2);
        assert!(result.attempts.iter().all(|a| a.kind == FixKind::RuntimeFix));
    }

    #[test]
    fn exhausted_runtime_budget_reports_the_last_summary() {
        let gen = ScriptedGenerator::new(&[VALID_SCENE, VALID_SCENE]);
        let renderer = ScriptedRenderer::new(vec![
            rendered_err("err one"),
            rendered_err("err two"),
            rendered_err("err three"),
        ]);

        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(VALID_SCENE));

        assert!(!result.success);
        assert!(result.artifact.is_none());
        assert_eq!(renderer.calls.get(), 3);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.failure_reason.as_deref(), Some("err three"));
    }

    #[test]
    fn runtime_fix_with_broken_syntax_and_no_syntax_budget_fails_fast() {
        let broken = "def f(:\n    pass";
        let gen = ScriptedGenerator::new(&[broken]);
        let renderer = ScriptedRenderer::new(vec![rendered_err("ValueError: bad")]);

        let result = repair_loop(&gen, &renderer, Budget::new(0, 2))
            .run(CandidateSource::new(VALID_SCENE));

        assert!(!result.success);
        // the nested syntax pass abandons further runtime retries entirely
        assert_eq!(renderer.calls.get(), 1);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].kind, FixKind::RuntimeFix);
        // the broken candidate is preserved for offline inspection
        assert_eq!(result.final_source.as_deref(), Some(broken));
    }

    #[test]
    fn progress_callback_can_cancel_before_any_render() {
        let gen = ScriptedGenerator::new(&[]);
        let renderer = ScriptedRenderer::new(vec![rendered_ok()]);

        let mut cancel_all = |_: usize, _: usize, _: &str| false;
        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .with_progress(&mut cancel_all)
            .run(CandidateSource::new(VALID_SCENE));

        assert!(!result.success);
        assert_eq!(renderer.calls.get(), 0);
        assert!(result
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("cancelled"));
    }

    #[test]
    fn attempt_trail_is_ordered_and_indexed() {
        let gen = ScriptedGenerator::new(&[VALID_SCENE]);
        let renderer = ScriptedRenderer::new(vec![rendered_err("err"), rendered_ok()]);

        let result = repair_loop(&gen, &renderer, Budget::new(3, 2))
            .run(CandidateSource::new(VALID_SCENE));

        assert!(result.success);
        for (i, attempt) in result.attempts.iter().enumerate() {
            assert_eq!(attempt.index, i);
        }
    }
}
