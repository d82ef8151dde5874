//! batch.rs
//!
//! Drives the repair loop over a breakdown's topics, one at a time. The
//! workspace is reset between topics; one topic's failure never aborts
//! the rest, and results come back in input order.

use chrono::Utc;
use uuid::Uuid;

use crate::llm::prompt::FixContext;
use crate::llm::Generator;
use crate::model::{AnimationResult, Breakdown, Budget, FixKind, Storyboard};
use crate::render::runner::SceneRenderer;
use crate::render::workspace::Workspace;
use crate::repair::orchestrator::{ProgressFn, RepairLoop};
use crate::repair::patcher;

pub struct BatchOptions {
    pub budget: Budget,
    /// Topic indices to animate; `None` animates every storyboard.
    pub topic_indices: Option<Vec<usize>>,
    /// Reference snippets folded into draft and fix prompts.
    pub reference: String,
}

pub fn run_batch(
    generator: &dyn Generator,
    renderer: &dyn SceneRenderer,
    workspace: &Workspace,
    breakdown: &Breakdown,
    storyboards: &[Storyboard],
    opts: &BatchOptions,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Vec<AnimationResult> {
    let indices: Vec<usize> = match &opts.topic_indices {
        Some(list) => list.clone(),
        None => (0..storyboards.len()).collect(),
    };

    let mut results: Vec<AnimationResult> = Vec::new();

    for idx in indices {
        let topic_name = breakdown
            .topics
            .get(idx)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| "Unknown".into());

        if idx >= storyboards.len() {
            results.push(AnimationResult::rejected(
                idx,
                topic_name,
                format!("No storyboard found for topic index {idx}"),
            ));
            continue;
        }

        let topic = match breakdown.topics.get(idx) {
            Some(t) => t,
            None => {
                results.push(AnimationResult::rejected(
                    idx,
                    "Unknown",
                    format!("No topic found in breakdown for index {idx}"),
                ));
                continue;
            }
        };

        let storyboard = &storyboards[idx];
        if let Err(e) = storyboard.validate() {
            results.push(AnimationResult::rejected(idx, topic_name, e));
            continue;
        }

        if let Some(cb) = progress.as_deref_mut() {
            if !cb(idx, 0, &format!("starting animation for topic: {}", topic.name)) {
                results.push(AnimationResult::rejected(idx, topic_name, "cancelled by caller"));
                continue;
            }
        }

        if let Err(e) = workspace.reset() {
            results.push(AnimationResult::rejected(idx, topic_name, e));
            continue;
        }

        let draft = match patcher::draft(generator, topic, storyboard, &opts.reference) {
            Ok(d) => d,
            Err(e) => {
                results.push(AnimationResult::rejected(
                    idx,
                    topic_name,
                    format!("draft generation failed: {e}"),
                ));
                continue;
            }
        };

        let context = FixContext {
            topic: Some(topic),
            storyboard: Some(storyboard),
            reference: &opts.reference,
        };

        let mut forward = |topic_idx: usize, attempt: usize, msg: &str| match progress.as_deref_mut() {
            Some(cb) => cb(topic_idx, attempt, msg),
            None => true,
        };

        let repair =
            RepairLoop::new(generator, renderer, opts.budget, idx, topic.name.as_str(), context)
                .with_progress(&mut forward);

        let mut result = repair.run(draft);
        persist_topic(workspace, &mut result, &mut progress);
        results.push(result);
    }

    let _ = write_report(workspace, &results);
    results
}

/// Copy the artifact under its published name and keep every attempt on
/// disk next to the final source.
fn persist_topic(
    workspace: &Workspace,
    result: &mut AnimationResult,
    progress: &mut Option<&mut ProgressFn<'_>>,
) {
    let topic_index = result.topic_index;
    let attempt_count = result.attempts.len();
    let mut note = |msg: &str| {
        if let Some(cb) = progress.as_deref_mut() {
            let _ = cb(topic_index, attempt_count, msg);
        }
    };

    for attempt in &result.attempts {
        let label = match attempt.kind {
            FixKind::SyntaxFix => "syntax_fix",
            FixKind::ApiFix => "api_fix",
            FixKind::RuntimeFix => "runtime_fix",
        };
        if let Err(e) =
            workspace.save_attempt(result.topic_index, attempt.index, label, &attempt.source_after)
        {
            note(&e);
        }
    }

    if let Some(source) = &result.final_source {
        if let Err(e) =
            workspace.save_attempt(result.topic_index, result.attempts.len(), "final", source)
        {
            note(&e);
        }
    }

    if let Some(artifact) = result.artifact.clone() {
        match workspace.publish_artifact(&artifact, &result.topic_name, result.topic_index) {
            Ok(dest) => {
                note(&format!("video saved to {}", dest.display()));
                result.artifact = Some(dest);
            }
            Err(e) => note(&e),
        }
    }
}

fn write_report(workspace: &Workspace, results: &[AnimationResult]) -> Result<(), String> {
    let report = serde_json::json!({
        "run_id": Uuid::new_v4().to_string(),
        "finished_at": Utc::now().to_rfc3339(),
        "results": results,
    });
    workspace.write_report(&report).map(|_| ())
}

/* ============================================================
   Tests
   ============================================================ */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CandidateSource, RenderOutcome, SceneBeat, Topic};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::fs;

    const VALID_SCENE: &str = "from manim import *\n\nclass GeneratedScene(Scene):\n    def construct(self):\n        self.wait(1)\n";

    struct ScriptedGenerator {
        replies: RefCell<VecDeque<String>>,
        calls: Cell<usize>,
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
    }

    impl SceneRenderer for ScriptedRenderer {
        fn render(&self, _: &CandidateSource) -> RenderOutcome {
            self.calls.set(self.calls.get() + 1);
            self.outcomes
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| RenderOutcome::failure("no scripted outcome left"))
        }
    }

    fn breakdown() -> Breakdown {
        Breakdown {
            topics: vec![
                Topic {
                    name: "Derivatives".into(),
                    summary: "Rates of change".into(),
                    explanation: String::new(),
                },
                Topic {
                    name: "Integrals".into(),
                    summary: "Accumulation".into(),
                    explanation: String::new(),
                },
            ],
        }
    }

    fn storyboard(title: &str) -> Storyboard {
        Storyboard {
            title: title.into(),
            beats: vec![SceneBeat {
                narration: "narration".into(),
                visual: "visual".into(),
            }],
        }
    }

    fn opts(indices: Option<Vec<usize>>) -> BatchOptions {
        BatchOptions {
            budget: Budget::new(3, 2),
            topic_indices: indices,
            reference: String::new(),
        }
    }

    #[test]
    fn missing_storyboard_is_rejected_without_entering_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());

        let gen = ScriptedGenerator {
            replies: RefCell::new(VecDeque::new()),
            calls: Cell::new(0),
        };
        let renderer = ScriptedRenderer {
            outcomes: RefCell::new(VecDeque::new()),
            calls: Cell::new(0),
        };

        let boards: Vec<Storyboard> = Vec::new();
        let results = run_batch(
            &gen,
            &renderer,
            &ws,
            &breakdown(),
            &boards,
            &opts(Some(vec![0])),
            None,
        );

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0]
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("No storyboard found"));
        assert!(results[0].attempts.is_empty());
        assert_eq!(gen.calls.get(), 0);
        assert_eq!(renderer.calls.get(), 0);
    }

    #[test]
    fn results_preserve_input_order_across_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.reset().unwrap();

        // one real artifact for the successful topic
        let artifact = tmp.path().join("raw.mp4");
        fs::write(&artifact, b"video").unwrap();

        let gen = ScriptedGenerator {
            replies: RefCell::new(VecDeque::from([VALID_SCENE.to_string()])),
            calls: Cell::new(0),
        };
        let renderer = ScriptedRenderer {
            outcomes: RefCell::new(VecDeque::from([RenderOutcome {
                success: true,
                stdout: String::new(),
                stderr: String::new(),
                error_summary: None,
                artifact: Some(artifact),
            }])),
            calls: Cell::new(0),
        };

        let boards = vec![storyboard("Derivatives")];
        let results = run_batch(
            &gen,
            &renderer,
            &ws,
            &breakdown(),
            &boards,
            &opts(Some(vec![0, 1])),
            None,
        );

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].topic_index, 0);
        assert!(results[0].success);
        assert!(results[0]
            .artifact
            .as_ref()
            .unwrap()
            .ends_with("rendered/derivatives_0.mp4"));
        assert_eq!(results[1].topic_index, 1);
        assert!(!results[1].success);

        // report lands in the workspace root
        assert!(tmp.path().join("report.json").exists());
    }

    #[test]
    fn final_source_is_kept_for_offline_inspection() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = Workspace::new(tmp.path());

        let gen = ScriptedGenerator {
            replies: RefCell::new(VecDeque::from([
                VALID_SCENE.to_string(),
                VALID_SCENE.to_string(),
                VALID_SCENE.to_string(),
            ])),
            calls: Cell::new(0),
        };
        let renderer = ScriptedRenderer {
            outcomes: RefCell::new(VecDeque::from([
                RenderOutcome::failure("err one"),
                RenderOutcome::failure("err two"),
                RenderOutcome::failure("err three"),
            ])),
            calls: Cell::new(0),
        };

        let boards = vec![storyboard("Derivatives")];
        let results = run_batch(
            &gen,
            &renderer,
            &ws,
            &breakdown(),
            &boards,
            &opts(None),
            None,
        );

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].failure_reason.as_deref(), Some("err three"));
        assert!(results[0].final_source.is_some());

        let saved: Vec<_> = fs::read_dir(ws.attempts_dir())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert!(!saved.is_empty());
    }
}
