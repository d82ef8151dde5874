//! patcher.rs
//!
//! Model-backed source correction. The most expensive and least
//! deterministic repair path: no correctness guarantee, bounded only by
//! the orchestrator's budget, and its output is always re-validated.

use crate::llm::prompt::{build_draft_prompt, build_fix_prompt, FixContext, FixMode};
use crate::llm::Generator;
use crate::model::{CandidateSource, Storyboard, Topic};

const FIX_MAX_TOKENS: u32 = 6000;
const FIX_TEMPERATURE: f32 = 0.2;

const DRAFT_MAX_TOKENS: u32 = 16_000;
const DRAFT_TEMPERATURE: f32 = 0.4;

pub struct ModelPatcher<'a> {
    generator: &'a dyn Generator,
}

impl<'a> ModelPatcher<'a> {
    pub fn new(generator: &'a dyn Generator) -> Self {
        Self { generator }
    }

    /// One correction call under the given persona. Returns the full
    /// replacement source with surrounding fences stripped.
    pub fn fix(
        &self,
        source: &CandidateSource,
        error: &str,
        mode: FixMode,
        ctx: &FixContext<'_>,
    ) -> Result<CandidateSource, String> {
        let prompt = build_fix_prompt(mode, source.as_str(), error, ctx);
        let raw = self
            .generator
            .generate(&prompt.system, &prompt.user, FIX_MAX_TOKENS, FIX_TEMPERATURE)?;

        let fixed = CandidateSource::from_generated(&raw);
        if fixed.as_str().trim().is_empty() {
            return Err("generation returned an empty script".into());
        }
        Ok(fixed)
    }
}

/// Initial storyboard-to-scene draft, handed to the repair loop as the
/// first candidate.
pub fn draft(
    generator: &dyn Generator,
    topic: &Topic,
    storyboard: &Storyboard,
    reference: &str,
) -> Result<CandidateSource, String> {
    let prompt = build_draft_prompt(topic, storyboard, reference);
    let raw = generator.generate(&prompt.system, &prompt.user, DRAFT_MAX_TOKENS, DRAFT_TEMPERATURE)?;

    let candidate = CandidateSource::from_generated(&raw);
    if candidate.as_str().trim().is_empty() {
        return Err("generation returned an empty draft".into());
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedGenerator(&'static str);

    impl Generator for CannedGenerator {
        fn generate(&self, _: &str, _: &str, _: u32, _: f32) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn fenced_reply_becomes_a_bare_candidate() {
        let gen = CannedGenerator("```python\nfoo(1, 2)\n```");
        let patcher = ModelPatcher::new(&gen);
        let ctx = FixContext {
            topic: None,
            storyboard: None,
            reference: "",
        };
        let fixed = patcher
            .fix(&CandidateSource::new("foo(1, 2"), "'(' was never closed", FixMode::Syntax, &ctx)
            .unwrap();
        assert_eq!(fixed.as_str(), "foo(1, 2)");
    }

    #[test]
    fn empty_reply_is_an_error() {
        let gen = CannedGenerator("``````");
        let patcher = ModelPatcher::new(&gen);
        let ctx = FixContext {
            topic: None,
            storyboard: None,
            reference: "",
        };
        let result = patcher.fix(&CandidateSource::new("x"), "err", FixMode::Runtime, &ctx);
        assert!(result.is_err());
    }
}
