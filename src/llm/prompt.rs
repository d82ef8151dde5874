use crate::model::{Storyboard, Topic};

#[derive(Debug, Clone)]
pub struct ScenePrompt {
    pub system: String,
    pub user: String,
}

/// Which persona the fix call runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    Syntax,
    Runtime,
}

/// Contextual material folded into fix prompts, excerpted to bounded
/// lengths so one oversized storyboard cannot crowd out the error.
pub struct FixContext<'a> {
    pub topic: Option<&'a Topic>,
    pub storyboard: Option<&'a Storyboard>,
    pub reference: &'a str,
}

const TOPIC_EXCERPT: usize = 4000;
const STORYBOARD_EXCERPT: usize = 2000;
const REFERENCE_EXCERPT: usize = 2000;

/* ============================================================
   Draft prompt (storyboard -> scene code)
   ============================================================ */

pub fn build_draft_prompt(topic: &Topic, storyboard: &Storyboard, reference: &str) -> ScenePrompt {
    let system = r#"
You are an expert Manim Community Edition code generator.

Rules:
- Implement every storyboard beat, in order, with a short wait between beats
- ONE Scene class named GeneratedScene with a construct() method
- Fade out everything a beat created before the next beat starts
- All LaTeX in raw strings: MathTex(r"...")
- Never reference external image files; build visuals from shapes and text
- No syntax errors: check parentheses, brackets, and quotes
- Output only the complete Python script, nothing else
"#
    .trim()
    .to_string();

    let mut user = String::new();

    user.push_str("TOPIC\n");
    user.push_str(&excerpt(&topic_text(topic), TOPIC_EXCERPT));
    user.push_str("\n\n");

    user.push_str("STORYBOARD\n");
    user.push_str(&excerpt(&storyboard_text(storyboard), STORYBOARD_EXCERPT));
    user.push_str("\n\n");

    if !reference.trim().is_empty() {
        user.push_str("REFERENCE SNIPPETS\n");
        user.push_str(&excerpt(reference, REFERENCE_EXCERPT));
        user.push_str("\n\n");
    }

    user.push_str("Write the complete scene script implementing this storyboard.\n");

    ScenePrompt { system, user }
}

/* ============================================================
   Fix prompts
   ============================================================ */

pub fn build_fix_prompt(
    mode: FixMode,
    source: &str,
    error: &str,
    ctx: &FixContext<'_>,
) -> ScenePrompt {
    let system = match mode {
        FixMode::Syntax => syntax_persona(),
        FixMode::Runtime => runtime_persona(),
    };

    ScenePrompt {
        system,
        user: fix_user_prompt(mode, source, error, ctx),
    }
}

/// Strict minimal-change persona: the reply must touch only the reported
/// defect.
fn syntax_persona() -> String {
    r#"
You are a Python syntax debugger for animation scene code.

Fix ONLY the reported syntax error. Common fixes:
- Add missing closing parentheses, brackets, quotes
- Fix indentation
- Add missing colons after if/for/def

Do NOT refactor working code. Do NOT rename anything.
Output only the corrected Python script.
"#
    .trim()
    .to_string()
}

/// Broader persona: the renderer rejected the script at runtime, which is
/// frequently a removed or renamed library symbol.
fn runtime_persona() -> String {
    r#"
You are a Manim Community Edition runtime debugger.

Fix ONLY the reported runtime error. Frequent causes:
- Removed API: ShowCreation -> use Create
- ApplyMethod -> use the .animate syntax
- MovingCameraScene animates self.camera directly, never self.camera.frame
- LaggedStartMap is unreliable: use individual Write() calls in a loop
- Undefined variables and invalid parameter values
- LaTeX strings that are not raw strings

Preserve the storyboard's ordering and timing.
Output only the corrected Python script.
"#
    .trim()
    .to_string()
}

fn fix_user_prompt(mode: FixMode, source: &str, error: &str, ctx: &FixContext<'_>) -> String {
    let mut out = String::new();

    if let Some(topic) = ctx.topic {
        out.push_str("TOPIC\n");
        out.push_str(&excerpt(&topic_text(topic), TOPIC_EXCERPT));
        out.push_str("\n\n");
    }

    if let Some(storyboard) = ctx.storyboard {
        out.push_str("STORYBOARD\n");
        out.push_str(&excerpt(&storyboard_text(storyboard), STORYBOARD_EXCERPT));
        out.push_str("\n\n");
    }

    let kind = match mode {
        FixMode::Syntax => "SYNTAX",
        FixMode::Runtime => "RUNTIME",
    };

    out.push_str(&format!("CURRENT SCRIPT (HAS {kind} ERROR)\n"));
    out.push_str(source);
    out.push_str("\n\n");

    out.push_str("ERROR\n");
    out.push_str(error);
    out.push_str("\n\n");

    if !ctx.reference.trim().is_empty() {
        out.push_str("REFERENCE SNIPPETS\n");
        out.push_str(&excerpt(ctx.reference, REFERENCE_EXCERPT));
        out.push_str("\n\n");
    }

    out.push_str(&format!(
        "Fix the {} error. Keep everything else exactly the same.\nOutput corrected Python code only.\n",
        kind.to_lowercase()
    ));

    out
}

/* ============================================================
   Helpers
   ============================================================ */

fn topic_text(topic: &Topic) -> String {
    serde_json::to_string_pretty(topic).unwrap_or_else(|_| topic.name.clone())
}

fn storyboard_text(storyboard: &Storyboard) -> String {
    serde_json::to_string_pretty(storyboard).unwrap_or_else(|_| storyboard.title.clone())
}

fn excerpt(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/* ============================================================
   Tests
   ============================================================ */
