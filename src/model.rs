use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/* ---------- candidate source ---------- */

/// One version of the generated scene program.
///
/// Immutable by convention: every repair step builds a new value, the
/// orchestrator holds exactly one current candidate at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSource {
    text: String,
}

impl CandidateSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Build a candidate from raw collaborator output.
    ///
    /// Generation replies may wrap the program in markdown fences; the
    /// fenced block (minus an optional language tag) is the program.
    pub fn from_generated(raw: &str) -> Self {
        Self {
            text: strip_code_fences(raw),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

pub fn strip_code_fences(raw: &str) -> String {
    if !raw.contains("```") {
        return raw.trim().to_string();
    }

    let mut parts = raw.splitn(3, "```");
    let _ = parts.next();
    let fenced = parts.next().unwrap_or("");

    let fenced = fenced
        .strip_prefix("python")
        .or_else(|| fenced.strip_prefix("py"))
        .unwrap_or(fenced);

    fenced.trim().to_string()
}

/* ---------- render outcome ---------- */

/// Result of one render collaborator invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub error_summary: Option<String>,
    pub artifact: Option<PathBuf>,
}

impl RenderOutcome {
    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            error_summary: Some(summary.into()),
            artifact: None,
        }
    }
}

/* ---------- repair trail ---------- */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixKind {
    SyntaxFix,
    ApiFix,
    RuntimeFix,
}

/// One candidate-changing correction step.
///
/// The trail is append-only and strictly ordered by issuance; it is the
/// audit log a caller uses to reconstruct the repair history.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub index: usize,
    pub kind: FixKind,
    pub detail: String,
    pub source_before: String,
    pub source_after: String,
    pub at: String,
}

/* ---------- terminal result ---------- */

#[derive(Debug, Clone, Serialize)]
pub struct AnimationResult {
    pub topic_index: usize,
    pub topic_name: String,
    pub success: bool,
    pub final_source: Option<String>,
    pub artifact: Option<PathBuf>,
    pub attempts: Vec<AttemptRecord>,
    pub failure_reason: Option<String>,
}

impl AnimationResult {
    /// Terminal failure produced before the repair loop ever runs
    /// (missing storyboard, missing topic, unreadable input).
    pub fn rejected(topic_index: usize, topic_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic_index,
            topic_name: topic_name.into(),
            success: false,
            final_source: None,
            artifact: None,
            attempts: Vec::new(),
            failure_reason: Some(reason.into()),
        }
    }
}

/* ---------- retry budget ---------- */

/// Two independent bounded counters. A fix of either kind is never
/// attempted once its counter reaches zero.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    syntax_fixes: u32,
    runtime_fixes: u32,
}

impl Budget {
    pub fn new(syntax_fixes: u32, runtime_fixes: u32) -> Self {
        Self {
            syntax_fixes,
            runtime_fixes,
        }
    }

    pub fn syntax_left(&self) -> u32 {
        self.syntax_fixes
    }

    pub fn runtime_left(&self) -> u32 {
        self.runtime_fixes
    }

    /// Consume one syntax-fix unit. Returns false when already empty.
    pub fn take_syntax(&mut self) -> bool {
        if self.syntax_fixes == 0 {
            return false;
        }
        self.syntax_fixes -= 1;
        true
    }

    /// Consume one runtime-fix unit. Returns false when already empty.
    pub fn take_runtime(&mut self) -> bool {
        if self.runtime_fixes == 0 {
            return false;
        }
        self.runtime_fixes -= 1;
        true
    }
}

/* ---------- storyboard input ---------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breakdown {
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneBeat {
    pub narration: String,
    pub visual: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storyboard {
    pub title: String,
    pub beats: Vec<SceneBeat>,
}

impl Breakdown {
    pub fn load(path: &std::path::Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
        let breakdown: Breakdown = serde_json::from_str(&raw)
            .map_err(|e| format!("invalid breakdown {}: {e}", path.display()))?;
        breakdown.validate()?;
        Ok(breakdown)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.topics.is_empty() {
            return Err("breakdown contains no topics".into());
        }
        for (i, t) in self.topics.iter().enumerate() {
            if t.name.trim().is_empty() {
                return Err(format!("topic {i} has an empty name"));
            }
        }
        Ok(())
    }
}

impl Storyboard {
    pub fn validate(&self) -> Result<(), String> {
        if self.beats.is_empty() {
            return Err(format!("storyboard '{}' has no scene beats", self.title));
        }
        for (i, beat) in self.beats.iter().enumerate() {
            if beat.narration.trim().is_empty() {
                return Err(format!("storyboard '{}' beat {i} has empty narration", self.title));
            }
            if beat.visual.trim().is_empty() {
                return Err(format!("storyboard '{}' beat {i} has empty visual description", self.title));
            }
        }
        Ok(())
    }
}

pub fn load_storyboards(path: &std::path::Path) -> Result<Vec<Storyboard>, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let boards: Vec<Storyboard> = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid storyboards {}: {e}", path.display()))?;
    for board in &boards {
        board.validate()?;
    }
    Ok(boards)
}

/* ---------- tests ---------- */
