//! runner.rs
//!
//! Render collaborator invocation. Executes the render tool as a
//! subprocess, captures raw output, and enforces a wall-clock ceiling.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::model::{CandidateSource, RenderOutcome};
use crate::render::workspace::{Workspace, SCENE_FILE};
use crate::repair::extract;

/// Render collaborator.
pub trait SceneRenderer {
    fn render(&self, source: &CandidateSource) -> RenderOutcome;
}

/// Renders by invoking the animation tool (`manim` by default) against
/// the workspace scene file.
pub struct CommandRenderer {
    workspace: Workspace,
    program: String,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self {
            workspace,
            program: "manim".into(),
            timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

impl SceneRenderer for CommandRenderer {
    fn render(&self, source: &CandidateSource) -> RenderOutcome {
        let scene_class = match detect_scene_class(source.as_str()) {
            Some(name) => name,
            None => return RenderOutcome::failure("No Scene class found in candidate source"),
        };

        if let Err(e) = self.workspace.write_scene(source.as_str()) {
            return RenderOutcome::failure(e);
        }

        let run = run_with_timeout(
            Command::new(&self.program)
                .arg("-ql")
                .arg("--disable_caching")
                .arg(SCENE_FILE)
                .arg(&scene_class)
                .current_dir(self.workspace.scene_dir()),
            self.timeout,
        );

        let (exit_ok, stdout, stderr) = match run {
            RunResult::Finished {
                success,
                stdout,
                stderr,
            } => (success, stdout, stderr),
            RunResult::TimedOut { stdout, stderr } => {
                return RenderOutcome {
                    success: false,
                    stdout,
                    stderr,
                    error_summary: Some(format!("timeout after {}s", self.timeout.as_secs())),
                    artifact: None,
                };
            }
            RunResult::SpawnFailed(e) => {
                return RenderOutcome::failure(format!("failed to launch {}: {e}", self.program));
            }
        };

        if exit_ok {
            match self.workspace.find_artifact() {
                Some(artifact) => RenderOutcome {
                    success: true,
                    stdout,
                    stderr,
                    error_summary: None,
                    artifact: Some(artifact),
                },
                None => RenderOutcome {
                    success: false,
                    error_summary: Some("render tool exited cleanly but produced no video".into()),
                    stdout,
                    stderr,
                    artifact: None,
                },
            }
        } else {
            let summary = extract::summarize(&stdout, &stderr);
            RenderOutcome {
                success: false,
                stdout,
                stderr,
                error_summary: Some(summary),
                artifact: None,
            }
        }
    }
}

/// The render tool takes the scene class name on the command line; pick
/// the first class deriving from a Scene base.
pub fn detect_scene_class(source: &str) -> Option<String> {
    let re = Regex::new(r"class\s+(\w+)\s*\(.*Scene.*\)").ok()?;
    re.captures(source)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/* ============================================================
   Bounded subprocess execution
   ============================================================ */

enum RunResult {
    Finished {
        success: bool,
        stdout: String,
        stderr: String,
    },
    TimedOut {
        stdout: String,
        stderr: String,
    },
    SpawnFailed(String),
}

fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> RunResult {
    let mut child = match cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn() {
        Ok(c) => c,
        Err(e) => return RunResult::SpawnFailed(e.to_string()),
    };

    // Drain both pipes off-thread so a chatty tool cannot deadlock on a
    // full pipe buffer while we poll for exit.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let out_handle = thread::spawn(move || read_all(stdout_pipe));
    let err_handle = thread::spawn(move || read_all(stderr_pipe));

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;

    let success = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status.success(),
            Ok(None) => {
                if Instant::now() >= deadline {
                    timed_out = true;
                    let _ = child.kill();
                    let _ = child.wait();
                    break false;
                }
                thread::sleep(Duration::from_millis(200));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                break false;
            }
        }
    };

    let stdout = out_handle.join().unwrap_or_default();
    let stderr = err_handle.join().unwrap_or_default();

    if timed_out {
        RunResult::TimedOut { stdout, stderr }
    } else {
        RunResult::Finished {
            success,
            stdout,
            stderr,
        }
    }
}

fn read_all(pipe: Option<impl Read>) -> String {
    let mut text = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut text);
    }
    text
}

/* ============================================================
   Tests
   ============================================================ */
