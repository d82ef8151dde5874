//! workspace.rs
//!
//! Render workspace layout and artifact handling.
//!
//! The workspace is single-tenant: one in-flight topic owns it for the
//! topic's full lifetime and it is reset before the next topic begins.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

pub const SCENE_FILE: &str = "scene.py";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the render tool runs in; holds the scene file and the
    /// tool's own media output tree.
    pub fn scene_dir(&self) -> PathBuf {
        self.root.join("scene")
    }

    pub fn scene_path(&self) -> PathBuf {
        self.scene_dir().join(SCENE_FILE)
    }

    pub fn rendered_dir(&self) -> PathBuf {
        self.root.join("rendered")
    }

    pub fn attempts_dir(&self) -> PathBuf {
        self.root.join("attempts")
    }

    /// Clear the scene directory and recreate the layout. Called once per
    /// topic before any render.
    pub fn reset(&self) -> Result<(), String> {
        let scene = self.scene_dir();
        if scene.exists() {
            fs::remove_dir_all(&scene)
                .map_err(|e| format!("failed to clear {}: {e}", scene.display()))?;
        }
        for dir in [self.scene_dir(), self.rendered_dir(), self.attempts_dir()] {
            fs::create_dir_all(&dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
        }
        Ok(())
    }

    pub fn write_scene(&self, source: &str) -> Result<PathBuf, String> {
        let path = self.scene_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        fs::write(&path, source).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        Ok(path)
    }

    /// Locate the newest video the render tool produced. The tool does not
    /// report its output path, so the media tree is scanned by extension.
    pub fn find_artifact(&self) -> Option<PathBuf> {
        let media = self.scene_dir().join("media");
        if !media.is_dir() {
            return None;
        }

        WalkDir::new(&media)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| x.eq_ignore_ascii_case("mp4"))
                    .unwrap_or(false)
            })
            .max_by_key(|e| {
                e.metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            })
            .map(|e| e.into_path())
    }

    /// Copy a rendered artifact under a stable, batch-unique name.
    pub fn publish_artifact(
        &self,
        artifact: &Path,
        topic_name: &str,
        topic_index: usize,
    ) -> Result<PathBuf, String> {
        let dir = self.rendered_dir();
        fs::create_dir_all(&dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;

        let name = sanitize_topic_filename(topic_name);
        let dest = dir.join(format!("{name}_{topic_index}.mp4"));
        fs::copy(artifact, &dest)
            .map_err(|e| format!("failed to copy {} -> {}: {e}", artifact.display(), dest.display()))?;
        Ok(dest)
    }

    /// Keep every candidate version on disk for offline inspection.
    pub fn save_attempt(
        &self,
        topic_index: usize,
        attempt_index: usize,
        label: &str,
        source: &str,
    ) -> Result<PathBuf, String> {
        let dir = self.attempts_dir();
        fs::create_dir_all(&dir).map_err(|e| format!("failed to create {}: {e}", dir.display()))?;

        let path = dir.join(format!("topic{topic_index}_attempt{attempt_index}_{label}.py"));
        fs::write(&path, source).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        Ok(path)
    }

    pub fn write_report(&self, report: &serde_json::Value) -> Result<PathBuf, String> {
        let path = self.root.join("report.json");
        let text = serde_json::to_string_pretty(report).map_err(|e| e.to_string())?;
        fs::write(&path, text).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
        Ok(path)
    }
}

/// Filename-safe topic identifier: lower-cased, whitespace collapsed to
/// underscores, non-word/non-hyphen characters dropped, at most 50 chars.
pub fn sanitize_topic_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(50)
        .collect::<String>()
        .to_lowercase()
}
