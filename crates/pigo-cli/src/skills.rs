//! Skill files: reusable prompt snippets the user can invoke with
//! `/skill:<name> [args]`.
//!
//! Lookup order: user-level `~/.pigo/skills/`, then project-level
//! `./.pigo/skills/`, then any `plugins` directories from config. Later
//! directories win on name collision.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct SkillSet {
    skills: BTreeMap<String, PathBuf>,
}

impl SkillSet {
    pub fn discover(dirs: &[PathBuf]) -> Self {
        let mut skills = BTreeMap::new();
        for dir in dirs {
            for (name, path) in scan_dir(dir) {
                skills.insert(name, path);
            }
        }
        Self { skills }
    }

    pub fn names(&self) -> Vec<&str> {
        self.skills.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// The prompt text for a skill, with optional arguments appended.
    pub fn render(&self, name: &str, args: &str) -> Option<String> {
        let path = self.skills.get(name)?;
        let content = std::fs::read_to_string(path).ok()?;
        let mut prompt = content.trim_end().to_string();
        if !args.trim().is_empty() {
            prompt.push_str("\n\nArguments: ");
            prompt.push_str(args.trim());
        }
        Some(prompt)
    }
}

fn scan_dir(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                return None;
            }
            let name = path.file_stem()?.to_string_lossy().to_string();
            Some((name, path))
        })
        .collect()
}
