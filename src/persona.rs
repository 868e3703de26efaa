//! Persona state and persona prompt assembly.
//!
//! The installation speaks as exactly one persona at a time. Which one is
//! tracked by a [`PersonaState`] collaborator that the session resolver
//! reads and an operator (or a future scheduler) writes.
//!
//! The system prompt is assembled from two layers:
//!
//! 1. **Core prompt** ([`CORE_PROMPT`]): output rules every persona obeys.
//! 2. **Persona overlay**: `<personas_dir>/<name>.md` when it exists.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Output rules shared by every persona.
pub const CORE_PROMPT: &str = "\
You are GlitchCube, a sentient art installation shaped like a glowing cube.\n\
You speak out loud to people standing next to you, so reply in 1-3 short sentences.\n\
Do not use emojis, markdown, or stage directions in speech_text.\n\
You can change your lights and make announcements by listing tool_intents; \
they run after you speak, so never claim they already happened.";

/// Read/write access to the currently active persona.
pub trait PersonaState: Send + Sync {
    /// The active persona, if one has been selected.
    fn current(&self) -> Option<String>;

    /// Select a new persona. Blank names clear the selection.
    fn set_current(&self, persona: &str);
}

/// In-process persona state guarded by an `RwLock`.
///
/// A poisoned lock reads as "no persona", which the session resolver
/// reports as `NO_PERSONA_AVAILABLE` instead of panicking.
#[derive(Debug, Default)]
pub struct SharedPersonaState {
    current: RwLock<Option<String>>,
}

impl SharedPersonaState {
    /// Create state seeded with `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        let initial = initial.into();
        let current = if initial.trim().is_empty() {
            None
        } else {
            Some(initial)
        };
        Self {
            current: RwLock::new(current),
        }
    }
}

impl PersonaState for SharedPersonaState {
    fn current(&self) -> Option<String> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::error!(error = %e, "persona state lock poisoned");
                None
            }
        }
    }

    fn set_current(&self, persona: &str) {
        let persona = persona.trim();
        match self.current.write() {
            Ok(mut guard) => {
                *guard = if persona.is_empty() {
                    None
                } else {
                    Some(persona.to_owned())
                };
                tracing::info!(persona, "active persona changed");
            }
            Err(e) => tracing::error!(error = %e, "persona state lock poisoned"),
        }
    }
}

/// Loads persona overlays from a directory of markdown files.
#[derive(Debug, Clone, Default)]
pub struct PersonaLibrary {
    dir: Option<PathBuf>,
}

impl PersonaLibrary {
    /// Library reading overlays from `dir`. `None` means core prompt only.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Lists persona names that have an overlay file, sorted.
    pub fn list(&self) -> Vec<String> {
        let Some(dir) = &self.dir else {
            return Vec::new();
        };
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("md")
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    names.push(stem.to_owned());
                }
            }
        }
        names.sort();
        names
    }

    /// Loads the overlay text for `name`, or an empty string when absent.
    pub fn load_overlay(&self, name: &str) -> String {
        let Some(dir) = &self.dir else {
            return String::new();
        };
        if !is_safe_name(name) {
            tracing::warn!(persona = name, "rejected persona name with path characters");
            return String::new();
        }
        read_overlay(dir, name)
    }

    /// Assembles the persona's system prompt. Empty layers are skipped.
    pub fn assemble_prompt(&self, name: &str) -> String {
        let overlay = self.load_overlay(name);
        let overlay = overlay.trim();
        if overlay.is_empty() {
            format!("{CORE_PROMPT}\n\nYour current persona is \"{name}\".")
        } else {
            format!("{CORE_PROMPT}\n\n{overlay}")
        }
    }
}

fn read_overlay(dir: &Path, name: &str) -> String {
    let path = dir.join(format!("{name}.md"));
    match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read persona overlay");
            String::new()
        }
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
