//! Built-in assistant personas.
//!
//! Both personas expose the same vehicle tools; they differ only in prompt,
//! instructions and default voice.

use kemet_core::context::Persona;
use std::{fmt, path::Path, str::FromStr};

const KEMET_PROMPT: &str = include_str!("../prompts/kemet.md");
const RELAXED_PROMPT: &str = include_str!("../prompts/relaxed.md");

const KEMET_INSTRUCTIONS: &str = "Kemet Assistant Identity. \
    Context: Friday Evening @ Epitech Benin. \
    Goal: Guide user home to Cococodji instead of Coris Bank due to Friday crowds. \
    Script: 68% battery -> Coris Bank warning -> Saturday 8am suggestion. \
    Handle transcription errors robustly (e.g. 'Corispond' = 'Coris Bank').";

const RELAXED_INSTRUCTIONS: &str = "Kemet Assistant Identity. \
    Answer vehicle questions with the tools and keep replies brief.";

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("Failed to read persona prompt {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Persona prompt {0} is empty")]
    Empty(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersonaKind {
    /// Scripted Friday-evening advisory demo.
    Kemet,
    /// Freeform assistant.
    Relaxed,
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PersonaKind::Kemet => "kemet",
            PersonaKind::Relaxed => "relaxed",
        })
    }
}

impl FromStr for PersonaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kemet" => Ok(PersonaKind::Kemet),
            "relaxed" => Ok(PersonaKind::Relaxed),
            other => Err(format!("'{}' is not a known persona", other)),
        }
    }
}

impl PersonaKind {
    fn builtin(self) -> Persona {
        let (prompt, instructions, voice) = match self {
            PersonaKind::Kemet => (KEMET_PROMPT, KEMET_INSTRUCTIONS, "Rex"),
            PersonaKind::Relaxed => (RELAXED_PROMPT, RELAXED_INSTRUCTIONS, "Ara"),
        };
        Persona {
            name: self.to_string(),
            system_prompt: prompt.trim().to_string(),
            instructions: instructions.to_string(),
            voice: voice.to_string(),
        }
    }
}

/// Builds the persona for a session.
///
/// A `prompt_path` replaces the built-in system prompt; a `voice` replaces
/// the persona's default voice.
pub fn load(
    kind: PersonaKind,
    prompt_path: Option<&Path>,
    voice: Option<&str>,
) -> Result<Persona, PersonaError> {
    let mut persona = kind.builtin();

    if let Some(path) = prompt_path {
        let display = path.display().to_string();
        let prompt = std::fs::read_to_string(path).map_err(|source| PersonaError::Read {
            path: display.clone(),
            source,
        })?;
        if prompt.trim().is_empty() {
            return Err(PersonaError::Empty(display));
        }
        persona.system_prompt = prompt.trim().to_string();
    }

    if let Some(voice) = voice {
        persona.voice = voice.to_string();
    }

    Ok(persona)
}
