//! G-code programs
//!
//! A program is the ordered list of lines of a file: the bundled homing
//! program or the slicer's output. Lines are kept exactly as read, minus the
//! line terminator.

use etcher_core::{ProgramError, Result};
use std::path::{Path, PathBuf};

/// An immutable, ordered sequence of G-code lines
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GcodeProgram {
    source: Option<PathBuf>,
    lines: Vec<String>,
}

impl GcodeProgram {
    /// Load a program from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProgramError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut program = Self::from_text(&text);
        program.source = Some(path.to_path_buf());
        tracing::debug!("Loaded {} lines from {}", program.len(), path.display());
        Ok(program)
    }

    /// Build a program from text; `\n` and `\r\n` terminators are stripped
    pub fn from_text(text: &str) -> Self {
        Self {
            source: None,
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// Build a program from individual lines
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source: None,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// The lines in file order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the program has no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// File the program was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
