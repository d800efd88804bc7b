//! Segment data model: the parsed script (`SegmentMetadata`) and the
//! materialized, playable `Segment` built from it.

use crate::clip::AudioClip;
use crate::error::{Result, ShowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::Path;

/// One `{ character, line }` entry of a segment script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub character: String,
    pub line: String,
}

/// Contents of a segment's `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    #[serde(rename = "mainTitle", default)]
    pub title: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub dialogue: Vec<ScriptLine>,
}

impl SegmentMetadata {
    /// Parse and validate a metadata file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ShowError::metadata(path, "metadata file not found"));
        }
        let text = std::fs::read_to_string(path).map_err(|e| ShowError::metadata(path, e))?;
        let meta: SegmentMetadata =
            serde_json::from_str(&text).map_err(|e| ShowError::metadata(path, e))?;
        meta.validate().map_err(|reason| ShowError::metadata(path, reason))?;
        Ok(meta)
    }

    /// Structural checks: a title, a cast, no duplicate cast members, and no
    /// line spoken by someone outside the cast.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("missing title".to_string());
        }
        if self.characters.is_empty() {
            return Err("empty character list".to_string());
        }
        let mut cast = HashSet::new();
        for c in &self.characters {
            if !cast.insert(c.as_str()) {
                return Err(format!("character '{}' listed twice", c));
            }
        }
        for (i, l) in self.dialogue.iter().enumerate() {
            if !cast.contains(l.character.as_str()) {
                return Err(format!(
                    "line {} is spoken by '{}', who is not in the character list",
                    i + 1,
                    l.character
                ));
            }
        }
        Ok(())
    }
}

/// One scripted utterance. `audio` is `None` when no playable asset was found,
/// which is a normal state: the line is shown for a fixed time instead.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueLine {
    pub speaker: String,
    pub text: String,
    pub audio: Option<AudioClip>,
}

impl DialogueLine {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, audio: Option<AudioClip>) -> Self {
        DialogueLine {
            speaker: speaker.into(),
            text: text.into(),
            audio,
        }
    }

    /// First 20 characters of the text, for log lines.
    pub fn preview(&self) -> String {
        let short: String = self.text.chars().take(20).collect();
        if short.len() < self.text.len() {
            format!("{}...", short)
        } else {
            short
        }
    }
}

/// A playable unit of the show. Lines are handed out by value, front to back,
/// so a line can never be played twice.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub title: String,
    pub characters: Vec<String>,
    lines: VecDeque<DialogueLine>,
}

impl Segment {
    pub fn new(name: impl Into<String>, title: impl Into<String>, characters: Vec<String>) -> Self {
        Segment {
            name: name.into(),
            title: title.into(),
            characters,
            lines: VecDeque::new(),
        }
    }

    /// Append a line. Rejects speakers outside the cast.
    pub fn push_line(&mut self, line: DialogueLine) -> Result<()> {
        if !self.characters.iter().any(|c| *c == line.speaker) {
            return Err(ShowError::metadata(
                &self.name,
                format!("speaker '{}' is not in the character list", line.speaker),
            ));
        }
        self.lines.push_back(line);
        Ok(())
    }

    pub fn next_line(&mut self) -> Option<DialogueLine> {
        self.lines.pop_front()
    }

    pub fn peek_next_line(&self) -> Option<&DialogueLine> {
        self.lines.front()
    }

    pub fn has_more_lines(&self) -> bool {
        !self.lines.is_empty()
    }

    pub fn remaining_line_count(&self) -> usize {
        self.lines.len()
    }

    /// Lines that still carry audio.
    pub fn voiced_line_count(&self) -> usize {
        self.lines.iter().filter(|l| l.audio.is_some()).count()
    }

    /// Discard every line not yet played. Returns how many were dropped.
    pub fn drain(&mut self) -> usize {
        let n = self.lines.len();
        self.lines.clear();
        n
    }
}
