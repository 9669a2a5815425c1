use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

const TRANSCRIPT_EXT: &str = "jsonl";

/// Answers "does a transcript still exist for this session" by looking for
/// `<session>.jsonl` directly under each root or one directory below it.
#[derive(Debug, Clone, Default)]
pub struct TranscriptIndex {
    roots: Vec<PathBuf>,
}

impl TranscriptIndex {
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// A root that is missing entirely counts as "no transcripts there". Any
    /// other read failure is returned so the caller keeps the checkpoint.
    pub fn exists(&self, session_id: &str) -> io::Result<bool> {
        let file_name = format!("{session_id}.{TRANSCRIPT_EXT}");
        for root in &self.roots {
            if contains_transcript(root, &file_name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn contains_transcript(root: &Path, file_name: &str) -> io::Result<bool> {
    if root.join(file_name).try_exists()? {
        return Ok(true);
    }

    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join(file_name).try_exists()? {
            return Ok(true);
        }
    }
    Ok(false)
}
