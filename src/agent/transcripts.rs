//! Saved run transcripts
//!
//! One pretty-printed JSON file per run, named `<id>.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ChatMessage;

/// A finished run, as saved to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Run ID (the trace ID of the run)
    pub id: String,
    pub query: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Full conversation, system prompt first
    pub messages: Vec<ChatMessage>,
    /// Model calls made
    pub turns: usize,
    /// "reply" or the error kind
    pub outcome: String,
    /// Error message for failed runs
    pub error: Option<String>,
}

/// Summary of a transcript for listing
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSummary {
    pub id: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub turns: usize,
    pub outcome: String,
}

/// Transcript storage manager
pub struct TranscriptStore {
    base_dir: PathBuf,
}

impl TranscriptStore {
    /// Create a store, creating the directory if needed
    pub fn new(base_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Save a transcript, returning the file it was written to
    pub fn save(&self, transcript: &Transcript) -> io::Result<PathBuf> {
        let path = self.transcript_path(&transcript.id)?;
        let json = serde_json::to_string_pretty(transcript)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> io::Result<Transcript> {
        load_from_path(&self.transcript_path(id)?)
    }

    /// List all transcripts, newest first. Unreadable files are skipped.
    pub fn list(&self) -> io::Result<Vec<TranscriptSummary>> {
        let mut transcripts = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(t) = load_from_path(&path) {
                    transcripts.push(TranscriptSummary {
                        id: t.id,
                        query: truncate(&t.query, 50),
                        started_at: t.started_at,
                        turns: t.turns,
                        outcome: t.outcome,
                    });
                }
            }
        }
        transcripts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(transcripts)
    }

    pub fn delete(&self, id: &str) -> io::Result<()> {
        fs::remove_file(self.transcript_path(id)?)
    }

    fn transcript_path(&self, id: &str) -> io::Result<PathBuf> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid transcript id '{}'", id),
            ));
        }
        Ok(self.base_dir.join(format!("{}.json", id)))
    }
}

fn load_from_path(path: &Path) -> io::Result<Transcript> {
    let json = fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Truncate to at most `max_chars` characters, adding an ellipsis if needed
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn transcript(id: &str, query: &str, started_at: DateTime<Utc>) -> Transcript {
        Transcript {
            id: id.to_string(),
            query: query.to_string(),
            model: "qwen3".to_string(),
            started_at,
            finished_at: started_at + Duration::seconds(3),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user(query)],
            turns: 1,
            outcome: "reply".to_string(),
            error: None,
        }
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path().join("transcripts")).unwrap();
        let t = transcript("0192-abc", "What is my name?", Utc::now());

        let path = store.save(&t).unwrap();
        assert!(path.ends_with("0192-abc.json"));
        assert_eq!(store.load("0192-abc").unwrap(), t);

        store.delete("0192-abc").unwrap();
        assert!(store.load("0192-abc").is_err());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let now = Utc::now();
        store.save(&transcript("old", "first", now - Duration::hours(1))).unwrap();
        store.save(&transcript("new", "second", now)).unwrap();
        fs::write(dir.path().join("junk.json"), "{").unwrap();

        let ids: Vec<_> = store.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        assert!(store.load("../etc/passwd").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
