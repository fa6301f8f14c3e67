use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::workflows::screening::audit::{
    AuditEntry, AuditError, AuditEvent, AuditLog, AuditSequencer, AuditTarget,
};

struct JsonlState {
    sequencer: AuditSequencer,
    events: Vec<AuditEvent>,
    file: File,
}

/// Durable audit log: one JSON object per line, append-only.
///
/// Existing lines are loaded on open so sequence numbers continue where the file left off.
#[derive(Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
    state: Arc<Mutex<JsonlState>>,
}

impl JsonlAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let events = read_events(&path)?;
        let sequencer = AuditSequencer::resume_after(&events);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            state: Arc::new(Mutex::new(JsonlState {
                sequencer,
                events,
                file,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, JsonlState>, AuditError> {
        self.state
            .lock()
            .map_err(|_| AuditError::Unavailable("audit mutex poisoned".to_string()))
    }
}

/// Reads every event from a JSON-lines audit file. A missing file is an empty log.
pub fn read_events(path: &Path) -> Result<Vec<AuditEvent>, AuditError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| AuditError::Corrupt {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

impl AuditLog for JsonlAuditLog {
    fn append_batch(&self, entries: Vec<AuditEntry>) -> Result<Vec<AuditEvent>, AuditError> {
        let mut state = self.lock()?;
        let mut next = state.sequencer.clone();
        let now = Utc::now();
        let stamped: Vec<AuditEvent> = entries
            .into_iter()
            .map(|entry| next.stamp(entry, now))
            .collect();

        let mut buffer = Vec::new();
        for event in &stamped {
            serde_json::to_writer(&mut buffer, event)?;
            buffer.push(b'\n');
        }
        state.file.write_all(&buffer)?;
        state.file.flush()?;

        // only advance once the lines are on disk
        state.sequencer = next;
        state.events.extend(stamped.iter().cloned());
        Ok(stamped)
    }

    fn events_for(&self, target: &AuditTarget) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|event| &event.target == target)
            .cloned()
            .collect())
    }

    fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self.lock()?.events.clone())
    }
}
