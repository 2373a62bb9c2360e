// Durable storage for learned values and trial history
// Q-table snapshots are replaced atomically; the trial log is append-only JSON lines

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::core::trial::TrialRecord;
use crate::error::{map_io_err, EngineError, EngineResult};
use crate::reinforcement::q_learning::QTable;

/// Replace `path` with `contents` so readers never observe a partial file
pub fn write_atomic(path: &Path, contents: &[u8]) -> EngineResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(map_io_err(&parent))?;

    let mut temp = NamedTempFile::new_in(&parent).map_err(map_io_err(&parent))?;
    temp.write_all(contents).map_err(map_io_err(temp.path()))?;
    temp.as_file().sync_all().map_err(map_io_err(temp.path()))?;
    temp.persist(path).map_err(|e| EngineError::io_error(e.error, Some(path)))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> EngineResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())
}

/// Persist a Q-table snapshot
///
/// A table holding a non-finite value is refused and the previous snapshot
/// stays in place, since JSON cannot represent it.
pub fn save_q_table(q_table: &QTable, path: &Path) -> EngineResult<()> {
    if let Some((state, action, value)) = q_table
        .iter()
        .flat_map(|(state, row)| row.iter().map(move |(action, &value)| (state, action, value)))
        .find(|(_, _, value)| !value.is_finite())
    {
        return Err(EngineError::other(format!(
            "Refusing to save Q-table: value for '{}' in state '{}' is {}",
            action, state, value
        )));
    }
    write_json_atomic(q_table, path)?;
    debug!(
        states = q_table.state_count(),
        entries = q_table.entry_count(),
        "Saved Q-table to {}",
        path.display()
    );
    Ok(())
}

/// Load a Q-table, `None` when no file exists yet
pub fn load_q_table(path: &Path) -> EngineResult<Option<QTable>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(map_io_err(path))?;
    let q_table: QTable = serde_json::from_str(&content).map_err(|e| {
        EngineError::parse_error(format!("Corrupt Q-table {}: {}", path.display(), e))
    })?;
    info!(
        states = q_table.state_count(),
        entries = q_table.entry_count(),
        "Loaded Q-table from {}",
        path.display()
    );
    Ok(Some(q_table))
}

/// Load a Q-table, starting empty when it is missing or unreadable
pub fn load_q_table_or_empty(path: &Path) -> QTable {
    match load_q_table(path) {
        Ok(Some(q_table)) => q_table,
        Ok(None) => {
            info!("No Q-table at {}, starting empty", path.display());
            QTable::new()
        }
        Err(e) => {
            warn!("{}; starting with an empty Q-table", e);
            QTable::new()
        }
    }
}

/// Append-only JSON-lines history of trials
#[derive(Debug, Clone)]
pub struct TrialLog {
    path: PathBuf,
}

impl TrialLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line
    pub fn append(&self, record: &TrialRecord) -> EngineResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(map_io_err(parent))?;
        }
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(map_io_err(&self.path))?;
        writeln!(file, "{}", line).map_err(map_io_err(&self.path))?;
        Ok(())
    }

    /// Read every well-formed record; malformed lines are skipped
    pub fn load(&self) -> EngineResult<Vec<TrialRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(map_io_err(&self.path))?;
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(map_io_err(&self.path))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrialRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        debug!("Read {} trial records from {}", records.len(), self.path.display());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reinforcement::q_learning::td_update;
    use crate::reinforcement::state::StateKey;
    use tempfile::tempdir;

    fn record(trial_number: u64, success: bool) -> TrialRecord {
        TrialRecord {
            trial_number,
            action: "deploy_backend".to_string(),
            success,
            reward: if success { 35.0 } else { -13.0 },
            duration_ms: 120,
            error: (!success).then(|| "deployment failed".to_string()),
            consecutive_failures: if success { 0 } else { 1 },
            epsilon: 0.9,
            mode: None,
            run_id: Some("run-1".to_string()),
            started_at: None,
        }
    }

    #[test]
    fn test_q_table_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("q_table.json");

        let mut q_table = QTable::new();
        td_update(&mut q_table, &StateKey::from("a|failures=0"), "deploy", 3.5, &StateKey::from("b"), 1.0, 0.0);
        td_update(&mut q_table, &StateKey::from("a|failures=0"), "test", -1.25, &StateKey::from("b"), 1.0, 0.0);
        td_update(&mut q_table, &StateKey::from("b|failures=1"), "deploy", 0.1, &StateKey::from("a"), 1.0, 0.0);

        save_q_table(&q_table, &path).unwrap();
        let loaded = load_q_table(&path).unwrap().unwrap();
        assert_eq!(loaded, q_table);
    }

    #[test]
    fn test_empty_q_table_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q_table.json");
        save_q_table(&QTable::new(), &path).unwrap();
        assert!(load_q_table(&path).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_missing_and_corrupt_q_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q_table.json");
        assert!(load_q_table(&path).unwrap().is_none());

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_q_table(&path), Err(EngineError::Parse { .. })));
        assert!(load_q_table_or_empty(&path).is_empty());
    }

    #[test]
    fn test_save_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q_table.json");
        let mut q_table = QTable::new();
        save_q_table(&q_table, &path).unwrap();
        td_update(&mut q_table, &StateKey::from("s"), "a", 1.0, &StateKey::from("t"), 1.0, 0.0);
        save_q_table(&q_table, &path).unwrap();
        assert_eq!(load_q_table(&path).unwrap().unwrap().entry_count(), 1);
        // Only the snapshot remains in the directory.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_non_finite_value_keeps_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q_table.json");
        let mut q_table = QTable::new();
        td_update(&mut q_table, &StateKey::from("good"), "a", 1.0, &StateKey::from("t"), 0.5, 0.0);
        save_q_table(&q_table, &path).unwrap();

        td_update(&mut q_table, &StateKey::from("s"), "b", f64::NEG_INFINITY, &StateKey::from("t"), 0.5, 0.0);
        assert!(save_q_table(&q_table, &path).is_err());

        let loaded = load_q_table_or_empty(&path);
        assert_eq!(loaded.entry_count(), 1);
        assert_eq!(loaded.value(&StateKey::from("good"), "a"), 0.5);
    }

    #[test]
    fn test_trial_log_append_and_load() {
        let dir = tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("logs").join("trials.jsonl"));
        assert!(log.load().unwrap().is_empty());

        log.append(&record(1, false)).unwrap();
        log.append(&record(2, true)).unwrap();

        let records = log.load().unwrap();
        assert_eq!(records, vec![record(1, false), record(2, true)]);
    }

    #[test]
    fn test_trial_log_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let log = TrialLog::new(dir.path().join("trials.jsonl"));
        log.append(&record(1, true)).unwrap();
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{\"trial_number\": truncated").unwrap();
        writeln!(file).unwrap();
        drop(file);
        log.append(&record(2, false)).unwrap();

        let records = log.load().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].trial_number, 2);
    }
}
