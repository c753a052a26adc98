// The crash path at the engine level: a synchronous drain must land in the
// journal before the process would die, without waiting for any timer.

use anyhow::Result;
use porby_core::{Category, CollectorSet, Config, LogEngine, LogEntry, LogLevel};
use std::time::Duration;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.enabled = true;
    config.transport.port = 0;
    config.transport.pairing_code = Some("123456".to_string());
    config.persistence.base_dir = Some(dir.path().to_path_buf());
    config.collectors = CollectorSet::none();
    // A slow timer so the emergency drain, not the timer, does the work.
    config.limits.flush_interval = Duration::from_secs(5);
    config
}

#[test]
fn test_emergency_flush_journals_final_entries() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = LogEngine::new();
    engine.start(config(&dir))?;

    // An empty buffer writes nothing.
    engine.emergency_flush();
    let journal_dir = dir.path().join("porby").join("logs");
    assert!(std::fs::read_dir(&journal_dir)?.next().is_none());

    engine.log(LogLevel::Info, Category::APP, "last words", None, None);
    engine.log(LogLevel::Fatal, Category::CRASH, "it broke", None, None);
    engine.emergency_flush();

    // The journal file exists right now, while the engine is still "alive" —
    // a real crash would re-raise before any cleanup ran.
    let files: Vec<_> = std::fs::read_dir(&journal_dir)?.flatten().collect();
    assert_eq!(files.len(), 1);

    let content = std::fs::read_to_string(files[0].path())?;
    let batch: Vec<LogEntry> = serde_json::from_str(content.lines().next().unwrap())?;
    let messages: Vec<&str> = batch.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.contains(&"last words"));
    assert!(messages.contains(&"it broke"));

    // Timestamps inside the batch are non-decreasing.
    for pair in batch.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    engine.stop();
    Ok(())
}
