// End-to-end: engine start -> ingest -> journal, with no viewer connected.

use anyhow::Result;
use porby_core::{Category, CollectorSet, Config, LogEngine, LogEntry, LogLevel};
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

fn offline_config(dir: &TempDir) -> Config {
    init_tracing();
    let mut config = Config::default();
    config.enabled = true;
    config.transport.port = 0;
    config.transport.pairing_code = Some("123456".to_string());
    config.persistence.base_dir = Some(dir.path().to_path_buf());
    // Hooks are process-global; keep them out of parallel tests.
    config.collectors = CollectorSet::none();
    config
}

fn journaled_messages(dir: &TempDir) -> Result<Vec<String>> {
    let journal_dir = dir.path().join("porby").join("logs");
    let mut messages = Vec::new();
    for file in std::fs::read_dir(journal_dir)?.flatten() {
        let content = std::fs::read_to_string(file.path())?;
        for line in content.lines() {
            let batch: Vec<LogEntry> = serde_json::from_str(line)?;
            messages.extend(batch.into_iter().map(|e| e.message));
        }
    }
    Ok(messages)
}

#[test]
fn test_entries_reach_the_journal_without_a_viewer() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = LogEngine::new();
    engine.start(offline_config(&dir))?;
    assert!(engine.is_running());

    for i in 0..5 {
        engine.log(
            LogLevel::Info,
            Category::APP,
            format!("message {}", i),
            None,
            None,
        );
    }
    engine.stop();
    assert!(!engine.is_running());

    let messages = journaled_messages(&dir)?;
    assert_eq!(messages.len(), 5);
    assert!(messages.contains(&"message 0".to_string()));
    assert!(messages.contains(&"message 4".to_string()));
    Ok(())
}

#[test]
fn test_rate_limit_drops_but_never_priority() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = offline_config(&dir);
    config.limits.max_logs_per_second = 1;
    config.limits.flush_interval = Duration::from_secs(1);

    let engine = LogEngine::new();
    engine.start(config)?;

    engine.log(LogLevel::Info, Category::APP, "info1", None, None);
    engine.log(LogLevel::Info, Category::APP, "info2", None, None);
    engine.log(LogLevel::Error, Category::APP, "error1", None, None);
    engine.stop();

    let messages = journaled_messages(&dir)?;
    assert!(messages.contains(&"info1".to_string()));
    assert!(
        !messages.contains(&"info2".to_string()),
        "rate limiter should have dropped info2"
    );
    assert!(messages.contains(&"error1".to_string()));
    Ok(())
}

#[test]
fn test_lifecycle_is_idempotent_and_honors_enabled_flag() -> Result<()> {
    let dir = TempDir::new()?;
    let engine = LogEngine::new();
    engine.start(offline_config(&dir))?;
    let addr = engine.local_addr();
    engine.start(offline_config(&dir))?;
    assert_eq!(engine.local_addr(), addr, "second start must not rebind");

    engine.stop();
    engine.stop();
    assert!(!engine.is_running());

    let mut config = offline_config(&dir);
    config.enabled = false;
    engine.start(config)?;
    assert!(!engine.is_running());
    assert!(!engine.should_log(LogLevel::Fatal, &Category::APP));
    Ok(())
}
