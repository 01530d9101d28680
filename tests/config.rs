use anyhow::Result;
use cloudgather::testing::TempConfigFile;
use cloudgather::*;
use std::time::Duration;

#[test]
fn load_from_file() -> Result<()> {
    let file = TempConfigFile::from_json(
        r#"{
            "threads": 8,
            "timeout_ms": 120000,
            "retry": { "max_attempts": 4, "initial_delay_ms": 100, "retry_on": "timeout" }
        }"#,
    )?;

    let cfg = AggregatorConfig::from_file(file.path())?;
    assert_eq!(cfg.threads, Some(8));
    assert_eq!(cfg.timeout(), Some(Duration::from_secs(120)));
    assert_eq!(cfg.retry.max_attempts, 4);
    assert_eq!(cfg.retry.initial_delay_ms, 100);
    assert_eq!(cfg.retry.max_delay_ms, 5000);
    assert_eq!(cfg.retry.retry_on, RetryOn::Timeout);
    assert_eq!(cfg.session_interval(), Duration::from_secs(60));
    Ok(())
}

#[test]
fn written_config_round_trips() -> Result<()> {
    let original = AggregatorConfig {
        threads: Some(2),
        timeout_ms: Some(500),
        retry: RetryConfig::on_timeout(),
        session_interval_secs: 300,
    };
    let file = TempConfigFile::new(&original)?;

    assert_eq!(AggregatorConfig::from_file(file.path())?, original);
    Ok(())
}

#[test]
fn missing_file_names_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");

    let err = AggregatorConfig::from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("absent.json"), "{err:#}");
}

#[test]
fn invalid_file_is_rejected() -> Result<()> {
    let file = TempConfigFile::from_json(r#"{ "retry": { "backoff_multiplier": 0.5 } }"#)?;

    let err = AggregatorConfig::from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("backoff_multiplier"), "{err:#}");
    Ok(())
}

#[test]
fn env_overlay_on_top_of_file() -> Result<()> {
    let file = TempConfigFile::from_json(r#"{ "threads": 8 }"#)?;
    let vars = vec![
        ("CLOUDGATHER_THREADS".to_string(), "3".to_string()),
        ("CLOUDGATHER_SESSION_INTERVAL_SECS".to_string(), "10".to_string()),
    ];

    let cfg = AggregatorConfig::from_file(file.path())?.with_env_vars("CLOUDGATHER_", vars)?;
    assert_eq!(cfg.threads, Some(3));
    assert_eq!(cfg.session_interval(), Duration::from_secs(10));
    Ok(())
}

#[test]
fn config_drives_worker_pool_and_aggregator() -> Result<()> {
    let cfg = AggregatorConfig::from_json_str(r#"{ "threads": 2, "timeout_ms": 5000 }"#)?;
    let workers = thread_pool(cfg.threads)?;
    let aggregator = Aggregator::from_config(direct(), &cfg);

    let results = aggregator.spawn_all(vec![1u8, 2, 3], &workers, |n| Ok(n * 2), "doubles")?;
    assert_eq!(results.len(), 3);
    assert_eq!(results[&3], 6);
    Ok(())
}
