use std::time::Duration;

use tempfile::TempDir;

use scorerelay::config::{Config, ConfigHandle, SmtpSecurity};
use scorerelay::queue::{QueueSettings, RetryBackoff, RetryDecision};

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn full_config_file_drives_queue_settings() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [queue]
        endpoint = "https://scores.example/api/batch"
        max_batch_size = 1000
        wait_time_ms = 250
        max_retries = 4
        error_email_recipients = "ops@example.com,web@example.com"
        retry_backoff = "exponential"
        max_retry_delay_ms = 1000

        [smtp]
        host = "mail.example.com"
        port = 465
        from = "scorerelay@example.com"
        security = "tls"

        [service]
        watchdog_interval_secs = 5

        [observability]
        backend = "log"
        "#,
    );

    let config = Config::load_from_path(&path).unwrap();
    config.validate().unwrap();

    let smtp = config.smtp.as_ref().unwrap();
    assert_eq!(smtp.security, SmtpSecurity::Tls);
    assert_eq!(smtp.port, 465);
    assert_eq!(config.service.watchdog_interval(), Duration::from_secs(5));
    assert_eq!(config.observability.backend, "log");

    let settings = QueueSettings::from_config(&config.queue);
    assert_eq!(settings.max_batch_size, 1000);
    assert_eq!(settings.wait_time, Duration::from_millis(250));
    assert_eq!(settings.recipients, ["ops@example.com", "web@example.com"]);
    assert_eq!(settings.retry.backoff(), RetryBackoff::Exponential);
    assert_eq!(
        settings.retry.decide(3),
        RetryDecision::Retry {
            delay: Duration::from_millis(1000)
        }
    );
    assert_eq!(settings.retry.decide(4), RetryDecision::Exhausted);
}

#[test]
fn invalid_file_is_rejected_by_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
        [queue]
        endpoint = "scores.example/api/batch"
        "#,
    );

    let config = Config::load_from_path(&path).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn malformed_toml_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[queue\nendpoint = ");

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains(&path.display().to_string()));
}

#[test]
fn handle_swaps_in_edited_file_on_store() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "[queue]\nendpoint = \"http://localhost:8080/scores\"\nwait_time_ms = 1000\n",
    );
    let handle = ConfigHandle::new(Config::load_from_path(&path).unwrap());
    let before = handle.load_full();

    write_config(
        &dir,
        "[queue]\nendpoint = \"http://localhost:8080/scores\"\nwait_time_ms = 2000\n",
    );
    let fresh = handle.read().unwrap();
    assert_eq!(handle.load().queue.wait_time_ms, 1000);
    handle.store(fresh);

    assert_eq!(before.queue.wait_time_ms, 1000);
    assert_eq!(handle.load().queue.wait_time_ms, 2000);
}
