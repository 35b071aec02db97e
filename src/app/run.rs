use anyhow::{Context, Result};
use scorerelay::config::{Config, ConfigHandle};
use scorerelay::observability::create_observer;
use scorerelay::queue::{
    Batch, HttpBatchSender, QueueDeps, QueueSettings, ScoreUpdateRequest, create_notifier,
};
use scorerelay::service::UploadService;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
struct FeedStats {
    submitted: usize,
    skipped: usize,
    rejected: usize,
}

pub async fn run(config: Config, input: Option<PathBuf>, linger: Duration) -> Result<()> {
    let handle = ConfigHandle::new(config);
    let config = handle.load_full();

    let service = UploadService::start(
        QueueSettings::from_config(&config.queue),
        build_deps(&config)?,
    )?;
    let watchdog = service.spawn_watchdog(config.service.watchdog_interval());
    #[cfg(unix)]
    let reloader = spawn_reload_on_hangup(handle.clone(), service.clone())?;

    let outcome = tokio::select! {
        result = feed_then_linger(&service, input.as_deref(), linger) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping");
            Ok(())
        }
    };

    let pending = service.shutdown().await;
    #[cfg(unix)]
    reloader.abort();
    if let Err(e) = watchdog.await {
        warn!("watchdog task ended abnormally: {e}");
    }
    report_pending(&pending);
    outcome
}

fn build_deps(config: &Config) -> Result<QueueDeps> {
    Ok(QueueDeps {
        sender: Arc::new(HttpBatchSender::from_config(&config.queue)),
        notifier: create_notifier(config.smtp.as_ref())?,
        observer: Arc::from(create_observer(&config.observability)),
    })
}

async fn feed_then_linger(
    service: &UploadService,
    input: Option<&Path>,
    linger: Duration,
) -> Result<()> {
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let stats = feed(service, reader).await?;
    info!(
        submitted = stats.submitted,
        skipped = stats.skipped,
        rejected = stats.rejected,
        "end of input"
    );

    if !linger.is_zero() {
        info!(linger_secs = linger.as_secs(), "waiting for open batches to flush");
        tokio::time::sleep(linger).await;
    }
    Ok(())
}

async fn feed<R: AsyncBufRead + Unpin>(service: &UploadService, reader: R) -> Result<FeedStats> {
    let mut lines = reader.lines();
    let mut stats = FeedStats::default();
    let mut line_no = 0_usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(Some(request)) => {
                service.submit(request);
                stats.submitted += 1;
            }
            Ok(None) => {
                debug!(line = line_no, "no audience scores, skipping");
                stats.skipped += 1;
            }
            Err(e) => {
                warn!(line = line_no, "rejected score update: {e:#}");
                stats.rejected += 1;
            }
        }
    }
    Ok(stats)
}

/// Parse one input line.
///
/// Two shapes are accepted: the upload shape
/// (`{"contentId", "scores", "confidence"}`) and a page-properties shape
/// (`{"contentId", "properties": {"scoreUnaware": "1.5", ...}}`).
fn parse_line(line: &str) -> Result<Option<ScoreUpdateRequest>> {
    let value: Value = serde_json::from_str(line).context("not valid JSON")?;

    if let Some(properties) = value.get("properties") {
        let content_id = value
            .get("contentId")
            .and_then(Value::as_str)
            .context("missing contentId")?;
        let properties: HashMap<String, String> = serde_json::from_value(properties.clone())
            .context("properties must map names to strings")?;
        return Ok(ScoreUpdateRequest::from_properties(content_id, &properties)?);
    }

    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(unix)]
fn spawn_reload_on_hangup(
    handle: ConfigHandle,
    service: UploadService,
) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    Ok(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match apply_reload(&handle, &service).await {
                Ok(handed_over) => info!(handed_over, "reloaded config applied"),
                Err(e) => warn!("config reload failed, keeping current settings: {e:#}"),
            }
        }
    }))
}

#[cfg(unix)]
async fn apply_reload(handle: &ConfigHandle, service: &UploadService) -> Result<usize> {
    let config = handle.read()?;
    let deps = build_deps(&config)?;
    let handed_over = service
        .reconfigure(QueueSettings::from_config(&config.queue), deps)
        .await?;
    handle.store(config);
    Ok(handed_over)
}

fn report_pending(pending: &[Batch]) {
    if pending.is_empty() {
        info!("all submitted score updates were delivered");
        return;
    }
    let requests: usize = pending.iter().map(Batch::len).sum();
    warn!(
        batches = pending.len(),
        requests, "unsent score updates at shutdown"
    );
    for batch in pending {
        warn!(
            batch_id = %batch.id(),
            requests = batch.len(),
            attempts = batch.attempts(),
            first_content_id = batch.content_ids().next().unwrap_or_default(),
            "unsent batch"
        );
    }
}
