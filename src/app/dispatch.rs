use crate::cli::commands::{Cli, Commands};
use anyhow::{Context, Result};
use scorerelay::config::Config;
use std::path::Path;
use std::time::Duration;

pub async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { input, linger_secs } => {
            super::run::run(config, input, Duration::from_secs(linger_secs)).await
        }
        Commands::CheckConfig => {
            print!("{}", render_settings(&config));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_init()?,
    };
    config.apply_env_overrides();
    config
        .validate()
        .with_context(|| format!("Invalid config {}", config.config_path.display()))?;
    Ok(config)
}

fn render_settings(config: &Config) -> String {
    let queue = &config.queue;
    let recipients = queue.recipients();
    let mut out = String::new();

    out.push_str(&format!("Config:            {}\n", config.config_path.display()));
    out.push_str(&format!("Endpoint:          {}\n", queue.endpoint));
    out.push_str(&format!("Max batch size:    {} bytes\n", queue.max_batch_size));
    out.push_str(&format!("Wait time:         {} ms\n", queue.wait_time_ms));
    out.push_str(&format!(
        "Retries:           {} attempts, {} backoff\n",
        queue.max_retries, queue.retry_backoff
    ));
    out.push_str(&format!("Send timeout:      {} s\n", queue.send_timeout_secs));
    out.push_str(&format!(
        "Alert recipients:  {}\n",
        if recipients.is_empty() {
            "(none)".to_string()
        } else {
            recipients.join(", ")
        }
    ));
    out.push_str(&format!(
        "Alert delivery:    {}\n",
        config
            .smtp
            .as_ref()
            .map_or_else(|| "log only".to_string(), |smtp| format!("smtp via {}:{}", smtp.host, smtp.port))
    ));
    out.push_str(&format!("Observability:     {}\n", config.observability.backend));
    out
}
