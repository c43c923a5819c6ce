//! CLI command implementations.

pub mod serve;

use anyhow::{Context, Result};
use jobgate_config::{Config, InRepoConfig};
use jobgate_core::event::{EventType, JobEvent};
use std::path::Path;

pub async fn validate(path: &Path) -> Result<()> {
    match Config::load(path).await {
        Ok(config) => {
            let presubmits: usize = config.presubmits.values().map(Vec::len).sum();
            let postsubmits: usize = config.postsubmits.values().map(Vec::len).sum();
            println!("Configuration is valid");
            println!(
                "  {} periodics, {} presubmits, {} postsubmits, {} pubsub triggers",
                config.periodics.len(),
                presubmits,
                postsubmits,
                config.pubsub_triggers.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn check_inrepo(dir: &Path, repo: Option<&str>, config: Option<&Path>) -> Result<()> {
    let mut in_repo = InRepoConfig::read_from(dir)
        .await
        .with_context(|| format!("failed to read repository configuration in {}", dir.display()))?;

    if let (Some(repo), Some(config_path)) = (repo, config) {
        let config = Config::load(config_path)
            .await
            .with_context(|| format!("failed to load {}", config_path.display()))?;
        in_repo = in_repo.finalize(&config, repo)?;
    }

    print!("{}", serde_yaml::to_string(&in_repo)?);
    Ok(())
}

pub async fn publish(
    nats_url: &str,
    subject: String,
    event_type: EventType,
    file: &Path,
) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let event: JobEvent = serde_json::from_str(&text).context("invalid event")?;
    let envelope = event.to_envelope(event_type)?;

    let client = async_nats::connect(nats_url)
        .await
        .with_context(|| format!("failed to connect to {nats_url}"))?;
    let jetstream = async_nats::jetstream::new(client);
    jobgate_trigger::nats::publish(&jetstream, subject, envelope).await?;
    println!("Published {} event for job {}", event_type.as_attribute(), event.name);
    Ok(())
}
