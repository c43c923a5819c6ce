//! The trigger service.

use anyhow::{Context, Result};
use clap::Args;
use jobgate_config::ConfigAgent;
use jobgate_core::backend::JobClient;
use jobgate_core::reporter::StatusReporter;
use jobgate_executor::{DryRunJobClient, KubernetesJobClient};
use jobgate_git::{GitCliFactory, RepoConfigCache};
use jobgate_trigger::nats::NatsListener;
use jobgate_trigger::reporter::{FanoutReporter, GitHubStatusReporter, LogReporter};
use jobgate_trigger::{Dispatcher, Subscriber};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Args)]
pub struct ServeArgs {
    /// Static configuration file
    #[arg(long, env = "JOBGATE_CONFIG", default_value = "jobgate.kdl")]
    config: PathBuf,

    /// NATS server URL
    #[arg(long, env = "JOBGATE_NATS_URL", default_value = "nats://localhost:4222")]
    nats_url: String,

    /// Remote base for cloning repositories, e.g. https://github.com.
    /// Repository configuration is only read when this is set.
    #[arg(long, env = "JOBGATE_GIT_BASE_URL")]
    git_base_url: Option<String>,

    /// Directory for cached working copies
    #[arg(long, env = "JOBGATE_CACHE_DIR", default_value = "/var/cache/jobgate")]
    cache_dir: PathBuf,

    /// Namespace for job resources; defaults to the configured pod namespace
    #[arg(long, env = "JOBGATE_NAMESPACE")]
    namespace: Option<String>,

    /// Token for cloning and for posting commit statuses
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Log jobs instead of creating them
    #[arg(long)]
    dry_run: bool,

    /// Seconds between configuration reloads
    #[arg(long, default_value = "60")]
    reload_interval: u64,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "JOBGATE_METRICS_PORT")]
    metrics_port: Option<u16>,
}

fn init_metrics(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

pub async fn run(args: ServeArgs) -> Result<()> {
    if let Some(port) = args.metrics_port {
        init_metrics(port)?;
    }
    jobgate_trigger::metrics::describe();

    let agent = Arc::new(
        ConfigAgent::load(&args.config)
            .await
            .with_context(|| format!("failed to load {}", args.config.display()))?,
    );
    let reloader = Arc::clone(&agent).spawn_reloader(Duration::from_secs(args.reload_interval));

    let client: Arc<dyn JobClient> = if args.dry_run {
        info!("Dry run: jobs are logged, not created");
        Arc::new(DryRunJobClient)
    } else {
        let namespace = args
            .namespace
            .clone()
            .or_else(|| agent.config().pod_namespace.clone())
            .unwrap_or_else(|| "default".to_string());
        Arc::new(KubernetesJobClient::new(namespace).await?)
    };

    let reporter: Arc<dyn StatusReporter> = match &args.github_token {
        Some(token) => {
            let reporters: Vec<Arc<dyn StatusReporter>> = vec![
                Arc::new(LogReporter),
                Arc::new(GitHubStatusReporter::new(token.clone())),
            ];
            Arc::new(FanoutReporter::new(reporters))
        }
        None => Arc::new(LogReporter),
    };

    let mut subscriber = Subscriber::new(Arc::clone(&agent), Dispatcher::new(client, reporter));
    if let Some(base_url) = &args.git_base_url {
        let mut factory = GitCliFactory::new(base_url.clone(), args.cache_dir.clone());
        if let Some(token) = &args.github_token {
            factory = factory.with_access_token(token.clone());
        }
        info!(
            base_url = %base_url,
            cache_dir = %args.cache_dir.display(),
            "Repository configuration enabled"
        );
        subscriber = subscriber.with_cache(Arc::new(RepoConfigCache::new(Arc::new(factory))));
    }

    let listener = NatsListener::connect(&args.nats_url, Arc::new(subscriber)).await?;
    tokio::select! {
        result = listener.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
    }
    reloader.abort();
    Ok(())
}
