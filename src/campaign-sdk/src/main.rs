//! Campaign SDK CLI — evaluate a synced campaign ruleset against an event,
//! inspect which campaign assets are cached locally, and download the
//! missing ones.
//!
//! Counters from the engine and the asset pipeline go to a Prometheus
//! recorder installed at start-up; `--print-metrics` dumps them on exit.

use campaign_assets::{
    AssetPipeline, AssetStorage, BatchKind, BatchReport, CdnUrls, FsAssetStorage,
    HttpAssetTransport,
};
use campaign_core::config::SdkConfig;
use campaign_core::{CaptureQaSink, NoOpQaSink, SystemClock};
use campaign_messaging::{CampaignEngine, DisplayContext, Orientation, Payload};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-sdk")]
#[command(about = "Client-side campaign eligibility and asset tooling")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still apply)
    #[arg(long, env = "CAMPAIGN_SDK_CONFIG")]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Print collected metrics in Prometheus text format to stderr on exit
    #[arg(long, default_value_t = false)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate every campaign against an event and pick one to display
    Evaluate {
        /// Campaign definitions: a JSON array or {"campaigns": [...]}
        #[arg(long)]
        campaigns: PathBuf,

        /// Event name
        #[arg(long)]
        event: String,

        /// Event payload entries as key=value
        #[arg(long = "payload", value_parser = parse_key_value)]
        payload: Vec<(String, String)>,

        /// Device orientation
        #[arg(long, value_enum, default_value_t = OrientationArg::Both)]
        orientation: OrientationArg,

        /// Check asset availability against this cache directory instead of
        /// assuming everything is downloaded
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Seconds after start-up before the first message (overrides config)
        #[arg(long)]
        delay_first_message: Option<i64>,

        /// Reserved auto-show event name (overrides config)
        #[arg(long)]
        auto_show_trigger: Option<String>,

        /// Print full QA records instead of the compact decision list
        #[arg(long, default_value_t = false)]
        qa: bool,
    },

    /// List the assets the ruleset needs and whether each is cached
    Assets {
        #[arg(long)]
        campaigns: PathBuf,

        /// Cache directory (overrides config)
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Download missing assets from the CDN, then retry failures once
        #[arg(long, default_value_t = false)]
        fetch: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OrientationArg {
    Portrait,
    Landscape,
    Both,
}

impl From<OrientationArg> for Orientation {
    fn from(arg: OrientationArg) -> Self {
        match arg {
            OrientationArg::Portrait => Orientation::Portrait,
            OrientationArg::Landscape => Orientation::Landscape,
            OrientationArg::Both => Orientation::Both,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    let metrics = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let mut config = SdkConfig::load_from(cli.config.as_deref())?;
    info!(
        delay_first_message = config.messaging.delay_first_message_secs,
        min_delay_between_messages = config.messaging.min_delay_between_messages_secs,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Evaluate {
            campaigns,
            event,
            payload,
            orientation,
            cache_dir,
            delay_first_message,
            auto_show_trigger,
            qa,
        } => {
            if let Some(delay) = delay_first_message {
                config.messaging.delay_first_message_secs = delay;
            }
            if let Some(trigger) = auto_show_trigger {
                config.messaging.auto_show_trigger = trigger;
            }
            let payload: Payload = payload.into_iter().collect();
            let report = evaluate(
                &config,
                &campaigns,
                &event,
                &payload,
                orientation.into(),
                cache_dir.as_deref(),
                qa || config.qa.logging_enabled,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Assets {
            campaigns,
            cache_dir,
            fetch,
        } => {
            let cache_dir =
                cache_dir.unwrap_or_else(|| PathBuf::from(&config.assets.cache_dir));
            let report = if fetch {
                fetch_assets(&config, &campaigns, &cache_dir).await?
            } else {
                list_assets(&config, &campaigns, &cache_dir).await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if cli.print_metrics {
        eprintln!("{}", metrics.render());
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "campaign_sdk=info,campaign_messaging=info,campaign_assets=info".into()
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_engine(config: &SdkConfig, path: &Path) -> anyhow::Result<CampaignEngine> {
    let raw = std::fs::read_to_string(path)?;
    let definitions: Value = serde_json::from_str(&raw)?;
    let mut engine = CampaignEngine::new(config.messaging.clone(), Arc::new(SystemClock));
    let loaded = engine.load_campaigns(&definitions, &HashMap::new(), &NoOpQaSink);
    info!(path = %path.display(), loaded, "Campaigns loaded");
    Ok(engine)
}

async fn evaluate(
    config: &SdkConfig,
    campaigns: &Path,
    event: &str,
    payload: &Payload,
    orientation: Orientation,
    cache_dir: Option<&Path>,
    full_qa: bool,
) -> anyhow::Result<Value> {
    let mut engine = load_engine(config, campaigns)?;
    let personalization: HashMap<String, String> = payload.clone();
    let needed = engine.asset_queues(&personalization).all;

    let assets_on_disk: HashSet<String> = match cache_dir {
        Some(dir) => {
            let storage = FsAssetStorage::open(dir).await?;
            let mut present = HashSet::new();
            for item in &needed {
                if storage.exists(&item.name).await {
                    present.insert(item.name.clone());
                }
            }
            present
        }
        None => needed.iter().map(|item| item.name.clone()).collect(),
    };

    let display = DisplayContext {
        orientation,
        personalization,
        assets_on_disk,
    };
    let sink = CaptureQaSink::new();
    let selected = engine
        .message_for_event(event, payload, &display, &sink)
        .map(|c| json!({"id": c.id(), "name": c.name(), "type": c.campaign_type(), "priority": c.priority()}));
    if selected.is_none() {
        warn!(event, "No campaign available for event");
    }

    let decisions: Vec<Value> = if full_qa {
        sink.campaigns()
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?
    } else {
        sink.campaigns()
            .into_iter()
            .map(|r| json!({"campaign_id": r.campaign_id, "displayed": r.displayed, "reason": r.reason}))
            .collect()
    };

    Ok(json!({
        "event": event,
        "decisions": decisions,
        "selected": selected,
    }))
}

async fn list_assets(
    config: &SdkConfig,
    campaigns: &Path,
    cache_dir: &Path,
) -> anyhow::Result<Value> {
    let engine = load_engine(config, campaigns)?;
    let queues = engine.asset_queues(&HashMap::new());
    let storage = FsAssetStorage::open(cache_dir).await?;

    let mut items: Vec<_> = queues.all.iter().collect();
    items.sort_by(|a, b| a.name.cmp(&b.name));

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        rows.push(json!({
            "name": item.name,
            "digest": item.digest,
            "is_image": item.is_image,
            "is_external_source": item.is_external_source,
            "auto_show": queues.auto_show.contains(item),
            "cached": storage.exists(&item.name).await,
        }));
    }
    Ok(json!({"cache_dir": cache_dir.display().to_string(), "assets": rows}))
}

async fn fetch_assets(
    config: &SdkConfig,
    campaigns: &Path,
    cache_dir: &Path,
) -> anyhow::Result<Value> {
    let engine = load_engine(config, campaigns)?;
    let queues = engine.asset_queues(&HashMap::new());

    let transport = HttpAssetTransport::new(Duration::from_secs(
        config.assets.download_timeout_secs,
    ))?;
    let storage = FsAssetStorage::open(cache_dir).await?;
    let qa = Arc::new(CaptureQaSink::new());
    let pipeline = AssetPipeline::new(
        Arc::new(transport),
        Arc::new(storage),
        CdnUrls::from_config(&config.assets)?,
    )
    .with_qa_sink(qa.clone());

    let mut batches: Vec<(BatchKind, BatchReport)> = Vec::new();
    pipeline
        .download_assets(&queues.auto_show, &queues.all, |kind, report| {
            info!(?kind, downloaded = report.downloaded.len(), "Asset batch complete");
            batches.push((kind, report.clone()));
        })
        .await;
    if let Some(retry) = pipeline.download_any_missing_assets(|_| {}).await {
        batches.push((BatchKind::Retry, retry));
    }

    let missing: Vec<String> = pipeline
        .missing_assets()
        .into_iter()
        .map(|item| item.name)
        .collect();
    Ok(json!({
        "cache_dir": cache_dir.display().to_string(),
        "batches": batches
            .iter()
            .map(|(kind, report)| json!({"kind": kind, "report": report}))
            .collect::<Vec<_>>(),
        "still_missing": missing,
        "failures": qa.asset_failures(),
    }))
}
