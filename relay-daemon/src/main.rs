use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    shared_source_list, spawn_registry, spawn_schedule, AcceptAll, DedupEngine, DeliveryTracker,
    Dispatcher, FailurePolicy, FailureTable, FeedSchedule, HttpFetcher, JsonLedger, LogSink,
    RelayConfig, ScheduleDeps, SchedulerSettings, SeenStore, Source, Standalone,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => match RelayConfig::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                error!(path = %path, error = %err, "invalid configuration");
                std::process::exit(2);
            }
        },
        None => RelayConfig::load(),
    };
    let dir = data_dir();
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        warn!(dir = %dir.display(), error = %err, "unable to create data directory");
    }

    let sources = shared_source_list(load_sources(&dir.join("sources.json")).await);
    let seen = SeenStore::load_from(dir.join("seen_fields.json")).await;
    let ledger = Arc::new(JsonLedger::load_from(dir.join("deliveries.json")).await);
    let prune_task = config
        .delivery
        .retention()
        .map(|retention| spawn_ledger_pruning(ledger.clone(), retention));
    let failures_path = dir.join("failed_targets.json");
    let failures = FailureTable::load(&failures_path).await;

    let fetcher = match HttpFetcher::with_timeout(config.feeds.request_timeout()) {
        Ok(fetcher) => fetcher,
        Err(err) => {
            error!(error = %err, "failed to build HTTP client");
            std::process::exit(1);
        }
    };

    let schedules = config.schedules();
    let registry = spawn_registry(
        schedules.clone(),
        FailurePolicy::new(config.feeds.fail_limit, config.feeds.warn_fraction),
        failures,
        Some(failures_path),
    );

    let sink = Arc::new(LogSink);
    let (events_tx, events_rx) = mpsc::channel(256);
    let dispatcher = Dispatcher::new(
        DedupEngine::new(Arc::new(seen)),
        DeliveryTracker::new(ledger),
        sink.clone(),
        Arc::new(AcceptAll),
        config.delivery.clone(),
    );
    let dispatch_task = dispatcher.spawn(events_rx);

    let settings = Arc::new(SchedulerSettings::from_config(&config));
    let deps = ScheduleDeps {
        sources: Arc::new(sources),
        fetcher: Arc::new(fetcher),
        registry,
        sink,
        peers: Arc::new(Standalone),
        events: events_tx,
    };
    let handles: Vec<_> = schedules
        .into_iter()
        .map(|schedule| {
            info!(
                schedule = %schedule.name,
                refresh_secs = schedule.refresh_interval.as_secs(),
                "starting schedule"
            );
            spawn_schedule(FeedSchedule::new(schedule, settings.clone(), deps.clone()))
        })
        .collect();
    drop(deps);

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "unable to listen for shutdown signal");
    }
    info!("shutting down");

    for handle in handles {
        let name = handle.name().to_owned();
        if let Err(err) = handle.stop().await {
            warn!(schedule = %name, error = %err, "schedule did not stop cleanly");
        }
    }
    if let Some(task) = prune_task {
        task.abort();
    }
    if let Err(err) = dispatch_task.await {
        warn!(error = %err, "dispatcher did not stop cleanly");
    }
}

/// Hourly removal of delivery records older than `retention`, starting now.
fn spawn_ledger_pruning(ledger: Arc<JsonLedger>, retention: Duration) -> JoinHandle<()> {
    let retention = chrono::Duration::from_std(retention).ok();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(cutoff) = retention.and_then(|r| chrono::Utc::now().checked_sub_signed(r)) else {
                continue;
            };
            match ledger.prune_before(cutoff).await {
                Ok(0) => {}
                Ok(pruned) => info!(pruned, "pruned expired delivery records"),
                Err(err) => warn!(error = %err, "unable to prune delivery records"),
            }
        }
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// `~/.local/share/feedrelay` on Linux, the working directory as a last resort.
fn data_dir() -> PathBuf {
    let mut dir = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default();
    dir.push("feedrelay");
    dir
}

async fn load_sources(path: &Path) -> Vec<Source> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(_) => {
            info!(path = %path.display(), "no source list found, starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_str(&content) {
        Ok(sources) => sources,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unable to parse source list");
            Vec::new()
        }
    }
}
