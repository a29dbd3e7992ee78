use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::watch;

use slipway::builder::KustomizeBuilder;
use slipway::config::{config_path, load_or_default, ControllerConfig};
use slipway::declarations::{self, BackgroundWatcher};
use slipway::events::{EventRecorder, LogEventRecorder};
use slipway::lister::{Credentials, GitCliLister};
use slipway::store::ObjectStore;
use slipway::{
    logging, ArchiveQueue, Controller, ControllerSettings, GitRepoReconciler, MemoryStore,
    Pipeline, PluginRegistry,
};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let config = match load_or_default(config_path(&args).as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("slipway: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.log_format, &config.log_level);
    info!("Starting slipway v{}", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ControllerConfig) -> slipway::Result<()> {
    let plugins = Arc::new(PluginRegistry::load(&config.plugin_path)?);
    info!(
        "Plugins loaded: matchers [{}], sinks [{}]",
        plugins.matcher_names().join(", "),
        plugins.sink_names().join(", ")
    );

    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let recorder: Arc<dyn EventRecorder> = Arc::new(LogEventRecorder);
    let archive = Arc::new(ArchiveQueue::new(
        config.archive_workers,
        config.queue_capacity(),
    )?);

    let lister = Arc::new(GitCliLister::new(
        &config.git.binary,
        Duration::from_secs(config.git.timeout_secs),
    ));
    let repos = GitRepoReconciler::new(
        Arc::clone(&store),
        lister,
        Arc::clone(&plugins),
        Arc::clone(&recorder),
    )
    .with_credentials(Credentials {
        ssh_key_path: config.git.ssh_key_path.clone(),
    });

    let builder = Arc::new(KustomizeBuilder::new(
        &config.kustomize.binary,
        Duration::from_secs(config.kustomize.timeout_secs),
    ));
    let pipeline = Pipeline::new(
        Arc::clone(&store),
        builder,
        plugins,
        recorder,
        Arc::clone(&archive),
    );

    let settings = ControllerSettings {
        resync_interval: config.resync_interval(),
        ..ControllerSettings::default()
    };
    let controller = Arc::new(Controller::new(
        Arc::clone(&store),
        Arc::new(repos),
        Arc::new(pipeline),
        settings,
    ));

    // The controller picks up whatever the first sync put in the store.
    match declarations::reload(store.as_ref(), &config.declarations_dir).await {
        Ok(summary) => info!(
            "Declarations synced: {} applied, {} unchanged, {} deleted",
            summary.applied.len(),
            summary.unchanged.len(),
            summary.deleted.len()
        ),
        Err(e) => warn!("Initial declaration sync failed: {}", e),
    }

    let mut watcher = BackgroundWatcher::new(config.declarations_dir.clone());
    let reloads = tokio::spawn(reload_on_change(
        Arc::clone(&store),
        config.declarations_dir.clone(),
        watcher.subscribe(),
    ));
    if config.declarations_dir.is_dir() {
        watcher.start();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = signal_tx.send(true);
    }) {
        warn!("Unable to install signal handler: {}", e);
    }

    Arc::clone(&controller).run(shutdown_rx).await;
    drop(shutdown_tx);

    reloads.abort();
    watcher.stop();

    let queue = Arc::clone(&archive);
    if let Err(e) = tokio::task::spawn_blocking(move || queue.close()).await {
        error!("Archive queue shutdown failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Re-syncs the declarations whenever a YAML file under `dir` changes.
async fn reload_on_change(
    store: Arc<dyn ObjectStore>,
    dir: PathBuf,
    mut changes: tokio::sync::broadcast::Receiver<declarations::DeclarationChange>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                info!("Declaration {} changed, reloading", change.path.display());
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
        // Later changes are covered by this reload.
        while changes.try_recv().is_ok() {}

        if let Err(e) = declarations::reload(store.as_ref(), &dir).await {
            warn!("Declaration reload failed, keeping current state: {}", e);
        }
    }
}
