mod cli;

use snapfeed::{
    cleanup,
    clock::{Clock, SystemClock},
    config::{self, Config},
    pipeline::{FfmpegBackend, PipelineDriver},
    playlist::BufferPair,
    queue::{parse_artifact_path, IngestionQueue},
    scheduler::{Placeholder, Scheduler},
    transport::{SupervisorHandle, TransportSupervisor},
    watch::{self, Discovery, FileWatcher},
};
use snapfeed_av::Tools;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

async fn run_feed(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    tracing::info!("Starting snapfeed");

    let tools = Tools::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )
    .context("ffmpeg and ffprobe are required")?;

    std::fs::create_dir_all(&config.paths.temp_dir).with_context(|| {
        format!(
            "Failed to create temp directory: {:?}",
            config.paths.temp_dir
        )
    })?;

    let backend = Arc::new(FfmpegBackend::new(
        tools.clone(),
        config.tools.encode_settings(),
        &config.paths.temp_dir,
    ));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let queue = IngestionQueue::new(config.budget.window_secs, &config.paths.temp_dir).shared();

    let mut scheduler = Scheduler::new(
        BufferPair::new(&config.paths.playlist_dir),
        Placeholder {
            path: config.placeholder.path.clone(),
            duration_secs: config.placeholder.duration_secs,
        },
    );
    if let Some(ref log) = config.scheduler.switch_log {
        scheduler = scheduler.with_switch_log(log);
    }
    let scheduler = Arc::new(scheduler);
    scheduler
        .initialize()
        .context("Failed to initialize playlists")?;
    tracing::info!(
        "Playlists ready in {}",
        config.paths.playlist_dir.display()
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    // Discovery
    let discovery = Arc::new(Discovery::new(queue.clone(), backend.clone()));
    let watcher_task = if config.watch.enabled {
        watch::rescan_recent(
            &config.watch.root,
            config.watch.rescan_horizon(),
            clock.now(),
            &discovery,
        )
        .await;
        let watcher = FileWatcher::new(
            &config.watch.root,
            config.watch.settle_time(),
            discovery.clone(),
        );
        Some(tokio::spawn(watcher.run(cancel.child_token())))
    } else {
        tracing::info!("File watcher is disabled");
        None
    };

    // Countdown
    let ticker = tokio::spawn(scheduler.clone().run(
        Duration::from_millis(config.scheduler.tick_millis),
        cancel.child_token(),
    ));

    let mut driver = PipelineDriver::new(
        queue,
        scheduler.clone(),
        backend.clone(),
        backend,
        clock,
    )
    .with_settings(config.driver_settings())
    .with_cleaner(config.stale_cleaner());

    // The transport outlives the driver so the last appended items can still play.
    let transport_cancel = CancellationToken::new();
    let mut supervisor_task = None;
    let mut failure = None;

    match driver.warm_up(&cancel).await {
        Ok(true) => {
            let transport =
                spawn_transport(&config, &tools, scheduler.clone(), transport_cancel.clone());
            match transport {
                Ok((handle, task)) => {
                    driver.attach_supervisor(handle);
                    supervisor_task = Some(task);
                    tracing::info!("Streaming to {}", config.stream.url);
                    driver.run(cancel.clone()).await;
                }
                Err(e) => failure = Some(e),
            }
        }
        Ok(false) => {}
        Err(e) => failure = Some(e.context("Warm-up failed")),
    }

    tracing::info!("Shutting down...");
    cancel.cancel();

    if let Some(task) = watcher_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("File watcher failed: {:#}", e),
            Err(e) => tracing::warn!("File watcher task panicked: {}", e),
        }
    }
    if let Err(e) = ticker.await {
        tracing::warn!("Scheduler task panicked: {}", e);
    }

    transport_cancel.cancel();
    if let Some(task) = supervisor_task {
        if let Err(e) = task.await {
            tracing::warn!("Transport supervisor task panicked: {}", e);
        }
    }

    tracing::info!("Removing temporary segments and playlists");
    let removed = cleanup::remove_all_temporaries(
        &config.paths.temp_dir,
        &scheduler.playlist_paths(),
        &config.cleanup.excluded_files,
    );
    tracing::info!("Removed {} temporary file(s)", removed);

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn spawn_transport(
    config: &Config,
    tools: &Tools,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
) -> Result<(SupervisorHandle, JoinHandle<()>)> {
    let supervisor = TransportSupervisor::new(
        config.stream.transport_command(&tools.ffmpeg),
        scheduler,
        config.stream.url.clone(),
        &config.stream.log_path,
    )
    .with_policy(config.stream.restart_policy())
    .with_terminate_timeout(config.stream.terminate_timeout());

    supervisor
        .spawn(cancel)
        .context("Failed to start transport process")
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => return,
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "snapfeed=trace,snapfeed_av=trace".to_string()
        } else {
            "snapfeed=info,snapfeed_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_feed(cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Parse { path } => parse_path(&path),
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("snapfeed {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = Tools::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )?;
    let duration = snapfeed_av::probe_duration(&tools.ffprobe, file)
        .await
        .with_context(|| format!("Failed to probe {:?}", file))?;

    if json {
        let value = serde_json::json!({
            "file": file.display().to_string(),
            "duration_secs": duration.as_secs_f64(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        let secs = duration.as_secs();
        println!("File: {}", file.display());
        println!(
            "Duration: {:02}:{:02}:{:02} ({:.3}s)",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            duration.as_secs_f64()
        );
    }

    Ok(())
}

fn parse_path(path: &Path) -> Result<()> {
    let (capture_time, artifact_type) =
        parse_artifact_path(path).with_context(|| format!("Cannot schedule {:?}", path))?;
    println!("File: {}", path.display());
    println!("Type: {}", artifact_type.as_str());
    println!("Capture time: {}", capture_time.format("%Y-%m-%d %H:%M:%S"));
    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = snapfeed_av::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. ffmpeg and ffprobe are both required.");
    }

    Ok(())
}

fn print_summary(config: &Config) {
    println!("  Watch root: {}", config.watch.root.display());
    println!("  Watch enabled: {}", config.watch.enabled);
    println!("  Playlist dir: {}", config.paths.playlist_dir.display());
    println!("  Temp dir: {}", config.paths.temp_dir.display());
    println!("  Window: {}s", config.budget.window_secs);
    println!(
        "  Placeholder: {} ({}s)",
        config.placeholder.path.display(),
        config.placeholder.duration_secs
    );
    println!("  Stream URL: {}", config.stream.url);
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            println!("Default config:");
            print_summary(&Config::default());
        }
    }

    Ok(())
}
