//! Exposed Model Server
//!
//! Serves a demo model over HTTP: remote observers fetch it, long-poll for
//! deltas and push their own updates back, while a job thread keeps
//! advancing the model.

use clap::{Arg, ArgAction, Command};
use exposed_model::api::start_server;
use exposed_model::core::{AppState, Config};
use exposed_model::notify::{EventForwarder, EventKind, Interest};
use exposed_model::{ElementSpec, ElementValue, Error, ExposedModel, Matrix, Result, Viewer};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

/// Interval between two steps of the demo job
const JOB_STEP: Duration = Duration::from_secs(1);

fn cli() -> Command {
    Command::new("exposed-model")
        .version(exposed_model::VERSION)
        .about("Shared, revision-tracked state store served to remote observers.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("http-addr")
                .long("http-addr")
                .value_name("ADDR")
                .help("HTTP server bind address"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("long-poll-timeout")
                .long("long-poll-timeout")
                .value_name("DURATION")
                .help("Default long-poll wait, e.g. 30s or 500ms"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .help("Number of runtime worker threads"),
        )
        .arg(
            Arg::new("no-demo")
                .long("no-demo")
                .action(ArgAction::SetTrue)
                .help("Serve an empty model without the demo job"),
        )
}

fn main() -> Result<()> {
    let matches = cli().get_matches();

    let mut config = if let Some(config_path) = matches.get_one::<String>("config") {
        Config::from_file(config_path)?
    } else {
        Config::load()?
    };
    apply_cli_overrides(&mut config, &matches)?;
    config.validate()?;

    exposed_model::init(&config)?;
    info!("Starting {} v{}", exposed_model::NAME, exposed_model::VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.optimal_worker_threads())
        .enable_all()
        .build()?;
    runtime.block_on(run(config, !matches.get_flag("no-demo")))
}

/// Apply command line argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(addr) = matches.get_one::<String>("http-addr") {
        config.server.http_addr = addr
            .parse()
            .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
    }

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    if let Some(timeout) = matches.get_one::<String>("long-poll-timeout") {
        config.long_poll.default_timeout = exposed_model::core::config::parse_duration(timeout)
            .map_err(|e| Error::config(format!("Invalid long-poll timeout: {}", e)))?;
    }

    if let Some(workers) = matches.get_one::<String>("workers") {
        config.performance.worker_threads = workers
            .parse()
            .map_err(|e| Error::config(format!("Invalid worker count: {}", e)))?;
    }

    Ok(())
}

async fn run(config: Config, demo: bool) -> Result<()> {
    let model = Arc::new(ExposedModel::from_config(&config));
    let addr = config.server.http_addr;

    let job = if demo {
        seed_demo_model(&model)?;
        spawn_render_mode_watcher(&model)?;
        Some(DemoJob::spawn(model.clone()))
    } else {
        None
    };

    let state = AppState::new(model, config);
    let served = start_server(addr, state, shutdown_signal()).await;

    if let Some(job) = job {
        job.stop();
    }
    info!("Shutdown complete");
    served
}

/// Populate the model with the elements the demo job and GUI work on
fn seed_demo_model(model: &ExposedModel) -> Result<()> {
    let mut lock = model.lock()?;
    lock.add(ElementSpec::new("isovalue", -4).with_annotation("Isovalue"))?;
    lock.add(
        ElementSpec::new("timestep", 2)
            .with_range(2, 42)
            .with_annotation("Timestep"),
    )?;
    lock.add(
        ElementSpec::new("render_mode", "solid")
            .with_allowed(["points", "wireframe", "solid"])
            .with_annotation("Render mode"),
    )?;
    lock.add(ElementSpec::new("projection", Matrix::identity()))?;
    lock.add(ElementSpec::new("viewer", Viewer::default()))?;
    lock.add(ElementSpec::new("status", "idle").with_annotation("Job status"))?;
    lock.add(ElementSpec::new("job_ticks", 0).hidden())?;
    lock.set_layout(json!({
        "kind": "vbox",
        "children": ["isovalue", "timestep", "render_mode", "status", "viewer"],
    }));
    info!(revision = lock.current_revision(), "Seeded demo model");
    Ok(())
}

/// Report render mode changes through the `status` element
///
/// The listener only forwards events; the status update runs on its own
/// thread after the model lock is released.
fn spawn_render_mode_watcher(model: &Arc<ExposedModel>) -> Result<()> {
    let (forwarder, events) = EventForwarder::channel(Interest::STATE);
    model.register_listener(forwarder)?;

    let model = Arc::downgrade(model);
    thread::Builder::new()
        .name("render-mode-watcher".to_string())
        .spawn(move || {
            for event in events.iter() {
                if event.kind != EventKind::ElementChanged || event.element.key() != "render_mode" {
                    continue;
                }
                let Some(model) = model.upgrade() else {
                    break;
                };
                let status = match event.element.value() {
                    ElementValue::String(mode) => format!("rendering {}", mode),
                    other => format!("rendering {}", other),
                };
                if let Err(e) = model.update_element("status", status) {
                    warn!(error = %e, "Failed to update status");
                }
            }
        })?;
    Ok(())
}

/// Background job that advances the timestep like a running simulation
struct DemoJob {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl DemoJob {
    fn spawn(model: Arc<ExposedModel>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(JOB_STEP);
                if let Err(e) = step(&model) {
                    warn!(error = %e, "Demo job step failed");
                }
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            warn!("Demo job panicked");
        }
    }
}

fn step(model: &ExposedModel) -> Result<()> {
    let mut lock = model.lock()?;
    let timestep: i64 = lock.get("timestep")?;
    let next = if timestep >= 42 { 2 } else { timestep + 1 };
    lock.update_element("timestep", next)?;

    let ticks: i64 = lock.get("job_ticks")?;
    let revision = lock.update_element("job_ticks", ticks + 1)?;
    debug!(timestep = next, revision, "Demo job step");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
