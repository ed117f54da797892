use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, trace, warn};
use rumqttc::{Event, Incoming, Outgoing};

use htcs_controller::config::{self, Config};
use htcs_controller::decision;
use htcs_controller::dispatcher;
use htcs_controller::error::AppError;
use htcs_controller::pool::ClientPool;
use htcs_controller::reaper;
use htcs_controller::registry::Registry;

/// Highway Traffic Control System controller.
#[derive(Parser, Debug)]
#[command(name = "htcs-controller", version, about)]
struct Args {
    /// Path to the controller's `key=value` properties file.
    config: PathBuf,

    /// Overrides the `RUST_LOG`-style log level.
    #[arg(long)]
    log_level: Option<String>,

    /// Overrides `state_client_pool_size` from the config file.
    #[arg(long)]
    pool_size: Option<usize>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = &args.log_level {
        builder.parse_filters(level);
    }
    builder.init();

    let exit_code = match run(args).await {
        Ok(()) => 0,
        Err(err) => {
            error!("fatal: {err}");
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<(), AppError> {
    let mut config = Config::load(&args.config)?;
    if let Some(pool_size) = args.pool_size {
        config::validate_pool_size(pool_size)?;
        config.state_client_pool_size = pool_size;
    }

    info!("connecting to broker at {} with a pool of {} state clients", config.address, config.state_client_pool_size);
    let mut connections = ClientPool::connect(&config)?;
    ClientPool::verify_connected(
        &config.address,
        &mut connections.control_event_loop,
        &mut connections.state_event_loops,
    )
    .await?;
    let pool = Arc::new(connections.pool);
    pool.subscribe_control_topics(true).await?;

    let registry = Arc::new(Registry::new());
    let accepting_joins = Arc::new(AtomicBool::new(true));
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let mut network_tasks = Vec::new();
    for (index, event_loop) in connections.state_event_loops.into_iter().enumerate() {
        let registry = Arc::clone(&registry);
        let pool = Arc::clone(&pool);
        network_tasks.push(tokio::spawn(run_state_event_loop(index, event_loop, registry, pool)));
    }
    network_tasks.push(tokio::spawn(run_control_event_loop(
        connections.control_event_loop,
        Arc::clone(&registry),
        Arc::clone(&pool),
        Arc::clone(&accepting_joins),
        Arc::clone(&shutdown),
    )));

    let reaper_task = tokio::spawn(reaper::run(
        Arc::clone(&registry),
        Arc::clone(&pool),
        reaper::DEFAULT_INTERVAL,
        reaper::DEFAULT_THRESHOLD,
    ));
    let decision_task = tokio::spawn(decision::run(Arc::clone(&registry), Arc::clone(&pool), decision::DEFAULT_TICK));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        _ = shutdown.notified() => {
            info!("received obituary, shutting down");
        }
    }

    info!("shutdown: no longer accepting joins");
    accepting_joins.store(false, Ordering::SeqCst);

    info!("shutdown: stopping network read loops");
    for task in network_tasks {
        task.abort();
    }

    info!("shutdown: stopping reaper and decision loop");
    reaper_task.abort();
    decision_task.abort();

    Ok(())
}

/// Drives one state client's event loop: routes incoming `state` publishes
/// into the dispatcher, and resolves pending unsubscribes keyed by mid
/// (spec.md §4.D).
async fn run_state_event_loop(index: usize, mut event_loop: rumqttc::EventLoop, registry: Arc<Registry>, pool: Arc<ClientPool>) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                trace!("state client {index} received publish on `{}`", publish.topic);
                match dispatcher::route_topic(&publish.topic) {
                    Ok((id, "state")) => match std::str::from_utf8(&publish.payload) {
                        Ok(payload) => dispatcher::handle_state(&registry, id, payload),
                        Err(_) => warn!("non-utf8 state payload on `{}`", publish.topic),
                    },
                    Ok((id, kind)) => trace!("state client {index} ignoring `{kind}` message for `{id}`"),
                    Err(err) => warn!("{err}"),
                }
            }
            Ok(Event::Incoming(Incoming::UnsubAck(unsuback))) => {
                if let Some(id) = pool.state_client(index).resolve_unsubscribe(unsuback.pkid) {
                    debug!("state client {index} unsubscribe acknowledged for `{id}`, evicting");
                    registry.remove(&id);
                }
            }
            Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                pool.state_client(index).assign_pending_mid(pkid);
            }
            Ok(_) => {}
            Err(err) => {
                error!("state client {index} connection error: {err}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Drives the control client's event loop: routes join messages into the
/// dispatcher (dropping them while the controller is shutting down) and
/// triggers shutdown on an obituary message.
async fn run_control_event_loop(
    mut event_loop: rumqttc::EventLoop,
    registry: Arc<Registry>,
    pool: Arc<ClientPool>,
    accepting_joins: Arc<AtomicBool>,
    shutdown: Arc<tokio::sync::Notify>,
) {
    let obituary_topic = format!("{}/obituary", pool.base_topic());
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                if publish.topic == obituary_topic {
                    info!("obituary received on `{}`", publish.topic);
                    shutdown.notify_one();
                    continue;
                }
                match dispatcher::route_topic(&publish.topic) {
                    Ok((id, "join")) => {
                        if !accepting_joins.load(Ordering::SeqCst) {
                            debug!("dropping join for `{id}`, controller is shutting down");
                            continue;
                        }
                        match std::str::from_utf8(&publish.payload) {
                            Ok(payload) => dispatcher::handle_join(&registry, &pool, id, payload).await,
                            Err(_) => warn!("non-utf8 join payload on `{}`", publish.topic),
                        }
                    }
                    Ok((id, kind)) => trace!("control client ignoring `{kind}` message for `{id}`"),
                    Err(err) => warn!("{err}"),
                }
            }
            Ok(_) => {}
            Err(err) => {
                error!("control client connection error: {err}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
