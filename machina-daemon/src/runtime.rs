//! The `machined` runtime.
//!
//! One bus, one registry of providers, and a handful of tasks sharing a
//! broadcast shutdown channel:
//!
//! - one task per provider running its detection loop
//! - the synchronizer draining the bus into the attribute hash
//! - the control socket
//! - log rotation
//! - SIGTERM / ctrl-c handling

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use machina_core::AgentConfig;
use machina_sync::Synchronizer;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{Bus, BusReceiver};
use crate::error::{io_err, DaemonError};
use crate::paths::{logs_dir, run_dir, socket_path, LOG_ROTATION_PERIOD, MACHINED};
use crate::pidfile::PidFiles;
use crate::protocol::{
    DaemonRequest, DaemonResponse, CMD_HDEL, CMD_HGET, CMD_HGETALL, CMD_HSET, CMD_STATUS,
    CMD_STOP,
};
use crate::providers::build_registry;
use crate::registry::Registry;

/// What the runtime knows about one provider's detection loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProviderStatus {
    Running,
    Exited,
    Failed { error: String },
}

type ProviderTable = Arc<RwLock<BTreeMap<String, ProviderStatus>>>;

/// State shared by the socket server and its clients.
#[derive(Clone)]
struct Shared {
    home: PathBuf,
    config: Arc<AgentConfig>,
    registry: Arc<Registry>,
    store: Arc<RwLock<Synchronizer>>,
    providers: ProviderTable,
    shutdown: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Run `machined` with `config` on a fresh multi-thread runtime.
pub fn start_blocking(home: &Path, config: AgentConfig) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run `machined` until a `stop` request or a termination signal.
pub async fn run(home: PathBuf, config: AgentConfig) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let _pidfile = PidFiles::at(&home, &config).record_current()?;
    tracing::info!(pid = std::process::id(), machine = %config.machine, "{MACHINED} starting");

    let (bus, bus_rx) = Bus::new();
    let registry = Arc::new(build_registry(&config, &bus));
    // Providers hold their own publishers; once they are gone the bus closes.
    drop(bus);

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(16);
    let shared = Shared {
        home: home.clone(),
        store: Arc::new(RwLock::new(Synchronizer::new(&home, config.hash.clone()))),
        config: Arc::new(config),
        registry: registry.clone(),
        providers: Arc::new(RwLock::new(BTreeMap::new())),
        shutdown: shutdown_tx.clone(),
        started_at_unix: unix_seconds_now(),
    };

    let provider_handles = spawn_providers(&registry, &shared.providers).await;

    // The bus keeps draining until every provider has unwound, so a provider
    // blocked in publish at shutdown sees its own stop, not a closed bus.
    let providers_done = CancellationToken::new();
    let sync_handle = {
        let shutdown = shutdown_tx.clone();
        let providers_done = providers_done.clone();
        let store = shared.store.clone();
        tokio::spawn(async move {
            let result = synchronizer_task(store, bus_rx, providers_done).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let shared = shared.clone();
        tokio::spawn(async move {
            let result = socket_server_task(shared, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown_rx = shutdown_tx.subscribe();
        let logs = logs_dir(&home);
        tokio::spawn(async move { log_rotation_task(logs, shutdown_rx).await })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let _ = shutdown_rx.recv().await;
    tracing::info!("{MACHINED} shutting down");

    close_providers(&registry, provider_handles).await;
    providers_done.cancel();

    let (sync_result, socket_result, rotation_result, signal_result) =
        tokio::join!(sync_handle, socket_handle, rotation_handle, signal_handle);
    handle_join("synchronizer", sync_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("{MACHINED} stopped");
    Ok(())
}

async fn spawn_providers(registry: &Arc<Registry>, table: &ProviderTable) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(registry.len());
    for (provider, args) in registry.providers() {
        let name = provider.name().to_string();
        table
            .write()
            .await
            .insert(name.clone(), ProviderStatus::Running);

        let provider = provider.clone();
        let args = args.to_vec();
        let table = table.clone();
        handles.push(tokio::spawn(async move {
            let status = match provider.main(&args).await {
                Ok(()) => ProviderStatus::Exited,
                Err(err) => {
                    tracing::error!(provider = %name, error = %err, "provider failed");
                    ProviderStatus::Failed {
                        error: err.to_string(),
                    }
                }
            };
            table.write().await.insert(name, status);
        }));
    }
    handles
}

/// Close every provider and wait for its detection loop to unwind.
async fn close_providers(registry: &Registry, handles: Vec<JoinHandle<()>>) {
    if let Err(err) = registry.shutdown().await {
        tracing::error!(error = %err, "provider shutdown incomplete");
    }
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "provider task join failure");
        }
    }
}

async fn synchronizer_task(
    store: Arc<RwLock<Synchronizer>>,
    mut bus_rx: BusReceiver,
    providers_done: CancellationToken,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = providers_done.cancelled() => break,
            event = bus_rx.recv() => {
                let Some(event) = event else { break };
                let mut store = store.write().await;
                store.apply(&event);
                if let Err(err) = store.flush() {
                    tracing::error!(error = %err, "attribute hash write failed");
                }
            }
        }
    }
    store.write().await.flush()?;
    Ok(())
}

async fn socket_server_task(
    shared: Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&shared.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let shared = shared.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, shared).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    match fs::remove_file(&socket) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(socket = %socket.display(), error = %err, "can't remove socket"),
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, shared: Shared) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == CMD_STOP;
        let response = handle_request(&shared, request).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }
    Ok(())
}

async fn handle_request(shared: &Shared, request: DaemonRequest) -> DaemonResponse {
    let cmd = request.cmd.as_str();
    match (cmd, request.key, request.value) {
        (CMD_HGET, Some(key), _) => {
            let store = shared.store.read().await;
            DaemonResponse::ok(store.get(&key).map_or(Value::Null, |v| json!(v)))
        }
        (CMD_HGETALL, _, _) => {
            let store = shared.store.read().await;
            DaemonResponse::ok(json!(store.fields()))
        }
        (CMD_HSET, Some(key), Some(value)) => match shared.registry.set(&key, &value).await {
            Ok(()) => DaemonResponse::ok(Value::Null),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        (CMD_HDEL, Some(key), _) => match shared.registry.del(&key).await {
            Ok(()) => DaemonResponse::ok(Value::Null),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        (CMD_STATUS, _, _) => DaemonResponse::ok(build_status_payload(shared).await),
        (CMD_STOP, _, _) => {
            let _ = shared.shutdown.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        (CMD_HGET | CMD_HSET | CMD_HDEL, _, _) => {
            DaemonResponse::error(format!("{cmd}: missing key or value"))
        }
        (other, _, _) => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

async fn build_status_payload(shared: &Shared) -> Value {
    let statuses = shared.providers.read().await.clone();
    let providers: Vec<Value> = shared
        .registry
        .providers()
        .map(|(provider, args)| {
            let name = provider.name();
            json!({
                "name": name,
                "prefixes": provider.prefixes(args),
                "status": statuses.get(name),
            })
        })
        .collect();

    let (attributes, store_path) = {
        let store = shared.store.read().await;
        (store.fields().len(), store.path())
    };

    json!({
        "running": true,
        "pid": std::process::id(),
        "machine": shared.config.machine,
        "hash": shared.config.hash,
        "started_at_unix": shared.started_at_unix,
        "attributes": attributes,
        "store": store_path.display().to_string(),
        "socket": socket_path(&shared.home).display().to_string(),
        "providers": providers,
        "conflicts": shared
            .registry
            .conflicts()
            .into_iter()
            .map(|c| json!({ "prefix": c.prefix, "winner": c.winner, "shadowed": c.shadowed }))
            .collect::<Vec<_>>(),
    })
}

async fn log_rotation_task(
    logs: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(LOG_ROTATION_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let logs = logs.clone();
                // Failures are logged inside rotate_logs.
                tokio::task::spawn_blocking(move || crate::log_rotation::rotate_logs(&logs))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
    tokio::select! {
        _ = shutdown_rx.recv() => {}
        _ = terminate.recv() => {
            tracing::info!("received SIGTERM");
            let _ = shutdown.send(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("received ctrl-c");
            let _ = shutdown.send(());
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "daemon socket already in use: {}",
            socket.display()
        )));
    }
    tracing::warn!(socket = %socket.display(), "removing stale daemon socket before bind");
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), logs_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the `fmt` subscriber: `RUST_LOG`, else `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
