//! SuperChat server entry point: loads configuration, opens the persistent
//! store, rebuilds the in-memory view, and runs the TCP/SSH/WebSocket
//! transports plus the background snapshot loop until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use superchat_server::config::AppConfig;
use superchat_server::db::Store as Db;
use superchat_server::dispatcher::Dispatcher;
use superchat_server::id::SnowflakeGenerator;
use superchat_server::models::ConnectionType;
use superchat_server::ratelimit::RateLimiter;
use superchat_server::session::SessionRegistry;
use superchat_server::store::MemoryStore;
use superchat_server::subscription::SubscriptionManager;
use superchat_server::wire::PROTOCOL_VERSION;
use superchat_server::{api, connection, db, transport};

/// Thin CLI shim (spec §2 ambient stack): every flag overrides the
/// corresponding `AppConfig` field loaded from `superchat.toml`/env, so a
/// one-off run doesn't need a config file at all.
#[derive(Parser, Debug)]
#[command(name = "superchat-server", version, about = "SuperChat chat and forum server")]
struct Cli {
    #[arg(long)]
    tcp_bind: Option<String>,
    #[arg(long)]
    ssh_bind: Option<String>,
    #[arg(long)]
    ws_bind: Option<String>,
    #[arg(long)]
    db_path: Option<String>,
    #[arg(long)]
    snapshot_interval_secs: Option<u64>,
    #[arg(long)]
    worker_id: Option<u16>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(v) = self.tcp_bind {
            config.server.tcp_bind = v;
        }
        if let Some(v) = self.ssh_bind {
            config.server.ssh_bind = v;
        }
        if let Some(v) = self.ws_bind {
            config.server.ws_bind = v;
        }
        if let Some(v) = self.db_path {
            config.database.path = v;
        }
        if let Some(v) = self.snapshot_interval_secs {
            config.database.snapshot_interval_secs = v;
        }
        if let Some(v) = self.worker_id {
            config.server.worker_id = v;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load()?;
    cli.apply(&mut config);
    init_logging(&config);

    let runtime = tokio::runtime::Runtime::new()?;
    match runtime.block_on(run(config)) {
        Ok(()) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "fatal error during startup");
            std::process::exit(1);
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    match config.logging.format.as_str() {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting superchat-server");

    let db = Arc::new(Db::open(&config.database.path, config.database.read_pool_max_connections, config.database.read_pool_max_idle).await?);
    tracing::info!(path = %config.database.path, "database opened, migrations applied");

    let mem = Arc::new(MemoryStore::load_from(&db).await?);
    tracing::info!(channels = mem.list_channels().len(), "in-memory store rebuilt from disk");

    let sessions = Arc::new(SessionRegistry::new());
    let subscriptions = Arc::new(SubscriptionManager::new(config.limits.max_thread_subscriptions as usize, config.limits.max_channel_subscriptions as usize));
    let rate_limiter = Arc::new(RateLimiter::new(config.limits.max_message_rate_per_min, config.limits.max_connections_per_ip));
    let ids = Arc::new(SnowflakeGenerator::new(config.server.worker_id));

    let server_config = superchat_server::wire::message::ServerConfigMessage {
        protocol_version: PROTOCOL_VERSION,
        max_message_rate: config.limits.max_message_rate_per_min,
        max_channel_creates: config.limits.max_channel_creates_per_day,
        inactive_cleanup_days: config.limits.inactive_cleanup_days,
        max_connections_per_ip: config.limits.max_connections_per_ip,
        max_message_length: config.limits.max_message_length,
        max_thread_subscriptions: config.limits.max_thread_subscriptions,
        max_channel_subscriptions: config.limits.max_channel_subscriptions,
        directory_enabled: config.limits.directory_enabled,
    };

    let dispatcher = Arc::new(Dispatcher {
        db: db.clone(),
        mem: mem.clone(),
        sessions: sessions.clone(),
        subscriptions: subscriptions.clone(),
        rate_limiter: rate_limiter.clone(),
        ids,
        protocol_version: PROTOCOL_VERSION,
        server_config,
    });

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(run_tcp(dispatcher.clone(), config.server.tcp_bind.clone()));
    tasks.spawn(run_ws(dispatcher.clone(), config.server.ws_bind.clone()));
    tasks.spawn(run_ssh(dispatcher.clone(), config.server.ssh_bind.clone(), config.ssh.host_key_path.clone()));
    tokio::spawn(run_snapshot_loop(db.clone(), mem.clone(), config.database.snapshot_interval_secs));
    tokio::spawn(run_idle_sweeper(dispatcher.clone(), config.server.idle_timeout_secs));

    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
        Some(result) = tasks.join_next() => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "a transport task exited with an error");
            }
        }
    }

    final_snapshot(&db, &mem).await;
    tracing::info!("superchat-server stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn run_tcp(dispatcher: Arc<Dispatcher>, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(%bind, "tcp transport listening");
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        if dispatcher.rate_limiter.try_accept_connection(remote_addr.ip()).is_err() {
            tracing::debug!(%remote_addr, "rejecting tcp connection, ip at connection cap");
            continue;
        }
        tokio::spawn(async move {
            let _ = stream.set_nodelay(true);
            let (read_half, write_half) = stream.into_split();
            let conn = Arc::new(connection::Connection::new(0, remote_addr, Box::new(write_half)));
            transport::serve_stream(dispatcher.clone(), ConnectionType::Tcp, remote_addr.ip(), read_half, conn).await;
            dispatcher.rate_limiter.release_connection(remote_addr.ip());
        });
    }
}

async fn run_ws(dispatcher: Arc<Dispatcher>, bind: String) -> Result<()> {
    let addr: SocketAddr = bind.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "websocket transport listening");
    let app = api::ws_router(dispatcher);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

async fn run_ssh(dispatcher: Arc<Dispatcher>, bind: String, host_key_path: String) -> Result<()> {
    api::SshTransport::new(dispatcher).serve(&bind, &host_key_path).await
}

/// Spec §4.5 steps (a)-(f): snapshot dirty messages to disk, then hard-delete
/// rows past the 7-day soft-delete retention window.
async fn run_snapshot_loop(db: Arc<Db>, mem: Arc<MemoryStore>, interval_secs: u64) {
    const RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1000;
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        snapshot_once(&db, &mem, RETENTION_MS).await;
    }
}

async fn snapshot_once(db: &Db, mem: &MemoryStore, retention_ms: i64) {
    let now = superchat_server::models::now_ms();
    let cutoff = now - retention_ms;

    let candidates = mem.snapshot_candidates(cutoff);
    if !candidates.is_empty() {
        // Ascending id order equals topological order (Snowflake ids are
        // monotonic, so `parent_id < id` always) — this lets the batch
        // insert skip recursive parent resolution without tripping the
        // foreign-key constraint on `parent_id` (spec §4.5 step c).
        let mut rows: Vec<_> = candidates.iter().map(|m| m.to_row()).collect();
        rows.sort_by_key(|r| r.id);
        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut writer = db.writer.lock().await;
        match db::messages::batch_upsert(&mut writer, &rows).await {
            Ok(()) => {
                drop(writer);
                mem.clear_dirty(&ids);
                tracing::debug!(count = ids.len(), "snapshot flush complete");
            }
            Err(e) => tracing::error!(error = %e, "snapshot flush failed, dirty set left intact"),
        }
    }

    let expired = mem.hard_delete_expired(cutoff);
    if !expired.is_empty() {
        tracing::debug!(count = expired.len(), "hard-deleted messages past retention");
    }

    let mut writer = db.writer.lock().await;
    if let Err(e) = db::messages::cleanup_expired(&mut writer, now).await {
        tracing::warn!(error = %e, "persistent retention cleanup failed");
    }
    if let Err(e) = db::servers::cleanup_stale(&mut writer, now).await {
        tracing::warn!(error = %e, "stale discovered-server cleanup failed");
    }
}

/// Background sweeper (spec §5): closes any connection whose session has
/// been idle past the configured bound, reusing `transport::teardown` so
/// deregistration, subscription/rate-limiter cleanup, and the server-wide
/// `ServerPresence(online=false)` broadcast all happen exactly as they
/// would for a client-initiated disconnect.
async fn run_idle_sweeper(dispatcher: Arc<Dispatcher>, idle_timeout_secs: u64) {
    let check_interval = Duration::from_secs(idle_timeout_secs.max(1) / 2 + 1);
    let mut interval = tokio::time::interval(check_interval);
    loop {
        interval.tick().await;
        let cutoff = superchat_server::models::now_ms() - (idle_timeout_secs as i64 * 1000);
        for session_id in dispatcher.sessions.idle_since(cutoff) {
            if let Some(conn) = dispatcher.sessions.connection(session_id) {
                tracing::debug!(session_id, "closing idle session");
                transport::teardown(&dispatcher, session_id, &conn).await;
            }
        }
    }
}

async fn final_snapshot(db: &Db, mem: &MemoryStore) {
    tracing::info!(dirty = mem.dirty_count(), "flushing final snapshot before shutdown");
    snapshot_once(db, mem, 7 * 24 * 60 * 60 * 1000).await;
}
