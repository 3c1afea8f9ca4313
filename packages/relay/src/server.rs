use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::{NaiveDate, Utc};
use storymode_daily::{DailyDungeon, duration_until_next_reset};
use storymode_ledger::{DeathLedger, LedgerError, MemoryDeathLedger};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpSocket},
    sync::watch,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{Config, ConfigError},
    connection::{ConnectionContext, ConnectionManager, ConnectionSet},
    dispatch::Dispatcher,
    floor::FloorRegistry,
};

const LISTEN_BACKLOG: u32 = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("No address found for {0}")]
    Resolve(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Opens the ledger selected by `config`.
///
/// # Errors
///
/// * If the `SQLite` database fails to open
pub fn open_ledger(config: &Config) -> Result<Arc<dyn DeathLedger>, ServerError> {
    match &config.database_path {
        #[cfg(feature = "sqlite")]
        Some(path) => Ok(Arc::new(storymode_ledger::SqliteDeathLedger::open(path)?)),
        #[cfg(not(feature = "sqlite"))]
        Some(path) => {
            log::warn!(
                "DATABASE_PATH is {} but sqlite support is disabled, keeping tombstones in memory",
                path.display()
            );
            Ok(Arc::new(MemoryDeathLedger::new()))
        }
        None => {
            log::info!("No DATABASE_PATH set, keeping tombstones in memory");
            Ok(Arc::new(MemoryDeathLedger::new()))
        }
    }
}

/// Relay server: owns the listening socket and composes the connection manager, floor registry
/// and dispatcher.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ledger: Arc<dyn DeathLedger>,
    connections: ConnectionSet,
    max_frame_length: usize,
    write_timeout: Duration,
    token: CancellationToken,
}

/// Handle used to stop a running [`Server`] and inspect its connections.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    token: CancellationToken,
    connections: ConnectionSet,
}

impl ServerHandle {
    /// Stops accepting, closes every connection and stops the server's background tasks.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

impl Server {
    /// Binds the listening socket. This is the only fatal startup step.
    ///
    /// # Errors
    ///
    /// * If the bind address fails to resolve
    /// * If the socket fails to bind or listen
    pub async fn bind(config: &Config, ledger: Arc<dyn DeathLedger>) -> Result<Self, ServerError> {
        let addr = format!("{}:{}", config.bind_addr, config.port);
        let bind_error = |source| ServerError::Bind {
            addr: addr.clone(),
            source,
        };

        let resolved = tokio::net::lookup_host(addr.as_str())
            .await
            .map_err(bind_error)?
            .next()
            .ok_or_else(|| ServerError::Resolve(addr.clone()))?;

        let socket = if resolved.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_error)?;

        socket.set_reuseaddr(true).map_err(bind_error)?;
        // accepted streams inherit keep-alive from the listening socket
        socket.set_keepalive(true).map_err(bind_error)?;
        socket.bind(resolved).map_err(bind_error)?;

        let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
        let local_addr = listener.local_addr()?;

        log::info!("Listening on {local_addr}");

        Ok(Self {
            listener,
            local_addr,
            ledger,
            connections: ConnectionSet::default(),
            max_frame_length: config.max_frame_length,
            write_timeout: config.write_timeout,
            token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            token: self.token.clone(),
            connections: self.connections.clone(),
        }
    }

    /// Serves connections until [`ServerHandle::shutdown`] is called.
    ///
    /// Shutdown stops the accept loop first, then waits for every connection to deregister,
    /// then stops the daily rollover and finally the floor registry.
    ///
    /// # Errors
    ///
    /// * If a background task panicked
    pub async fn run(self) -> Result<(), ServerError> {
        let (registry, floors) = FloorRegistry::new();
        let registry_token = CancellationToken::new();
        let registry_task = tokio::spawn(registry.run(registry_token.clone()));

        let dungeon = DailyDungeon::today();
        log::info!(
            "Daily dungeon for {}: {} difficulty {}",
            dungeon.date,
            dungeon.dungeon_type,
            dungeon.difficulty
        );
        prune_ledger(self.ledger.as_ref(), dungeon.date).await;
        let (daily_tx, daily_rx) = watch::channel(dungeon);

        let rollover_token = CancellationToken::new();
        let rollover_task = tokio::spawn(rollover(
            daily_tx,
            self.ledger.clone(),
            rollover_token.clone(),
        ));

        let manager = ConnectionManager::new(
            ConnectionContext {
                dispatcher: Dispatcher::new(floors.clone(), self.ledger, daily_rx),
                floors,
                connections: self.connections,
                max_frame_length: self.max_frame_length,
                write_timeout: self.write_timeout,
            },
            self.token,
        );

        manager.run(self.listener).await;

        log::info!(
            "Shutting down {} connections",
            manager.connections().read().await.len()
        );
        manager.shutdown().await;

        rollover_token.cancel();
        rollover_task.await?;

        registry_token.cancel();
        registry_task.await?;

        log::info!("Server stopped");

        Ok(())
    }
}

/// Waits for each UTC midnight and rolls the daily dungeon over.
async fn rollover(
    daily_tx: watch::Sender<DailyDungeon>,
    ledger: Arc<dyn DeathLedger>,
    token: CancellationToken,
) {
    loop {
        let wait = duration_until_next_reset(Utc::now());
        log::debug!("Next daily reset in {wait:?}");

        tokio::select! {
            () = token.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        if daily_tx.borrow().is_current(Utc::now()) {
            continue;
        }

        reset_daily(&daily_tx, DailyDungeon::today(), ledger.as_ref()).await;
    }

    log::debug!("Daily rollover stopped");
}

/// Publishes `dungeon` to every connection, then forgets deaths from before it.
///
/// Deaths are tagged with their dungeon date, so anything recorded under the old date after
/// the switch is never served and is pruned by the next rollover or restart.
///
/// Returns how many ledger records were removed.
async fn reset_daily(
    daily_tx: &watch::Sender<DailyDungeon>,
    dungeon: DailyDungeon,
    ledger: &dyn DeathLedger,
) -> usize {
    log::info!(
        "Rolling over to the {} dungeon: {} difficulty {}",
        dungeon.date,
        dungeon.dungeon_type,
        dungeon.difficulty
    );

    let date = dungeon.date;
    daily_tx.send_replace(dungeon);

    prune_ledger(ledger, date).await
}

/// Removes ledger records from dungeons before `date`, logging failures.
async fn prune_ledger(ledger: &dyn DeathLedger, date: NaiveDate) -> usize {
    match ledger.clear_before(date).await {
        Ok(removed) => {
            if removed > 0 {
                log::info!("Forgot {removed} tombstones from before {date}");
            }
            removed
        }
        Err(e) => {
            log::error!("Failed to clear tombstones from before {date}: {e:?}");
            0
        }
    }
}
