//! Floor membership and fan-out.
//!
//! All membership state lives in a single [`FloorRegistry`] task. Every join, leave and
//! broadcast is a [`Command`] processed one at a time, so a broadcast never observes a floor
//! mid-update and a session can only ever be on one floor.
//!
//! Call and spawn [`FloorRegistry::run`] to start processing commands, then talk to it through
//! cloned [`FloorRegistryHandle`]s.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use storymode_models::{FloorId, PlayerSummary, Position, outbound::OutboundPayload};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{ConnId, Msg};

/// A session's presence on a floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorMember {
    pub conn: ConnId,
    pub player: PlayerSummary,
    /// Date of the dungeon the player last died in.
    pub died_on: Option<NaiveDate>,
}

impl FloorMember {
    #[must_use]
    pub fn is_dead_on(&self, date: NaiveDate) -> bool {
        self.died_on == Some(date)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberUpdate {
    Moved(Position),
    Died(NaiveDate),
}

/// A command received by the [`FloorRegistry`].
#[derive(Debug)]
enum Command {
    Register {
        conn: ConnId,
        conn_tx: mpsc::UnboundedSender<Msg>,
        res_tx: oneshot::Sender<()>,
    },

    Deregister {
        conn: ConnId,
        res_tx: oneshot::Sender<Option<FloorId>>,
    },

    Join {
        floor: FloorId,
        member: FloorMember,
        res_tx: oneshot::Sender<Vec<FloorMember>>,
    },

    Leave {
        floor: FloorId,
        conn: ConnId,
        res_tx: oneshot::Sender<bool>,
    },

    Update {
        conn: ConnId,
        update: MemberUpdate,
        res_tx: oneshot::Sender<bool>,
    },

    Broadcast {
        floor: FloorId,
        msg: Msg,
        exclude: Vec<ConnId>,
        res_tx: oneshot::Sender<usize>,
    },

    Unicast {
        conn: ConnId,
        msg: Msg,
        res_tx: oneshot::Sender<bool>,
    },

    Members {
        floor: FloorId,
        res_tx: oneshot::Sender<Vec<FloorMember>>,
    },
}

#[derive(Debug, Error)]
pub enum FloorRegistryError {
    #[error("Floor registry is not running")]
    Closed,
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Owner of every floor's membership set and of each connection's outbound sender.
#[derive(Debug)]
pub struct FloorRegistry {
    /// Map of connection IDs to their outbound message senders.
    sessions: HashMap<ConnId, mpsc::UnboundedSender<Msg>>,

    /// Map of floor to the members currently on it.
    floors: BTreeMap<FloorId, HashMap<ConnId, FloorMember>>,

    /// Reverse index of `floors`.
    locations: HashMap<ConnId, FloorId>,

    cmd_rx: flume::Receiver<Command>,
}

impl FloorRegistry {
    #[must_use]
    pub fn new() -> (Self, FloorRegistryHandle) {
        let (cmd_tx, cmd_rx) = flume::unbounded();

        (
            Self {
                sessions: HashMap::new(),
                floors: BTreeMap::new(),
                locations: HashMap::new(),
                cmd_rx,
            },
            FloorRegistryHandle { cmd_tx },
        )
    }

    /// Send `msg` directly to one connection.
    ///
    /// Returns whether the message was queued for delivery.
    fn deliver(&self, conn: ConnId, msg: &Msg) -> bool {
        let Some(session) = self.sessions.get(&conn) else {
            log::debug!("No outbound sender for connection {conn}");
            return false;
        };

        // errors if the connection's writer is gone and it hasn't deregistered yet
        if session.send(msg.clone()).is_err() {
            log::debug!("Connection {conn} is closed, dropping message");
            return false;
        }

        true
    }

    fn broadcast(&self, floor: FloorId, msg: &Msg, exclude: &[ConnId]) -> usize {
        let Some(members) = self.floors.get(&floor) else {
            return 0;
        };

        log::trace!(
            "Broadcasting to floor {floor} ({} members) except {exclude:?}",
            members.len()
        );

        members
            .keys()
            .filter(|conn| !exclude.contains(conn))
            .filter(|conn| self.deliver(**conn, msg))
            .count()
    }

    fn remove_member(&mut self, floor: FloorId, conn: ConnId) -> bool {
        let Some(members) = self.floors.get_mut(&floor) else {
            return false;
        };

        let removed = members.remove(&conn).is_some();

        if members.is_empty() {
            self.floors.remove(&floor);
        }
        if removed {
            self.locations.remove(&conn);
        }

        removed
    }

    /// Join `floor`, leaving whichever floor the member was on before.
    ///
    /// Returns the other members already on `floor`.
    fn join(&mut self, floor: FloorId, member: FloorMember) -> Vec<FloorMember> {
        let conn = member.conn;

        if let Some(previous) = self.locations.get(&conn).copied() {
            if previous != floor {
                log::debug!("Moving connection {conn} from floor {previous} to floor {floor}");
                self.remove_member(previous, conn);
            }
        }

        let members = self.floors.entry(floor).or_default();
        members.insert(conn, member);
        self.locations.insert(conn, floor);

        members
            .values()
            .filter(|other| other.conn != conn)
            .cloned()
            .collect()
    }

    fn update(&mut self, conn: ConnId, update: MemberUpdate) -> bool {
        let member = self
            .locations
            .get(&conn)
            .and_then(|floor| self.floors.get_mut(floor))
            .and_then(|members| members.get_mut(&conn));

        let Some(member) = member else {
            return false;
        };

        match update {
            MemberUpdate::Moved(position) => member.player.set_position(position),
            MemberUpdate::Died(date) => member.died_on = Some(date),
        }

        true
    }

    fn deregister(&mut self, conn: ConnId) -> Option<FloorId> {
        if self.sessions.remove(&conn).is_none() {
            log::debug!("Connection {conn} was already deregistered");
        }

        let floor = self.locations.get(&conn).copied()?;
        self.remove_member(floor, conn);

        Some(floor)
    }

    fn process_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register {
                conn,
                conn_tx,
                res_tx,
            } => {
                log::debug!("Registering connection {conn}");
                self.sessions.insert(conn, conn_tx);
                let _ = res_tx.send(());
            }

            Command::Deregister { conn, res_tx } => {
                log::debug!("Deregistering connection {conn}");
                let _ = res_tx.send(self.deregister(conn));
            }

            Command::Join {
                floor,
                member,
                res_tx,
            } => {
                let _ = res_tx.send(self.join(floor, member));
            }

            Command::Leave {
                floor,
                conn,
                res_tx,
            } => {
                let _ = res_tx.send(self.remove_member(floor, conn));
            }

            Command::Update {
                conn,
                update,
                res_tx,
            } => {
                let _ = res_tx.send(self.update(conn, update));
            }

            Command::Broadcast {
                floor,
                msg,
                exclude,
                res_tx,
            } => {
                let _ = res_tx.send(self.broadcast(floor, &msg, &exclude));
            }

            Command::Unicast { conn, msg, res_tx } => {
                let _ = res_tx.send(self.deliver(conn, &msg));
            }

            Command::Members { floor, res_tx } => {
                let members = self
                    .floors
                    .get(&floor)
                    .map(|members| members.values().cloned().collect())
                    .unwrap_or_default();
                let _ = res_tx.send(members);
            }
        }
    }

    /// Processes commands until `token` is cancelled or every handle is dropped.
    pub async fn run(mut self, token: CancellationToken) {
        loop {
            let cmd = tokio::select! {
                () = token.cancelled() => {
                    log::debug!("Floor registry was cancelled");
                    break;
                }
                cmd = self.cmd_rx.recv_async() => match cmd {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            self.process_command(cmd);
        }

        log::debug!(
            "Stopped floor registry with {} registered connections",
            self.sessions.len()
        );
    }
}

/// Handle and command sender for the floor registry.
#[derive(Debug, Clone)]
pub struct FloorRegistryHandle {
    cmd_tx: flume::Sender<Command>,
}

impl FloorRegistryHandle {
    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, FloorRegistryError> {
        let (res_tx, res_rx) = oneshot::channel();

        self.cmd_tx
            .send_async(cmd(res_tx))
            .await
            .map_err(|_| FloorRegistryError::Closed)?;

        res_rx.await.map_err(|_| FloorRegistryError::Closed)
    }

    /// Register the outbound sender of a new connection.
    ///
    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn register(
        &self,
        conn: ConnId,
        conn_tx: mpsc::UnboundedSender<Msg>,
    ) -> Result<(), FloorRegistryError> {
        self.request(|res_tx| Command::Register {
            conn,
            conn_tx,
            res_tx,
        })
        .await
    }

    /// Forget a connection entirely, removing it from its floor.
    ///
    /// Returns the floor it was on. Deregistering twice is harmless.
    ///
    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn deregister(&self, conn: ConnId) -> Result<Option<FloorId>, FloorRegistryError> {
        self.request(|res_tx| Command::Deregister { conn, res_tx })
            .await
    }

    /// Add `member` to `floor`. A member already on another floor is moved.
    ///
    /// Returns the other members on `floor` at the moment of joining.
    ///
    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn join(
        &self,
        floor: FloorId,
        member: FloorMember,
    ) -> Result<Vec<FloorMember>, FloorRegistryError> {
        self.request(|res_tx| Command::Join {
            floor,
            member,
            res_tx,
        })
        .await
    }

    /// Returns whether the connection was on `floor`.
    ///
    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn leave(&self, floor: FloorId, conn: ConnId) -> Result<bool, FloorRegistryError> {
        self.request(|res_tx| Command::Leave {
            floor,
            conn,
            res_tx,
        })
        .await
    }

    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn update(
        &self,
        conn: ConnId,
        update: MemberUpdate,
    ) -> Result<bool, FloorRegistryError> {
        self.request(|res_tx| Command::Update {
            conn,
            update,
            res_tx,
        })
        .await
    }

    /// Serialize `payload` once and send it to every member of `floor` not in `exclude`.
    ///
    /// Returns how many members it was delivered to. Members whose connection is closed are
    /// skipped.
    ///
    /// # Errors
    ///
    /// * If the payload fails to serialize
    /// * If the registry has stopped
    pub async fn broadcast(
        &self,
        floor: FloorId,
        payload: &OutboundPayload,
        exclude: &[ConnId],
    ) -> Result<usize, FloorRegistryError> {
        let msg = payload.to_frame()?;
        let exclude = exclude.to_vec();

        self.request(|res_tx| Command::Broadcast {
            floor,
            msg,
            exclude,
            res_tx,
        })
        .await
    }

    /// # Errors
    ///
    /// * If the payload fails to serialize
    /// * If the registry has stopped
    pub async fn unicast(
        &self,
        conn: ConnId,
        payload: &OutboundPayload,
    ) -> Result<bool, FloorRegistryError> {
        let msg = payload.to_frame()?;

        self.request(|res_tx| Command::Unicast { conn, msg, res_tx })
            .await
    }

    /// # Errors
    ///
    /// * If the registry has stopped
    pub async fn members(&self, floor: FloorId) -> Result<Vec<FloorMember>, FloorRegistryError> {
        self.request(|res_tx| Command::Members { floor, res_tx })
            .await
    }
}
