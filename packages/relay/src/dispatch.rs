//! Routing of decoded client frames to their handlers.

use std::sync::Arc;

use chrono::NaiveDate;
use rand::seq::SliceRandom as _;
use storymode_daily::DailyDungeon;
use storymode_ledger::{DeathLedger, DeathRecord};
use storymode_models::{
    PlayerKey,
    inbound::{
        ConnectPayload, DeadPayload, DecodeError, FloorPayload, InboundPayload, MovementPayload,
    },
    outbound::{FloorSnapshot, MovementUpdate, OutboundPayload},
};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    floor::{FloorMember, FloorRegistryError, FloorRegistryHandle, MemberUpdate},
    session::PlayerSession,
};

/// Most tombstones sent in one `floor` reply.
pub const MAX_FLOOR_TOMBSTONES: usize = 8;

/// Most live players sent in one `floor` reply.
pub const MAX_FLOOR_PLAYERS: usize = 32;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    FloorRegistry(#[from] FloorRegistryError),
}

/// Applies client events to a [`PlayerSession`] and fans the results out through the floor
/// registry.
///
/// Deaths are scoped to the daily dungeon current at the time of each event, so a rollover
/// needs no per-session or per-member reset.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    floors: FloorRegistryHandle,
    ledger: Arc<dyn DeathLedger>,
    daily: watch::Receiver<DailyDungeon>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        floors: FloorRegistryHandle,
        ledger: Arc<dyn DeathLedger>,
        daily: watch::Receiver<DailyDungeon>,
    ) -> Self {
        Self {
            floors,
            ledger,
            daily,
        }
    }

    fn today(&self) -> NaiveDate {
        self.daily.borrow().date
    }

    /// Decodes one frame and dispatches it.
    ///
    /// # Errors
    ///
    /// * If the frame is malformed
    /// * If the floor registry has stopped
    pub async fn handle_frame(
        &self,
        session: &mut PlayerSession,
        frame: &str,
    ) -> Result<(), DispatchError> {
        let payload = InboundPayload::from_frame(frame)?;
        self.dispatch(session, payload).await
    }

    /// # Errors
    ///
    /// * If the floor registry has stopped
    /// * If an outbound payload fails to serialize
    pub async fn dispatch(
        &self,
        session: &mut PlayerSession,
        payload: InboundPayload,
    ) -> Result<(), DispatchError> {
        match payload {
            InboundPayload::Unknown => {
                log::debug!(
                    "Ignoring unknown message type from connection {}",
                    session.conn_id()
                );
                Ok(())
            }
            InboundPayload::Connect(payload) => {
                Self::on_connect(session, payload);
                Ok(())
            }
            payload if !session.is_loaded() => {
                log::trace!(
                    "Ignoring '{payload}' from connection {} before it connected",
                    session.conn_id()
                );
                Ok(())
            }
            InboundPayload::Floor(payload) => self.on_floor(session, payload).await,
            InboundPayload::Movement(payload) => self.on_movement(session, payload).await,
            InboundPayload::Dead(payload) => self.on_dead(session, payload).await,
        }
    }

    fn on_connect(session: &mut PlayerSession, payload: ConnectPayload) {
        if !session.load(payload.into()) {
            log::debug!(
                "Connection {} announced itself again, ignoring",
                session.conn_id()
            );
            return;
        }

        log::info!(
            "Connection {} loaded as player {} ({:?})",
            session.conn_id(),
            session.id(),
            session.identity().map(|identity| identity.name.as_str())
        );
    }

    async fn on_floor(
        &self,
        session: &mut PlayerSession,
        payload: FloorPayload,
    ) -> Result<(), DispatchError> {
        let conn = session.conn_id();
        let id = session.id();
        let today = self.today();

        if let Some(previous) = session.take_floor() {
            self.floors.leave(previous, conn).await?;
            self.floors
                .broadcast(previous, &OutboundPayload::disconnect(id), &[conn])
                .await?;
        }

        session.enter_floor(payload.floor, payload.position());

        let (Some(member), Some(summary)) = (session.member(), session.summary()) else {
            return Ok(());
        };

        log::debug!("Player {id} joined floor {}", payload.floor);

        let others = self.floors.join(payload.floor, member).await?;
        self.floors
            .broadcast(payload.floor, &OutboundPayload::Connect(summary), &[conn])
            .await?;

        let records = match self.ledger.tombstones(today, payload.floor).await {
            Ok(records) => records,
            Err(e) => {
                log::error!("Failed to read tombstones for floor {}: {e:?}", payload.floor);
                vec![]
            }
        };

        let snapshot = floor_snapshot(session.key(), today, records, others);
        self.floors
            .unicast(conn, &OutboundPayload::Floor(snapshot))
            .await?;

        Ok(())
    }

    async fn on_movement(
        &self,
        session: &mut PlayerSession,
        payload: MovementPayload,
    ) -> Result<(), DispatchError> {
        let position = payload.position();
        session.set_position(position);

        let Some(floor) = session.floor() else {
            log::trace!("Player {} moved without a floor", session.id());
            return Ok(());
        };

        let conn = session.conn_id();
        self.floors
            .update(conn, MemberUpdate::Moved(position))
            .await?;
        self.floors
            .broadcast(
                floor,
                &OutboundPayload::Movement(MovementUpdate::new(session.id(), position)),
                &[conn],
            )
            .await?;

        Ok(())
    }

    async fn on_dead(
        &self,
        session: &mut PlayerSession,
        payload: DeadPayload,
    ) -> Result<(), DispatchError> {
        let today = self.today();
        session.mark_dead(today);

        let Some(tombstone) = session.tombstone(payload.dead_to) else {
            log::warn!(
                "Player {} died without a floor, nothing recorded",
                session.id()
            );
            return Ok(());
        };

        let conn = session.conn_id();
        let floor = tombstone.floor;

        log::info!(
            "Player {} died to {} on floor {floor}",
            tombstone.id,
            tombstone.dead_to
        );

        self.floors.update(conn, MemberUpdate::Died(today)).await?;

        let record = DeathRecord {
            key: session.key(),
            date: today,
            tombstone: tombstone.clone(),
        };
        if let Err(e) = self.ledger.upsert(record).await {
            log::error!("Failed to record tombstone for player {}: {e:?}", tombstone.id);
        }

        self.floors
            .broadcast(floor, &OutboundPayload::Dead(tombstone), &[conn])
            .await?;

        Ok(())
    }

    /// Removes the session from the registry, telling its floor-mates it left unless it died in
    /// today's dungeon.
    ///
    /// # Errors
    ///
    /// * If the floor registry has stopped
    pub async fn on_disconnect(&self, session: &mut PlayerSession) -> Result<(), DispatchError> {
        let conn = session.conn_id();
        let floor = self.floors.deregister(conn).await?;
        session.take_floor();

        let Some(floor) = floor else {
            return Ok(());
        };

        if !session.is_loaded() || session.is_dead_on(self.today()) {
            log::debug!("Not announcing departure of connection {conn} from floor {floor}");
            return Ok(());
        }

        self.floors
            .broadcast(floor, &OutboundPayload::disconnect(session.id()), &[conn])
            .await?;

        Ok(())
    }
}

/// Builds the reply to a player joining a floor, leaving out its own tombstone and players who
/// died `today`.
fn floor_snapshot(
    own_key: PlayerKey,
    today: NaiveDate,
    records: Vec<DeathRecord>,
    others: Vec<FloorMember>,
) -> FloorSnapshot {
    let dead = records
        .into_iter()
        .filter(|record| record.key != own_key)
        .map(|record| record.tombstone)
        .collect();
    let players = others
        .into_iter()
        .filter(|member| !member.is_dead_on(today))
        .map(|member| member.player)
        .collect();

    FloorSnapshot {
        dead: sample(dead, MAX_FLOOR_TOMBSTONES),
        players: sample(players, MAX_FLOOR_PLAYERS),
    }
}

fn sample<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() > limit {
        items.shuffle(&mut rand::rng());
        items.truncate(limit);
    }
    items
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rand::{SeedableRng as _, rngs::StdRng};
    use serde_json::{Value, json};
    use storymode_ledger::{LedgerError, MemoryDeathLedger};
    use storymode_models::{FloorId, PlayerId, PlayerSummary, Tombstone};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{ConnId, Msg, floor::FloorRegistry};

    struct FailingLedger;

    #[async_trait]
    impl DeathLedger for FailingLedger {
        async fn tombstones(
            &self,
            _date: NaiveDate,
            _floor: FloorId,
        ) -> Result<Vec<DeathRecord>, LedgerError> {
            Err(LedgerError::Poisoned)
        }

        async fn upsert(&self, _record: DeathRecord) -> Result<(), LedgerError> {
            Err(LedgerError::Poisoned)
        }

        async fn clear_before(&self, _date: NaiveDate) -> Result<usize, LedgerError> {
            Err(LedgerError::Poisoned)
        }
    }

    fn day(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
    }

    fn dungeon(date: NaiveDate) -> DailyDungeon {
        DailyDungeon::generate(date, &mut StdRng::seed_from_u64(7))
    }

    struct Harness {
        dispatcher: Dispatcher,
        ledger: Arc<dyn DeathLedger>,
        daily_tx: watch::Sender<DailyDungeon>,
        _token: CancellationToken,
    }

    struct Client {
        session: PlayerSession,
        rx: mpsc::UnboundedReceiver<Msg>,
    }

    impl Client {
        fn received(&mut self) -> Vec<Value> {
            std::iter::from_fn(|| self.rx.try_recv().ok())
                .map(|msg| serde_json::from_str(&msg).unwrap())
                .collect()
        }
    }

    impl Harness {
        fn new(ledger: Arc<dyn DeathLedger>) -> Self {
            let (registry, floors) = FloorRegistry::new();
            let token = CancellationToken::new();
            tokio::spawn(registry.run(token.clone()));
            let (daily_tx, daily_rx) = watch::channel(dungeon(day(16)));

            Self {
                dispatcher: Dispatcher::new(floors, ledger.clone(), daily_rx),
                ledger,
                daily_tx,
                _token: token,
            }
        }

        fn today(&self) -> NaiveDate {
            self.daily_tx.borrow().date
        }

        async fn tombstones(&self, floor: FloorId) -> Vec<Tombstone> {
            let mut tombstones = self
                .ledger
                .tombstones(self.today(), floor)
                .await
                .unwrap()
                .into_iter()
                .map(|record| record.tombstone)
                .collect::<Vec<_>>();
            tombstones.sort_by(|a, b| a.dead_to.cmp(&b.dead_to));
            tombstones
        }

        fn with_memory_ledger() -> Self {
            Self::new(Arc::new(MemoryDeathLedger::new()))
        }

        async fn client(&self, conn: ConnId) -> Client {
            let (tx, rx) = mpsc::unbounded_channel();
            self.dispatcher.floors.register(conn, tx).await.unwrap();

            Client {
                session: PlayerSession::new(conn),
                rx,
            }
        }

        async fn send(&self, client: &mut Client, frame: Value) {
            self.dispatcher
                .handle_frame(&mut client.session, &frame.to_string())
                .await
                .unwrap();
        }

        async fn joined(&self, conn: ConnId, id: i64, name: &str, floor: FloorId) -> Client {
            let mut client = self.client(conn).await;
            self.send(
                &mut client,
                json!({"type": "connect", "appearance": "male", "id": id, "name": name}),
            )
            .await;
            self.send(&mut client, json!({"type": "floor", "floor": floor, "x": 0, "y": 0}))
                .await;
            client.received();
            client
        }
    }

    #[test_log::test(tokio::test)]
    async fn events_before_connect_are_ignored() {
        let harness = Harness::with_memory_ledger();
        let mut watcher = harness.joined(1, 1, "Watcher", 3).await;
        let mut client = harness.client(2).await;

        harness
            .send(&mut client, json!({"type": "floor", "floor": 3, "x": 1, "y": 1}))
            .await;
        harness
            .send(&mut client, json!({"type": "movement", "x": 2, "y": 2}))
            .await;
        harness
            .send(&mut client, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        assert!(!client.session.is_loaded());
        assert_eq!(client.session.floor(), None);
        assert!(!client.session.is_dead_on(harness.today()));
        assert!(client.received().is_empty());
        assert!(watcher.received().is_empty());
        assert!(harness.tombstones(3).await.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn second_floor_join_sees_first_player() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.client(1).await;
        let mut b = harness.client(2).await;

        harness
            .send(&mut a, json!({"type": "connect", "appearance": "male", "id": 7, "name": "Rin"}))
            .await;
        harness
            .send(&mut a, json!({"type": "floor", "floor": 3, "x": 1, "y": 2}))
            .await;
        assert_eq!(
            a.received(),
            vec![json!({"type": "floor", "dead": [], "players": []})]
        );

        harness
            .send(&mut b, json!({"type": "connect", "appearance": "female", "name": "Mog"}))
            .await;
        harness
            .send(&mut b, json!({"type": "floor", "floor": 3, "x": 5, "y": 5}))
            .await;

        assert_eq!(
            a.received(),
            vec![json!({"type": "connect", "id": 2, "name": "Mog", "appearance": "female", "x": 5, "y": 5})]
        );
        assert_eq!(
            b.received(),
            vec![json!({
                "type": "floor",
                "dead": [],
                "players": [{"id": 7, "name": "Rin", "appearance": "male", "x": 1, "y": 2}],
            })]
        );
    }

    #[test_log::test(tokio::test)]
    async fn movement_reaches_floor_mates_only() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        let mut c = harness.joined(3, 9, "Ada", 4).await;
        a.received();

        harness
            .send(&mut a, json!({"type": "movement", "x": 4, "y": -1}))
            .await;

        assert!(a.received().is_empty());
        assert_eq!(
            b.received(),
            vec![json!({"type": "movement", "id": 7, "x": 4, "y": -1})]
        );
        assert!(c.received().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn changing_floors_announces_departure() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        let mut c = harness.joined(3, 9, "Ada", 4).await;
        a.received();

        harness
            .send(&mut a, json!({"type": "floor", "floor": 4, "x": 0, "y": 0}))
            .await;

        assert_eq!(b.received(), vec![json!({"type": "disconnect", "id": 7})]);
        assert_eq!(
            c.received(),
            vec![json!({"type": "connect", "id": 7, "name": "Rin", "appearance": "male", "x": 0, "y": 0})]
        );

        let reply = a.received();
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0]["players"][0]["id"], json!(9));
    }

    #[test_log::test(tokio::test)]
    async fn dying_twice_leaves_one_tombstone() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        a.received();

        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Slime"}))
            .await;
        harness
            .send(&mut a, json!({"type": "movement", "x": 6, "y": 6}))
            .await;
        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Goblin"}))
            .await;

        assert!(a.session.is_dead_on(harness.today()));
        assert_eq!(
            b.received(),
            vec![
                json!({"type": "dead", "id": 7, "name": "Rin", "dead_to": "Slime", "floor": 3, "x": 0, "y": 0}),
                json!({"type": "movement", "id": 7, "x": 6, "y": 6}),
                json!({"type": "dead", "id": 7, "name": "Rin", "dead_to": "Goblin", "floor": 3, "x": 6, "y": 6}),
            ]
        );
        assert_eq!(
            harness.tombstones(3).await,
            vec![Tombstone {
                id: 7,
                name: "Rin".into(),
                dead_to: "Goblin".into(),
                floor: 3,
                x: 6,
                y: 6,
            }]
        );
    }

    #[test_log::test(tokio::test)]
    async fn floor_reply_lists_tombstones_but_not_the_dead() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        let mut b = harness.client(2).await;
        harness
            .send(&mut b, json!({"type": "connect", "appearance": "female", "id": 8, "name": "Mog"}))
            .await;
        harness
            .send(&mut b, json!({"type": "floor", "floor": 3, "x": 0, "y": 0}))
            .await;

        assert_eq!(
            b.received(),
            vec![json!({
                "type": "floor",
                "dead": [{"id": 7, "name": "Rin", "dead_to": "Slime", "floor": 3, "x": 0, "y": 0}],
                "players": [],
            })]
        );

        a.received();
        harness
            .send(&mut a, json!({"type": "floor", "floor": 3, "x": 0, "y": 0}))
            .await;
        let reply = a.received();
        assert_eq!(reply[0]["dead"], json!([]));
    }

    #[test_log::test(tokio::test)]
    async fn ledger_failure_still_broadcasts_death() {
        let harness = Harness::new(Arc::new(FailingLedger));
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        a.received();

        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        let received = b.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], json!("dead"));
    }

    #[test_log::test(tokio::test)]
    async fn death_without_floor_records_nothing() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.client(1).await;
        harness
            .send(&mut a, json!({"type": "connect", "appearance": "male"}))
            .await;
        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        assert!(a.session.is_dead_on(harness.today()));
        assert!(a.received().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn disconnect_is_announced_once() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        a.received();

        harness
            .dispatcher
            .on_disconnect(&mut b.session)
            .await
            .unwrap();
        harness
            .dispatcher
            .on_disconnect(&mut b.session)
            .await
            .unwrap();

        assert_eq!(a.received(), vec![json!({"type": "disconnect", "id": 8})]);
    }

    #[test_log::test(tokio::test)]
    async fn dead_players_leave_silently() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        let mut b = harness.joined(2, 8, "Mog", 3).await;
        harness
            .send(&mut b, json!({"type": "dead", "dead_to": "Slime"}))
            .await;
        a.received();

        harness
            .dispatcher
            .on_disconnect(&mut b.session)
            .await
            .unwrap();

        assert!(a.received().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn guest_and_account_with_the_same_id_keep_both_tombstones() {
        let harness = Harness::with_memory_ledger();

        let mut guest = harness.client(1).await;
        harness
            .send(&mut guest, json!({"type": "connect", "appearance": "male", "name": "Rin"}))
            .await;
        harness
            .send(&mut guest, json!({"type": "floor", "floor": 3, "x": 2, "y": 2}))
            .await;
        harness
            .send(&mut guest, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        let mut account = harness.client(2).await;
        harness
            .send(&mut account, json!({"type": "connect", "appearance": "female", "id": 1, "name": "Mog"}))
            .await;
        harness
            .send(&mut account, json!({"type": "floor", "floor": 3, "x": 0, "y": 0}))
            .await;

        assert_eq!(guest.session.id(), account.session.id());
        assert_eq!(
            account.received(),
            vec![json!({
                "type": "floor",
                "dead": [{"id": 1, "name": "Rin", "dead_to": "Slime", "floor": 3, "x": 2, "y": 2}],
                "players": [],
            })]
        );

        harness
            .send(&mut account, json!({"type": "dead", "dead_to": "Bat"}))
            .await;

        assert_eq!(
            harness.tombstones(3).await,
            vec![
                Tombstone {
                    id: 1,
                    name: "Mog".into(),
                    dead_to: "Bat".into(),
                    floor: 3,
                    x: 0,
                    y: 0,
                },
                Tombstone {
                    id: 1,
                    name: "Rin".into(),
                    dead_to: "Slime".into(),
                    floor: 3,
                    x: 2,
                    y: 2,
                },
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn yesterdays_dead_are_live_after_rollover() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;
        harness
            .send(&mut a, json!({"type": "dead", "dead_to": "Slime"}))
            .await;

        harness.daily_tx.send_replace(dungeon(day(17)));

        let mut b = harness.joined(2, 8, "Mog", 3).await;
        let mut c = harness.client(3).await;
        harness
            .send(&mut c, json!({"type": "connect", "appearance": "female", "id": 9, "name": "Ada"}))
            .await;
        harness
            .send(&mut c, json!({"type": "floor", "floor": 3, "x": 0, "y": 0}))
            .await;

        let reply = c.received();
        assert_eq!(reply[0]["dead"], json!([]));
        let mut players = reply[0]["players"]
            .as_array()
            .unwrap()
            .iter()
            .map(|player| player["id"].as_u64().unwrap())
            .collect::<Vec<_>>();
        players.sort_unstable();
        assert_eq!(players, vec![7, 8]);

        assert!(!a.session.is_dead_on(harness.today()));
        b.received();
        harness
            .dispatcher
            .on_disconnect(&mut a.session)
            .await
            .unwrap();
        assert_eq!(b.received(), vec![json!({"type": "disconnect", "id": 7})]);
    }

    #[test_log::test(tokio::test)]
    async fn repeat_connect_keeps_first_identity() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;

        harness
            .send(&mut a, json!({"type": "connect", "appearance": "female", "id": 99, "name": "Eve"}))
            .await;

        assert_eq!(a.session.id(), 7);
        assert_eq!(a.session.identity().unwrap().name, "Rin");
    }

    #[test_log::test(tokio::test)]
    async fn malformed_and_unknown_frames() {
        let harness = Harness::with_memory_ledger();
        let mut a = harness.joined(1, 7, "Rin", 3).await;

        let err = harness
            .dispatcher
            .handle_frame(&mut a.session, r#"{"type":"movement","x":1}"#)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Decode(DecodeError::InvalidPayload { .. })
        ));

        harness
            .send(&mut a, json!({"type": "teleport", "x": 1, "y": 1}))
            .await;
        assert!(a.received().is_empty());
    }

    fn summary(id: PlayerId) -> PlayerSummary {
        PlayerSummary {
            id,
            name: format!("player-{id}"),
            appearance: "male".into(),
            x: 0,
            y: 0,
        }
    }

    fn tombstone(id: PlayerId) -> Tombstone {
        Tombstone {
            id,
            name: format!("player-{id}"),
            dead_to: "Slime".into(),
            floor: 1,
            x: 0,
            y: 0,
        }
    }

    fn record(key: PlayerKey, id: PlayerId) -> DeathRecord {
        DeathRecord {
            key,
            date: day(16),
            tombstone: tombstone(id),
        }
    }

    #[test]
    fn floor_snapshot_is_capped() {
        let records = (1..=20)
            .map(|id| record(PlayerKey::Account(id), id))
            .collect();
        let others = (100..140)
            .map(|id| FloorMember {
                conn: id,
                player: summary(id),
                died_on: None,
            })
            .collect();

        let snapshot = floor_snapshot(PlayerKey::Account(1), day(16), records, others);

        assert_eq!(snapshot.dead.len(), MAX_FLOOR_TOMBSTONES);
        assert_eq!(snapshot.players.len(), MAX_FLOOR_PLAYERS);
        assert!(snapshot.dead.iter().all(|tombstone| tombstone.id != 1));
    }

    #[test]
    fn floor_snapshot_skips_own_tombstone_and_todays_dead() {
        let others = vec![
            FloorMember {
                conn: 2,
                player: summary(2),
                died_on: Some(day(16)),
            },
            FloorMember {
                conn: 3,
                player: summary(3),
                died_on: None,
            },
            FloorMember {
                conn: 4,
                player: summary(4),
                died_on: Some(day(15)),
            },
        ];

        let snapshot = floor_snapshot(
            PlayerKey::Account(1),
            day(16),
            vec![
                record(PlayerKey::Account(1), 1),
                record(PlayerKey::Account(2), 2),
            ],
            others,
        );

        assert_eq!(
            snapshot,
            FloorSnapshot {
                dead: vec![tombstone(2)],
                players: vec![summary(3), summary(4)],
            }
        );
    }

    #[test]
    fn floor_snapshot_matches_tombstones_by_key_not_id() {
        let snapshot = floor_snapshot(
            PlayerKey::Account(1),
            day(16),
            vec![record(PlayerKey::Guest(1), 1)],
            vec![],
        );

        assert_eq!(snapshot.dead, vec![tombstone(1)]);
    }
}
