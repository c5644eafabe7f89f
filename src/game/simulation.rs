//! Authoritative fixed-rate simulation loop
//!
//! The loop task owns the [`World`] and the [`Room`]. Connection tasks never
//! touch either directly: they enqueue [`SimCommand`]s through a
//! [`SimHandle`], and the loop applies everything queued so far at the start
//! of each tick, before stepping. That queue is the only serialization point
//! for world and room state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::session::{SendOutcome, SessionManager};
use crate::util::time::{tick_duration, Timer};

use super::dispatcher::{self, Command};
use super::room::{Room, RoomError};
use super::snapshot::{encode_frame, BroadcastStats};
use super::world::World;

/// Work submitted to the loop by connection tasks
#[derive(Debug)]
pub enum SimCommand {
    Join {
        nickname: String,
        reply: oneshot::Sender<Result<Uuid, RoomError>>,
    },
    Leave {
        player_id: Uuid,
    },
    Input {
        player_id: Uuid,
        command: Command,
    },
    NicknameTaken {
        nickname: String,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable front-end to the simulation loop
#[derive(Clone)]
pub struct SimHandle {
    tx: mpsc::UnboundedSender<SimCommand>,
    player_count: Arc<AtomicUsize>,
}

impl SimHandle {
    /// A handle and the receiving end the loop drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SimCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            tx,
            player_count: Arc::new(AtomicUsize::new(0)),
        };
        (handle, rx)
    }

    /// Queue a join; the reply arrives after the next tick drains it.
    ///
    /// If the receiver is dropped before the reply, the loop undoes the join.
    pub fn request_join(&self, nickname: &str) -> oneshot::Receiver<Result<Uuid, RoomError>> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(SimCommand::Join {
            nickname: nickname.to_string(),
            reply,
        });
        rx
    }

    pub async fn join(&self, nickname: &str) -> Result<Uuid, RoomError> {
        self.request_join(nickname)
            .await
            .unwrap_or_else(|_| Err(RoomError::Internal("simulation is not running".to_string())))
    }

    /// Queue removal of a player. Safe to call from `Drop`.
    pub fn leave(&self, player_id: Uuid) {
        let _ = self.tx.send(SimCommand::Leave { player_id });
    }

    pub fn submit(&self, player_id: Uuid, command: Command) {
        let _ = self.tx.send(SimCommand::Input { player_id, command });
    }

    pub fn request_nickname_check(&self, nickname: &str) -> oneshot::Receiver<bool> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(SimCommand::NicknameTaken {
            nickname: nickname.to_string(),
            reply,
        });
        rx
    }

    pub async fn is_nickname_taken(&self, nickname: &str) -> Result<bool, RoomError> {
        self.request_nickname_check(nickname)
            .await
            .map_err(|_| RoomError::Internal("simulation is not running".to_string()))
    }

    /// Players registered as of the last applied command
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }
}

/// Summary of one tick, used for budget warnings and tests
#[derive(Debug, Clone, Copy)]
pub struct TickReport {
    pub tick: u64,
    pub commands: usize,
    pub recipients: usize,
    pub elapsed: Duration,
}

/// The authoritative simulation
pub struct Simulation {
    world: World,
    room: Room,
    commands: mpsc::UnboundedReceiver<SimCommand>,
    sessions: SessionManager,
    player_count: Arc<AtomicUsize>,
    tick: u64,
    stats: BroadcastStats,
}

impl Simulation {
    pub fn new(world: World, sessions: SessionManager) -> (Self, SimHandle) {
        let (handle, commands) = SimHandle::channel();
        let simulation = Self {
            world,
            room: Room::new(),
            commands,
            sessions,
            player_count: handle.player_count.clone(),
            tick: 0,
            stats: BroadcastStats::default(),
        };
        (simulation, handle)
    }

    /// Run the tick loop for the lifetime of the process
    pub async fn run(mut self) {
        info!(bodies = self.world.body_count(), "Simulation loop started");

        let budget = tick_duration();
        let mut ticker = interval(budget);
        // Burst catches up on late ticks so the long-run rate holds
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        let mut rate_timer = Timer::new();
        let mut ticks_in_window: u32 = 0;

        loop {
            ticker.tick().await;

            let report = self.tick();
            if report.elapsed > budget {
                warn!(
                    tick = report.tick,
                    commands = report.commands,
                    recipients = report.recipients,
                    elapsed_micros = report.elapsed.as_micros() as u64,
                    budget_micros = budget.as_micros() as u64,
                    "Tick took longer than expected"
                );
            }

            ticks_in_window += 1;
            let window = rate_timer.elapsed();
            if window >= Duration::from_secs(1) {
                let stats = self.stats.take();
                debug!(
                    tps = f64::from(ticks_in_window) / window.as_secs_f64(),
                    players = self.room.len(),
                    frames_queued = stats.frames_queued,
                    frames_dropped = stats.frames_dropped,
                    bytes_queued = stats.bytes_queued,
                    "Simulation rate"
                );
                ticks_in_window = 0;
                rate_timer.reset();
            }
        }
    }

    /// Apply queued commands, step once, broadcast the result
    pub fn tick(&mut self) -> TickReport {
        let timer = Timer::new();

        let commands = self.drain_commands();
        debug_assert_eq!(self.world.player_body_count(), self.room.len());
        self.world.step();
        self.tick += 1;
        let recipients = self.broadcast();

        TickReport {
            tick: self.tick,
            commands,
            recipients,
            elapsed: timer.elapsed(),
        }
    }

    fn drain_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
            applied += 1;
        }
        if applied > 0 {
            self.player_count.store(self.room.len(), Ordering::Relaxed);
        }
        applied
    }

    fn apply(&mut self, command: SimCommand) {
        match command {
            SimCommand::Join { nickname, reply } => {
                let result = self.room.join_player(&nickname, &mut self.world);
                if let Err(e) = &result {
                    debug!(nickname = %nickname, error = %e, "Join rejected");
                }
                if let Err(Ok(player_id)) = reply.send(result) {
                    warn!(player_id = %player_id, "Join requester went away, removing player");
                    self.room.remove_player(player_id, &mut self.world);
                }
            }
            SimCommand::Leave { player_id } => {
                self.room.remove_player(player_id, &mut self.world);
            }
            SimCommand::Input { player_id, command } => {
                dispatcher::apply(&mut self.world, player_id, command);
            }
            SimCommand::NicknameTaken { nickname, reply } => {
                let _ = reply.send(self.room.is_nickname_taken(&nickname));
            }
        }
    }

    fn broadcast(&mut self) -> usize {
        if self.room.is_empty() || self.sessions.is_empty() {
            return 0;
        }
        let ids = self.room.player_ids();

        let views = self.world.snapshot();
        let frame = match encode_frame(&views) {
            Ok(frame) => frame,
            Err(e) => {
                error!(tick = self.tick, error = %e, "Failed to encode frame");
                return 0;
            }
        };

        let mut recipients = 0;
        for player_id in ids {
            match self.sessions.send(player_id, frame.clone()) {
                SendOutcome::Queued => {
                    self.stats.record_queued(frame.len());
                    recipients += 1;
                }
                SendOutcome::Dropped => {
                    self.stats.record_dropped();
                    trace!(player_id = %player_id, "Outbound buffer full, frame dropped");
                }
                SendOutcome::NoSession => {}
            }
        }
        recipients
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::Receiver;

    use super::*;
    use crate::game::dispatcher::{decode, Direction};
    use crate::game::physics::{KinematicBackend, Vec2};
    use crate::game::room::SPAWN_POINT;
    use crate::game::snapshot::Frame;

    fn simulation(gravity: Vec2) -> (Simulation, SimHandle, SessionManager) {
        let mut world = World::new(Box::new(KinematicBackend::new(gravity)));
        world.create_ground(30.0, 0.4, 0.0, 0.0);
        let sessions = SessionManager::new(4);
        let (sim, handle) = Simulation::new(world, sessions.clone());
        (sim, handle, sessions)
    }

    async fn join(sim: &mut Simulation, handle: &SimHandle, nickname: &str) -> Uuid {
        let reply = handle.request_join(nickname);
        sim.tick();
        reply.await.unwrap().unwrap()
    }

    fn connect(sessions: &SessionManager, player_id: Uuid) -> Receiver<Frame> {
        let (tx, rx) = sessions.channel();
        sessions.register(player_id, tx);
        rx
    }

    fn player_bodies(frame: &Frame) -> usize {
        let views: Vec<serde_json::Value> = serde_json::from_str(frame).unwrap();
        views.iter().filter(|v| v["type"] == 1).count()
    }

    #[tokio::test]
    async fn join_and_move() {
        let (mut sim, handle, _sessions) = simulation(Vec2::ZERO);
        let alice = join(&mut sim, &handle, "alice").await;
        assert_eq!(sim.world.player_position(alice), Some(SPAWN_POINT));
        let before = sim.world.player_velocity(alice).unwrap();

        let command = decode(r#"{"event":"KEY_PRESS","data":{"key":"up"}}"#).unwrap();
        handle.submit(alice, command);
        sim.tick();

        let after = sim.world.player_velocity(alice).unwrap();
        assert_eq!(after.y - before.y, 50.0);
        assert_eq!(after.x, before.x);
    }

    #[tokio::test]
    async fn commands_queued_after_a_tick_wait_for_the_next() {
        let (mut sim, handle, _sessions) = simulation(Vec2::ZERO);
        let alice = join(&mut sim, &handle, "alice").await;

        sim.tick();
        handle.submit(alice, Command::KeyPress(Direction::Right));
        assert_eq!(sim.world.player_velocity(alice), Some(Vec2::ZERO));

        let report = sim.tick();
        assert_eq!(report.commands, 1);
        assert_eq!(sim.world.player_velocity(alice), Some(Vec2::new(10.0, 0.0)));
    }

    #[tokio::test]
    async fn same_tick_commands_all_apply_before_step() {
        let (mut sim, handle, _sessions) = simulation(Vec2::ZERO);
        let alice = join(&mut sim, &handle, "alice").await;
        let bob = join(&mut sim, &handle, "bob").await;

        handle.submit(alice, Command::KeyPress(Direction::Left));
        handle.submit(bob, Command::KeyPress(Direction::Up));
        handle.submit(alice, Command::KeyPress(Direction::Left));
        sim.tick();

        let alice_before = SPAWN_POINT.x;
        let alice_after = sim.world.player_position(alice).unwrap().x;
        assert_eq!(sim.world.player_velocity(alice), Some(Vec2::new(-20.0, 0.0)));
        assert!(alice_after < alice_before);
        assert_eq!(sim.world.player_velocity(bob), Some(Vec2::new(0.0, 50.0)));
    }

    #[tokio::test]
    async fn nickname_collision_adds_no_body() {
        let (mut sim, handle, _sessions) = simulation(Vec2::ZERO);
        let first = handle.request_join("bob");
        let second = handle.request_join("bob");
        sim.tick();

        assert!(first.await.unwrap().is_ok());
        assert_eq!(second.await.unwrap(), Err(RoomError::AlreadyTaken));
        assert_eq!(sim.world.player_body_count(), 1);
        assert_eq!(handle.player_count(), 1);

        let taken = handle.request_nickname_check("bob");
        let free = handle.request_nickname_check("eve");
        sim.tick();
        assert!(taken.await.unwrap());
        assert!(!free.await.unwrap());
    }

    #[tokio::test]
    async fn every_player_gets_a_frame_per_tick() {
        let (mut sim, handle, sessions) = simulation(Vec2::new(0.0, -100.0));
        let alice = join(&mut sim, &handle, "alice").await;
        let bob = join(&mut sim, &handle, "bob").await;
        let mut alice_rx = connect(&sessions, alice);
        let mut bob_rx = connect(&sessions, bob);

        let report = sim.tick();

        assert_eq!(report.recipients, 2);
        let alice_frame = alice_rx.try_recv().unwrap();
        let bob_frame = bob_rx.try_recv().unwrap();
        assert_eq!(alice_frame, bob_frame);
        assert_eq!(player_bodies(&alice_frame), 2);
    }

    #[tokio::test]
    async fn slow_reader_never_blocks_the_tick() {
        let (mut sim, handle, sessions) = simulation(Vec2::ZERO);
        let alice = join(&mut sim, &handle, "alice").await;
        let mut rx = connect(&sessions, alice);

        for _ in 0..10 {
            sim.tick();
        }

        let mut buffered = 0;
        while rx.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, 4);
        assert_eq!(sim.stats.frames_dropped, 6);
    }

    #[tokio::test]
    async fn disconnect_cleanup() {
        let (mut sim, handle, sessions) = simulation(Vec2::ZERO);
        let alice = join(&mut sim, &handle, "alice").await;
        let bob = join(&mut sim, &handle, "bob").await;
        let mut alice_rx = connect(&sessions, alice);
        let _bob_rx = connect(&sessions, bob);

        sessions.unregister(bob);
        handle.leave(bob);
        sim.tick();

        assert!(!sim.world.has_player_body(bob));
        assert_eq!(sim.world.player_body_count(), 1);
        assert_eq!(handle.player_count(), 1);
        let frame = alice_rx.try_recv().unwrap();
        assert_eq!(player_bodies(&frame), 1);

        let bodies_before = sim.world.snapshot();
        handle.submit(bob, Command::KeyPress(Direction::Up));
        handle.leave(bob);
        sim.tick();
        assert_eq!(sim.world.snapshot(), bodies_before);
    }

    #[tokio::test]
    async fn abandoned_join_is_rolled_back() {
        let (mut sim, handle, _sessions) = simulation(Vec2::ZERO);
        drop(handle.request_join("ghost"));
        sim.tick();

        assert_eq!(sim.room.len(), 0);
        assert_eq!(sim.world.player_body_count(), 0);
        let ghost = join(&mut sim, &handle, "ghost").await;
        assert_eq!(sim.room.player_ids(), vec![ghost]);
    }

    #[tokio::test]
    async fn stopped_loop_reports_internal_error() {
        let (handle, commands) = SimHandle::channel();
        drop(commands);

        assert!(matches!(handle.join("alice").await, Err(RoomError::Internal(_))));
        assert!(handle.is_nickname_taken("alice").await.is_err());
        handle.leave(Uuid::new_v4());
    }

    #[tokio::test]
    async fn one_body_per_player_over_churn() {
        let (mut sim, handle, _sessions) = simulation(Vec2::new(0.0, -100.0));
        let mut live = Vec::new();

        for round in 0..12 {
            let reply = handle.request_join(&format!("p{}", round % 5));
            if round % 4 == 3 {
                if let Some(id) = live.pop() {
                    handle.leave(id);
                }
            }
            sim.tick();
            if let Ok(id) = reply.await.unwrap() {
                live.push(id);
            }
            assert_eq!(sim.world.player_body_count(), sim.room.len());
            assert_eq!(sim.room.len(), live.len());
        }
    }
}
