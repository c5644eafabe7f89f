//! The simulated world: bodies, their game payloads, and snapshots

use std::collections::HashMap;

use tracing::warn;
use uuid::Uuid;

use crate::ws::protocol::{BodyData, BodyType, BodyView};

use super::dispatcher::Direction;
use super::physics::{
    BodyDesc, BodyHandle, BodyMotion, BodyShape, PhysicsBackend, StepParams, Vec2,
};

/// World gravity
pub const GRAVITY: Vec2 = Vec2::new(0.0, -100.0);

/// Default player box size (half-extents)
pub const PLAYER_WIDTH: f32 = 1.0;
pub const PLAYER_HEIGHT: f32 = 1.0;

/// Game payload attached to a body
#[derive(Debug, Clone, PartialEq)]
pub enum BodyKind {
    Ground {
        width: f32,
        height: f32,
    },
    Player {
        width: f32,
        height: f32,
        health: i32,
        owner: Option<Uuid>,
    },
    Ball {
        radius: f32,
    },
}

impl BodyKind {
    fn body_type(&self) -> BodyType {
        match self {
            BodyKind::Ground { .. } => BodyType::Ground,
            BodyKind::Player { .. } => BodyType::Player,
            BodyKind::Ball { .. } => BodyType::Ball,
        }
    }

    fn to_data(&self) -> BodyData {
        let body_type = self.body_type();
        match *self {
            BodyKind::Ground { width, height } => BodyData::Ground {
                body_type,
                width,
                height,
            },
            BodyKind::Player {
                width,
                height,
                health,
                ..
            } => BodyData::Player {
                body_type,
                width,
                height,
                health,
            },
            BodyKind::Ball { radius } => BodyData::Ball { body_type, radius },
        }
    }
}

/// Owns every body and the integrator that moves them
pub struct World {
    backend: Box<dyn PhysicsBackend>,
    params: StepParams,
    kinds: HashMap<BodyHandle, BodyKind>,
    player_bodies: HashMap<Uuid, BodyHandle>,
}

impl World {
    pub fn new(backend: Box<dyn PhysicsBackend>) -> Self {
        Self {
            backend,
            params: StepParams::fixed(),
            kinds: HashMap::new(),
            player_bodies: HashMap::new(),
        }
    }

    /// Insert a static ground box
    pub fn create_ground(&mut self, width: f32, height: f32, x: f32, y: f32) -> BodyHandle {
        let handle = self.backend.create_body(BodyDesc {
            motion: BodyMotion::Static,
            shape: BodyShape::Box {
                half_width: width,
                half_height: height,
            },
            position: Vec2::new(x, y),
        });
        self.kinds.insert(handle, BodyKind::Ground { width, height });
        handle
    }

    /// Insert an untagged player body; see [`World::tag_player`]
    pub fn create_player(&mut self, x: f32, y: f32) -> BodyHandle {
        let handle = self.backend.create_body(BodyDesc {
            motion: BodyMotion::Dynamic,
            shape: BodyShape::Box {
                half_width: PLAYER_WIDTH,
                half_height: PLAYER_HEIGHT,
            },
            position: Vec2::new(x, y),
        });
        self.kinds.insert(
            handle,
            BodyKind::Player {
                width: PLAYER_WIDTH,
                height: PLAYER_HEIGHT,
                health: 0,
                owner: None,
            },
        );
        handle
    }

    pub fn create_ball(&mut self, radius: f32, x: f32, y: f32) -> BodyHandle {
        let handle = self.backend.create_body(BodyDesc {
            motion: BodyMotion::Dynamic,
            shape: BodyShape::Ball { radius },
            position: Vec2::new(x, y),
        });
        self.kinds.insert(handle, BodyKind::Ball { radius });
        handle
    }

    /// Attach an owner and starting health to a player body.
    ///
    /// Returns false if the handle is not a live player body or the player
    /// already owns another body.
    pub fn tag_player(
        &mut self,
        handle: BodyHandle,
        player_id: Uuid,
        starting_health: i32,
    ) -> bool {
        if self.player_bodies.contains_key(&player_id) {
            return false;
        }
        match self.kinds.get_mut(&handle) {
            Some(BodyKind::Player { health, owner, .. }) if owner.is_none() => {
                *health = starting_health;
                *owner = Some(player_id);
                self.player_bodies.insert(player_id, handle);
                true
            }
            _ => false,
        }
    }

    /// Remove a body. Stale handles are ignored.
    pub fn destroy_body(&mut self, handle: BodyHandle) {
        if let Some(BodyKind::Player {
            owner: Some(player_id),
            ..
        }) = self.kinds.remove(&handle)
        {
            self.player_bodies.remove(&player_id);
        }
        self.backend.destroy_body(handle);
    }

    /// Nudge a player's velocity. Returns false if the player has no body.
    pub fn apply_velocity_delta(&mut self, player_id: Uuid, direction: Direction) -> bool {
        let Some(handle) = self.player_bodies.get(&player_id).copied() else {
            return false;
        };
        let Some(velocity) = self.backend.velocity(handle) else {
            return false;
        };
        self.backend
            .set_velocity(handle, velocity + direction.velocity_delta())
    }

    /// Advance every dynamic body by one fixed step
    pub fn step(&mut self) {
        self.backend.step(&self.params);
    }

    /// Read-only view of every live body
    pub fn snapshot(&self) -> Vec<BodyView> {
        self.backend
            .list_bodies()
            .into_iter()
            .filter_map(|state| match self.kinds.get(&state.handle) {
                Some(kind) => Some(BodyView {
                    x: state.position.x,
                    y: state.position.y,
                    body_type: kind.body_type(),
                    data: kind.to_data(),
                }),
                None => {
                    warn!(handle = ?state.handle, "Body without game payload, skipping");
                    None
                }
            })
            .collect()
    }

    /// Number of player bodies, tagged or not
    pub fn player_body_count(&self) -> usize {
        self.kinds
            .values()
            .filter(|kind| matches!(kind, BodyKind::Player { .. }))
            .count()
    }

    pub fn body_count(&self) -> usize {
        self.kinds.len()
    }
}

#[cfg(test)]
impl World {
    pub fn player_velocity(&self, player_id: Uuid) -> Option<Vec2> {
        self.player_bodies
            .get(&player_id)
            .and_then(|handle| self.backend.velocity(*handle))
    }

    pub fn player_position(&self, player_id: Uuid) -> Option<Vec2> {
        let handle = self.player_bodies.get(&player_id)?;
        self.backend
            .list_bodies()
            .into_iter()
            .find(|state| state.handle == *handle)
            .map(|state| state.position)
    }

    pub fn has_player_body(&self, player_id: Uuid) -> bool {
        self.player_bodies.contains_key(&player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::KinematicBackend;

    fn weightless_world() -> World {
        World::new(Box::new(KinematicBackend::new(Vec2::ZERO)))
    }

    #[test]
    fn new_player_body_is_at_rest() {
        let mut world = weightless_world();
        let handle = world.create_player(0.0, 200.0);
        let id = Uuid::new_v4();
        assert!(world.tag_player(handle, id, 100));

        assert_eq!(world.player_velocity(id), Some(Vec2::ZERO));
        assert_eq!(world.player_position(id), Some(Vec2::new(0.0, 200.0)));
        assert_eq!(
            world.snapshot()[0].data,
            BodyData::Player {
                body_type: BodyType::Player,
                width: 1.0,
                height: 1.0,
                health: 100,
            }
        );
    }

    #[test]
    fn velocity_deltas_per_direction() {
        let mut world = weightless_world();
        let handle = world.create_player(0.0, 0.0);
        let id = Uuid::new_v4();
        world.tag_player(handle, id, 100);

        assert!(world.apply_velocity_delta(id, Direction::Up));
        assert_eq!(world.player_velocity(id), Some(Vec2::new(0.0, 50.0)));
        world.apply_velocity_delta(id, Direction::Left);
        assert_eq!(world.player_velocity(id), Some(Vec2::new(-10.0, 50.0)));
        world.apply_velocity_delta(id, Direction::Down);
        assert_eq!(world.player_velocity(id), Some(Vec2::new(-10.0, 40.0)));
        world.apply_velocity_delta(id, Direction::Right);
        world.apply_velocity_delta(id, Direction::Right);
        assert_eq!(world.player_velocity(id), Some(Vec2::new(10.0, 40.0)));
    }

    #[test]
    fn a_player_cannot_own_two_bodies() {
        let mut world = weightless_world();
        let id = Uuid::new_v4();
        let first = world.create_player(0.0, 0.0);
        let second = world.create_player(5.0, 0.0);
        assert!(world.tag_player(first, id, 100));
        assert!(!world.tag_player(second, id, 100));
        assert!(!world.tag_player(first, Uuid::new_v4(), 100));
    }

    #[test]
    fn destroying_twice_is_harmless() {
        let mut world = weightless_world();
        let ground = world.create_ground(30.0, 0.4, 0.0, 0.0);
        let handle = world.create_player(0.0, 200.0);
        let id = Uuid::new_v4();
        world.tag_player(handle, id, 100);

        world.destroy_body(handle);
        world.destroy_body(handle);

        assert!(!world.has_player_body(id));
        assert!(!world.apply_velocity_delta(id, Direction::Up));
        assert_eq!(world.body_count(), 1);
        assert_eq!(world.snapshot().len(), 1);

        world.destroy_body(ground);
        assert!(world.snapshot().is_empty());
    }

    #[test]
    fn snapshot_skips_bodies_without_payload() {
        let mut backend = KinematicBackend::new(Vec2::ZERO);
        backend.create_body(BodyDesc {
            motion: BodyMotion::Dynamic,
            shape: BodyShape::Ball { radius: 1.0 },
            position: Vec2::new(3.0, 3.0),
        });
        let mut world = World::new(Box::new(backend));
        world.create_ball(0.5, 1.0, 2.0);

        let views = world.snapshot();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].body_type, BodyType::Ball);
        assert_eq!((views[0].x, views[0].y), (1.0, 2.0));
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let mut world = World::new(Box::new(KinematicBackend::new(GRAVITY)));
        world.create_ground(30.0, 0.4, 0.0, 0.0);
        world.create_player(0.0, 200.0);
        world.step();

        assert_eq!(world.snapshot(), world.snapshot());
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        fn run() -> Vec<BodyView> {
            let mut world = World::new(Box::new(KinematicBackend::new(GRAVITY)));
            world.create_ground(30.0, 0.4, 0.0, 0.0);
            let id = Uuid::new_v4();
            let handle = world.create_player(0.0, 200.0);
            world.tag_player(handle, id, 100);
            world.apply_velocity_delta(id, Direction::Up);
            world.apply_velocity_delta(id, Direction::Right);
            for _ in 0..10 {
                world.step();
            }
            world.snapshot()
        }

        assert_eq!(run(), run());
    }
}
