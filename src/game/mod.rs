//! Game simulation modules

pub mod dispatcher;
pub mod physics;
pub mod room;
pub mod simulation;
pub mod snapshot;
pub mod world;

pub use simulation::{SimHandle, Simulation};
pub use world::World;

use physics::{create_backend, BackendKind, PhysicsBackend};
use world::GRAVITY;

/// Ground slab every arena starts with
pub const GROUND_WIDTH: f32 = 30.0;
pub const GROUND_HEIGHT: f32 = 0.4;

/// Radius of the loose balls spawned at startup
pub const BALL_RADIUS: f32 = 0.5;

/// Build the arena: ground slab plus `ball_count` balls dropped above it
pub fn build_arena(backend: Box<dyn PhysicsBackend>, ball_count: usize) -> World {
    let mut world = World::new(backend);
    world.create_ground(GROUND_WIDTH, GROUND_HEIGHT, 0.0, 0.0);

    for i in 0..ball_count {
        let spread = (i as f32 - (ball_count as f32 - 1.0) / 2.0) * 4.0;
        let x = spread.clamp(-GROUND_WIDTH + BALL_RADIUS, GROUND_WIDTH - BALL_RADIUS);
        world.create_ball(BALL_RADIUS, x, 20.0);
    }

    world
}

/// Arena backed by the selected integrator under standard gravity
pub fn default_arena(backend: BackendKind, ball_count: usize) -> World {
    build_arena(create_backend(backend, GRAVITY), ball_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{KinematicBackend, Vec2};
    use crate::ws::protocol::BodyType;

    #[test]
    fn arena_has_ground_and_balls() {
        let world = build_arena(Box::new(KinematicBackend::new(Vec2::ZERO)), 3);
        let views = world.snapshot();

        assert_eq!(views.len(), 4);
        assert_eq!(views[0].body_type, BodyType::Ground);
        assert!(views[1..].iter().all(|v| v.body_type == BodyType::Ball));
        assert_eq!(world.player_body_count(), 0);
    }

    #[test]
    fn rapier_arena_builds() {
        let world = default_arena(BackendKind::Rapier, 1);
        assert_eq!(world.body_count(), 2);
    }
}
