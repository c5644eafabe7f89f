//! Physics port and its backends
//!
//! The world only talks to the integrator through [`PhysicsBackend`]. The
//! production backend is a constrained rigid-body solver built on rapier; the
//! kinematic backend is a small explicit-Euler integrator used by unit tests.

use std::collections::BTreeMap;

use rapier2d::prelude::*;

use crate::util::time::tick_delta;

/// Constraint solver velocity iterations per step
pub const VELOCITY_ITERATIONS: usize = 360;
/// Constraint solver position iterations per step
pub const POSITION_ITERATIONS: usize = 180;

/// 2D vector used at the port boundary
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Opaque reference to a body inside a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyHandle {
    index: u32,
    generation: u32,
}

impl BodyHandle {
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl From<RigidBodyHandle> for BodyHandle {
    fn from(handle: RigidBodyHandle) -> Self {
        let (index, generation) = handle.into_raw_parts();
        Self { index, generation }
    }
}

impl From<BodyHandle> for RigidBodyHandle {
    fn from(handle: BodyHandle) -> Self {
        RigidBodyHandle::from_raw_parts(handle.index, handle.generation)
    }
}

/// Whether the solver moves a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMotion {
    Static,
    Dynamic,
}

/// Collision shape. Box extents are half-extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BodyShape {
    Box { half_width: f32, half_height: f32 },
    Ball { radius: f32 },
}

impl BodyShape {
    fn half_extents(&self) -> Vec2 {
        match *self {
            BodyShape::Box {
                half_width,
                half_height,
            } => Vec2::new(half_width, half_height),
            BodyShape::Ball { radius } => Vec2::new(radius, radius),
        }
    }
}

/// Everything needed to insert a body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyDesc {
    pub motion: BodyMotion,
    pub shape: BodyShape,
    pub position: Vec2,
}

/// Point-in-time kinematic state of one body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub handle: BodyHandle,
    pub position: Vec2,
    pub velocity: Vec2,
}

/// Parameters of a single integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub dt: f32,
    pub velocity_iterations: usize,
    pub position_iterations: usize,
}

impl StepParams {
    /// The one step configuration the server runs with
    pub fn fixed() -> Self {
        Self {
            dt: tick_delta(),
            velocity_iterations: VELOCITY_ITERATIONS,
            position_iterations: POSITION_ITERATIONS,
        }
    }
}

/// Which integrator backs the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Rapier,
    Kinematic,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rapier" => Ok(BackendKind::Rapier),
            "kinematic" => Ok(BackendKind::Kinematic),
            other => Err(other.to_string()),
        }
    }
}

/// Construct the selected backend
pub fn create_backend(kind: BackendKind, gravity: Vec2) -> Box<dyn PhysicsBackend> {
    match kind {
        BackendKind::Rapier => Box::new(RapierBackend::new(gravity)),
        BackendKind::Kinematic => Box::new(KinematicBackend::new(gravity)),
    }
}

/// Narrow interface between the world and an integrator
pub trait PhysicsBackend: Send {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle;

    /// Returns false when the handle is stale
    fn destroy_body(&mut self, handle: BodyHandle) -> bool;

    fn step(&mut self, params: &StepParams);

    /// All live bodies in a deterministic order
    fn list_bodies(&self) -> Vec<BodyState>;

    fn velocity(&self, handle: BodyHandle) -> Option<Vec2>;

    /// Returns false when the handle is stale
    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2) -> bool;
}

// ============================================================================
// Rapier backend
// ============================================================================

/// Rigid-body solver backed by rapier
pub struct RapierBackend {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: BroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
}

impl RapierBackend {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity: vector![gravity.x, gravity.y],
            integration_parameters: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: BroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
        }
    }
}

impl PhysicsBackend for RapierBackend {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let builder = match desc.motion {
            BodyMotion::Static => RigidBodyBuilder::fixed(),
            // Thin ground slabs tunnel at fall speed without CCD
            BodyMotion::Dynamic => RigidBodyBuilder::dynamic().ccd_enabled(true),
        };
        let body = builder
            .translation(vector![desc.position.x, desc.position.y])
            .build();
        let handle = self.bodies.insert(body);

        let collider = match desc.shape {
            BodyShape::Box {
                half_width,
                half_height,
            } => ColliderBuilder::cuboid(half_width, half_height),
            BodyShape::Ball { radius } => ColliderBuilder::ball(radius),
        }
        .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        handle.into()
    }

    fn destroy_body(&mut self, handle: BodyHandle) -> bool {
        self.bodies
            .remove(
                handle.into(),
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    fn step(&mut self, params: &StepParams) {
        self.integration_parameters.dt = params.dt;
        self.integration_parameters.max_velocity_iterations = params.velocity_iterations;
        self.integration_parameters.max_stabilization_iterations = params.position_iterations;

        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &(),
        );
    }

    fn list_bodies(&self) -> Vec<BodyState> {
        self.bodies
            .iter()
            .map(|(handle, body)| {
                let position = body.translation();
                let velocity = body.linvel();
                BodyState {
                    handle: handle.into(),
                    position: Vec2::new(position.x, position.y),
                    velocity: Vec2::new(velocity.x, velocity.y),
                }
            })
            .collect()
    }

    fn velocity(&self, handle: BodyHandle) -> Option<Vec2> {
        self.bodies.get(handle.into()).map(|body| {
            let velocity = body.linvel();
            Vec2::new(velocity.x, velocity.y)
        })
    }

    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2) -> bool {
        match self.bodies.get_mut(handle.into()) {
            Some(body) => {
                body.set_linvel(vector![velocity.x, velocity.y], true);
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Kinematic backend
// ============================================================================

#[derive(Debug, Clone)]
struct KinematicBody {
    desc: BodyDesc,
    position: Vec2,
    velocity: Vec2,
}

/// Explicit-Euler integrator with gravity and resting contact on static boxes.
///
/// No friction, no body-body collisions between dynamic bodies. Iteration
/// counts in [`StepParams`] are ignored.
pub struct KinematicBackend {
    gravity: Vec2,
    next_index: u32,
    bodies: BTreeMap<u32, KinematicBody>,
}

impl KinematicBackend {
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            next_index: 0,
            bodies: BTreeMap::new(),
        }
    }

    fn lookup(&self, handle: BodyHandle) -> Option<&KinematicBody> {
        if handle.generation != 0 {
            return None;
        }
        self.bodies.get(&handle.index)
    }
}

impl PhysicsBackend for KinematicBackend {
    fn create_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let index = self.next_index;
        self.next_index += 1;
        self.bodies.insert(
            index,
            KinematicBody {
                desc,
                position: desc.position,
                velocity: Vec2::ZERO,
            },
        );
        BodyHandle::from_raw_parts(index, 0)
    }

    fn destroy_body(&mut self, handle: BodyHandle) -> bool {
        handle.generation == 0 && self.bodies.remove(&handle.index).is_some()
    }

    fn step(&mut self, params: &StepParams) {
        let dt = params.dt;
        let floors: Vec<(Vec2, Vec2)> = self
            .bodies
            .values()
            .filter(|b| b.desc.motion == BodyMotion::Static)
            .map(|b| (b.position, b.desc.shape.half_extents()))
            .collect();

        for body in self.bodies.values_mut() {
            if body.desc.motion == BodyMotion::Static {
                continue;
            }

            body.velocity.x += self.gravity.x * dt;
            body.velocity.y += self.gravity.y * dt;
            body.position.x += body.velocity.x * dt;
            body.position.y += body.velocity.y * dt;

            let half = body.desc.shape.half_extents();
            for (floor_pos, floor_half) in &floors {
                let overlaps_x = (body.position.x - floor_pos.x).abs() < half.x + floor_half.x;
                let top = floor_pos.y + floor_half.y;
                let bottom = body.position.y - half.y;
                if overlaps_x && bottom < top && body.position.y > floor_pos.y {
                    body.position.y = top + half.y;
                    if body.velocity.y < 0.0 {
                        body.velocity.y = 0.0;
                    }
                }
            }
        }
    }

    fn list_bodies(&self) -> Vec<BodyState> {
        self.bodies
            .iter()
            .map(|(index, body)| BodyState {
                handle: BodyHandle::from_raw_parts(*index, 0),
                position: body.position,
                velocity: body.velocity,
            })
            .collect()
    }

    fn velocity(&self, handle: BodyHandle) -> Option<Vec2> {
        self.lookup(handle).map(|b| b.velocity)
    }

    fn set_velocity(&mut self, handle: BodyHandle, velocity: Vec2) -> bool {
        if handle.generation != 0 {
            return false;
        }
        match self.bodies.get_mut(&handle.index) {
            Some(body) => {
                body.velocity = velocity;
                true
            }
            None => false,
        }
    }
}
