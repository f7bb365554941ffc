//! Tuned simulation constants
//!
//! Gameplay numbers (view ranges, friction, AI pacing) live here so the
//! systems code stays free of magic values.

/// Tick pacing
pub mod ticks {
    /// Server simulation rate (ticks per second)
    pub const TICK_RATE: u32 = 25;
}

/// Client viewport / visibility
pub mod view {
    /// Reference screen width in world units at fov = 1.0
    pub const BASE_VIEW_WIDTH: f32 = 1920.0;

    /// Reference screen height in world units at fov = 1.0
    pub const BASE_VIEW_HEIGHT: f32 = 1080.0;

    /// Default camera field-of-view scale (smaller = more world visible)
    pub const DEFAULT_FOV: f32 = 0.35;

    /// Extra margin around the visible rectangle so entities do not pop
    /// at the screen edge
    pub const VIEW_MARGIN: f32 = 160.0;
}

/// AI target acquisition
pub mod ai {
    /// Search runs only on ticks where
    /// `(tick + creation_tick) % SEARCH_INTERVAL == SEARCH_OFFSET`,
    /// spreading the cost across entities sharing the interval.
    pub const SEARCH_INTERVAL: u64 = 2;

    /// Fixed offset into the search interval
    pub const SEARCH_OFFSET: u64 = 0;

    /// Default pursuit view range (world units)
    pub const DEFAULT_VIEW_RANGE: f32 = 1700.0;

    /// Idle sweep rotation speed (radians per tick)
    pub const PASSIVE_ROTATION: f32 = 0.01;

    /// Radius of the idle aim sweep circle (world units)
    pub const PASSIVE_SWEEP_RADIUS: f32 = 1000.0;
}

/// Collision response tuning (game-feel forces, not physical accuracy)
pub mod physics {
    /// Per-tick velocity damping
    pub const FRICTION: f32 = 0.9;

    /// Base acceleration applied from movement input (units per tick^2)
    pub const BASE_ACCEL: f32 = 2.0;

    /// Scale applied to collision pushback impulses
    pub const PUSH_SCALE: f32 = 0.25;

    /// Velocities below this are zeroed to let entities settle
    pub const REST_EPSILON: f32 = 0.01;
}
