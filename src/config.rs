/// Simulation configuration for one arena
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Fixed entity id space (slots in the registry)
    pub max_entities: usize,
    /// Spatial grid cell size in world units
    pub cell_size: f32,
    /// Arena half extent; the playable square spans +/- this on both axes
    pub arena_half_extent: f32,
    /// Simulation rate in ticks per second (informational; the caller drives ticks)
    pub tick_rate: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_entities: 16384,
            cell_size: 64.0,
            arena_half_extent: 5000.0,
            tick_rate: crate::game::constants::ticks::TICK_RATE,
        }
    }
}

impl SimConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("ARENA_MAX_ENTITIES") {
            if let Ok(parsed) = max.parse::<usize>() {
                if parsed > 0 && parsed < u16::MAX as usize {
                    config.max_entities = parsed;
                } else {
                    tracing::warn!("ARENA_MAX_ENTITIES must be 1-65534, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_MAX_ENTITIES '{}', using default", max);
            }
        }

        if let Ok(cell) = std::env::var("ARENA_CELL_SIZE") {
            if let Ok(parsed) = cell.parse::<f32>() {
                if parsed > 0.0 {
                    config.cell_size = parsed;
                } else {
                    tracing::warn!("ARENA_CELL_SIZE must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_CELL_SIZE '{}', using default", cell);
            }
        }

        if let Ok(half) = std::env::var("ARENA_HALF_EXTENT") {
            if let Ok(parsed) = half.parse::<f32>() {
                if parsed > 0.0 {
                    config.arena_half_extent = parsed;
                } else {
                    tracing::warn!("ARENA_HALF_EXTENT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_HALF_EXTENT '{}', using default", half);
            }
        }

        if let Ok(rate) = std::env::var("ARENA_TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if parsed > 0 {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("ARENA_TICK_RATE must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid ARENA_TICK_RATE '{}', using default", rate);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entities == 0 {
            return Err("max_entities must be at least 1".to_string());
        }
        if self.max_entities >= u16::MAX as usize {
            return Err("max_entities must fit the u16 id space (one id is reserved)".to_string());
        }
        if self.cell_size <= 0.0 {
            return Err("cell_size must be positive".to_string());
        }
        if self.arena_half_extent <= 0.0 {
            return Err("arena_half_extent must be positive".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        Ok(())
    }
}
