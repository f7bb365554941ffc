//! Client input decoding
//!
//! The transport hands the core raw client packets between ticks; this
//! module turns them into typed command records. A malformed packet is
//! rejected whole (the simulation never sees a partially-decoded input).

use crate::net::codec::{CodecError, WireReader};
use crate::game::fields::WireString;
use crate::util::vec2::Vec2;

/// Client packet tags
pub mod client_packets {
    pub const INPUT: u8 = 0x01;
    pub const SPAWN: u8 = 0x02;
    pub const PING: u8 = 0x05;
}

/// Input button/movement flags
pub mod input_flags {
    pub const UP: u32 = 1 << 0;
    pub const DOWN: u32 = 1 << 1;
    pub const LEFT: u32 = 1 << 2;
    pub const RIGHT: u32 = 1 << 3;
    pub const SHOOT: u32 = 1 << 4;
    pub const REPEL: u32 = 1 << 5;
}

/// One decoded client command record
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    /// Per-tick input: button flags plus mouse vector in world space
    Input { flags: u32, mouse: Vec2 },
    /// Spawn request with the chosen display name
    Spawn { name: WireString },
    /// Latency probe; echoed by the transport layer
    Ping,
}

/// Decode a whole client packet. Unknown tags, truncation or trailing
/// bytes fail the packet.
pub fn decode_client_packet(bytes: &[u8]) -> Result<ClientCommand, CodecError> {
    let mut reader = WireReader::new(bytes);
    let tag = reader.read_u8()?;
    let command = match tag {
        client_packets::INPUT => {
            let flags = reader.read_varuint()? as u32;
            let mouse = Vec2::new(reader.read_float()?, reader.read_float()?);
            ClientCommand::Input { flags, mouse }
        }
        client_packets::SPAWN => ClientCommand::Spawn {
            name: reader.read_string()?,
        },
        client_packets::PING => ClientCommand::Ping,
        other => return Err(CodecError::UnknownTag(other)),
    };
    reader.expect_end()?;
    Ok(command)
}

/// Applied input state for one controlled entity. Human connections and
/// AI controllers both drive entities through this type, so possession
/// hand-off is just swapping who writes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputState {
    pub flags: u32,
    /// Mouse/aim vector (for AI: owner-to-target offset)
    pub mouse: Vec2,
    /// Normalized movement intent derived from flags or AI pursuit
    pub movement: Vec2,
    /// Set when the writing controller went away; the next reader must
    /// replace this with a fresh input object
    pub deleted: bool,
}

impl InputState {
    pub fn apply(&mut self, flags: u32, mouse: Vec2) {
        self.flags = flags;
        self.mouse = mouse;
        self.movement = movement_from_flags(flags);
    }

    pub fn is_pressed(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }
}

/// Movement vector from directional flags, normalized on diagonals
pub fn movement_from_flags(flags: u32) -> Vec2 {
    let mut movement = Vec2::ZERO;
    if flags & input_flags::UP != 0 {
        movement.y -= 1.0;
    }
    if flags & input_flags::DOWN != 0 {
        movement.y += 1.0;
    }
    if flags & input_flags::LEFT != 0 {
        movement.x -= 1.0;
    }
    if flags & input_flags::RIGHT != 0 {
        movement.x += 1.0;
    }
    movement.normalize()
}
