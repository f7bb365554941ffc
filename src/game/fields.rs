//! Field group model
//!
//! Entities carry their replicated state as named groups of typed fields
//! (Position, Health, ...). Each field tracks a monotonically increasing
//! generation that is bumped whenever the value actually changes; client
//! views compare the generation they last observed against the current one
//! to decide what needs resending. This replaces per-view dirty booleans
//! with an O(1) "has this client seen the latest value" check.
//!
//! The group list, the field order inside each group, and every field's
//! encoding type are part of the wire contract and must not be reordered
//! without a protocol version bump.

use smallvec::SmallVec;

use crate::game::registry::{EntityId, NULL_ENTITY};

// ============================================================================
// Encoding types
// ============================================================================

/// Scalar encoding types supported on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    /// Unsigned LEB128-style varint
    VarUint,
    /// Zigzag-encoded signed varint
    VarInt,
    /// 32-bit little-endian float
    Float,
    /// 64-bit little-endian float (angle / border-width precision)
    Double,
    /// Entity id reference; encoded as a raw unsigned integer, never
    /// dereferenced by the codec
    EntId,
    /// NUL-terminated UTF-8 string
    StringNt,
}

/// Field encoding type: a scalar or a fixed-length array of scalars
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Scalar(ScalarType),
    Array(ScalarType, usize),
}

// ============================================================================
// Values
// ============================================================================

/// Strings up to this many bytes are stored inline without heap allocation;
/// longer strings spill to an out-of-line buffer. The wire encoding is
/// identical either way.
pub const INLINE_STRING_CAP: usize = 14;

/// NUL-terminated wire string with inline small-string storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireString {
    bytes: SmallVec<[u8; INLINE_STRING_CAP]>,
}

impl WireString {
    /// Build from a str, truncating at the first interior NUL (NUL is the
    /// wire terminator and cannot appear in the payload)
    pub fn new(s: &str) -> Self {
        let end = s.bytes().position(|b| b == 0).unwrap_or(s.len());
        Self {
            bytes: SmallVec::from_slice(s[..end].as_bytes()),
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().map(|s| Self::new(s))
    }

    pub fn as_str(&self) -> &str {
        // Invariant: bytes are always valid UTF-8 (checked at construction)
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the payload currently lives in the inline buffer. Callers
    /// outside tests must not depend on this.
    #[cfg(test)]
    pub fn is_inline(&self) -> bool {
        !self.bytes.spilled()
    }
}

/// A single field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    Int(i64),
    Float(f32),
    Double(f64),
    /// Raw entity id; `NULL_ENTITY` means "no reference". Interpretation
    /// (own id vs. unrelated object) happens at the consuming layer.
    Entity(EntityId),
    Text(WireString),
    Array(Box<[FieldValue]>),
}

impl FieldValue {
    /// Zero/empty value for a wire type
    pub fn zero(ty: WireType) -> FieldValue {
        match ty {
            WireType::Scalar(s) => Self::zero_scalar(s),
            WireType::Array(s, len) => {
                FieldValue::Array(vec![Self::zero_scalar(s); len].into_boxed_slice())
            }
        }
    }

    fn zero_scalar(s: ScalarType) -> FieldValue {
        match s {
            ScalarType::VarUint => FieldValue::UInt(0),
            ScalarType::VarInt => FieldValue::Int(0),
            ScalarType::Float => FieldValue::Float(0.0),
            ScalarType::Double => FieldValue::Double(0.0),
            ScalarType::EntId => FieldValue::Entity(NULL_ENTITY),
            ScalarType::StringNt => FieldValue::Text(WireString::default()),
        }
    }

    pub fn as_uint(&self) -> u64 {
        match self {
            FieldValue::UInt(v) => *v,
            _ => 0,
        }
    }

    pub fn as_int(&self) -> i64 {
        match self {
            FieldValue::Int(v) => *v,
            _ => 0,
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            FieldValue::Float(v) => *v,
            _ => 0.0,
        }
    }

    pub fn as_double(&self) -> f64 {
        match self {
            FieldValue::Double(v) => *v,
            _ => 0.0,
        }
    }

    pub fn as_entity(&self) -> EntityId {
        match self {
            FieldValue::Entity(v) => *v,
            _ => NULL_ENTITY,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldValue::Text(v) => v.as_str(),
            _ => "",
        }
    }

    /// Whether this value is encodable as the given wire type
    pub fn matches(&self, ty: WireType) -> bool {
        match (self, ty) {
            (FieldValue::UInt(_), WireType::Scalar(ScalarType::VarUint)) => true,
            (FieldValue::Int(_), WireType::Scalar(ScalarType::VarInt)) => true,
            (FieldValue::Float(_), WireType::Scalar(ScalarType::Float)) => true,
            (FieldValue::Double(_), WireType::Scalar(ScalarType::Double)) => true,
            (FieldValue::Entity(_), WireType::Scalar(ScalarType::EntId)) => true,
            (FieldValue::Text(_), WireType::Scalar(ScalarType::StringNt)) => true,
            (FieldValue::Array(items), WireType::Array(elem, len)) => {
                items.len() == len && items.iter().all(|v| v.matches(WireType::Scalar(elem)))
            }
            _ => false,
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// Closed, ordered list of field groups. The declaration order here is the
/// wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GroupId {
    Relations = 0,
    Physics = 1,
    Health = 2,
    Arena = 3,
    Name = 4,
    Camera = 5,
    Position = 6,
    Style = 7,
    Score = 8,
    Team = 9,
    Barrel = 10,
}

pub const GROUP_COUNT: usize = 11;

impl GroupId {
    pub const ALL: [GroupId; GROUP_COUNT] = [
        GroupId::Relations,
        GroupId::Physics,
        GroupId::Health,
        GroupId::Arena,
        GroupId::Name,
        GroupId::Camera,
        GroupId::Position,
        GroupId::Style,
        GroupId::Score,
        GroupId::Team,
        GroupId::Barrel,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit used in wire group-presence masks
    #[inline]
    pub fn bit(self) -> u64 {
        1u64 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            GroupId::Relations => "relations",
            GroupId::Physics => "physics",
            GroupId::Health => "health",
            GroupId::Arena => "arena",
            GroupId::Name => "name",
            GroupId::Camera => "camera",
            GroupId::Position => "position",
            GroupId::Style => "style",
            GroupId::Score => "score",
            GroupId::Team => "team",
            GroupId::Barrel => "barrel",
        }
    }

    /// Ordered field definitions for this group
    pub fn fields(self) -> &'static [FieldDef] {
        match self {
            GroupId::Relations => RELATIONS_FIELDS,
            GroupId::Physics => PHYSICS_FIELDS,
            GroupId::Health => HEALTH_FIELDS,
            GroupId::Arena => ARENA_FIELDS,
            GroupId::Name => NAME_FIELDS,
            GroupId::Camera => CAMERA_FIELDS,
            GroupId::Position => POSITION_FIELDS,
            GroupId::Style => STYLE_FIELDS,
            GroupId::Score => SCORE_FIELDS,
            GroupId::Team => TEAM_FIELDS,
            GroupId::Barrel => BARREL_FIELDS,
        }
    }

    pub fn field_index(self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }
}

/// Declared default for a field (const-constructible)
#[derive(Debug, Clone, Copy)]
pub enum DefaultSpec {
    Zero,
    UInt(u64),
    Int(i64),
    Float(f32),
    Double(f64),
}

/// One field's schema entry
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: WireType,
    pub default: DefaultSpec,
}

impl FieldDef {
    pub fn default_value(&self) -> FieldValue {
        match self.default {
            DefaultSpec::Zero => FieldValue::zero(self.ty),
            DefaultSpec::UInt(v) => FieldValue::UInt(v),
            DefaultSpec::Int(v) => FieldValue::Int(v),
            DefaultSpec::Float(v) => FieldValue::Float(v),
            DefaultSpec::Double(v) => FieldValue::Double(v),
        }
    }
}

const fn scalar(name: &'static str, ty: ScalarType) -> FieldDef {
    FieldDef {
        name,
        ty: WireType::Scalar(ty),
        default: DefaultSpec::Zero,
    }
}

const fn scalar_with(name: &'static str, ty: ScalarType, default: DefaultSpec) -> FieldDef {
    FieldDef {
        name,
        ty: WireType::Scalar(ty),
        default,
    }
}

const fn array(name: &'static str, elem: ScalarType, len: usize) -> FieldDef {
    FieldDef {
        name,
        ty: WireType::Array(elem, len),
        default: DefaultSpec::Zero,
    }
}

pub const SCOREBOARD_SLOTS: usize = 10;
pub const STAT_COUNT: usize = 8;

const RELATIONS_FIELDS: &[FieldDef] = &[
    scalar("parent", ScalarType::EntId),
    scalar("owner", ScalarType::EntId),
    scalar("team", ScalarType::EntId),
];

const PHYSICS_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar("sides", ScalarType::VarUint),
    scalar("size", ScalarType::Float),
    scalar("width", ScalarType::Float),
    scalar_with("absorption", ScalarType::Float, DefaultSpec::Float(1.0)),
    scalar_with("pushback", ScalarType::Float, DefaultSpec::Float(8.0)),
];

const HEALTH_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar_with("health", ScalarType::Float, DefaultSpec::Float(1.0)),
    scalar_with("max_health", ScalarType::Float, DefaultSpec::Float(1.0)),
];

const ARENA_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar("left", ScalarType::Float),
    scalar("top", ScalarType::Float),
    scalar("right", ScalarType::Float),
    scalar("bottom", ScalarType::Float),
    scalar("scoreboard_amount", ScalarType::VarUint),
    array("scoreboard_names", ScalarType::StringNt, SCOREBOARD_SLOTS),
    array("scoreboard_scores", ScalarType::Float, SCOREBOARD_SLOTS),
    scalar("leader_x", ScalarType::Float),
    scalar("leader_y", ScalarType::Float),
];

const NAME_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar("name", ScalarType::StringNt),
];

const CAMERA_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar("player", ScalarType::EntId),
    scalar_with(
        "fov",
        ScalarType::Float,
        DefaultSpec::Float(crate::game::constants::view::DEFAULT_FOV),
    ),
    scalar_with("level", ScalarType::VarInt, DefaultSpec::Int(1)),
    scalar("tank", ScalarType::VarInt),
    scalar("camera_x", ScalarType::Float),
    scalar("camera_y", ScalarType::Float),
    scalar("score_bar", ScalarType::Float),
    scalar_with("respawn_level", ScalarType::VarInt, DefaultSpec::Int(1)),
    array("stat_levels", ScalarType::VarInt, STAT_COUNT),
    array("stat_limits", ScalarType::VarInt, STAT_COUNT),
];

const POSITION_FIELDS: &[FieldDef] = &[
    scalar("x", ScalarType::Float),
    scalar("y", ScalarType::Float),
    scalar("angle", ScalarType::Double),
    scalar("motion", ScalarType::VarUint),
];

const STYLE_FIELDS: &[FieldDef] = &[
    scalar_with("flags", ScalarType::VarUint, DefaultSpec::UInt(1)),
    scalar("color", ScalarType::VarUint),
    scalar_with("border_width", ScalarType::Double, DefaultSpec::Double(7.5)),
    scalar_with("opacity", ScalarType::Float, DefaultSpec::Float(1.0)),
    scalar("z_index", ScalarType::VarUint),
];

const SCORE_FIELDS: &[FieldDef] = &[scalar("score", ScalarType::Float)];

const TEAM_FIELDS: &[FieldDef] = &[
    scalar("team_color", ScalarType::VarUint),
    scalar("mothership_x", ScalarType::Float),
    scalar("mothership_y", ScalarType::Float),
    scalar("flags", ScalarType::VarUint),
];

const BARREL_FIELDS: &[FieldDef] = &[
    scalar("flags", ScalarType::VarUint),
    scalar_with("reload_time", ScalarType::Float, DefaultSpec::Float(15.0)),
    scalar("trapezoid_direction", ScalarType::Float),
];

// Field index constants for hot accessors. Must match the tables above.

pub mod relations {
    pub const PARENT: usize = 0;
    pub const OWNER: usize = 1;
    pub const TEAM: usize = 2;
}

pub mod physics {
    pub const FLAGS: usize = 0;
    pub const SIDES: usize = 1;
    pub const SIZE: usize = 2;
    pub const WIDTH: usize = 3;
    pub const ABSORPTION: usize = 4;
    pub const PUSHBACK: usize = 5;
}

pub mod health {
    pub const FLAGS: usize = 0;
    pub const HEALTH: usize = 1;
    pub const MAX_HEALTH: usize = 2;
}

pub mod camera {
    pub const FLAGS: usize = 0;
    pub const PLAYER: usize = 1;
    pub const FOV: usize = 2;
    pub const LEVEL: usize = 3;
    pub const TANK: usize = 4;
    pub const CAMERA_X: usize = 5;
    pub const CAMERA_Y: usize = 6;
    pub const SCORE_BAR: usize = 7;
}

pub mod position {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const ANGLE: usize = 2;
    pub const MOTION: usize = 3;
}

pub mod arena_fields {
    pub const FLAGS: usize = 0;
    pub const LEFT: usize = 1;
    pub const TOP: usize = 2;
    pub const RIGHT: usize = 3;
    pub const BOTTOM: usize = 4;
    pub const SCOREBOARD_AMOUNT: usize = 5;
    pub const SCOREBOARD_NAMES: usize = 6;
    pub const SCOREBOARD_SCORES: usize = 7;
}

pub mod name_fields {
    pub const FLAGS: usize = 0;
    pub const NAME: usize = 1;
}

pub mod score_fields {
    pub const SCORE: usize = 0;
}

// ============================================================================
// Field group instances
// ============================================================================

#[derive(Debug, Clone)]
struct Field {
    value: FieldValue,
    generation: u64,
}

/// One attached group instance: current values plus per-field generations
#[derive(Debug, Clone)]
pub struct FieldGroup {
    id: GroupId,
    fields: Vec<Field>,
}

impl FieldGroup {
    /// New group with every field at its declared default, generation 1
    /// (so a brand-new group always reads as unobserved)
    pub fn new(id: GroupId) -> Self {
        let fields = id
            .fields()
            .iter()
            .map(|def| Field {
                value: def.default_value(),
                generation: 1,
            })
            .collect();
        Self { id, fields }
    }

    #[inline]
    pub fn id(&self) -> GroupId {
        self.id
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> &FieldValue {
        &self.fields[idx].value
    }

    /// Current generation of a field; views compare this against the
    /// generation they last observed
    #[inline]
    pub fn generation(&self, idx: usize) -> u64 {
        self.fields[idx].generation
    }

    /// Write a value; bumps the field generation only when the value
    /// actually changed. Returns whether a change was recorded.
    pub fn write(&mut self, idx: usize, value: FieldValue) -> bool {
        debug_assert!(
            value.matches(self.id.fields()[idx].ty),
            "type mismatch writing {}.{}",
            self.id.name(),
            self.id.fields()[idx].name
        );
        let field = &mut self.fields[idx];
        if field.value == value {
            return false;
        }
        field.value = value;
        field.generation += 1;
        true
    }

    /// Reset every field to its declared default
    pub fn defaults(&mut self) {
        let defs = self.id.fields();
        for idx in 0..defs.len() {
            self.write(idx, defs[idx].default_value());
        }
    }

    /// Copy values from another group of the same kind. Generations carry
    /// over so the copy is dirty for exactly the views that have not yet
    /// observed the source's current values.
    pub fn clone_from_group(&mut self, source: &FieldGroup) {
        debug_assert_eq!(self.id, source.id);
        for (dst, src) in self.fields.iter_mut().zip(source.fields.iter()) {
            dst.value = src.value.clone();
            dst.generation = dst.generation.max(src.generation);
        }
    }
}
