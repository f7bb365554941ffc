//! Movement integration and collision response
//!
//! Velocity lives on the entity record, position in the replicated
//! Position group, so every integration step that actually moves an
//! entity bumps the field generations the synchronizer diffs against.
//! Collision response is impulse-only: overlapping circles push each
//! other apart scaled by their absorption and pushback fields. Damage is
//! a separate concern layered above this module.

use crate::game::constants::physics::{BASE_ACCEL, FRICTION, PUSH_SCALE, REST_EPSILON};
use crate::game::registry::{EntityId, EntityRegistry};
use crate::game::spatial::SpatialGrid;
use crate::game::fields::{physics, GroupId};
use crate::util::vec2::Vec2;

/// Apply movement intent as acceleration
pub fn accelerate(registry: &mut EntityRegistry, id: EntityId, intent: Vec2) {
    if let Some(entity) = registry.get_mut(id) {
        entity.velocity += intent * BASE_ACCEL;
    }
}

/// Integrate one tick: velocity into position, friction damping, and a
/// rest cutoff so near-still entities stop generating field churn
pub fn integrate(registry: &mut EntityRegistry, arena_half_extent: f32) {
    for id in registry.live_ids() {
        let Some(entity) = registry.get_mut(id) else {
            continue;
        };
        if !entity.has_group(GroupId::Position) {
            continue;
        }
        entity.velocity *= FRICTION;
        if entity.velocity.length_sq() < REST_EPSILON * REST_EPSILON {
            entity.velocity = Vec2::ZERO;
            continue;
        }
        let mut next = entity.position() + entity.velocity;
        next.x = next.x.clamp(-arena_half_extent, arena_half_extent);
        next.y = next.y.clamp(-arena_half_extent, arena_half_extent);
        entity.set_position(next);
    }
}

/// One overlapping pair and the impulse to apply to each side
struct Contact {
    a: EntityId,
    b: EntityId,
    impulse_a: Vec2,
    impulse_b: Vec2,
}

/// Resolve circle-circle overlaps among spatially-near entities. Impulses
/// are collected first and applied after, so resolution order within a
/// tick does not bias the outcome.
pub fn resolve_collisions(registry: &mut EntityRegistry, spatial: &SpatialGrid) {
    let mut contacts: Vec<Contact> = Vec::new();

    for a in registry.live_ids() {
        let Some(entity_a) = registry.get(a) else {
            continue;
        };
        let radius_a = entity_a.footprint();
        if radius_a <= 0.0 || entity_a.needs_delete {
            continue;
        }
        let pos_a = entity_a.position();

        for b in spatial.query(pos_a.x, pos_a.y, radius_a, radius_a) {
            // Each pair once
            if b <= a {
                continue;
            }
            let Some(entity_b) = registry.get(b) else {
                continue;
            };
            let radius_b = entity_b.footprint();
            if radius_b <= 0.0 || entity_b.needs_delete {
                continue;
            }
            // Attached entities never collide with their own tree
            if registry.resolve_root(a) == registry.resolve_root(b) {
                continue;
            }
            let pos_b = entity_b.position();
            let dist_sq = pos_a.distance_sq_to(pos_b);
            let reach = radius_a + radius_b;
            if dist_sq >= reach * reach {
                continue;
            }

            let away = if dist_sq > f32::EPSILON {
                (pos_b - pos_a).normalize()
            } else {
                // Coincident centers; separate along a fixed axis
                Vec2::new(1.0, 0.0)
            };
            let overlap = reach - dist_sq.sqrt();
            let (absorb_a, push_a) = response_factors(entity_a);
            let (absorb_b, push_b) = response_factors(entity_b);
            contacts.push(Contact {
                a,
                b,
                impulse_a: -away * (overlap * PUSH_SCALE * absorb_a * push_b),
                impulse_b: away * (overlap * PUSH_SCALE * absorb_b * push_a),
            });
        }
    }

    for contact in contacts {
        if let Some(entity) = registry.get_mut(contact.a) {
            entity.velocity += contact.impulse_a;
        }
        if let Some(entity) = registry.get_mut(contact.b) {
            entity.velocity += contact.impulse_b;
        }
    }
}

/// (absorption, pushback) from the Physics group; how hard this entity is
/// shoved and how hard it shoves others
fn response_factors(entity: &crate::game::registry::Entity) -> (f32, f32) {
    match entity.group(GroupId::Physics) {
        Some(group) => (
            group.get(physics::ABSORPTION).as_float(),
            group.get(physics::PUSHBACK).as_float(),
        ),
        None => (1.0, 0.0),
    }
}
