//! Partitioning of group members into arcs.
//!
//! Role-based splits fill arcs in three passes: required roles, then
//! preferred roles, then a random draw for whatever capacity is still open.
//! Random splits only do the draw. Members left after every fixed-capacity
//! arc is full go to the last arc declared `remaining`, or to the last arc
//! when none is. Every candidate ends up in exactly one arc.

use std::collections::HashSet;

use threadline_core::error::DomainError;
use threadline_core::graph::{ArcDefinition, ArcSplitConfig, PlayerCount, SplitMode};
use threadline_core::group::Member;
use threadline_core::ids::{ActorId, ArcId};
use threadline_core::rng::DeterministicRng;

/// Members of one arc, before empty arcs are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Arc from the split config.
    pub arc_id: ArcId,
    /// Members placed in the arc, possibly none.
    pub members: Vec<ActorId>,
}

fn validate(config: &ArcSplitConfig, candidates: &[Member]) -> Result<(), DomainError> {
    if config.arcs.is_empty() {
        return Err(DomainError::Validation("arc split declares no arcs".into()));
    }
    if config.merge_node_id.as_str().is_empty() {
        return Err(DomainError::Validation("arc split has no merge node".into()));
    }
    let mut ids = HashSet::new();
    if let Some(dup) = config.arcs.iter().find(|a| !ids.insert(&a.id)) {
        return Err(DomainError::Validation(format!("arc {} declared twice", dup.id)));
    }
    let has_remaining = config
        .arcs
        .iter()
        .any(|a| a.player_count == PlayerCount::Remaining);
    let fixed: u32 = config
        .arcs
        .iter()
        .filter_map(|a| match a.player_count {
            PlayerCount::Fixed(n) => Some(n),
            PlayerCount::Remaining => None,
        })
        .sum();
    if fixed == 0 && !has_remaining {
        return Err(DomainError::Validation("arc split has zero capacity".into()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = candidates.iter().find(|m| !seen.insert(&m.actor_id)) {
        return Err(DomainError::Validation(format!(
            "{} listed twice for the split",
            dup.actor_id
        )));
    }
    Ok(())
}

fn capacity(arc: &ArcDefinition) -> Option<usize> {
    match arc.player_count {
        PlayerCount::Fixed(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        PlayerCount::Remaining => None,
    }
}

/// Moves pool members whose role is in `roles` into `slot` until `cap` is met.
fn pull_by_role(pool: &mut Vec<&Member>, slot: &mut Vec<ActorId>, roles: &[String], cap: usize) {
    let mut i = 0;
    while slot.len() < cap && i < pool.len() {
        let matches = pool[i]
            .role
            .as_ref()
            .is_some_and(|role| roles.contains(role));
        if matches {
            slot.push(pool.remove(i).actor_id.clone());
        } else {
            i += 1;
        }
    }
}

/// Assigns every candidate to exactly one arc of `config`. The result keeps
/// declaration order and may contain empty arcs.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a config with no arcs, no merge
/// node, duplicate arc ids or zero capacity, and for duplicate candidates.
pub fn assign_members(
    config: &ArcSplitConfig,
    candidates: &[Member],
    rng: &mut dyn DeterministicRng,
) -> Result<Vec<Assignment>, DomainError> {
    validate(config, candidates)?;

    let mut pool: Vec<&Member> = candidates.iter().collect();
    let mut slots: Vec<Vec<ActorId>> = vec![Vec::new(); config.arcs.len()];

    if config.split_mode == SplitMode::RoleBased {
        for (arc, slot) in config.arcs.iter().zip(slots.iter_mut()) {
            if let Some(cap) = capacity(arc) {
                pull_by_role(&mut pool, slot, &arc.required_roles, cap);
            }
        }
        for (arc, slot) in config.arcs.iter().zip(slots.iter_mut()) {
            if let Some(cap) = capacity(arc) {
                pull_by_role(&mut pool, slot, &arc.preferred_roles, cap);
            }
        }
    }

    for (arc, slot) in config.arcs.iter().zip(slots.iter_mut()) {
        let Some(cap) = capacity(arc) else { continue };
        while slot.len() < cap && !pool.is_empty() {
            let last = u32::try_from(pool.len() - 1).unwrap_or(u32::MAX);
            let drawn = usize::try_from(rng.next_u32_range(0, last)).unwrap_or(0);
            slot.push(pool.remove(drawn.min(pool.len() - 1)).actor_id.clone());
        }
    }

    if !pool.is_empty() {
        let sink = config
            .arcs
            .iter()
            .rposition(|a| a.player_count == PlayerCount::Remaining)
            .unwrap_or(config.arcs.len() - 1);
        slots[sink].extend(pool.drain(..).map(|m| m.actor_id.clone()));
    }

    Ok(config
        .arcs
        .iter()
        .zip(slots)
        .map(|(arc, members)| Assignment {
            arc_id: arc.id.clone(),
            members,
        })
        .collect())
}
