//! Arc coordinator: split, merge barrier and arc queries.
//!
//! A group has at most one split state, keyed by its group id. All barrier
//! transitions run under one guard; the removal of the split state is what
//! makes completion happen exactly once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use threadline_core::clock::SharedClock;
use threadline_core::error::DomainError;
use threadline_core::graph::ArcSplitConfig;
use threadline_core::group::Member;
use threadline_core::ids::{ActorId, ArcId, GroupId, NodeId};
use threadline_core::rng::DeterministicRng;
use threadline_core::store::ArcStateRecord;
use threadline_sync::outbox::{Outbox, SyncOp};
use threadline_sync::reconcile::Reconciler;
use uuid::Uuid;

use crate::domain::arc::{ArcRecord, ArcSplitState, ArcStatus};
use crate::domain::assignment::assign_members;

/// What happened when an actor reached the merge node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeArrival {
    /// This arrival completed the barrier. Returned to exactly one caller.
    Merged {
        /// The convergence node.
        merge_node_id: NodeId,
        /// Every member of the former split.
        members: Vec<ActorId>,
    },
    /// Other arcs are still on their way.
    Waiting {
        /// Arcs that have not arrived.
        pending: Vec<ArcId>,
    },
    /// The group has no split, or the actor is in none of its arcs.
    NotInSplit,
}

/// Owns the split states of every group.
pub struct ArcCoordinator {
    states: Mutex<HashMap<GroupId, ArcSplitState>>,
    outbox: Outbox,
    reconciler: Reconciler,
    clock: SharedClock,
}

impl std::fmt::Debug for ArcCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArcCoordinator")
            .field("splits", &self.states().len())
            .finish_non_exhaustive()
    }
}

impl ArcCoordinator {
    /// Creates a coordinator with no splits. Changes are mirrored through
    /// `outbox`; misses are read back through `reconciler`.
    #[must_use]
    pub fn new(outbox: Outbox, reconciler: Reconciler, clock: SharedClock) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            outbox,
            reconciler,
            clock,
        }
    }

    fn states(&self) -> MutexGuard<'_, HashMap<GroupId, ArcSplitState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mirror(&self, state: &ArcSplitState) {
        match serde_json::to_value(state) {
            Ok(payload) => self.outbox.enqueue(SyncOp::PutArcState(ArcStateRecord {
                group_id: state.group_id.clone(),
                split_node_id: state.split_node_id.clone(),
                payload,
                updated_at: self.clock.now(),
            })),
            Err(e) => tracing::warn!(group = %state.group_id, error = %e, "arc state not serializable"),
        }
    }

    /// Splits `group` into the arcs of `config`.
    ///
    /// Re-entering the same split node returns the existing state unchanged.
    /// A different split node starts a new split episode.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a malformed config, or when no
    /// arc ends up with members.
    pub fn split(
        &self,
        group: &GroupId,
        split_node: &NodeId,
        config: &ArcSplitConfig,
        members: &[Member],
        rng: &mut dyn DeterministicRng,
    ) -> Result<ArcSplitState, DomainError> {
        let mut states = self.states();
        if let Some(existing) = states.get(group) {
            if &existing.split_node_id == split_node {
                tracing::debug!(group = %group, node = %split_node, "split already assigned");
                return Ok(existing.clone());
            }
        }

        let now = self.clock.now();
        let arcs: Vec<ArcRecord> = assign_members(config, members, rng)?
            .into_iter()
            .zip(&config.arcs)
            .filter(|(assignment, _)| !assignment.members.is_empty())
            .map(|(assignment, def)| ArcRecord {
                arc_id: assignment.arc_id,
                label: def.label.clone(),
                description: def.description.clone(),
                members: assignment.members,
                entry_node_id: def.entry_node_id.clone(),
                current_node_id: def.entry_node_id.clone(),
                status: ArcStatus::Active,
                started_at: now,
            })
            .collect();
        if arcs.is_empty() {
            return Err(DomainError::Validation(format!(
                "split at {split_node} has no members to assign"
            )));
        }

        let state = ArcSplitState {
            id: Uuid::new_v4(),
            group_id: group.clone(),
            split_node_id: split_node.clone(),
            merge_node_id: config.merge_node_id.clone(),
            arcs,
            created_at: now,
        };
        tracing::info!(
            group = %group,
            node = %split_node,
            split_id = %state.id,
            arcs = state.arcs.len(),
            "group split into arcs"
        );
        self.mirror(&state);
        states.insert(group.clone(), state.clone());
        Ok(state)
    }

    /// Marks `arc` as waiting at the merge node. Completed arcs stay completed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotFound` if the group has no split or no such arc.
    pub fn mark_at_merge(&self, group: &GroupId, arc: &ArcId) -> Result<(), DomainError> {
        let mut states = self.states();
        let state = states
            .get_mut(group)
            .ok_or_else(|| DomainError::NotFound(format!("split state for {group}")))?;
        let record = state
            .arc_mut(arc)
            .ok_or_else(|| DomainError::NotFound(format!("arc {arc} in {group}")))?;
        record.status = record.status.advance(ArcStatus::WaitingAtMerge);
        tracing::debug!(group = %group, arc = %arc, "arc at merge");
        self.mirror(state);
        Ok(())
    }

    /// Whether every retained arc of `group` is waiting at the merge node.
    #[must_use]
    pub fn all_at_merge(&self, group: &GroupId) -> bool {
        self.states().get(group).is_some_and(ArcSplitState::all_at_merge)
    }

    /// Ends the split and returns the merge node.
    ///
    /// # Errors
    ///
    /// * `DomainError::NotReady` while some arc has not arrived; nothing changes.
    /// * `DomainError::NotFound` if there is no split, including after a
    ///   completed merge.
    pub fn complete(&self, group: &GroupId) -> Result<NodeId, DomainError> {
        let mut states = self.states();
        let state = states
            .get(group)
            .ok_or_else(|| DomainError::NotFound(format!("split state for {group}")))?;
        if !state.all_at_merge() {
            return Err(DomainError::NotReady {
                group_id: group.clone(),
                pending: state.pending_arcs(),
            });
        }
        let state = states
            .remove(group)
            .ok_or_else(|| DomainError::NotFound(format!("split state for {group}")))?;
        Ok(self.close(state).merge_node_id)
    }

    /// Marks the arc of `actor` as arrived and completes the merge if it was
    /// the last one, in a single step.
    pub fn arrive_at_merge(&self, group: &GroupId, actor: &ActorId) -> MergeArrival {
        let mut states = self.states();
        let Some(state) = states.get_mut(group) else {
            return MergeArrival::NotInSplit;
        };
        let Some(arc) = state.arc_of_mut(actor) else {
            return MergeArrival::NotInSplit;
        };
        arc.status = arc.status.advance(ArcStatus::WaitingAtMerge);
        let arc_id = arc.arc_id.clone();

        if !state.all_at_merge() {
            tracing::debug!(group = %group, arc = %arc_id, "arc waiting at merge");
            let pending = state.pending_arcs();
            self.mirror(state);
            return MergeArrival::Waiting { pending };
        }

        match states.remove(group) {
            Some(state) => {
                let state = self.close(state);
                MergeArrival::Merged {
                    members: state.members(),
                    merge_node_id: state.merge_node_id,
                }
            }
            None => MergeArrival::NotInSplit,
        }
    }

    /// Final step of a merge for a state already taken out of the map.
    fn close(&self, mut state: ArcSplitState) -> ArcSplitState {
        state.mark_completed();
        self.outbox
            .enqueue(SyncOp::DeleteArcState(state.group_id.clone()));
        tracing::info!(
            group = %state.group_id,
            merge = %state.merge_node_id,
            arcs = state.arcs.len(),
            "merge completed"
        );
        state
    }

    /// The arc `actor` belongs to.
    #[must_use]
    pub fn player_arc(&self, group: &GroupId, actor: &ActorId) -> Option<ArcId> {
        self.states()
            .get(group)
            .and_then(|s| s.arc_of(actor))
            .map(|a| a.arc_id.clone())
    }

    /// A copy of `arc` in the split of `group`.
    #[must_use]
    pub fn arc(&self, group: &GroupId, arc: &ArcId) -> Option<ArcRecord> {
        self.states().get(group).and_then(|s| s.arc(arc)).cloned()
    }

    /// Members of `arc`; empty when the group has no such arc.
    #[must_use]
    pub fn arc_members(&self, group: &GroupId, arc: &ArcId) -> Vec<ActorId> {
        self.arc(group, arc).map(|a| a.members).unwrap_or_default()
    }

    /// Whether `actor` is alone in their arc.
    #[must_use]
    pub fn is_solo(&self, group: &GroupId, actor: &ActorId) -> bool {
        self.states()
            .get(group)
            .and_then(|s| s.arc_of(actor))
            .is_some_and(ArcRecord::is_solo)
    }

    /// Records that the arc of `actor` is now at `node`. Returns whether the
    /// actor is in a split.
    pub fn update_arc_node(&self, group: &GroupId, actor: &ActorId, node: &NodeId) -> bool {
        let mut states = self.states();
        let Some(state) = states.get_mut(group) else {
            return false;
        };
        let Some(arc) = state.arc_of_mut(actor) else {
            return false;
        };
        if &arc.current_node_id != node {
            arc.current_node_id = node.clone();
            self.mirror(state);
        }
        true
    }

    /// Arcs of `group` still on their way to the merge node.
    #[must_use]
    pub fn pending_arcs(&self, group: &GroupId) -> Vec<ArcId> {
        self.states()
            .get(group)
            .map(ArcSplitState::pending_arcs)
            .unwrap_or_default()
    }

    /// A copy of the local split state of `group`. Never reads the remote store.
    #[must_use]
    pub fn state(&self, group: &GroupId) -> Option<ArcSplitState> {
        self.states().get(group).cloned()
    }

    /// Returns the split state of `group`, rebuilding it from the remote
    /// store on a miss. A state created locally in the meantime wins. An
    /// unreadable stored payload counts as a miss.
    ///
    /// # Errors
    ///
    /// Returns the remote store's error when the lookup itself failed.
    pub async fn restore(&self, group: &GroupId) -> Result<Option<ArcSplitState>, DomainError> {
        if let Some(state) = self.state(group) {
            return Ok(Some(state));
        }
        let Some(record) = self.reconciler.fetch_arc_state(group).await? else {
            return Ok(None);
        };
        let restored: ArcSplitState = match serde_json::from_value(record.payload) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(group = %group, error = %e, "stored arc state unreadable");
                return Ok(None);
            }
        };
        let mut states = self.states();
        let state = states
            .entry(group.clone())
            .or_insert_with(|| {
                tracing::info!(group = %group, split_id = %restored.id, "arc state restored from remote");
                restored
            })
            .clone();
        Ok(Some(state))
    }
}
