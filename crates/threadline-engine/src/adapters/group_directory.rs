//! In-memory group membership.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use threadline_core::error::DomainError;
use threadline_core::group::{Group, GroupDirectory, MemberStatus};
use threadline_core::ids::{ActorId, GroupId};

/// Groups registered by the host.
#[derive(Debug, Default)]
pub struct StaticGroupDirectory {
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl StaticGroupDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a group.
    pub fn upsert(&self, group: Group) {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.id.clone(), group);
    }

    pub fn remove(&self, group: &GroupId) -> Option<Group> {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group)
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn group_of(&self, actor: &ActorId) -> Result<Option<Group>, DomainError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        Ok(groups
            .values()
            .find(|g| {
                g.members
                    .iter()
                    .any(|m| &m.actor_id == actor && m.status != MemberStatus::Left)
            })
            .cloned())
    }
}
