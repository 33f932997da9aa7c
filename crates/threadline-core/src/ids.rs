//! Strongly typed identifiers.
//!
//! Story content and the chat platform both hand us opaque string ids, so
//! every id is a transparent newtype over `String`. Mixing an actor id with
//! a node id is a compile error instead of a routing bug.

use serde::{Deserialize, Serialize};

/// Generates a string newtype with the standard derives and conversions.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// A human participant whose progress is tracked independently.
    ActorId
}

define_id! {
    /// A group (party) of actors sharing a traversal.
    GroupId
}

define_id! {
    /// A story graph.
    StoryId
}

define_id! {
    /// A node in a story graph.
    NodeId
}

define_id! {
    /// A choice offered by a node.
    ChoiceId
}

define_id! {
    /// An arc declared by an arc split node.
    ArcId
}

define_id! {
    /// A named per-actor deadline.
    TimerId
}

impl TimerId {
    /// The canonical timer id for the shared decision window of `node`.
    #[must_use]
    pub fn for_node(node: &NodeId) -> Self {
        Self(format!("{node}:timer"))
    }
}

impl ChoiceId {
    /// The synthetic choice recorded when a deadline passes unhandled.
    #[must_use]
    pub fn timeout(node: &NodeId) -> Self {
        Self(format!("timeout:{node}"))
    }
}
