//! Shared helpers for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use threadline_core::group::{Group, GroupStatus, Member, MemberStatus};
use threadline_core::ids::{ActorId, ChoiceId, GroupId, NodeId, StoryId};
use threadline_core::store::RemoteStore;
use threadline_engine::adapters::group_directory::StaticGroupDirectory;
use threadline_engine::adapters::story_graph::StaticStoryGraph;
use threadline_engine::config::EngineConfig;
use threadline_engine::engine::{Engine, EngineDeps};
use threadline_engine::expiry::EngineExpiryHandler;
use threadline_engine::render::RenderInstruction;
use threadline_sync::memory_store::InMemoryRemoteStore;
use threadline_sync::outbox::OutboxWorker;
use threadline_test_support::{ManualClock, MockRng, RecordingDelivery};
use tokio::sync::Mutex;

/// Four-act expedition used by every scenario.
///
/// `camp` -> timed `crossroads` -> `ridge` | `river` -> `split` into a solo
/// scout arc and a main arc -> `reunion` merge -> `summit`. The two
/// `broken_*` splits point at nodes the story lacks; no other node leads
/// to them.
pub const STORY: &str = r#"
id: expedition
entry: camp
nodes:
  - id: camp
    type: choice
    checkpoint: true
    choices:
      - { id: set_out, label: "Set out", next_node_id: crossroads }
      - { id: buy_map, label: "Buy a map", cost: { coins: 5 }, next_node_id: crossroads }
  - id: crossroads
    type: timed
    timer: { duration_seconds: 30 }
    choices:
      - { id: x, label: "Take the ridge", next_node_id: ridge }
      - { id: y, label: "Follow the river", next_node_id: river }
      - { id: z, label: "Pay the ferryman", cost: { coins: 5 }, next_node_id: river }
  - id: ridge
    type: narrative
    next_node_id: split
  - id: river
    type: narrative
    next_node_id: split
  - id: split
    type: arc_split
    arc_split:
      mode: role_based
      merge: reunion
      arcs:
        - { id: scout, label: "Scout ahead", player_count: 1, entry: n_scout, required_roles: [scout] }
        - { id: main, label: "Main party", player_count: remaining, entry: n_main }
  - id: n_scout
    type: choice
    arc_context: scout
    dm_deliveries:
      - { recipient_role: scout, text: "You spot smoke beyond the pass." }
    choices:
      - { id: return, label: "Head back", next_node_id: reunion }
  - id: n_main
    type: timed
    arc_context: main
    timer: { duration_seconds: 20 }
    choices:
      - { id: hold, label: "Hold the camp", next_node_id: reunion }
      - { id: flee, label: "Break camp", next_node_id: reunion }
  - id: reunion
    type: arc_merge
    checkpoint: true
    dm_deliveries:
      - { recipient_role: medic, text: "Someone is hurt. Check the packs." }
    next_node_id: summit
  - id: summit
    type: narrative
  - id: broken_merge
    type: arc_split
    arc_split:
      mode: random
      merge: nowhere
      arcs:
        - { id: all, label: "Everyone", player_count: remaining, entry: n_main }
  - id: broken_entry
    type: arc_split
    arc_split:
      mode: random
      merge: reunion
      arcs:
        - { id: lost, label: "Lost", player_count: 1, entry: n_void }
        - { id: all, label: "Everyone", player_count: remaining, entry: n_main }
"#;

pub const SCOUT_DM: &str = "You spot smoke beyond the pass.";

pub const MEDIC_DM: &str = "Someone is hurt. Check the packs.";

pub fn story() -> StoryId {
    StoryId::new("expedition")
}

pub fn actor(id: &str) -> ActorId {
    ActorId::new(id)
}

pub fn node(id: &str) -> NodeId {
    NodeId::new(id)
}

pub fn choice(id: &str) -> ChoiceId {
    ChoiceId::new(id)
}

/// An active group led by its first member. Each entry is `(actor, role)`.
pub fn group(id: &str, members: &[(&str, Option<&str>)]) -> Group {
    Group {
        id: GroupId::new(id),
        leader_id: ActorId::new(members[0].0),
        status: GroupStatus::Active,
        members: members
            .iter()
            .map(|(actor, role)| Member {
                actor_id: ActorId::new(*actor),
                role: role.map(str::to_owned),
                status: MemberStatus::Active,
            })
            .collect(),
    }
}

/// An engine over in-process adapters plus handles to drive and observe it.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub clock: Arc<ManualClock>,
    pub remote: Arc<InMemoryRemoteStore>,
    pub delivery: Arc<RecordingDelivery>,
    pub groups: Arc<StaticGroupDirectory>,
    pub worker: Mutex<OutboxWorker>,
}

impl Harness {
    /// Applies every queued remote write.
    pub async fn flush(&self) -> usize {
        self.worker.lock().await.drain().await
    }

    /// Runs one timer sweep with the given configuration.
    pub async fn sweep(&self, config: &EngineConfig) -> usize {
        let handler = EngineExpiryHandler::new(Arc::clone(&self.engine), config);
        self.engine.timers().sweep_once(&handler).await
    }

    /// Starts every actor on the expedition at `at`.
    pub async fn start_all(&self, actors: &[&str], at: &str) -> Vec<RenderInstruction> {
        let mut views = Vec::with_capacity(actors.len());
        for a in actors {
            let view = self
                .engine
                .start_story(&actor(a), &story(), &node(at))
                .await
                .unwrap();
            views.push(view);
        }
        views
    }

    /// Notifications sent to `actor`, parsed as JSON.
    pub fn notifications(&self, to: &str) -> Vec<serde_json::Value> {
        self.delivery
            .sent_to(&actor(to))
            .iter()
            .filter_map(|m| serde_json::from_str(m).ok())
            .collect()
    }
}

/// A harness with a fresh remote store and the given groups.
pub fn harness(groups: &[Group]) -> Harness {
    harness_with_remote(Arc::new(InMemoryRemoteStore::new()), groups)
}

/// A harness over an existing remote store, as after a process restart.
pub fn harness_with_remote(remote: Arc<InMemoryRemoteStore>, groups: &[Group]) -> Harness {
    harness_through(remote.clone(), remote, groups)
}

/// A harness whose engine reaches `remote` only through `store`, a wrapper
/// around it.
pub fn harness_through(
    store: Arc<dyn RemoteStore>,
    remote: Arc<InMemoryRemoteStore>,
    groups: &[Group],
) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let delivery = Arc::new(RecordingDelivery::new());
    let directory = Arc::new(StaticGroupDirectory::new());
    for g in groups {
        directory.upsert(g.clone());
    }
    let (engine, worker) = Engine::new(EngineDeps {
        graph: Arc::new(StaticStoryGraph::from_yaml(STORY).unwrap()),
        groups: directory.clone(),
        delivery: delivery.clone(),
        remote: store,
        clock: clock.clone(),
        rng: Box::new(MockRng),
    });
    Harness {
        engine: Arc::new(engine),
        clock,
        remote,
        delivery,
        groups: directory,
        worker: Mutex::new(worker),
    }
}
