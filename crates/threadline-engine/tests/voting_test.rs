//! Timed-node voting scenarios.

mod common;

use common::{actor, choice, group, harness, harness_with_remote, node};
use threadline_core::ids::{ChoiceId, GroupId, TimerId};
use threadline_engine::config::{EngineConfig, NoQuorumPolicy};
use threadline_engine::render::RenderInstruction;
use threadline_session::application::timers::ExpiredTimer;
use threadline_voting::domain::poll::VoteScope;

fn trio() -> threadline_core::group::Group {
    group("g1", &[("a", None), ("b", None), ("c", None)])
}

fn pair() -> threadline_core::group::Group {
    group("g1", &[("a", None), ("b", None)])
}

fn group_scope() -> VoteScope {
    VoteScope::Group {
        group_id: GroupId::new("g1"),
    }
}

#[tokio::test]
async fn test_full_quorum_resolves_before_deadline() {
    // Arrange
    let h = harness(&[trio()]);
    h.start_all(&["a", "b", "c"], "crossroads").await;
    let at = node("crossroads");

    // Act
    let first = h
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("x"))
        .await
        .unwrap();
    h.engine
        .on_choice_submitted(&actor("b"), &at, &choice("y"))
        .await
        .unwrap();
    let last = h
        .engine
        .on_choice_submitted(&actor("c"), &at, &choice("x"))
        .await
        .unwrap();

    // Assert
    assert!(matches!(first, RenderInstruction::VoteRecorded { .. }));
    let RenderInstruction::VoteResolved {
        choice_id,
        tally,
        then,
        ..
    } = last
    else {
        panic!("expected resolution, got {last:?}");
    };
    assert_eq!(choice_id, choice("x"));
    assert_eq!(tally.voted, 3);
    assert!(matches!(*then, RenderInstruction::ShowNode(ref v) if v.node_id == node("ridge")));
    for a in ["a", "b", "c"] {
        let session = h.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &node("ridge"));
        assert!(h.engine.timers().get(&actor(a), &TimerId::for_node(&at)).is_none());
        assert!(session.vote(&at).is_none());
    }
    let told_a = h.notifications("a");
    assert_eq!(told_a.len(), 1);
    assert_eq!(told_a[0]["kind"], "vote_resolved");
    assert_eq!(told_a[0]["choice_id"], "x");
    assert!(h.notifications("c").is_empty());
}

#[tokio::test]
async fn test_second_vote_keeps_the_first() {
    // Arrange
    let h = harness(&[trio()]);
    h.start_all(&["a", "b", "c"], "crossroads").await;
    let at = node("crossroads");
    h.engine
        .on_choice_submitted(&actor("a"), &at, &choice("x"))
        .await
        .unwrap();

    // Act
    let again = h
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("y"))
        .await
        .unwrap();

    // Assert
    assert_eq!(
        again,
        RenderInstruction::AlreadyVoted {
            node_id: at.clone(),
            prior: choice("x")
        }
    );
    let tally = h.engine.vote_tally(&actor("a"), &at).unwrap();
    assert_eq!(tally.voted, 1);
    assert_eq!(tally.entries[0].choice_id, choice("x"));
}

#[tokio::test]
async fn test_pair_waits_for_deadline_and_leader_breaks_tie() {
    // Arrange
    let h = harness(&[pair()]);
    h.start_all(&["a", "b"], "crossroads").await;
    let at = node("crossroads");
    h.engine
        .on_choice_submitted(&actor("b"), &at, &choice("x"))
        .await
        .unwrap();
    let second = h
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("y"))
        .await
        .unwrap();
    assert!(matches!(second, RenderInstruction::VoteRecorded { .. }));
    assert_eq!(h.engine.timer_remaining(&actor("a"), &at), 30);

    // Act
    h.clock.advance_secs(31);
    let handled = h.sweep(&EngineConfig::default()).await;

    // Assert
    assert_eq!(handled, 2);
    for a in ["a", "b"] {
        let session = h.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &node("river"));
        assert_eq!(session.choices().last(), Some(&choice("y")));
    }
    assert!(!h.engine.votes().is_open(&group_scope(), &at));
    assert_eq!(h.notifications("b").len(), 1);
}

#[tokio::test]
async fn test_vote_after_deadline_is_closed() {
    let h = harness(&[pair()]);
    h.start_all(&["a", "b"], "crossroads").await;
    h.clock.advance_secs(31);

    let result = h
        .engine
        .on_choice_submitted(&actor("a"), &node("crossroads"), &choice("x"))
        .await
        .unwrap();

    assert_eq!(
        result,
        RenderInstruction::VotingClosed {
            node_id: node("crossroads")
        }
    );
}

#[tokio::test]
async fn test_empty_vote_stalls_everyone_once() {
    // Arrange
    let h = harness(&[pair()]);
    h.start_all(&["a", "b"], "crossroads").await;
    let at = node("crossroads");
    h.clock.advance_secs(31);

    // Act
    h.sweep(&EngineConfig::default()).await;
    let replay = ExpiredTimer {
        actor_id: actor("a"),
        timer_id: TimerId::for_node(&at),
        node_id: at.clone(),
    };
    h.engine
        .on_timer_expired(&replay, NoQuorumPolicy::Stall, 30)
        .await
        .unwrap();

    // Assert
    for a in ["a", "b"] {
        let session = h.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &at);
        assert_eq!(session.choices(), &[ChoiceId::timeout(&at)]);
        let told = h.notifications(a);
        assert_eq!(told.len(), 1);
        assert_eq!(told[0]["kind"], "no_quorum");
        assert_eq!(told[0]["reopened"], false);
    }
    assert_eq!(h.sweep(&EngineConfig::default()).await, 0);
}

#[tokio::test]
async fn test_empty_vote_reopens_with_fresh_deadline() {
    // Arrange
    let h = harness(&[pair()]);
    h.start_all(&["a", "b"], "crossroads").await;
    let at = node("crossroads");
    h.clock.advance_secs(31);
    let config = EngineConfig {
        no_quorum_policy: NoQuorumPolicy::Reopen,
        reopen_seconds: 15,
        ..EngineConfig::default()
    };

    // Act
    let handled = h.sweep(&config).await;

    // Assert
    assert_eq!(handled, 2);
    assert!(h.engine.votes().is_open(&group_scope(), &at));
    assert_eq!(h.engine.timer_remaining(&actor("a"), &at), 15);
    assert_eq!(h.engine.timer_remaining(&actor("b"), &at), 15);
    assert_eq!(h.notifications("b")[0]["reopened"], true);
    let result = h
        .engine
        .on_choice_submitted(&actor("b"), &at, &choice("x"))
        .await
        .unwrap();
    assert!(matches!(result, RenderInstruction::VoteRecorded { .. }));
}

#[tokio::test]
async fn test_lone_actor_at_timed_node_moves_immediately() {
    // Arrange
    let h = harness(&[]);
    h.start_all(&["solo"], "crossroads").await;
    let at = node("crossroads");

    // Act
    let result = h
        .engine
        .on_choice_submitted(&actor("solo"), &at, &choice("y"))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, RenderInstruction::ShowNode(ref v) if v.node_id == node("river")));
    assert!(h.engine.timers().get(&actor("solo"), &TimerId::for_node(&at)).is_none());
}

#[tokio::test]
async fn test_lone_actor_stalls_when_timer_runs_out() {
    let h = harness(&[]);
    h.start_all(&["solo"], "crossroads").await;
    let at = node("crossroads");
    h.clock.advance_secs(30);

    assert_eq!(h.sweep(&EngineConfig::default()).await, 1);

    let session = h.engine.sessions().get(&actor("solo")).unwrap();
    assert_eq!(session.choices(), &[ChoiceId::timeout(&at)]);
    assert_eq!(session.current_node_id(), &at);
}

#[tokio::test]
async fn test_vote_resumes_after_restart_and_resolves_on_quorum() {
    // Arrange
    let before = harness(&[trio()]);
    before.start_all(&["a", "b", "c"], "crossroads").await;
    before.flush().await;
    let after = harness_with_remote(before.remote.clone(), &[trio()]);
    let at = node("crossroads");

    // Act
    let first = after
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("x"))
        .await
        .unwrap();
    after
        .engine
        .on_choice_submitted(&actor("b"), &at, &choice("x"))
        .await
        .unwrap();
    let last = after
        .engine
        .on_choice_submitted(&actor("c"), &at, &choice("y"))
        .await
        .unwrap();

    // Assert
    let RenderInstruction::VoteRecorded { tally, .. } = first else {
        panic!("expected a recorded vote, got {first:?}");
    };
    assert_eq!(tally.expected, 3);
    assert!(matches!(last, RenderInstruction::VoteResolved { ref choice_id, .. } if choice_id == &choice("x")));
    for a in ["a", "b", "c"] {
        let session = after.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &node("ridge"));
    }
}

#[tokio::test]
async fn test_vote_resumed_after_restart_closes_at_deadline() {
    // Arrange
    let before = harness(&[pair()]);
    before.start_all(&["a", "b"], "crossroads").await;
    before.flush().await;
    let after = harness_with_remote(before.remote.clone(), &[pair()]);
    let at = node("crossroads");
    after
        .engine
        .on_choice_submitted(&actor("b"), &at, &choice("y"))
        .await
        .unwrap();
    assert_eq!(after.engine.timer_remaining(&actor("a"), &at), 30);

    // Act
    after.clock.advance_secs(31);
    let handled = after.sweep(&EngineConfig::default()).await;

    // Assert
    assert_eq!(handled, 2);
    for a in ["a", "b"] {
        let session = after.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &node("river"));
    }
}

#[tokio::test]
async fn test_stalled_voter_is_not_given_a_new_vote() {
    let h = harness(&[pair()]);
    h.start_all(&["a", "b"], "crossroads").await;
    h.clock.advance_secs(31);
    h.sweep(&EngineConfig::default()).await;

    let result = h
        .engine
        .on_choice_submitted(&actor("a"), &node("crossroads"), &choice("x"))
        .await
        .unwrap();

    assert_eq!(
        result,
        RenderInstruction::VotingClosed {
            node_id: node("crossroads")
        }
    );
    assert!(!h.engine.votes().is_open(&group_scope(), &node("crossroads")));
}

#[tokio::test]
async fn test_repeat_ballot_after_paying_is_already_voted() {
    // Arrange
    let h = harness(&[trio()]);
    h.start_all(&["a", "b", "c"], "crossroads").await;
    let at = node("crossroads");
    h.engine
        .sessions()
        .update(&actor("a"), |s| s.modify_resource("coins", 5))
        .unwrap();

    // Act
    let paid = h
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("z"))
        .await
        .unwrap();
    let again = h
        .engine
        .on_choice_submitted(&actor("a"), &at, &choice("z"))
        .await
        .unwrap();
    let broke = h
        .engine
        .on_choice_submitted(&actor("b"), &at, &choice("z"))
        .await
        .unwrap();

    // Assert
    assert!(matches!(paid, RenderInstruction::VoteRecorded { .. }));
    assert_eq!(
        again,
        RenderInstruction::AlreadyVoted {
            node_id: at.clone(),
            prior: choice("z")
        }
    );
    assert!(matches!(broke, RenderInstruction::InsufficientResource { required: 5, available: 0, .. }));
    assert_eq!(h.engine.sessions().get(&actor("a")).unwrap().resource("coins"), 0);
    assert_eq!(h.engine.vote_tally(&actor("a"), &at).unwrap().voted, 1);
}
