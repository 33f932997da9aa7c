//! Recovery after a restart with empty local state.

mod common;

use std::sync::Arc;

use common::{actor, choice, group, harness, harness_through, harness_with_remote, node};
use threadline_core::ids::{ArcId, GroupId};
use threadline_core::store::RemoteStore;
use threadline_engine::render::RenderInstruction;
use threadline_test_support::FlakyRemoteStore;

#[tokio::test]
async fn test_session_survives_restart() {
    // Arrange
    let before = harness(&[]);
    before.start_all(&["a"], "camp").await;
    before
        .engine
        .on_choice_submitted(&actor("a"), &node("camp"), &choice("set_out"))
        .await
        .unwrap();
    before.flush().await;

    // Act
    let after = harness_with_remote(before.remote.clone(), &[]);
    assert!(!after.engine.sessions().contains(&actor("a")));
    let result = after
        .engine
        .on_choice_submitted(&actor("a"), &node("crossroads"), &choice("x"))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, RenderInstruction::ShowNode(ref v) if v.node_id == node("ridge")));
    let session = after.engine.sessions().get(&actor("a")).unwrap();
    assert_eq!(session.checkpoints(), &[node("camp")]);
    assert_eq!(session.choices(), &[choice("set_out"), choice("x")]);
}

#[tokio::test]
async fn test_unknown_actor_is_not_found_after_restart() {
    let after = harness(&[]);

    let result = after
        .engine
        .on_choice_submitted(&actor("nobody"), &node("camp"), &choice("set_out"))
        .await;

    assert!(matches!(
        result,
        Err(threadline_core::error::DomainError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_split_is_restored_lazily() {
    // Arrange
    let party = group(
        "g1",
        &[("b", None), ("a", Some("scout")), ("c", None), ("d", None)],
    );
    let before = harness(std::slice::from_ref(&party));
    before.start_all(&["a", "b", "c", "d"], "split").await;
    before.flush().await;
    let g = GroupId::new("g1");
    assert!(before.remote.get_arc_state(&g).await.unwrap().is_some());

    // Act
    let after = harness_with_remote(before.remote.clone(), &[party]);
    assert!(after.engine.arcs().state(&g).is_none());
    let view = after.engine.continue_into_arc(&actor("c")).await.unwrap();

    // Assert
    assert!(matches!(view, RenderInstruction::ShowNode(ref v) if v.node_id == node("n_main")));
    let state = after.engine.arcs().state(&g).unwrap();
    assert_eq!(state.arc_of(&actor("a")).map(|a| a.arc_id.clone()), Some(ArcId::new("scout")));
    assert_eq!(
        after.engine.arcs().arc_members(&g, &ArcId::new("main")),
        vec![actor("b"), actor("c"), actor("d")]
    );
}

#[tokio::test]
async fn test_split_restore_is_retried_after_failed_read() {
    // Arrange
    let party = group(
        "g1",
        &[("b", None), ("a", Some("scout")), ("c", None), ("d", None)],
    );
    let before = harness(std::slice::from_ref(&party));
    before.start_all(&["a", "b", "c", "d"], "split").await;
    before.flush().await;
    let flaky = Arc::new(FlakyRemoteStore::new(before.remote.clone(), 1));
    let after = harness_through(flaky.clone(), before.remote.clone(), &[party]);
    let g = GroupId::new("g1");

    // Act
    let failed = after.engine.continue_into_arc(&actor("c")).await;
    let retried = after.engine.continue_into_arc(&actor("c")).await.unwrap();

    // Assert
    assert!(failed.is_err());
    assert_eq!(flaky.failures_left(), 0);
    assert!(matches!(retried, RenderInstruction::ShowNode(ref v) if v.node_id == node("n_main")));
    assert_eq!(
        after.engine.arcs().player_arc(&g, &actor("a")),
        Some(ArcId::new("scout"))
    );
}
