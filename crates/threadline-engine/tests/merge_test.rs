//! Arc merge barrier scenarios.

mod common;

use std::sync::Arc;

use common::{MEDIC_DM, actor, choice, group, harness, node};
use threadline_core::ids::{ArcId, GroupId};
use threadline_engine::render::{CONTINUE_CHOICE, MergeOutcome, RenderInstruction};

fn party() -> threadline_core::group::Group {
    group(
        "g1",
        &[("b", None), ("a", Some("scout")), ("c", None), ("d", None)],
    )
}

#[tokio::test]
async fn test_group_reunites_when_last_arc_arrives() {
    // Arrange
    let h = harness(&[party()]);
    h.start_all(&["a", "b", "c", "d"], "split").await;
    for a in ["a", "b", "c", "d"] {
        h.engine.continue_into_arc(&actor(a)).await.unwrap();
    }
    let n_main = node("n_main");
    h.engine
        .on_choice_submitted(&actor("b"), &n_main, &choice("hold"))
        .await
        .unwrap();
    h.engine
        .on_choice_submitted(&actor("c"), &n_main, &choice("hold"))
        .await
        .unwrap();

    // Act
    let main_done = h
        .engine
        .on_choice_submitted(&actor("d"), &n_main, &choice("flee"))
        .await
        .unwrap();
    let g = GroupId::new("g1");
    let status = h.engine.arc_wait_status(&g).unwrap();
    let waiting = h
        .engine
        .on_choice_submitted(&actor("b"), &node("reunion"), &choice(CONTINUE_CHOICE))
        .await
        .unwrap();
    let scout_done = h
        .engine
        .on_choice_submitted(&actor("a"), &node("n_scout"), &choice("return"))
        .await
        .unwrap();

    // Assert
    let RenderInstruction::VoteResolved { choice_id, then, .. } = main_done else {
        panic!("expected resolution, got {main_done:?}");
    };
    assert_eq!(choice_id, choice("hold"));
    assert_eq!(
        *then,
        RenderInstruction::WaitingAtMerge {
            merge_node_id: node("reunion"),
            pending: vec![ArcId::new("scout")]
        }
    );
    assert_eq!(status.arrived, vec![ArcId::new("main")]);
    assert_eq!(status.pending, vec![ArcId::new("scout")]);
    assert!(waiting.is_waiting());

    let RenderInstruction::Merged {
        merge_node_id,
        next_node_id,
        ..
    } = scout_done
    else {
        panic!("expected merge, got {scout_done:?}");
    };
    assert_eq!(merge_node_id, node("reunion"));
    assert_eq!(next_node_id, Some(node("summit")));
    assert!(h.engine.arcs().state(&g).is_none());
    assert!(h.engine.arc_wait_status(&g).is_none());
    for a in ["b", "c", "d"] {
        let told = h.notifications(a);
        assert_eq!(told.last().unwrap()["kind"], "merged");
    }
}

#[tokio::test]
async fn test_reunited_group_continues_past_merge() {
    // Arrange
    let h = harness(&[group("g1", &[("a", Some("scout")), ("b", None)])]);
    h.start_all(&["a", "b"], "split").await;
    for a in ["a", "b"] {
        h.engine.continue_into_arc(&actor(a)).await.unwrap();
    }
    h.engine
        .on_choice_submitted(&actor("b"), &node("n_main"), &choice("hold"))
        .await
        .unwrap();
    h.engine
        .on_choice_submitted(&actor("a"), &node("n_scout"), &choice("return"))
        .await
        .unwrap();

    // Act
    let result = h
        .engine
        .on_choice_submitted(&actor("b"), &node("reunion"), &choice(CONTINUE_CHOICE))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, RenderInstruction::ShowNode(ref v) if v.node_id == node("summit")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_arrivals_merge_exactly_once() {
    // Arrange
    let h = harness(&[group("g1", &[("a", Some("scout")), ("b", None)])]);
    h.start_all(&["a", "b"], "split").await;
    let reunion = node("reunion");

    // Act
    let tasks: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|a| {
            let engine = Arc::clone(&h.engine);
            let reunion = reunion.clone();
            tokio::spawn(async move { engine.on_arc_merge_entered(&actor(a), &reunion).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    // Assert
    let merged = outcomes
        .iter()
        .filter(|o| matches!(o, MergeOutcome::Merged { .. }))
        .count();
    let waiting = outcomes
        .iter()
        .filter(|o| matches!(o, MergeOutcome::Waiting { .. }))
        .count();
    assert_eq!(merged, 1);
    assert_eq!(waiting, 1);
    for a in ["a", "b"] {
        let session = h.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &reunion);
    }
}

#[tokio::test]
async fn test_wrong_merge_node_is_rejected() {
    let h = harness(&[party()]);
    h.start_all(&["a", "b", "c", "d"], "split").await;

    let result = h.engine.on_arc_merge_entered(&actor("a"), &node("summit")).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_merge_without_split_behaves_like_plain_node() {
    let h = harness(&[]);
    h.start_all(&["solo"], "reunion").await;

    let outcome = h
        .engine
        .on_arc_merge_entered(&actor("solo"), &node("reunion"))
        .await
        .unwrap();

    assert_eq!(outcome, MergeOutcome::NotInSplit);
}

#[tokio::test]
async fn test_members_moved_by_merge_get_entry_effects() {
    // Arrange
    let h = harness(&[group(
        "g1",
        &[("b", None), ("a", Some("scout")), ("c", Some("medic"))],
    )]);
    h.start_all(&["a", "b", "c"], "split").await;
    for a in ["a", "b", "c"] {
        h.engine.continue_into_arc(&actor(a)).await.unwrap();
    }
    let g = GroupId::new("g1");
    h.engine.arcs().mark_at_merge(&g, &ArcId::new("main")).unwrap();

    // Act
    let result = h
        .engine
        .on_choice_submitted(&actor("a"), &node("n_scout"), &choice("return"))
        .await
        .unwrap();

    // Assert
    assert!(matches!(result, RenderInstruction::Merged { .. }));
    let reunion = node("reunion");
    for a in ["a", "b", "c"] {
        let session = h.engine.sessions().get(&actor(a)).unwrap();
        assert_eq!(session.current_node_id(), &reunion);
        assert!(session.checkpoints().contains(&reunion));
    }
    let medic_dms = h
        .delivery
        .sent_to(&actor("c"))
        .into_iter()
        .filter(|m| m == MEDIC_DM)
        .count();
    assert_eq!(medic_dms, 1);
    assert!(!h.delivery.sent_to(&actor("b")).iter().any(|m| m == MEDIC_DM));
    assert_eq!(h.notifications("c").last().unwrap()["kind"], "merged");
}
