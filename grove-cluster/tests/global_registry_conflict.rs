//! Gossiped global name registration and deterministic conflict resolution
//! across two connected nodes.

mod support;

use grove_shared::GroveError;

use support::{node_id, start_node, wait_connected};

#[tokio::test]
async fn registering_first_wins_and_the_loser_sees_the_winner_after_sync() {
    let a_id = node_id("a", 19401);
    let b_id = node_id("b", 19402);

    let node_a = start_node("a", 19401, Vec::new()).await.unwrap();
    let node_b = start_node("b", 19402, vec![a_id.to_string()]).await.unwrap();
    wait_connected(&node_b, &a_id).await;
    wait_connected(&node_a, &b_id).await;

    // A registers "leader" for one of its own local ids first.
    let a_server = grove_shared::ServerId::new();
    node_a.cluster.register_global("leader", a_server).unwrap();

    // Give the registry_sync frame time to reach B, then B's own attempt
    // to register the same name for a different server must conflict.
    wait_for(|| node_b.cluster.whereis("leader").is_some()).await;

    let b_server = grove_shared::ServerId::new();
    let err = node_b
        .cluster
        .globals
        .register("leader", b_server, b_id.clone())
        .unwrap_err();
    match err {
        GroveError::GlobalNameConflict { name, owner } => {
            assert_eq!(name, "leader");
            assert_eq!(owner, a_id);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let resolved = node_b.cluster.whereis("leader").unwrap();
    assert_eq!(resolved.id(), a_server);
    assert_eq!(resolved.node(), Some(&a_id));
}

#[tokio::test]
async fn unregister_is_gossiped_and_releases_the_name_on_every_node() {
    let a_id = node_id("a", 19403);
    let b_id = node_id("b", 19404);

    let node_a = start_node("a", 19403, Vec::new()).await.unwrap();
    let node_b = start_node("b", 19404, vec![a_id.to_string()]).await.unwrap();
    wait_connected(&node_b, &a_id).await;
    wait_connected(&node_a, &b_id).await;

    let a_server = grove_shared::ServerId::new();
    node_a.cluster.register_global("singleton", a_server).unwrap();
    wait_for(|| node_b.cluster.whereis("singleton").is_some()).await;

    node_a.cluster.unregister_global("singleton");
    wait_for(|| node_b.cluster.whereis("singleton").is_none()).await;

    assert!(node_a.cluster.whereis("singleton").is_none());
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition did not become true in time");
}
