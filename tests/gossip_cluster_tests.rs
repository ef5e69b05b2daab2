//! Membership convergence across real nodes.
mod common;

use std::time::Duration;

use common::{eventually, TestCluster};
use sdfs::gossip::{LocalStatus, MemberStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_members_discover_each_other() {
    let cluster = TestCluster::start(3).await;

    let nodes = &cluster.nodes;
    let agreed = eventually(Duration::from_secs(10), || async move {
        for node in nodes.iter() {
            if node.detector().live_members().await.len() != 2 {
                return false;
            }
        }
        true
    })
    .await;
    assert!(agreed);

    for node in cluster.nodes.iter() {
        let live = node.detector().live_members().await;
        assert!(!live.contains(&node.address()));
        let snapshot = node.detector().snapshot().await;
        assert_eq!(snapshot[0].identity, node.identity());
        assert!(snapshot.iter().all(|m| m.status == MemberStatus::Joined));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_graceful_leave_shrinks_every_ring() {
    let cluster = TestCluster::start(3).await;
    let leaver = cluster.nodes[2].clone();

    leaver.leave().await.unwrap();
    assert_eq!(leaver.detector().status().await, LocalStatus::AfterLeft);
    leaver.stop();

    let stayers = &cluster.nodes[..2];
    let leaver_addr = leaver.address();
    let shrunk = eventually(Duration::from_secs(10), || async move {
        for node in stayers.iter() {
            let ring = node.storage().ring_view().await;
            if ring.contains(&leaver_addr) || ring.len() != 2 {
                return false;
            }
        }
        true
    })
    .await;
    assert!(shrunk);

    for node in stayers.iter() {
        assert_eq!(node.detector().live_members().await.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashed_member_is_removed() {
    let cluster = TestCluster::start(3).await;
    let victim = cluster.nodes[1].clone();
    let victim_addr = victim.address();
    victim.stop();

    let survivors = [cluster.nodes[0].clone(), cluster.nodes[2].clone()];
    let survivors_ref = &survivors;
    let removed = eventually(Duration::from_secs(10), || async move {
        for node in survivors_ref.iter() {
            if node.detector().live_members().await.contains(&victim_addr)
                || node.storage().ring_view().await.contains(&victim_addr)
            {
                return false;
            }
        }
        true
    })
    .await;
    assert!(removed);
}
