//! Replicas that receive the same updates in different orders end up with
//! identical local trees.

mod common;

use blocksync_engine::schema::{Attributes, BlockType};
use blocksync_engine::{Command, SyncSession};
use common::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

struct Scenario {
    base: SyncSession,
    updates: Vec<Vec<u8>>,
}

/// Two peers editing overlapping parts of one document, each recording the
/// updates its commands produce
fn concurrent_edits() -> Scenario {
    let mut base = new_session("Shared");
    let page = base.page_id().clone();
    let first = add(&mut base, &page, 0, "first block");
    let second = add(&mut base, &page, 1, "second block");

    let mut left = fork(&base);
    let mut right = fork(&base);
    let mut left_out = left.subscribe_outgoing();
    let mut right_out = right.subscribe_outgoing();

    let inserted = add(&mut left, &page, 2, "left adds");
    left.execute(&Command::SplitBlock {
        block_id: first.clone(),
        offset: 5,
    })
    .unwrap();
    left.execute(&Command::Indent { block_id: inserted }).unwrap();

    right
        .execute(&Command::InsertText {
            text_id: text_id(&right, &first),
            offset: 0,
            content: ">> ".into(),
            attributes: Attributes::new(),
        })
        .unwrap();
    right
        .execute(&Command::ChangeType {
            block_id: second.clone(),
            ty: BlockType::Quote,
            attributes: Attributes::new(),
        })
        .unwrap();
    right
        .execute(&insert(&second, 0, BlockType::BulletedList, "right nests"))
        .unwrap();

    let mut updates = collect(&mut left_out);
    updates.extend(collect(&mut right_out));
    assert_eq!(updates.len(), 6);
    Scenario { base, updates }
}

fn replay(base: &SyncSession, updates: &[&Vec<u8>]) -> SyncSession {
    let mut replica = fork(base);
    for update in updates {
        // Out of order updates wait inside the CRDT until their dependencies arrive
        replica.apply_remote_update(update).unwrap();
    }
    replica
}

#[test]
fn test_in_order_and_reversed_delivery_converge() {
    let scenario = concurrent_edits();
    let in_order: Vec<&Vec<u8>> = scenario.updates.iter().collect();
    let reversed: Vec<&Vec<u8>> = scenario.updates.iter().rev().collect();

    let a = replay(&scenario.base, &in_order);
    let b = replay(&scenario.base, &reversed);

    assert_eq!(a.snapshot(), b.snapshot());
    assert_consistent(&a);
    assert_consistent(&b);
    assert_eq!(a.tree().node_count(), 6);
}

#[test]
fn test_shuffled_delivery_converges() {
    let scenario = concurrent_edits();
    let in_order: Vec<&Vec<u8>> = scenario.updates.iter().collect();
    let expected = replay(&scenario.base, &in_order).snapshot();

    for seed in 0..16 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<&Vec<u8>> = scenario.updates.iter().collect();
        order.shuffle(&mut rng);

        let replica = replay(&scenario.base, &order);
        assert_eq!(replica.snapshot(), expected, "seed {seed}");
        assert_consistent(&replica);
    }
}

#[test]
fn test_peers_converge_after_exchange() {
    let mut base = new_session("Peers");
    let page = base.page_id().clone();
    add(&mut base, &page, 0, "root text");

    let mut peers: Vec<SyncSession> = (0..3).map(|_| fork(&base)).collect();
    for (i, peer) in peers.iter_mut().enumerate() {
        let page = peer.page_id().clone();
        add(peer, &page, 0, &format!("peer {i}"));
    }

    // Exchange pairwise until everyone has everything
    for _ in 0..2 {
        for i in 0..peers.len() {
            for j in (i + 1)..peers.len() {
                let (left, right) = peers.split_at_mut(j);
                sync_pair(&mut left[i], &mut right[0]);
            }
        }
    }

    let expected = peers[0].snapshot();
    assert_eq!(expected.nodes.len(), 5);
    for peer in &peers {
        assert_eq!(peer.snapshot(), expected);
        assert_consistent(peer);
    }
}
