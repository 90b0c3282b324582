//! Mode changes over the wire: limits, keys, bans, prefix modes, batching.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};

#[tokio::test]
async fn user_limit_turns_away_sixth_joiner() {
    let server = TestServer::spawn(17661).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;

    alice.send("MODE #test +l 5").await;
    alice.wait_for(|l| l.contains("MODE #test +l 5")).await;

    let mut members = Vec::new();
    for i in 2..=5 {
        let mut c = TestClient::connect(server.port).await;
        c.register_and_join(&format!("user{i}"), "#test").await;
        members.push(c);
    }

    let mut sixth = TestClient::connect(server.port).await;
    sixth.register("user6").await;
    sixth.send("JOIN #test").await;
    let refused = sixth.wait_for_numeric("471").await;
    assert_eq!(
        refused,
        ":irc.example.net 471 user6 #test :Cannot join channel (+l)"
    );
}

#[tokio::test]
async fn channel_key_gates_join() {
    let server = TestServer::spawn(17662).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#vault").await;
    alice.send("MODE #vault +k sesame").await;
    alice.wait_for(|l| l.contains("+k sesame")).await;

    let mut bob = TestClient::connect(server.port).await;
    bob.register("bob").await;
    bob.send("JOIN #vault").await;
    bob.wait_for_numeric("475").await;
    bob.send("JOIN #vault wrong").await;
    bob.wait_for_numeric("475").await;
    bob.send("JOIN #vault sesame").await;
    bob.wait_for_numeric("366").await;
}

#[tokio::test]
async fn ban_mask_blocks_join_until_removed() {
    let server = TestServer::spawn(17663).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;

    alice.send("MODE #test +b *!*@127.0.0.1").await;
    alice.wait_for(|l| l.contains("+b")).await;

    let mut bob = TestClient::connect(server.port).await;
    bob.register("bob").await;
    bob.send("JOIN #test").await;
    let refused = bob.wait_for_numeric("474").await;
    assert!(refused.contains("Cannot join channel (+b)"), "{refused}");

    alice.send("MODE #test -b *!*@127.0.0.1").await;
    alice.wait_for(|l| l.contains("-b")).await;
    bob.send("JOIN #test").await;
    bob.wait_for_numeric("366").await;
}

#[tokio::test]
async fn ban_list_query_replies_367_368() {
    let server = TestServer::spawn(17664).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    alice.send("MODE #test +b *!*@bad.example").await;
    alice.wait_for(|l| l.contains("+b")).await;

    alice.send("MODE #test +b").await;
    let entry = alice.wait_for_numeric("367").await;
    assert!(entry.contains("*!*@bad.example"), "{entry}");
    assert!(entry.contains("alice"), "{entry}");
    alice.wait_for_numeric("368").await;
}

#[tokio::test]
async fn op_and_voice_are_prefix_modes() {
    let server = TestServer::spawn(17665).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.register_and_join("bob", "#test").await;
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("MODE #test +ov bob bob").await;
    let change = bob.wait_for(|l| l.contains("MODE #test")).await;
    assert!(change.ends_with("MODE #test +ov bob bob"), "{change}");

    // NAMES shows the stacked prefixes for multi-prefix clients only.
    bob.send("NAMES #test").await;
    let names = bob.wait_for_numeric("353").await;
    assert!(names.contains("@bob"), "{names}");
    assert!(!names.contains("@+bob"), "{names}");

    // Now bob outranks nobody but can set modes.
    bob.send("MODE #test +m").await;
    alice.wait_for(|l| l.contains("MODE #test +m")).await;
}

#[tokio::test]
async fn mode_changes_without_rank_denied() {
    let server = TestServer::spawn(17666).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.register_and_join("bob", "#test").await;

    bob.send("MODE #test +n").await;
    bob.wait_for_numeric("482").await;
}

#[tokio::test]
async fn batch_announces_in_one_line() {
    let server = TestServer::spawn(17667).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.register_and_join("bob", "#test").await;
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("MODE #test +ntk sesame").await;
    let line = bob.wait_for(|l| l.contains("MODE #test")).await;
    assert!(line.ends_with("MODE #test +ntk sesame"), "{line}");
    // No second MODE line follows for the same batch.
    assert!(bob.try_recv(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn mode_query_hides_key_from_non_members() {
    let server = TestServer::spawn(17668).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    alice.send("MODE #test +k sesame").await;
    alice.wait_for(|l| l.contains("+k")).await;

    alice.send("MODE #test").await;
    let own_view = alice.wait_for_numeric("324").await;
    assert!(own_view.contains("sesame"), "{own_view}");
    alice.wait_for_numeric("329").await;

    let mut bob = TestClient::connect(server.port).await;
    bob.register("bob").await;
    bob.send("MODE #test").await;
    let outside_view = bob.wait_for_numeric("324").await;
    assert!(!outside_view.contains("sesame"), "{outside_view}");
    assert!(outside_view.contains("<key>"), "{outside_view}");
}

#[tokio::test]
async fn invalid_limit_parameter_rejected() {
    let server = TestServer::spawn(17669).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;

    alice.send("MODE #test +l lots").await;
    alice.wait_for_numeric("696").await;
}

#[tokio::test]
async fn user_modes_self_only() {
    let server = TestServer::spawn(17670).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register("alice").await;
    bob.register("bob").await;

    alice.send("MODE bob +i").await;
    alice.wait_for_numeric("502").await;

    alice.send("MODE alice +iw").await;
    let change = alice.wait_for(|l| l.contains("MODE alice")).await;
    assert!(change.ends_with("+iw"), "{change}");

    alice.send("MODE alice").await;
    let modes = alice.wait_for_numeric("221").await;
    assert!(modes.contains("+iw"), "{modes}");
}
