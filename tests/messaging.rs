//! PRIVMSG/NOTICE delivery, exactly-once semantics, capability shaping.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};

#[tokio::test]
async fn channel_message_reaches_each_member_once() {
    let server = TestServer::spawn(17671).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    let mut carol = TestClient::connect(server.port).await;
    alice.register("alice").await;
    bob.register("bob").await;
    carol.register("carol").await;
    // alice and bob share BOTH channels; carol only one.
    for chan in ["#one", "#two"] {
        alice.send(&format!("JOIN {chan}")).await;
        alice.wait_for_numeric("366").await;
        bob.send(&format!("JOIN {chan}")).await;
        bob.wait_for_numeric("366").await;
        alice.wait_for(|l| l.contains("JOIN")).await;
    }
    carol.send("JOIN #one").await;
    carol.wait_for_numeric("366").await;
    alice.wait_for(|l| l.contains("JOIN")).await;
    bob.wait_for(|l| l.contains("JOIN")).await;

    alice.send("PRIVMSG #one :hi").await;

    let to_bob = bob.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(to_bob.starts_with(":alice!"), "{to_bob}");
    assert!(to_bob.ends_with("PRIVMSG #one :hi"), "{to_bob}");
    let to_carol = carol.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(to_carol.ends_with("PRIVMSG #one :hi"), "{to_carol}");

    // Exactly once each, and no echo to the sender without the cap.
    assert!(bob.try_recv(Duration::from_millis(300)).await.is_none());
    assert!(carol.try_recv(Duration::from_millis(300)).await.is_none());
    assert!(alice.try_recv(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn echo_message_cap_returns_copy() {
    let server = TestServer::spawn(17672).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.send("CAP LS 302").await;
    alice.send("CAP REQ :echo-message").await;
    alice.send("CAP END").await;
    alice.register("alice").await;
    alice.send("JOIN #test").await;
    alice.wait_for_numeric("366").await;

    alice.send("PRIVMSG #test :talking to myself").await;
    let echo = alice.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(echo.ends_with(":talking to myself"), "{echo}");
}

#[tokio::test]
async fn direct_message_and_away_reply() {
    let server = TestServer::spawn(17673).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register("alice").await;
    bob.register("bob").await;

    bob.send("AWAY :gone fishing").await;
    bob.wait_for_numeric("306").await;

    alice.send("PRIVMSG bob :you there?").await;
    let dm = bob.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(dm.starts_with(":alice!"), "{dm}");
    let away = alice.wait_for_numeric("301").await;
    assert!(away.ends_with(":gone fishing"), "{away}");

    bob.send("AWAY").await;
    bob.wait_for_numeric("305").await;
}

#[tokio::test]
async fn no_external_messages_mode() {
    let server = TestServer::spawn(17674).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut outsider = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    alice.send("MODE #test +n").await;
    alice.wait_for(|l| l.contains("+n")).await;
    outsider.register("rando").await;

    outsider.send("PRIVMSG #test :let me in").await;
    let refused = outsider.wait_for_numeric("404").await;
    assert!(refused.contains("Cannot send to channel"), "{refused}");
    // NOTICE generates no error reply at all.
    outsider.send("NOTICE #test :psst").await;
    assert!(outsider.try_recv(Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn moderated_channel_needs_voice() {
    let server = TestServer::spawn(17675).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.register_and_join("bob", "#test").await;
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("MODE #test +m").await;
    bob.wait_for(|l| l.contains("+m")).await;

    bob.send("PRIVMSG #test :unvoiced").await;
    bob.wait_for_numeric("404").await;

    alice.send("MODE #test +v bob").await;
    bob.wait_for(|l| l.contains("+v bob")).await;
    bob.send("PRIVMSG #test :voiced now").await;
    let heard = alice.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(heard.ends_with(":voiced now"), "{heard}");
}

#[tokio::test]
async fn status_prefix_target_reaches_ops_only() {
    let server = TestServer::spawn(17676).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    let mut carol = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.register_and_join("bob", "#test").await;
    carol.register_and_join("carol", "#test").await;
    alice.wait_for(|l| l.contains("JOIN")).await;
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("MODE #test +o bob").await;
    bob.wait_for(|l| l.contains("+o bob")).await;
    carol.wait_for(|l| l.contains("+o bob")).await;

    alice.send("PRIVMSG @#test :ops meeting").await;
    let heard = bob.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(heard.ends_with(":ops meeting"), "{heard}");
    assert!(
        carol.try_recv(Duration::from_millis(300)).await.is_none(),
        "carol is not an op and must not hear it"
    );
}

#[tokio::test]
async fn missing_text_gets_412() {
    let server = TestServer::spawn(17677).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register("alice").await;
    alice.send("PRIVMSG #test").await;
    alice.wait_for_numeric("412").await;
}

#[tokio::test]
async fn xinfo_reports_channel_activity_after_speaking() {
    let server = TestServer::spawn(17679).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;

    // A quiet channel has no activity entry.
    alice.send("XINFO #test").await;
    let mut saw_active = false;
    loop {
        let line = alice.recv().await;
        if line.contains(" 774 ") {
            break;
        }
        saw_active |= line.contains(" active ");
    }
    assert!(!saw_active);

    alice.send("PRIVMSG #test :waking things up").await;
    alice.send("XINFO #test").await;
    alice
        .wait_for(|l| l.contains(" 773 ") && l.contains(" active "))
        .await;
    alice.wait_for_numeric("774").await;
}

#[tokio::test]
async fn client_tags_relayed_only_with_message_tags() {
    let server = TestServer::spawn(17678).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut tagged = TestClient::connect(server.port).await;
    let mut plain = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;

    tagged.send("CAP LS 302").await;
    tagged.send("CAP REQ :message-tags").await;
    tagged.send("CAP END").await;
    tagged.register_and_join("tagged", "#test").await;
    plain.register_and_join("plain", "#test").await;
    // Drain joins.
    alice.wait_for(|l| l.contains("JOIN")).await;
    alice.wait_for(|l| l.contains("JOIN")).await;
    tagged.wait_for(|l| l.contains("JOIN")).await;

    alice.send("@+drink=tea PRIVMSG #test :cheers").await;
    let with_tag = tagged.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(with_tag.contains("+drink=tea"), "{with_tag}");
    let without = plain.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(!without.contains("+drink"), "{without}");
}
