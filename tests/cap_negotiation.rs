//! IRCv3 capability negotiation.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn ls_req_ack_end() {
    let server = TestServer::spawn(17681).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("CAP LS 302").await;
    let ls = client.wait_for(|l| l.contains("CAP * LS")).await;
    assert!(ls.starts_with(":irc.example.net CAP * LS :"), "{ls}");
    assert!(ls.contains("multi-prefix"), "{ls}");
    assert!(ls.contains("echo-message"), "{ls}");
    assert!(ls.contains("standard-replies"), "{ls}");

    client.send("CAP REQ :multi-prefix").await;
    let ack = client.wait_for(|l| l.contains("ACK")).await;
    assert_eq!(ack, ":irc.example.net CAP * ACK :multi-prefix");

    // Registration is held until CAP END.
    client.send("NICK alice").await;
    client.send("USER a 0 * :Alice").await;
    assert!(client
        .try_recv(std::time::Duration::from_millis(400))
        .await
        .is_none());

    client.send("CAP END").await;
    client.wait_for_numeric("001").await;
}

#[tokio::test]
async fn unknown_cap_naks_whole_request() {
    let server = TestServer::spawn(17682).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("CAP LS 302").await;
    client.wait_for(|l| l.contains("LS")).await;
    // One valid and one bogus: the whole request fails atomically.
    client.send("CAP REQ :multi-prefix bogus-cap").await;
    let nak = client.wait_for(|l| l.contains("NAK")).await;
    assert_eq!(nak, ":irc.example.net CAP * NAK :multi-prefix bogus-cap");

    client.send("CAP END").await;
    client.send("NICK alice").await;
    client.send("USER a 0 * :Alice").await;
    client.wait_for_numeric("001").await;

    // Nothing was enabled.
    client.send("CAP LIST").await;
    let list = client.wait_for(|l| l.contains("LIST")).await;
    assert!(!list.contains("multi-prefix"), "{list}");
}

#[tokio::test]
async fn cap_req_can_disable_with_dash() {
    let server = TestServer::spawn(17683).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("CAP LS 302").await;
    client.wait_for(|l| l.contains("LS")).await;
    client.send("CAP REQ :echo-message server-time").await;
    client.wait_for(|l| l.contains("ACK")).await;
    client.send("CAP REQ :-server-time").await;
    client.wait_for(|l| l.contains("ACK")).await;
    client.send("CAP END").await;
    client.send("NICK alice").await;
    client.send("USER a 0 * :Alice").await;
    client.wait_for_numeric("001").await;

    client.send("CAP LIST").await;
    let list = client.wait_for(|l| l.contains("LIST")).await;
    assert!(list.contains("echo-message"), "{list}");
    assert!(!list.contains("server-time"), "{list}");
}

#[tokio::test]
async fn multi_prefix_changes_names_rendering() {
    let server = TestServer::spawn(17684).await;
    let mut fancy = TestClient::connect(server.port).await;
    fancy.send("CAP LS 302").await;
    fancy.send("CAP REQ :multi-prefix").await;
    fancy.send("CAP END").await;
    fancy.register_and_join("fancy", "#test").await;
    // Give the creator voice on top of op.
    fancy.send("MODE #test +v fancy").await;
    fancy.wait_for(|l| l.contains("+v")).await;

    fancy.send("NAMES #test").await;
    let names = fancy.wait_for_numeric("353").await;
    assert!(names.contains("@+fancy"), "{names}");
}

#[tokio::test]
async fn invalid_subcommand_gets_410() {
    let server = TestServer::spawn(17685).await;
    let mut client = TestClient::connect(server.port).await;
    client.send("CAP FROB").await;
    client.wait_for_numeric("410").await;
}

#[tokio::test]
async fn server_time_tag_on_delivered_messages() {
    let server = TestServer::spawn(17686).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#test").await;
    bob.send("CAP LS 302").await;
    bob.send("CAP REQ :server-time").await;
    bob.send("CAP END").await;
    bob.register_and_join("bob", "#test").await;
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("PRIVMSG #test :tick").await;
    let line = bob.wait_for(|l| l.contains("PRIVMSG")).await;
    assert!(line.starts_with("@time="), "{line}");
}
