//! Connection registration flows.

mod common;

use std::time::Duration;

use common::{TestClient, TestServer};

#[tokio::test]
async fn nick_user_yields_welcome() {
    let server = TestServer::spawn(17641).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("NICK alice").await;
    client.send("USER a 0 * :Alice").await;

    let welcome = client.wait_for_numeric("001").await;
    assert!(
        welcome.starts_with(":irc.example.net 001 alice :Welcome"),
        "unexpected 001: {welcome}"
    );
    // The full burst continues through ISUPPORT and the MOTD.
    let isupport = client.wait_for_numeric("005").await;
    assert!(isupport.contains("CASEMAPPING=rfc1459"), "{isupport}");
    client.wait_for_numeric("376").await;
}

#[tokio::test]
async fn reversed_order_also_registers() {
    let server = TestServer::spawn(17642).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("USER a 0 * :Alice").await;
    client.send("NICK bob").await;
    client.wait_for_numeric("001").await;
}

#[tokio::test]
async fn nick_collision_gets_433() {
    let server = TestServer::spawn(17643).await;
    let mut alice = TestClient::connect(server.port).await;
    alice.register("alice").await;

    let mut intruder = TestClient::connect(server.port).await;
    intruder.send("NICK Alice").await;
    let reply = intruder.wait_for_numeric("433").await;
    assert_eq!(
        reply,
        ":irc.example.net 433 * Alice :Nickname is already in use"
    );

    // A different spelling that is equal under rfc1459 also collides.
    intruder.send("NICK ALICE").await;
    intruder.wait_for_numeric("433").await;
}

#[tokio::test]
async fn commands_require_registration() {
    let server = TestServer::spawn(17644).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("JOIN #test").await;
    let reply = client.wait_for_numeric("451").await;
    assert!(reply.contains("You have not registered"), "{reply}");

    // PING works before registration.
    client.send("PING :token").await;
    let pong = client.wait_for(|l| l.contains("PONG")).await;
    assert!(pong.ends_with(":token"), "{pong}");
}

#[tokio::test]
async fn erroneous_nick_rejected() {
    let server = TestServer::spawn(17645).await;
    let mut client = TestClient::connect(server.port).await;

    client.send("NICK 1bad").await;
    client.wait_for_numeric("432").await;
    client.send("NICK #worse").await;
    client.wait_for_numeric("432").await;

    // A valid nick still registers afterwards.
    client.send("NICK fine").await;
    client.send("USER f 0 * :Fine").await;
    client.wait_for_numeric("001").await;
}

#[tokio::test]
async fn unknown_command_gets_421() {
    let server = TestServer::spawn(17646).await;
    let mut client = TestClient::connect(server.port).await;
    client.register("alice").await;

    client.send("FLURBLE x y z").await;
    let reply = client.wait_for_numeric("421").await;
    assert!(reply.contains("FLURBLE"), "{reply}");
}

#[tokio::test]
async fn oversize_line_gets_417() {
    let server = TestServer::spawn(17647).await;
    let mut client = TestClient::connect(server.port).await;
    client.register("alice").await;

    let long = format!("PRIVMSG #x :{}", "y".repeat(600));
    client.send(&long).await;
    client.wait_for_numeric("417").await;
}

#[tokio::test]
async fn quit_closes_with_error_line() {
    let server = TestServer::spawn(17648).await;
    let mut client = TestClient::connect(server.port).await;
    client.register("alice").await;

    client.send("QUIT :off to bed").await;
    let error = client
        .wait_for(|l| l.starts_with("ERROR :Closing link"))
        .await;
    assert!(error.contains("off to bed"), "{error}");
}

#[tokio::test]
async fn nick_change_is_broadcast_to_channel() {
    let server = TestServer::spawn(17649).await;
    let mut alice = TestClient::connect(server.port).await;
    let mut bob = TestClient::connect(server.port).await;
    alice.register_and_join("alice", "#room").await;
    bob.register_and_join("bob", "#room").await;
    // Drain bob's join as seen by alice.
    alice.wait_for(|l| l.contains("JOIN")).await;

    alice.send("NICK alicia").await;
    let seen_by_bob = bob.wait_for(|l| l.contains("NICK")).await;
    assert!(seen_by_bob.starts_with(":alice!"), "{seen_by_bob}");
    assert!(seen_by_bob.ends_with("NICK alicia"), "{seen_by_bob}");
    // The changer sees their own rename too.
    alice
        .wait_for(|l| l.contains("NICK") && l.contains("alicia"))
        .await;
}

#[tokio::test]
async fn whitespace_only_line_penalized_not_fatal() {
    let server = TestServer::spawn(17650).await;
    let mut client = TestClient::connect(server.port).await;
    client.register("alice").await;

    client.send("   ").await;
    // Connection survives; next command still works.
    client.send("MOTD").await;
    client.wait_for_numeric("376").await;
    // No stray disconnect.
    assert!(client.try_recv(Duration::from_millis(200)).await.is_none());
}
