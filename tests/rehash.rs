//! REHASH and the live casemap migration.

mod common;

use common::{TestClient, TestServer};

#[tokio::test]
async fn rehash_requires_oper() {
    let server = TestServer::spawn(17701).await;
    let mut client = TestClient::connect(server.port).await;
    client.register("alice").await;
    client.send("REHASH").await;
    client.wait_for_numeric("481").await;
}

#[tokio::test]
async fn casemap_change_renames_ambiguous_nicks() {
    // Start on ascii, where `nick~` and `nick^` are distinct.
    let server = TestServer::spawn_with(17702, "").await;
    server.rewrite_config_with_casemap("ascii");
    // The server read the rfc1459 config at startup; restart state by
    // rehashing immediately from an oper connection.
    let mut oper = TestClient::connect(server.port).await;
    oper.register("root").await;
    oper.send("OPER root opersecret").await;
    oper.wait_for_numeric("381").await;
    oper.send("REHASH").await;
    oper.wait_for(|l| l.contains("rehashing")).await;

    let mut first = TestClient::connect(server.port).await;
    first.register("nick[").await;
    let mut second = TestClient::connect(server.port).await;
    second.register("nick{").await;

    // Back to rfc1459: the two nicks collide and the newer connection is
    // renamed to its UID.
    server.rewrite_config_with_casemap("rfc1459");
    oper.send("REHASH").await;

    let rename = second.wait_for(|l| l.contains("NICK")).await;
    assert!(rename.starts_with(":nick{!"), "{rename}");
    let notice = second.wait_for(|l| l.contains("no longer valid")).await;
    assert!(notice.contains("changed to your UID"), "{notice}");
    // The survivor keeps the name under the new equivalence.
    let mut probe = TestClient::connect(server.port).await;
    probe.send("NICK NICK{").await;
    probe.wait_for_numeric("433").await;
}

#[tokio::test]
async fn rehash_failure_keeps_running() {
    let server = TestServer::spawn(17703).await;
    let mut oper = TestClient::connect(server.port).await;
    oper.register("root").await;
    oper.send("OPER root opersecret").await;
    oper.wait_for_numeric("381").await;

    std::fs::write(
        server.xline_db_path().parent().unwrap().join("emberd.toml"),
        "[server\nbroken",
    )
    .unwrap();
    oper.send("REHASH").await;
    // The failure comes back as a standard-reply fallback NOTICE.
    let failure = oper.wait_for(|l| l.contains("REHASH")).await;
    assert!(failure.contains("CANNOT_REHASH") || failure.contains("Rehash failed"), "{failure}");

    // Old configuration stays in effect.
    oper.send("MOTD").await;
    oper.wait_for_numeric("376").await;
}
