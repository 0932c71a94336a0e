// Lobby access rules: passwords, capacity and the update policy.

mod support;

use serde_json::json;
use support::{unique_game, Client};

async fn create_lobby(client: &mut Client, packet: serde_json::Value) -> String {
    client.send(packet).await;
    client.recv_type("joined").await["lobby"]
        .as_str()
        .expect("lobby code")
        .to_string()
}

#[tokio::test]
async fn wrong_password_is_rejected_without_joining() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(&mut a, json!({"type": "create", "password": "pw"})).await;

    let mut b = Client::connect().await;
    b.hello(&game).await;

    // Missing and wrong passwords both fail.
    b.send(json!({"type": "join", "rid": "r1", "lobby": code}))
        .await;
    let error = b.recv_type("error").await;
    assert_eq!(error["code"], "invalid-password");
    assert_eq!(error["rid"], "r1");

    b.send(json!({"type": "join", "rid": "r2", "lobby": code, "password": "wrong"}))
        .await;
    let error = b.recv_type("error").await;
    assert_eq!(error["code"], "invalid-password");

    // The member set was never touched and the right password still works.
    b.send(json!({"type": "join", "rid": "r3", "lobby": code, "password": "pw"}))
        .await;
    let joined = b.recv_type("joined").await;
    assert_eq!(joined["lobbyInfo"]["playerCount"], 2);
}

#[tokio::test]
async fn password_on_a_passwordless_lobby_is_ignored() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(&mut a, json!({"type": "create"})).await;

    let mut c = Client::connect().await;
    c.hello(&game).await;
    c.send(json!({"type": "join", "lobby": code, "password": "x"}))
        .await;
    c.recv_type("joined").await;
}

#[tokio::test]
async fn full_lobby_rejects_the_next_join() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(&mut a, json!({"type": "create", "maxPlayers": 2})).await;

    let mut b = Client::connect().await;
    b.hello(&game).await;
    b.send(json!({"type": "join", "lobby": code})).await;
    b.recv_type("joined").await;

    let mut c = Client::connect().await;
    c.hello(&game).await;
    c.send(json!({"type": "join", "rid": "r1", "lobby": code}))
        .await;
    let error = c.recv_type("error").await;
    assert_eq!(error["code"], "lobby-is-full");
    assert_eq!(error["rid"], "r1");
}

#[tokio::test]
async fn unknown_lobby_code_is_not_found() {
    let game = unique_game();
    let mut a = Client::connect().await;
    a.hello(&game).await;

    a.send(json!({"type": "join", "rid": "r1", "lobby": "ZZZZZ"}))
        .await;
    let error = a.recv_type("error").await;
    assert_eq!(error["code"], "lobby-not-found");
}

#[tokio::test]
async fn default_policy_lets_only_the_creator_update() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(
        &mut a,
        json!({"type": "create", "customData": {"map": "plains"}}),
    )
    .await;

    let mut b = Client::connect().await;
    b.hello(&game).await;
    b.send(json!({"type": "join", "lobby": code})).await;
    b.recv_type("joined").await;

    b.send(json!({
        "type": "lobbyUpdate",
        "rid": "r1",
        "customData": {"map": "forest"},
    }))
    .await;
    let error = b.recv_type("error").await;
    assert_eq!(error["code"], "not-allowed");

    // The lobby is unchanged; the creator's update goes through.
    a.send(json!({
        "type": "lobbyUpdate",
        "rid": "r2",
        "customData": {"map": "swamp"},
    }))
    .await;
    let updated = a.recv_type("lobbyUpdated").await;
    assert_eq!(updated["lobbyInfo"]["customData"]["map"], "swamp");

    let notified = b.recv_type("lobbyUpdated").await;
    assert_eq!(notified["lobbyInfo"]["customData"]["map"], "swamp");
}

#[tokio::test]
async fn policy_none_locks_everyone_out() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    create_lobby(&mut a, json!({"type": "create", "canUpdateBy": "none"})).await;

    a.send(json!({"type": "lobbyUpdate", "rid": "r1", "public": true}))
        .await;
    let error = a.recv_type("error").await;
    assert_eq!(error["code"], "not-allowed");
}

#[tokio::test]
async fn leader_policy_follows_the_election() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(&mut a, json!({"type": "create", "canUpdateBy": "leader"})).await;

    let mut b = Client::connect().await;
    let (b_id, _) = b.hello(&game).await;
    b.send(json!({"type": "join", "lobby": code})).await;
    b.recv_type("joined").await;

    // Not the leader yet.
    b.send(json!({"type": "lobbyUpdate", "rid": "r1", "public": true}))
        .await;
    let error = b.recv_type("error").await;
    assert_eq!(error["code"], "not-allowed");

    // After the creator leaves, leadership moves to b.
    a.send(json!({"type": "close"})).await;
    let leader = b.recv_type("leader").await;
    assert_eq!(leader["leader"], b_id);

    b.send(json!({"type": "lobbyUpdate", "rid": "r2", "public": true}))
        .await;
    let updated = b.recv_type("lobbyUpdated").await;
    assert_eq!(updated["rid"], "r2");
    assert_eq!(updated["lobbyInfo"]["public"], true);
}

#[tokio::test]
async fn updates_can_rotate_the_password() {
    let game = unique_game();

    let mut a = Client::connect().await;
    a.hello(&game).await;
    let code = create_lobby(&mut a, json!({"type": "create"})).await;

    a.send(json!({"type": "lobbyUpdate", "rid": "r1", "password": "letmein"}))
        .await;
    let updated = a.recv_type("lobbyUpdated").await;
    assert_eq!(updated["lobbyInfo"]["hasPassword"], true);

    let mut b = Client::connect().await;
    b.hello(&game).await;
    b.send(json!({"type": "join", "rid": "r2", "lobby": code}))
        .await;
    let error = b.recv_type("error").await;
    assert_eq!(error["code"], "invalid-password");

    b.send(json!({"type": "join", "rid": "r3", "lobby": code, "password": "letmein"}))
        .await;
    b.recv_type("joined").await;
}
