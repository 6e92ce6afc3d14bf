mod common;

use common::{MANUAL, TestServer};
use moonphase::error::GameError;
use moonphase::session::{ActionKind, GameId, PlayerId, Role};

async fn day_phase_game(server: &TestServer) -> (GameId, Vec<PlayerId>) {
    let (id, players) = server.started_game(5).await;
    server.engine.force_end_phase(&id).await.unwrap();
    (id, players)
}

#[tokio::test(flavor = "multi_thread")]
async fn messages_are_trimmed_and_truncated() {
    let server = TestServer::start(MANUAL).await;
    let (id, players) = day_phase_game(&server).await;

    server
        .engine
        .add_chat(&id, &players[0], "  hello village  ")
        .await
        .unwrap();
    let long = "x".repeat(500);
    server.engine.add_chat(&id, &players[1], &long).await.unwrap();

    let chat = server
        .engine
        .summary(&id, None)
        .unwrap()
        .recent_chat
        .unwrap();
    assert_eq!(chat[0].message, "hello village");
    assert_eq!(chat[1].message.chars().count(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn blank_messages_are_rejected() {
    let server = TestServer::start(MANUAL).await;
    let (id, players) = day_phase_game(&server).await;

    for text in ["", "   ", "\t\n"] {
        let err = server.engine.add_chat(&id, &players[0], text).await.unwrap_err();
        assert!(matches!(err, GameError::EmptyMessage), "text {text:?}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limit_is_three_per_window_per_player() {
    let server = TestServer::start(MANUAL).await;
    let (id, players) = day_phase_game(&server).await;

    for i in 0..3 {
        server
            .engine
            .add_chat(&id, &players[0], &format!("message {i}"))
            .await
            .unwrap();
    }
    let err = server
        .engine
        .add_chat(&id, &players[0], "one too many")
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::RateLimited));

    // The window is per player; others are unaffected
    server
        .engine
        .add_chat(&id, &players[1], "still talking")
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_outside_day_or_by_the_dead_is_rejected() {
    let server = TestServer::start(MANUAL).await;
    let (id, players) = server.started_game(5).await;

    // Night: nobody talks
    let err = server
        .engine
        .add_chat(&id, &players[0], "psst")
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::WrongPhase { .. }));

    // Kill a villager, then let them try to talk during the day
    let wolf = server.player_with_role(&id, &players, Role::Werewolf);
    let victim = players.iter().find(|p| **p != wolf).cloned().unwrap();
    server
        .engine
        .record_action(&id, &wolf, ActionKind::WerewolfVote, Some(&victim))
        .await
        .unwrap();
    server.engine.force_end_phase(&id).await.unwrap();

    let err = server
        .engine
        .add_chat(&id, &victim, "I have information!")
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::ActorDead));
}
