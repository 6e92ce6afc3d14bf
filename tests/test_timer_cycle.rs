mod common;

use std::time::Duration;

use common::{FAST, TestServer};
use moonphase::session::Phase;

#[tokio::test(flavor = "multi_thread")]
async fn phases_cycle_unattended_until_someone_wins() {
    let server = TestServer::start(FAST).await;
    let (id, _) = server.started_game(5).await;

    // With nobody voting, the game just oscillates; watch a few cycles
    let mut seen_night = false;
    let mut seen_day = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        let summary = server.engine.summary(&id, None).unwrap();
        assert!(!summary.ended, "no votes means no deaths, so no winner");
        match summary.phase {
            Phase::Night => seen_night = true,
            Phase::Day => seen_day = true,
            other => panic!("unexpected phase {other}"),
        }
        assert!(summary.phase_end.is_some(), "a deadline is always armed");
    }
    assert!(seen_night && seen_day, "timer must drive both phases");

    server.engine.shutdown();
}
