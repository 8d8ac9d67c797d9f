//! Spectator client against a real hub on a loopback port.

use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::time::{timeout, Duration};

use hub::api::{router, AppState};
use hub::config::Config;
use hub::db::Db;
use hub::live::{LiveHandle, LiveService};
use shared::{
    AddProjectRequest, AddProjectResponse, CardAction, CardUpdatePayload, LiveCard,
    LiveStatusResponse, StartVotingRequest, StartVotingResponse,
};
use spectator::api::LiveApi;
use spectator::connection::{ConnectionManager, ConnectionOptions, ConnectionState};
use spectator::controller::LiveController;
use spectator::session::SessionToken;

const ADMIN_KEY: &str = "sync-test-key";

async fn start_hub() -> String {
    let config = Arc::new(Config::for_test(":memory:".into(), ADMIN_KEY));
    let db = Db::open_in_memory().unwrap();
    db.run_migrations(&config.migrations_dir).unwrap();
    let db = Arc::new(db);
    let (live, _task) = LiveHandle::spawn(LiveService::new(config.clone(), db.clone()));
    let app = router(AppState { db, live, config });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{}", addr)
}

async fn admin_post<T: serde::Serialize>(hub: &str, path: &str, body: &T) -> reqwest::Response {
    let res = reqwest::Client::new()
        .post(format!("{}/api/live/admin/{}", hub, path))
        .bearer_auth(ADMIN_KEY)
        .json(body)
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success(), "{} -> {}", path, res.status());
    res
}

fn controller(hub: &str, options: ConnectionOptions) -> LiveController {
    let api = LiveApi::new(hub);
    let (connection, inbound) = ConnectionManager::new(api.ws_url("live"), options);
    LiveController::new(api, SessionToken::generate(), connection, inbound)
}

async fn wait_connected(controller: &LiveController) {
    let mut rx = controller.connection().watch_state();
    timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("not connected")
    .unwrap();
}

async fn spectator_count(hub: &str) -> u64 {
    let status: LiveStatusResponse = reqwest::get(format!("{}/api/live/status", hub))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    status.spectator_count
}

fn card_event(action: CardAction, column: &str) -> CardUpdatePayload {
    CardUpdatePayload {
        action,
        card: LiveCard {
            id: "c1".to_string(),
            title: "Build snake".to_string(),
            description: None,
            column_id: column.to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        },
        from_column: (action == CardAction::Moved).then(|| "backlog".to_string()),
        to_column: (action == CardAction::Moved).then(|| column.to_string()),
    }
}

#[tokio::test]
async fn both_spectators_see_card_reach_done() {
    let hub = start_hub().await;
    let mut first = controller(&hub, ConnectionOptions::default());
    let mut second = controller(&hub, ConnectionOptions::default());
    wait_connected(&first).await;
    wait_connected(&second).await;

    admin_post(&hub, "cards", &card_event(CardAction::Created, "backlog")).await;
    admin_post(&hub, "cards", &card_event(CardAction::Moved, "done")).await;

    for spectator in [&mut first, &mut second] {
        timeout(
            Duration::from_secs(5),
            spectator.run(|view, _| match view.card("c1") {
                Some(card) if card.column_id == "done" => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }),
        )
        .await
        .expect("card never reached done")
        .unwrap();
        assert_eq!(spectator.view().card_count(), 1);
    }
}

#[tokio::test]
async fn disabled_spectator_is_not_counted_until_enabled() {
    let hub = start_hub().await;
    let spectator = controller(
        &hub,
        ConnectionOptions {
            enabled: false,
            ..ConnectionOptions::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(spectator_count(&hub).await, 0);
    assert_eq!(spectator.connection().state(), ConnectionState::Disconnected);

    spectator.connection().set_enabled(true);
    wait_connected(&spectator).await;
    timeout(Duration::from_secs(5), async {
        while spectator_count(&hub).await != 1 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("presence never reached one");

    spectator.connection().set_enabled(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(spectator_count(&hub).await, 1);

    spectator.connection().close();
    timeout(Duration::from_secs(5), async {
        while spectator_count(&hub).await != 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("presence never dropped");
}

#[tokio::test]
async fn rest_vote_shows_up_in_live_tally() {
    let hub = start_hub().await;
    let mut spectator = controller(&hub, ConnectionOptions::default());
    wait_connected(&spectator).await;

    let round: StartVotingResponse = admin_post(
        &hub,
        "start-voting",
        &StartVotingRequest {
            duration_seconds: Some(30),
            options: Some(vec!["Game".to_string(), "Tool".to_string()]),
        },
    )
    .await
    .json()
    .await
    .unwrap();
    let tool = round.options[1].id.clone();

    let res = spectator.vote(&tool).await.unwrap();
    assert!(res.success, "{}", res.message);
    // same session again changes nothing
    assert!(spectator.vote(&tool).await.unwrap().success);

    timeout(
        Duration::from_secs(5),
        spectator.run(|view, _| match &view.voting {
            Some(v) if v.total_votes() == 1 => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }),
    )
    .await
    .expect("tally never arrived")
    .unwrap();
    let voting = spectator.view().voting.clone().unwrap();
    assert_eq!(voting.round_id, round.round_id);
    assert_eq!(voting.options[1].vote_count, 1);

    admin_post(&hub, "end-voting", &serde_json::json!({})).await;
    timeout(
        Duration::from_secs(5),
        spectator.run(|view, _| match &view.last_result {
            Some(_) => ControlFlow::Break(()),
            None => ControlFlow::Continue(()),
        }),
    )
    .await
    .expect("round end never arrived")
    .unwrap();
    let result = spectator.view().last_result.clone().unwrap();
    assert_eq!(result.winner.unwrap().id, tool);
    assert!(spectator.view().voting.is_none());
}

#[tokio::test]
async fn socket_vote_is_answered_to_the_voter() {
    let hub = start_hub().await;
    let mut spectator = controller(&hub, ConnectionOptions::default());
    wait_connected(&spectator).await;

    let round: StartVotingResponse = admin_post(&hub, "work-completed", &serde_json::json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(round.options.len(), 4);

    spectator.vote_over_socket(&round.options[0].id).unwrap();
    spectator.vote_over_socket("not-an-option").unwrap();
    timeout(
        Duration::from_secs(5),
        spectator.run(|view, _| match &view.last_vote {
            Some(res) if !res.success => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }),
    )
    .await
    .expect("vote result never arrived")
    .unwrap();
    let voting = spectator.view().voting.clone().unwrap();
    assert_eq!(voting.total_votes(), 1);
}

#[tokio::test]
async fn gallery_like_counts_once() {
    let hub = start_hub().await;
    let mut spectator = controller(&hub, ConnectionOptions::default());
    let added: AddProjectResponse = admin_post(
        &hub,
        "add-project",
        &AddProjectRequest {
            title: "Snake".to_string(),
            description: None,
            category: Some("Game".to_string()),
            screenshot_url: None,
            preview_url: None,
        },
    )
    .await
    .json()
    .await
    .unwrap();

    spectator.load_gallery(20, 0).await.unwrap();
    assert_eq!(spectator.view().gallery_total, 1);

    assert!(spectator.like(&added.project_id).await.unwrap().success);
    let again = spectator.like(&added.project_id).await.unwrap();
    assert!(!again.success);
    assert_eq!(again.new_like_count, 1);
    assert_eq!(spectator.view().gallery[0].like_count, 1);
}

#[tokio::test]
async fn new_high_score_reaches_every_leaderboard() {
    let hub = start_hub().await;
    let mut player = controller(&hub, ConnectionOptions::default());
    let mut watcher = controller(&hub, ConnectionOptions::default());
    wait_connected(&player).await;
    wait_connected(&watcher).await;

    let saved = player.submit_score("ana", 120).await.unwrap();
    assert!(saved.success);
    assert_eq!(saved.rank, 1);

    for spectator in [&mut player, &mut watcher] {
        timeout(
            Duration::from_secs(5),
            spectator.run(|view, _| {
                let announced = view
                    .logs()
                    .any(|line| line.content == "New record! ana scored 120 pts in snake!");
                match view.ranking().first() {
                    Some(top) if top.score == 120 && announced => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            }),
        )
        .await
        .expect("ranking never arrived")
        .unwrap();
        let view = spectator.view();
        assert_eq!(view.ranking().len(), 1);
        assert_eq!(view.ranking()[0].id, saved.score_id);
        assert_eq!(view.ranking()[0].player_name, "ana");
    }
}
