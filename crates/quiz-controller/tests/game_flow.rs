//! End-to-end game flow through the registry and session actors.
//!
//! All tests run with paused time; awaiting a frame lets tokio jump the
//! clock straight to the next scheduled tick.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

use std::time::Duration;

use qc_test_utils::{sample_questions, test_registry, TestClient, TestQuestion};
use quiz_controller::actors::Phase;
use quiz_controller::errors::QcError;
use quiz_controller::protocol::ServerMessage;
use quiz_controller::questions::Difficulty;

/// Frames up to and including the first one whose type is in `stop_at`.
async fn frames_until(client: &mut TestClient, stop_at: &[&str]) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    loop {
        let msg = client.recv().await;
        let done = stop_at.contains(&msg.message_type());
        frames.push(msg);
        if done {
            return frames;
        }
    }
}

async fn frames_until_reveal(client: &mut TestClient) -> Vec<ServerMessage> {
    frames_until(client, &["answer_result"]).await
}

#[tokio::test(start_paused = true)]
async fn test_two_players_three_rounds_with_early_completion() {
    let registry = test_registry();
    let questions = vec![
        TestQuestion::new("Easy one").correct(0).build(),
        TestQuestion::new("Medium one")
            .correct(1)
            .difficulty(Difficulty::Medium)
            .build(),
        TestQuestion::new("Hard one")
            .correct(2)
            .difficulty(Difficulty::Hard)
            .build(),
    ];

    let (mut ann, request) = TestClient::owner("Ann", questions);
    let code = registry.create_session(request).await.unwrap().code;
    ann.wait_for("room_created").await;

    let (mut bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code.clone(), "Bob".to_string(), connection)
        .await
        .unwrap();
    match bob.recv().await {
        ServerMessage::RoomJoined {
            room_code,
            host,
            players,
        } => {
            assert_eq!(room_code, code);
            assert_eq!(host, "Ann");
            assert_eq!(players.len(), 2);
        }
        other => panic!("unexpected {other:?}"),
    }

    registry.start_game("Ann".to_string()).await.unwrap();

    let countdown: Vec<u32> = {
        let mut seen = Vec::new();
        loop {
            match ann.recv().await {
                ServerMessage::Countdown { count } => seen.push(count),
                ServerMessage::GameStart { total_questions } => {
                    assert_eq!(total_questions, 3);
                    break seen;
                }
                _ => {}
            }
        }
    };
    assert_eq!(countdown, vec![3, 2, 1]);

    // Ann always right; Bob right, wrong, right.
    let answers = [(0, 0), (1, 3), (2, 2)];
    let mut next_frame = ann.wait_for("question").await;
    for (round, (ann_answer, bob_answer)) in answers.into_iter().enumerate() {
        match next_frame {
            ServerMessage::Question {
                question_number,
                question_id,
                time_limit,
                ..
            } => {
                assert_eq!(question_number, round + 1);
                assert_eq!(question_id, round as u64 + 1);
                assert_eq!(time_limit, 15);
            }
            other => panic!("unexpected {other:?}"),
        }
        bob.wait_for("question").await;

        registry
            .submit_answer("Ann".to_string(), ann_answer)
            .await
            .unwrap();
        registry
            .submit_answer("Bob".to_string(), bob_answer)
            .await
            .unwrap();

        let frames = frames_until_reveal(&mut ann).await;
        assert!(
            frames.iter().all(|f| f.message_type() != "timer"),
            "round {round} should reveal without timer frames: {frames:?}"
        );

        // The cancelled round timer stays silent through the settle delay.
        let settle = frames_until(&mut ann, &["question", "game_over"]).await;
        assert!(
            settle.iter().all(|f| f.message_type() != "timer"),
            "round {round} ticked after its early reveal: {settle:?}"
        );
        next_frame = settle.into_iter().last().unwrap();
        bob.wait_for("answer_result").await;
    }

    let standings = match next_frame {
        ServerMessage::GameOver {
            standings,
            total_questions,
        } => {
            assert_eq!(total_questions, 3);
            standings
        }
        other => panic!("unexpected {other:?}"),
    };

    assert_eq!(standings.len(), 2);
    assert_eq!(standings[0].name, "Ann");
    assert_eq!(standings[0].score, 10 + 22 + 34);
    assert_eq!(standings[0].correct_count, 3);
    assert_eq!(standings[0].best_streak, 3);
    assert_eq!(standings[1].name, "Bob");
    assert_eq!(standings[1].score, 10 + 30);
    assert_eq!(standings[1].best_streak, 1);

    let snapshot = registry.lookup(code).await.unwrap().unwrap();
    assert_eq!(snapshot.phase, Phase::Finished);

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_round_times_out_when_someone_does_not_answer() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    let (mut bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code, "Bob".to_string(), connection)
        .await
        .unwrap();

    registry.start_game("Ann".to_string()).await.unwrap();
    ann.wait_for("question").await;
    registry.submit_answer("Ann".to_string(), 0).await.unwrap();

    let frames = frames_until_reveal(&mut ann).await;
    let timers: Vec<u32> = frames
        .iter()
        .filter_map(|f| match f {
            ServerMessage::Timer { remaining } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(timers, (0..15).rev().collect::<Vec<u32>>());

    match frames.last().unwrap() {
        ServerMessage::AnswerResult { results, .. } => {
            assert_eq!(results[0].name, "Ann");
            assert_eq!(results[0].points_earned, 10);
            assert_eq!(results[1].name, "Bob");
            assert_eq!(results[1].answer, None);
            assert!(!results[1].correct);
        }
        other => panic!("unexpected {other:?}"),
    }

    bob.wait_for("answer_result").await;
    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_last_unanswered_player_leaving_reveals_on_next_tick() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(2));
    let code = registry.create_session(request).await.unwrap().code;

    let (bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code, "Bob".to_string(), connection)
        .await
        .unwrap();

    registry.start_game("Ann".to_string()).await.unwrap();
    ann.wait_for("question").await;
    registry.submit_answer("Ann".to_string(), 0).await.unwrap();
    ann.wait_for("player_answered").await;

    registry.leave_session("Bob".to_string()).await.unwrap();
    drop(bob);

    assert!(matches!(
        ann.recv().await,
        ServerMessage::PlayerLeft { ref player, .. } if player == "Bob"
    ));
    assert_eq!(ann.recv().await.message_type(), "answer_result");

    registry.cancel();
}

#[tokio::test]
async fn test_owner_leaving_closes_room_for_everyone() {
    let registry = test_registry();
    let (_ann, request) = TestClient::owner("Ann", sample_questions(3));
    let code = registry.create_session(request).await.unwrap().code;

    let mut others = Vec::new();
    for name in ["Bob", "Cat", "Dan"] {
        let (client, connection) = TestClient::connect(name);
        registry
            .join_session(code.clone(), name.to_string(), connection)
            .await
            .unwrap();
        others.push(client);
    }

    registry.leave_session("Ann".to_string()).await.unwrap();

    for client in &mut others {
        let frames = client.until_closed().await;
        let closed: Vec<_> = frames
            .iter()
            .filter(|f| f.message_type() == "room_closed")
            .collect();
        assert_eq!(closed.len(), 1, "{} frames: {frames:?}", client.identity);
        assert_eq!(
            *closed[0],
            ServerMessage::RoomClosed {
                reason: "Host left the game".to_string()
            }
        );
    }

    assert!(registry.lookup(code).await.unwrap().is_none());
    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_join_during_play_is_rejected() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(2));
    let code = registry.create_session(request).await.unwrap().code;

    registry.start_game("Ann".to_string()).await.unwrap();
    ann.wait_for("question").await;

    let (_late, connection) = TestClient::connect("Late");
    let result = registry
        .join_session(code.clone(), "Late".to_string(), connection)
        .await;
    match result {
        Err(e @ QcError::JoinRejected { .. }) => {
            assert_eq!(e.client_message(), "Room not found or game already started");
        }
        other => panic!("unexpected {other:?}"),
    }

    let snapshot = registry.lookup(code).await.unwrap().unwrap();
    assert_eq!(snapshot.participants.len(), 1);
    assert!(snapshot.participant("Late").is_none());

    registry.cancel();
}

#[tokio::test]
async fn test_reconnect_while_waiting_keeps_one_participant() {
    let registry = test_registry();
    let (_ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    let (_old, connection) = TestClient::connect("Bob");
    registry
        .join_session(code.clone(), "Bob".to_string(), connection)
        .await
        .unwrap();

    let (mut new, connection) = TestClient::connect("Bob");
    let new_id = new.connection_id;
    let snapshot = registry
        .join_session(code.to_lowercase(), "Bob".to_string(), connection)
        .await
        .unwrap();

    assert_eq!(snapshot.participants.len(), 2);
    assert_eq!(snapshot.participant("Bob").unwrap().connection_id, new_id);
    assert_eq!(new.recv().await.message_type(), "room_joined");

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_only_owner_can_start() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    let (_bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code.clone(), "Bob".to_string(), connection)
        .await
        .unwrap();

    registry.start_game("Bob".to_string()).await.unwrap();
    let snapshot = registry.lookup(code.clone()).await.unwrap().unwrap();
    assert_eq!(snapshot.phase, Phase::Waiting);
    assert!(ann.drain().iter().all(|f| f.message_type() != "countdown"));

    registry.start_game("Ann".to_string()).await.unwrap();
    assert_eq!(
        ann.wait_for("countdown").await,
        ServerMessage::Countdown { count: 3 }
    );

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_transport_fault_drops_participant_and_game_continues() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    let (bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code.clone(), "Bob".to_string(), connection)
        .await
        .unwrap();
    bob.close_transport();

    registry.start_game("Ann".to_string()).await.unwrap();

    assert_eq!(
        ann.wait_for("countdown").await,
        ServerMessage::Countdown { count: 3 }
    );
    assert!(matches!(
        ann.wait_for("player_left").await,
        ServerMessage::PlayerLeft { ref player, ref players } if player == "Bob" && players.len() == 1
    ));

    ann.wait_for("question").await;
    registry.submit_answer("Ann".to_string(), 0).await.unwrap();
    let frames = frames_until_reveal(&mut ann).await;
    assert!(frames.iter().all(|f| f.message_type() != "timer"));

    let snapshot = registry.lookup(code).await.unwrap().unwrap();
    assert!(snapshot.participant("Bob").is_none());

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_finished_room_expires_after_grace_window() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    registry.start_game("Ann".to_string()).await.unwrap();
    ann.wait_for("question").await;
    registry.submit_answer("Ann".to_string(), 0).await.unwrap();
    ann.wait_for("game_over").await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = registry.lookup(code.clone()).await.unwrap();
    assert_eq!(snapshot.unwrap().phase, Phase::Finished);

    // Expiry is silent: the queue just closes.
    let frames = ann.until_closed().await;
    assert!(frames.is_empty(), "unexpected frames {frames:?}");

    assert!(registry.lookup(code).await.unwrap().is_none());
    registry.cancel();
}

#[tokio::test]
async fn test_chat_reaches_everyone_truncated() {
    let registry = test_registry();
    let (mut ann, request) = TestClient::owner("Ann", sample_questions(1));
    let code = registry.create_session(request).await.unwrap().code;

    let (mut bob, connection) = TestClient::connect("Bob");
    registry
        .join_session(code, "Bob".to_string(), connection)
        .await
        .unwrap();

    registry
        .chat("Bob".to_string(), "é".repeat(250))
        .await
        .unwrap();

    for client in [&mut ann, &mut bob] {
        match client.wait_for("chat").await {
            ServerMessage::Chat { player, message } => {
                assert_eq!(player, "Bob");
                assert_eq!(message.chars().count(), 200);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    registry.cancel();
}
