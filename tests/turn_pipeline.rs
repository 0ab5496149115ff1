mod common;

use carechat::{
    chat::{self, Frame, TurnOutcome, AUXILIARY_PREFIX, PROVIDER_FAILURE},
    db::{self, Role},
    llm::PromptRole,
    AppError,
};
use common::{run_turn, Script, ScriptedProvider, FALLBACK_MODEL};
use serde_json::json;

#[tokio::test]
async fn successful_turn_commits_the_last_frame() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::Reply(vec!["Hel", "lo ", "there"]));

    let (frames, outcome) = run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert_eq!(
        frames,
        vec![Frame::content("Hel"), Frame::content("Hello "), Frame::content("Hello there")]
    );
    let TurnOutcome::Committed(reply) = outcome else {
        panic!("turn should have committed");
    };
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hello there");

    let history = db::list_messages(&pool, &room.id).await.unwrap();
    let replies: Vec<_> = history.iter().filter(|m| m.role == Role::Assistant).collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, "Hello there");

    let room = db::find_room(&pool, &room.id).await.unwrap().unwrap();
    assert_eq!(room.name, "Hello there");
    assert_eq!(provider.calls()[0].model, "gemini-2.0-flash");
}

#[tokio::test]
async fn refused_stream_sends_one_error_and_stores_no_reply() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::Refuse);

    let (frames, outcome) = run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(frames, vec![Frame::error(PROVIDER_FAILURE)]);

    let history = db::list_messages(&pool, &room.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "hi");

    let after = db::find_room(&pool, &room.id).await.unwrap().unwrap();
    assert_eq!(after.name, "New Chat");
}

#[tokio::test]
async fn broken_stream_discards_partial_content() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::BreakAfter(vec!["Partial", " answer"]));

    let (frames, outcome) = run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(
        frames,
        vec![
            Frame::content("Partial"),
            Frame::content("Partial answer"),
            Frame::error(PROVIDER_FAILURE),
        ]
    );
    let history = db::list_messages(&pool, &room.id).await.unwrap();
    assert!(history.iter().all(|m| m.role == Role::User));
}

#[tokio::test]
async fn new_messages_come_last_in_strict_order() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::Reply(vec!["first"]));
    run_turn(&pool, provider.as_ref(), &room.id, "one").await;

    let provider = ScriptedProvider::new(Script::Reply(vec!["second"]));
    run_turn(&pool, provider.as_ref(), &room.id, "two").await;

    let history = db::list_messages(&pool, &room.id).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["one", "first", "two", "second"]);
    assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));
    assert_eq!(history[2].role, Role::User);
    assert_eq!(history[3].role, Role::Assistant);
}

#[tokio::test]
async fn fallback_model_is_persisted_even_when_the_stream_fails() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", None).await;
    let provider = ScriptedProvider::new(Script::Refuse);

    run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert_eq!(provider.calls()[0].model, FALLBACK_MODEL);
    let after = db::find_room(&pool, &room.id).await.unwrap().unwrap();
    assert_eq!(after.llm_provider_model_id.as_deref(), Some(FALLBACK_MODEL));
}

#[tokio::test]
async fn fallback_does_not_overwrite_a_model_set_meanwhile() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", None).await;

    sqlx::query("UPDATE chat_rooms SET llm_provider_model_id='gemini-2.0-flash' WHERE id=?")
        .bind(&room.id)
        .execute(&pool)
        .await
        .unwrap();

    let model = chat::resolve_model(&pool, &room, FALLBACK_MODEL).await.unwrap();
    assert_eq!(model, "gemini-2.0-flash");
}

#[tokio::test]
async fn reading_history_twice_is_stable() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::Reply(vec!["ok"]));
    run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    let first = db::list_messages(&pool, &room.id).await.unwrap();
    let second = db::list_messages(&pool, &room.id).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn greeting_after_a_lone_hello() {
    let pool = common::pool().await;
    let room = common::room(&pool, "You are helpful.", Some("gemini-2.0-flash")).await;
    db::insert_message(&pool, &room.id, Role::User, "hello").await.unwrap();
    let provider = ScriptedProvider::new(Script::Reply(vec!["Hi", "! How", " can I help?"]));

    let (frames, _) = run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    let contents: Vec<&str> = frames.iter().map(|f| match f {
        Frame::Content { content } => content.as_str(),
        Frame::Error { error } => panic!("unexpected error frame {error}"),
    }).collect();
    assert!(contents.windows(2).all(|w| w[1].starts_with(w[0]) && w[1].len() >= w[0].len()));

    let calls = provider.calls();
    let prompt = &calls[0].prompt;
    assert_eq!(prompt.len(), 4);
    assert_eq!(prompt[0].role, PromptRole::System);
    assert_eq!(prompt[0].content, "You are helpful.");
    assert_eq!(prompt[1].content, AUXILIARY_PREFIX);
    assert_eq!(prompt[2].content, "hello");
    assert_eq!(prompt[3].content, "hi");

    let history = db::list_messages(&pool, &room.id).await.unwrap();
    let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["hello", "hi", "Hi! How can I help?"]);
}

#[tokio::test]
async fn auxiliary_records_reach_the_prompt() {
    let pool = common::pool().await;
    let room = common::room(&pool, "sys", Some("gemini-2.0-flash")).await;
    db::insert_auxiliary_record(&pool, "u1", "SYMPTOMS", &json!({ "description": "cough" }))
        .await
        .unwrap();
    db::insert_auxiliary_record(&pool, "someone-else", "SYMPTOMS", &json!({ "description": "fever" }))
        .await
        .unwrap();
    let provider = ScriptedProvider::new(Script::Reply(vec!["noted"]));

    run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    let calls = provider.calls();
    let prompt = &calls[0].prompt;
    assert_eq!(prompt[1].content, r#"Health data sources: SYMPTOMS: {"description":"cough"}"#);
}

#[tokio::test]
async fn unknown_room_persists_nothing() {
    let pool = common::pool().await;

    let err = chat::open_turn(&pool, "missing", "u1", &common::user_message("hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("chat room")));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages").fetch_one(&pool).await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn missing_profile_rolls_back_the_user_message() {
    let pool = common::pool().await;
    let room = common::room(&pool, "sys", None).await;
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&pool).await.unwrap();
    sqlx::query("DELETE FROM assistant_profiles").execute(&pool).await.unwrap();

    let err = chat::open_turn(&pool, &room.id, "u1", &common::user_message("hi")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound("assistant profile")));
    assert!(db::list_messages(&pool, &room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_reply_is_still_committed() {
    let pool = common::pool().await;
    let room = common::room(&pool, "sys", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::Reply(vec![]));

    let (frames, outcome) = run_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert!(frames.is_empty());
    let TurnOutcome::Committed(reply) = outcome else {
        panic!("turn should have committed");
    };
    assert_eq!(reply.content, "");
    assert_eq!(db::list_messages(&pool, &room.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_commit_is_returned_and_stores_no_reply() {
    let pool = common::pool().await;
    let room = common::room(&pool, "sys", Some("gemini-2.0-flash")).await;
    let provider = ScriptedProvider::new(Script::DeleteRooms(pool.clone(), vec!["lost", " reply"]));

    let (frames, outcome) = common::try_turn(&pool, provider.as_ref(), &room.id, "hi").await;

    assert!(outcome.is_err());
    assert_eq!(frames, vec![Frame::content("lost"), Frame::content("lost reply")]);
    let (replies,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE role='ASSISTANT'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(replies, 0);
}
