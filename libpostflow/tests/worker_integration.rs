//! Publish worker tests against mock platforms

mod common;

use std::time::Duration;

use common::{registry, setup};
use libpostflow::error::PlatformError;
use libpostflow::platforms::mock::MockAdapter;
use libpostflow::types::TokenUpdate;
use libpostflow::worker::PublishWorker;
use libpostflow::{PostStatus, PostType, PostflowError};

const OWNER: i64 = 7;

fn far_future() -> i64 {
    chrono::Utc::now().timestamp() + 86_400
}

#[tokio::test]
async fn test_one_failing_platform_does_not_stop_the_others() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let tiktok = MockAdapter::publish_failure(
        "tiktok",
        PlatformError::Publishing("spam_risk_too_many_posts".to_string()),
    );
    let youtube = MockAdapter::success("youtube");

    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let tt = env.link(OWNER, "tiktok", "tt-1", far_future()).await;
    let yt = env.link(OWNER, "youtube", "yt-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig, tt, yt]).await;

    let worker = PublishWorker::new(
        env.db.clone(),
        env.credentials.clone(),
        registry(&[&instagram, &tiktok, &youtube]),
        10,
    );
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    assert!(summary.skipped.is_empty());

    let history = env.db.list_posting_history(post_id).await.unwrap();
    assert_eq!(history.len(), 3);

    for entry in &history {
        assert_eq!(entry.owner_id, OWNER);
        if entry.account_id == tt {
            assert!(!entry.success);
            assert!(entry.error_message.starts_with("tiktok: "));
            assert!(entry.error_message.contains("spam_risk_too_many_posts"));
        } else {
            assert!(entry.success);
            assert_eq!(entry.error_message, "");
        }
    }

    let post = env.db.get_post(post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Posted);
}

#[tokio::test]
async fn test_all_platforms_failing_still_marks_post_posted() {
    let env = setup().await;
    let tiktok = MockAdapter::publish_failure("tiktok", PlatformError::Network("timeout".to_string()));

    let a = env.link(OWNER, "tiktok", "tt-1", far_future()).await;
    let b = env.link(OWNER, "tiktok", "tt-2", far_future()).await;
    let post_id = env.create_post(OWNER, vec![a, b]).await;

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&tiktok]), 10);
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.failed(), 2);
    let post = env.db.get_post(post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Posted);
}

#[tokio::test]
async fn test_empty_selection_is_rejected() {
    let env = setup().await;
    let post_id = env.create_post(OWNER, Vec::new()).await;

    let worker = PublishWorker::new(
        env.db.clone(),
        env.credentials.clone(),
        registry(&[&MockAdapter::success("instagram")]),
        10,
    );

    let err = worker.publish_post(post_id).await.unwrap_err();
    assert!(matches!(err, PostflowError::Validation(_)));
    assert!(err.is_terminal());

    assert!(env.db.list_posting_history(post_id).await.unwrap().is_empty());
    let post = env.db.get_post(post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
}

#[tokio::test]
async fn test_missing_post_is_not_found() {
    let env = setup().await;
    let worker = PublishWorker::new(
        env.db.clone(),
        env.credentials.clone(),
        registry(&[&MockAdapter::success("instagram")]),
        10,
    );

    let err = worker.publish_post(404).await.unwrap_err();
    assert!(matches!(err, PostflowError::NotFound(_)));
    assert!(!err.is_terminal());
}

#[tokio::test]
async fn test_unresolvable_account_is_skipped() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig, 9999]).await;

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&instagram]), 10);
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.skipped, vec![9999]);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(instagram.publish_call_count(), 1);

    let history = env.db.list_posting_history(post_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].account_id, ig);
}

#[tokio::test]
async fn test_unknown_platform_is_recorded_as_failure() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let other = env.link(OWNER, "myspace", "ms-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig, other]).await;

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&instagram]), 10);
    let summary = worker.publish_post(post_id).await.unwrap();

    let failed = summary.outcomes.iter().find(|o| o.account_id == other).unwrap();
    let message = failed.error.as_deref().unwrap();
    assert!(message.starts_with("myspace: "));
    assert!(message.contains("Unsupported platform"));
    assert_eq!(env.db.list_posting_history(post_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_panicking_adapter_is_contained() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let youtube = MockAdapter::panicking("youtube");

    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let yt = env.link(OWNER, "youtube", "yt-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig, yt]).await;

    let worker = PublishWorker::new(
        env.db.clone(),
        env.credentials.clone(),
        registry(&[&instagram, &youtube]),
        10,
    );
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.succeeded(), 1);
    let history = env.db.list_posting_history(post_id).await.unwrap();
    assert_eq!(history.len(), 2);

    let crashed = history.iter().find(|h| h.account_id == yt).unwrap();
    assert!(!crashed.success);
    assert!(crashed.error_message.starts_with("youtube: "));
    assert!(crashed.error_message.contains("panicked"));
}

#[tokio::test]
async fn test_adapter_receives_decrypted_token() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig]).await;

    let stored = env.db.get_social_account(ig).await.unwrap().unwrap();
    assert_ne!(stored.access_token, "access-ig-1");

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&instagram]), 10);
    worker.publish_post(post_id).await.unwrap();

    let calls = instagram.publish_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].access_token, "access-ig-1");
    assert_eq!(calls[0].post_id, post_id);
}

#[tokio::test]
async fn test_single_post_sends_primary_media_only() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let media = env.create_media(OWNER, 3).await;

    let single = env
        .create_post_with_media(OWNER, PostType::Single, vec![ig], media.clone())
        .await;
    let carousel = env
        .create_post_with_media(OWNER, PostType::Multiple, vec![ig], media)
        .await;

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&instagram]), 10);
    worker.publish_post(single).await.unwrap();
    worker.publish_post(carousel).await.unwrap();

    let calls = instagram.publish_calls();
    let single_call = calls.iter().find(|c| c.post_id == single).unwrap();
    let carousel_call = calls.iter().find(|c| c.post_id == carousel).unwrap();
    assert_eq!(single_call.media_count, 1);
    assert_eq!(carousel_call.media_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fan_out_is_bounded() {
    let env = setup().await;
    let youtube = MockAdapter::with_delay("youtube", Duration::from_millis(25));

    let mut accounts = Vec::new();
    for i in 0..50 {
        accounts.push(env.link(OWNER, "youtube", &format!("yt-{}", i), far_future()).await);
    }
    let post_id = env.create_post(OWNER, accounts).await;

    let worker = PublishWorker::new(env.db.clone(), env.credentials.clone(), registry(&[&youtube]), 10);
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.succeeded(), 50);
    assert_eq!(youtube.publish_call_count(), 50);
    assert!(youtube.max_in_flight() <= 10, "max in flight was {}", youtube.max_in_flight());
    assert!(youtube.max_in_flight() > 1);
    assert_eq!(env.db.list_posting_history(post_id).await.unwrap().len(), 50);
}

#[tokio::test]
async fn test_undecryptable_token_fails_only_its_account() {
    let env = setup().await;
    let instagram = MockAdapter::success("instagram");
    let youtube = MockAdapter::success("youtube");

    let ig = env.link(OWNER, "instagram", "ig-1", far_future()).await;
    let yt = env.link(OWNER, "youtube", "yt-1", far_future()).await;
    let post_id = env.create_post(OWNER, vec![ig, yt]).await;

    let stored = env.db.get_social_account(ig).await.unwrap().unwrap();
    env.db
        .set_token(
            OWNER,
            &stored.access_token,
            &TokenUpdate {
                access_token: Some("not base64 at all!".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let worker = PublishWorker::new(
        env.db.clone(),
        env.credentials.clone(),
        registry(&[&instagram, &youtube]),
        10,
    );
    let summary = worker.publish_post(post_id).await.unwrap();

    assert_eq!(summary.succeeded(), 1);
    assert_eq!(instagram.publish_call_count(), 0);
    assert_eq!(youtube.publish_call_count(), 1);

    let history = env.db.list_posting_history(post_id).await.unwrap();
    assert_eq!(history.len(), 2);
    let broken = history.iter().find(|h| h.account_id == ig).unwrap();
    assert!(!broken.success);
    assert!(broken.error_message.starts_with("instagram: "));
    assert!(broken.error_message.contains("Crypto error"));
    let sibling = history.iter().find(|h| h.account_id == yt).unwrap();
    assert!(sibling.success);
    assert_eq!(sibling.error_message, "");

    let post = env.db.get_post(post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Posted);
}
