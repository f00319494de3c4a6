mod common;

use chrono::{Duration, Utc};

use common::{harness, harness_with, upload, user};
use notenest_core::domain::{ActivityType, ContributionLevel, DerivedCounters, ProfilePatch};
use notenest_core::store::{collections, Query};
use notenest_core::{CoreError, DocumentStore, MemoryStore, Policy};

#[tokio::test]
async fn recompute_twice_gives_the_same_counters() {
    let h = harness();
    let alice = user("alice");
    let note_id = upload(&h.app, &alice, "Graphs").await;
    h.app
        .feedback
        .submit_review(&user("bob"), &note_id, 5, None)
        .await
        .unwrap();

    let first = h.app.reconciler.recompute_stats("alice").await.unwrap();
    let second = h.app.reconciler.recompute_stats("alice").await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn uploads_reviews_and_a_cascade_delete_end_to_end() {
    let h = harness();
    let a = user("a");
    let b = user("b");
    let n1 = upload(&h.app, &a, "n1").await;
    let n2 = upload(&h.app, &a, "n2").await;
    let _n3 = upload(&h.app, &a, "n3").await;
    h.app.feedback.submit_review(&b, &n1, 5, None).await.unwrap();
    h.app.feedback.submit_review(&b, &n2, 3, None).await.unwrap();

    assert_eq!(
        h.app.reconciler.recompute_stats("a").await.unwrap(),
        DerivedCounters {
            total_notes_uploaded: 3,
            total_reviews_given: 0,
            total_reviews_received: 2,
            reports_submitted: 0,
        }
    );

    h.app.notes.delete_note(&n1, &a).await.unwrap();
    let after = h.app.reconciler.recompute_stats("a").await.unwrap();
    assert_eq!(after.total_notes_uploaded, 2);
    assert_eq!(after.total_reviews_received, 1);

    let orphans = h
        .store
        .query(&Query::new(collections::REVIEWS).eq("noteId", n1.as_str()))
        .await
        .unwrap();
    assert!(orphans.is_empty());
    assert_eq!(
        h.app.reconciler.recompute_stats("b").await.unwrap().total_reviews_given,
        1
    );
}

#[tokio::test]
async fn reviews_received_fan_out_past_the_in_limit() {
    let h = harness_with(Policy::default(), MemoryStore::with_in_query_limit(3));
    let alice = user("alice");
    let mut notes = Vec::new();
    for i in 0..8 {
        notes.push(upload(&h.app, &alice, &format!("Note {}", i)).await);
    }
    for (i, note_id) in notes.iter().enumerate() {
        h.app
            .feedback
            .submit_review(&user(&format!("r{}", i)), note_id, 4, None)
            .await
            .unwrap();
    }

    let stats = h.app.reconciler.recompute_stats("alice").await.unwrap();
    assert_eq!(stats.total_reviews_received, 8);

    let received = h.app.profiles.reviews_received("alice").await.unwrap();
    assert_eq!(received.len(), 8);
    assert!(received
        .windows(2)
        .all(|w| w[0].review.created_at >= w[1].review.created_at));
    assert!(received.iter().all(|r| r.note_title.starts_with("Note ")));
}

#[tokio::test]
async fn dashboard_serves_cached_stats_when_reconciliation_fails() {
    let h = harness();
    let alice = user("alice");
    let note_id = upload(&h.app, &alice, "Graphs").await;
    h.app
        .feedback
        .submit_review(&user("bob"), &note_id, 5, None)
        .await
        .unwrap();

    let fresh = h.app.profiles.dashboard("alice").await.unwrap();
    assert!(!fresh.stats.stale);
    assert_eq!(fresh.stats.derived.total_reviews_received, 1);

    upload(&h.app, &alice, "Trees").await;
    h.store.fail_queries_on(Some(collections::REVIEWS));
    let cached = h.app.profiles.dashboard("alice").await.unwrap();
    assert!(cached.stats.stale);
    assert_eq!(cached.stats.derived, fresh.stats.derived);
    assert_eq!(cached.stats.contribution_score, 30);

    let err = h.app.profiles.fix_user_stats("alice").await.unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));

    h.store.fail_queries_on(None);
    let repaired = h.app.profiles.fix_user_stats("alice").await.unwrap();
    assert_eq!(repaired.total_notes_uploaded, 2);
}

#[tokio::test]
async fn dashboard_for_unknown_user_is_stale_zero_when_nothing_is_cached() {
    let h = harness();
    h.store.fail_queries_on(Some(collections::NOTES));
    let dashboard = h.app.profiles.dashboard("ghost").await.unwrap();
    assert!(dashboard.stats.stale);
    assert_eq!(dashboard.stats.derived, DerivedCounters::default());
    assert_eq!(dashboard.stats.contribution_level, ContributionLevel::NewContributor);
}

#[tokio::test]
async fn initialize_user_is_idempotent() {
    let h = harness();
    let ada = user("ada");
    let first = h.app.profiles.initialize_user(&ada).await.unwrap();
    assert_eq!(first.display_name, "ada");
    assert_eq!(first.email, "ada@uni.edu");
    assert!(!first.bio.is_empty());

    let second = h.app.profiles.initialize_user(&ada).await.unwrap();
    assert_eq!(second.display_name, first.display_name);
    assert_eq!(second.bio, first.bio);

    let activity = h.app.profiles.recent_activity("ada", None).await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].activity_type, ActivityType::ProfileCreated);
    assert_eq!(h.store.inner.collection_len(collections::USER_COUNTERS).await, 1);
}

#[tokio::test]
async fn profile_completion_follows_edits() {
    let h = harness();
    let ada = user("ada");
    let blank = h.app.profiles.get_profile("ada").await.unwrap();
    assert!(!blank.is_profile_complete);

    let updated = h
        .app
        .profiles
        .update_profile(
            &ada,
            ProfilePatch {
                display_name: Some(" Ada L. ".into()),
                university: Some("Analytical U".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.is_profile_complete);
    assert_eq!(updated.display_name, "Ada L.");
    let stored = h.app.profiles.get_profile("ada").await.unwrap();
    assert_eq!(stored.display_name, "Ada L.");
    assert_eq!(stored.university, "Analytical U");
    assert!(stored.is_profile_complete);

    let err = h
        .app
        .profiles
        .update_profile(&ada, ProfilePatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
}

#[tokio::test]
async fn read_models_label_missing_notes() {
    let h = harness();
    let alice = user("alice");
    let bob = user("bob");
    let kept = upload(&h.app, &alice, "Kept").await;
    let gone = upload(&h.app, &alice, "Gone").await;

    h.app.feedback.submit_review(&bob, &kept, 4, None).await.unwrap();
    h.app.feedback.submit_report(&bob, &kept, "spam", None).await.unwrap();
    h.app.feedback.submit_report(&bob, &gone, "spam", None).await.unwrap();
    h.store.inner.delete(collections::NOTES, &gone).await.unwrap();

    let given = h.app.profiles.reviews_given("bob", None).await.unwrap();
    assert_eq!(given.len(), 1);
    assert_eq!(given[0].note_title, "Kept");

    let reports = h.app.profiles.reports_submitted("bob", None).await.unwrap();
    let mut titles: Vec<_> = reports.iter().map(|r| r.note_title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["Kept", "Note No Longer Exists"]);
}

#[tokio::test]
async fn prune_drops_only_expired_activity() {
    let h = harness();
    let alice = user("alice");
    upload(&h.app, &alice, "Graphs").await;
    let old = Utc::now() - Duration::days(400);
    let stale_entry = serde_json::json!({
        "userId": "alice",
        "activityType": "note_download",
        "targetId": "x",
        "description": "Downloaded note: x",
        "createdAt": old.timestamp_millis(),
    });
    h.store
        .inner
        .set(
            collections::ACTIVITY_LOG,
            "old-entry",
            stale_entry.as_object().cloned().unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(h.app.prune_activity().await.unwrap(), 1);
    let remaining = h.app.profiles.recent_activity("alice", None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].activity_type, ActivityType::NoteUpload);
}
