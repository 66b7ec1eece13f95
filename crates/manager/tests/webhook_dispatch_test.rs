//! Integration tests for webhook dispatch: authentication, fan-out,
//! first-time token acquisition, and cursor write-back.

mod support;

use serde_json::json;

use foerderband_core::{SourceData, SourceOutcome};
use foerderband_manager::verify::github_signature;

use support::{drive_task, git_task, harness, headers, Harness};

const REPO: &str = "https://github.com/ex/r";
const PUSH_BODY: &[u8] = br#"{"repository":{"full_name":"ex/r"},"deleted":false}"#;

fn entry_secret(h: &Harness, sid: &str) -> String {
    h.manager.store().get_subscription(sid).unwrap().secret
}

#[tokio::test]
async fn github_push_with_valid_signature_runs_task() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let signature = github_signature(&entry_secret(&h, REPO), PUSH_BODY);
    let summary = h
        .manager
        .trigger_webhook(
            "gh",
            &headers(&[
                ("X-GitHub-Event", "push"),
                ("X-Hub-Signature-256", &signature),
            ]),
            PUSH_BODY,
        )
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(h.payload_count(), 1);

    let payload = h.last_payload();
    assert_eq!(payload["external_resource_id"], REPO);
    assert_eq!(payload["change_type"], "upsert");
    assert_eq!(payload["webhook_payload"]["repository"]["full_name"], "ex/r");
    assert_eq!(payload["task_definition"]["id"], "g1");
}

#[tokio::test]
async fn github_push_with_bad_signature_is_rejected() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let signature = github_signature("not-the-secret", PUSH_BODY);
    let err = h
        .manager
        .trigger_webhook(
            "gh",
            &headers(&[
                ("X-GitHub-Event", "push"),
                ("X-Hub-Signature-256", &signature),
            ]),
            PUSH_BODY,
        )
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 401);
    assert!(err.to_string().contains("invalid webhook signature"));
    // The orchestrator never ran.
    assert_eq!(h.payload_count(), 0);
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let err = h
        .manager
        .trigger_webhook("gh", &headers(&[("X-GitHub-Event", "push")]), PUSH_BODY)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(h.payload_count(), 0);
}

#[tokio::test]
async fn unknown_endpoint_is_not_found() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let err = h
        .manager
        .trigger_webhook("nope", &headers(&[]), PUSH_BODY)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let err = h
        .manager
        .trigger_webhook("gh", &headers(&[]), b"{not json")
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn uninterested_resource_returns_ok_without_running() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    // Valid event for a repository nothing subscribes to.
    let body = br#"{"repository":{"full_name":"someone/else"},"deleted":false}"#;
    let summary = h
        .manager
        .trigger_webhook("gh", &headers(&[("X-GitHub-Event", "push")]), body)
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(summary.items_processed, 0);
    assert!(summary.message.contains("no subscription"));
    assert_eq!(h.payload_count(), 0);
}

#[tokio::test]
async fn fan_out_runs_every_registered_task() {
    let h = harness();
    h.manager.schedule_task(git_task("a", "gh", REPO)).await.unwrap();
    h.manager.schedule_task(git_task("b", "gh", REPO)).await.unwrap();

    let signature = github_signature(&entry_secret(&h, REPO), PUSH_BODY);
    let summary = h
        .manager
        .trigger_webhook(
            "gh",
            &headers(&[
                ("X-GitHub-Event", "push"),
                ("X-Hub-Signature-256", &signature),
            ]),
            PUSH_BODY,
        )
        .await
        .unwrap();

    assert!(summary.success);
    assert_eq!(h.payload_count(), 2);
}

#[tokio::test]
async fn disabled_task_is_skipped_in_fan_out() {
    let h = harness();
    h.manager.schedule_task(git_task("a", "gh", REPO)).await.unwrap();
    h.manager.schedule_task(git_task("b", "gh", REPO)).await.unwrap();
    h.manager.disable_task("a").await.unwrap();

    let signature = github_signature(&entry_secret(&h, REPO), PUSH_BODY);
    h.manager
        .trigger_webhook(
            "gh",
            &headers(&[
                ("X-GitHub-Event", "push"),
                ("X-Hub-Signature-256", &signature),
            ]),
            PUSH_BODY,
        )
        .await
        .unwrap();

    assert_eq!(h.payload_count(), 1);
    assert_eq!(h.last_payload()["task_definition"]["id"], "b");
}

#[tokio::test]
async fn drive_first_time_token_acquisition() {
    let h = harness();
    *h.provider.next_external_id.lock().unwrap() = Some("ch".to_string());
    *h.provider.next_start_page_token.lock().unwrap() = Some("42".to_string());

    h.manager
        .schedule_task(drive_task("d1", "gd", "folder-9"))
        .await
        .unwrap();

    // Registration captured the provider's start cursor.
    let entry = h.manager.store().get_subscription("folder-9").unwrap();
    assert_eq!(entry.external_webhook_id, "ch");
    assert_eq!(entry.start_page_token.as_deref(), Some("42"));

    // The notification carries the channel token; its payload delivers
    // the stored cursor to the source.
    let secret = entry.secret.clone();
    let summary = h
        .manager
        .trigger_webhook(
            "gd",
            &headers(&[
                ("X-Goog-Channel-Id", &secret),
                ("X-Goog-Resource-Uri", "https://www.googleapis.com/drive/v3/files/folder-9"),
                ("X-Goog-Resource-State", "update"),
            ]),
            b"",
        )
        .await
        .unwrap();

    assert!(summary.success);
    let payload = h.last_payload();
    assert_eq!(payload["start_page_token"], "42");
    assert_eq!(payload["external_resource_id"], "folder-9");
    assert_eq!(payload["change_type"], "upsert");
}

#[tokio::test]
async fn drive_wrong_channel_token_is_rejected() {
    let h = harness();
    h.manager
        .schedule_task(drive_task("d1", "gd", "folder-9"))
        .await
        .unwrap();

    let err = h
        .manager
        .trigger_webhook(
            "gd",
            &headers(&[
                ("X-Goog-Channel-Id", "imposter"),
                ("X-Goog-Resource-Uri", "https://www.googleapis.com/drive/v3/files/folder-9"),
                ("X-Goog-Resource-State", "update"),
            ]),
            b"",
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert_eq!(h.payload_count(), 0);
}

#[tokio::test]
async fn cursor_write_back_threads_across_runs() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    // First run returns a continuation cursor.
    h.set_outcome(SourceOutcome::ok(SourceData {
        data: Some(json!([{"id": "a", "content": "x"}])),
        next_page_token: Some("n9".to_string()),
        ..Default::default()
    }));

    let secret = entry_secret(&h, REPO);
    let signature = github_signature(&secret, PUSH_BODY);
    let hdrs = headers(&[
        ("X-GitHub-Event", "push"),
        ("X-Hub-Signature-256", &signature),
    ]);

    h.manager.trigger_webhook("gh", &hdrs, PUSH_BODY).await.unwrap();
    let entry = h.manager.store().get_subscription(REPO).unwrap();
    assert_eq!(entry.next_page_token.as_deref(), Some("n9"));

    // The next delivery hands the cursor to the source; a run returning
    // no cursors does not erase it.
    h.set_outcome(support::single_item_outcome());
    h.manager.trigger_webhook("gh", &hdrs, PUSH_BODY).await.unwrap();
    assert_eq!(h.last_payload()["next_page_token"], "n9");

    let entry = h.manager.store().get_subscription(REPO).unwrap();
    assert_eq!(entry.next_page_token.as_deref(), Some("n9"));
}

#[tokio::test]
async fn cursor_write_back_applies_to_manual_runs_too() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    h.set_outcome(SourceOutcome::ok(SourceData {
        data: Some(json!([])),
        next_page_token: Some("m3".to_string()),
        ..Default::default()
    }));
    h.manager.trigger_manual("g1", None).await.unwrap();

    let entry = h.manager.store().get_subscription(REPO).unwrap();
    assert_eq!(entry.next_page_token.as_deref(), Some("m3"));
}

#[tokio::test]
async fn delete_event_classification_reaches_the_source() {
    let h = harness();
    h.manager.schedule_task(git_task("g1", "gh", REPO)).await.unwrap();

    let body = br#"{"repository":{"full_name":"ex/r"},"deleted":true}"#;
    let signature = github_signature(&entry_secret(&h, REPO), body);
    h.manager
        .trigger_webhook(
            "gh",
            &headers(&[
                ("X-GitHub-Event", "push"),
                ("X-Hub-Signature-256", &signature),
            ]),
            body,
        )
        .await
        .unwrap();

    assert_eq!(h.last_payload()["change_type"], "delete");
}
