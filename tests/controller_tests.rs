
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kube_job_controller::controller::Controller;
use kube_job_controller::db::JobStatus;
use kube_job_controller::error::{ControllerError, OrchestratorError};
use kube_job_controller::manifest::JobRequest;
use kube_job_controller::orchestrator::WatchEvent;

use test_harness::{
    assert_eventually, job_object, pod_object, test_config, FakeOrchestrator, NAMESPACE,
};

fn controller(fake: &Arc<FakeOrchestrator>) -> Arc<Controller> {
    Arc::new(Controller::new(test_config(), fake.clone()))
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_submit_registers_job() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);

    let handle = controller
        .submit(JobRequest::new("job-1", "busybox").with_command("echo hi"))
        .await
        .unwrap();

    assert_eq!(handle.name, "job-1");
    assert_eq!(handle.namespace, NAMESPACE);
    assert_eq!(fake.created(), vec!["job-1".to_string()]);

    let record = controller.db().get("job-1").unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert!(!record.deleted);
    assert!(record.pod.is_none());
    assert_eq!(record.restart_count, 0);
    assert_eq!(
        record.max_restart_count,
        controller.config().default_max_restart_count
    );
}

#[tokio::test]
async fn test_submit_honours_requested_max_restarts() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);

    controller
        .submit(JobRequest::new("job-1", "busybox").with_max_restart_count(7))
        .await
        .unwrap();

    assert_eq!(controller.db().get("job-1").unwrap().max_restart_count, 7);
}

#[tokio::test]
async fn test_duplicate_submit_is_rejected() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);

    controller
        .submit(JobRequest::new("job-1", "busybox").with_max_restart_count(2))
        .await
        .unwrap();
    controller
        .db()
        .update("job-1", |r| r.observe_restarts(1))
        .unwrap();

    let err = controller
        .submit(JobRequest::new("job-1", "alpine").with_max_restart_count(9))
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Conflict(_)));
    assert_eq!(fake.created().len(), 1, "second create must not reach the cluster");

    let record = controller.db().get("job-1").unwrap();
    assert_eq!(record.max_restart_count, 2);
    assert_eq!(record.restart_count, 1);
}

#[tokio::test]
async fn test_cluster_conflict_leaves_database_untouched() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);
    fake.add_job("job-1");

    let err = controller
        .submit(JobRequest::new("job-1", "busybox"))
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::Conflict(_)));
    assert!(!controller.db().contains("job-1"));
}

#[tokio::test]
async fn test_transport_failure_leaves_database_untouched() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);
    fake.fail_creates_with(OrchestratorError::Transport("api server down".to_string()));

    let err = controller
        .submit(JobRequest::new("job-1", "busybox"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ControllerError::Orchestrator(OrchestratorError::Transport(_))
    ));
    assert!(controller.db().is_empty());
}

#[tokio::test]
async fn test_invalid_request_rejected_before_create() {
    let fake = FakeOrchestrator::new();
    let controller = controller(&fake);

    let err = controller
        .submit(JobRequest::new("job-1", "busybox").with_command("echo 'unterminated"))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidRequest(_)));

    let err = controller
        .submit(JobRequest::new("job-2", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::InvalidRequest(_)));

    assert!(fake.created().is_empty());
    assert!(controller.db().is_empty());
}

// =============================================================================
// End to end through the watch streams
// =============================================================================

async fn start(fake: &Arc<FakeOrchestrator>) -> (Arc<Controller>, CancellationToken, tokio::task::JoinHandle<()>) {
    let controller = controller(fake);
    let token = CancellationToken::new();
    let runner = controller.clone();
    let run_token = token.clone();
    let task = tokio::spawn(async move {
        runner.run(run_token).await.unwrap();
    });

    let f = fake.clone();
    assert_eventually(
        || {
            let f = f.clone();
            async move { f.job_subscribers() > 0 && f.pod_subscribers() > 0 }
        },
        Duration::from_secs(2),
        "watchers should subscribe",
    )
    .await;

    (controller, token, task)
}

#[tokio::test]
async fn test_successful_job_lifecycle() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-ok", "busybox").with_command("true"))
        .await
        .unwrap();

    fake.emit_pod(WatchEvent::Added(pod_object("job-ok-abcde", 0, None)));
    fake.emit_pod(WatchEvent::Modified(pod_object("job-ok-abcde", 0, Some(0))));
    fake.emit_job(WatchEvent::Modified(job_object("job-ok", Some(1), None)));

    let f = fake.clone();
    assert_eventually(
        || {
            let f = f.clone();
            async move { f.deleted_jobs().contains(&"job-ok".to_string()) }
        },
        Duration::from_secs(2),
        "succeeded job should be deleted",
    )
    .await;

    fake.emit_job(WatchEvent::Deleted(job_object("job-ok", Some(1), None)));

    let db = controller.db().clone();
    assert_eventually(
        || {
            let db = db.clone();
            async move { db.get("job-ok").map(|r| r.deleted).unwrap_or(false) }
        },
        Duration::from_secs(2),
        "record should be marked deleted",
    )
    .await;

    let record = controller.db().get("job-ok").unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert!(record.log.is_none());
    assert_eq!(fake.deleted_pods(), vec!["job-ok-abcde".to_string()]);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_crashing_job_lifecycle() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-bad", "busybox").with_max_restart_count(1))
        .await
        .unwrap();
    fake.set_log("job-bad-zzzzz", "fatal: missing input");

    fake.emit_pod(WatchEvent::Modified(pod_object("job-bad-zzzzz", 0, Some(1))));
    fake.emit_pod(WatchEvent::Modified(pod_object("job-bad-zzzzz", 1, Some(1))));

    let f = fake.clone();
    assert_eventually(
        || {
            let f = f.clone();
            async move { f.deleted_jobs().contains(&"job-bad".to_string()) }
        },
        Duration::from_secs(2),
        "failed job should be deleted",
    )
    .await;

    fake.emit_job(WatchEvent::Deleted(job_object("job-bad", None, None)));

    let db = controller.db().clone();
    assert_eventually(
        || {
            let db = db.clone();
            async move { db.get("job-bad").map(|r| r.deleted).unwrap_or(false) }
        },
        Duration::from_secs(2),
        "record should be marked deleted",
    )
    .await;

    let record = controller.db().get("job-bad").unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.restart_count, 1);
    assert_eq!(record.log.as_deref(), Some("fatal: missing input"));
    assert_eq!(fake.deleted_jobs(), vec!["job-bad".to_string()]);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_watchers_resubscribe_after_failure() {
    let fake = FakeOrchestrator::new();
    fake.fail_watches(3);
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-r", "busybox"))
        .await
        .unwrap();
    fake.emit_job(WatchEvent::Modified(job_object("job-r", Some(1), None)));

    let db = controller.db().clone();
    assert_eventually(
        || {
            let db = db.clone();
            async move {
                db.get("job-r")
                    .map(|r| r.status == JobStatus::Succeeded)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(2),
        "events after resubscription should be processed",
    )
    .await;

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_event_during_create_is_not_lost() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    // The job finishes before create_job has returned to the controller.
    fake.emit_during_create(
        WatchEvent::Modified(job_object("job-fast", Some(1), None)),
        Duration::from_millis(200),
    );
    controller
        .submit(JobRequest::new("job-fast", "busybox").with_command("true"))
        .await
        .unwrap();

    wait_for_success(&controller, "job-fast").await;
    let record = controller.db().get("job-fast").unwrap();
    assert_eq!(record.handle.namespace, NAMESPACE);
    assert_eq!(fake.deleted_jobs(), vec!["job-fast".to_string()]);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

async fn wait_for_resubscribe(fake: &Arc<FakeOrchestrator>) {
    let f = fake.clone();
    assert_eventually(
        || {
            let f = f.clone();
            async move { f.job_watches() >= 2 && f.job_subscribers() > 0 }
        },
        Duration::from_secs(2),
        "job watcher should resubscribe",
    )
    .await;
}

async fn wait_for_success(controller: &Arc<Controller>, job_id: &'static str) {
    let db = controller.db().clone();
    assert_eventually(
        || {
            let db = db.clone();
            async move {
                db.get(job_id)
                    .map(|r| r.status == JobStatus::Succeeded)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(2),
        "job should be marked succeeded",
    )
    .await;
}

#[tokio::test]
async fn test_job_watcher_recovers_from_stream_error() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-e", "busybox"))
        .await
        .unwrap();

    fake.break_job_stream();
    wait_for_resubscribe(&fake).await;
    fake.emit_job(WatchEvent::Modified(job_object("job-e", Some(1), None)));

    wait_for_success(&controller, "job-e").await;
    assert!(!controller.db().get("job-e").unwrap().deleted);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_job_watcher_recovers_from_stream_end() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-n", "busybox"))
        .await
        .unwrap();

    fake.close_job_stream();
    wait_for_resubscribe(&fake).await;
    fake.emit_job(WatchEvent::Modified(job_object("job-n", Some(1), None)));

    wait_for_success(&controller, "job-n").await;

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}

#[tokio::test]
async fn test_nameless_job_event_does_not_break_stream() {
    let fake = FakeOrchestrator::new();
    let (controller, token, task) = start(&fake).await;

    controller
        .submit(JobRequest::new("job-x", "busybox"))
        .await
        .unwrap();

    fake.emit_job(WatchEvent::Modified(k8s_openapi::api::batch::v1::Job::default()));
    fake.emit_job(WatchEvent::Modified(job_object("job-x", Some(1), None)));

    wait_for_success(&controller, "job-x").await;
    assert_eq!(fake.job_watches(), 1, "stream should survive a nameless event");

    token.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("controller should stop")
        .unwrap();
}
