//! End-to-end coordinator behaviour over the loopback channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use remote_batch_core::{
    BatchConfig, BatchEvent, Credentials, HostSpec, RemoteChannel, TaskSpec, TaskStatus, Transport,
    TransportError,
};
use remote_batch_session::BatchCoordinator;
use remote_batch_transport::LoopbackTransport;

fn fast_config() -> BatchConfig {
    BatchConfig::default().with_status_interval(Duration::from_millis(10))
}

fn host() -> HostSpec {
    HostSpec::new("loopback")
}

fn echo_tasks(count: usize) -> Vec<TaskSpec> {
    (0..count)
        .map(|i| TaskSpec::new(format!("t{i}"), format!("echo {i}")))
        .collect()
}

fn dispatch_count(events: &[BatchEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, BatchEvent::Dispatched { .. }))
        .count()
}

#[tokio::test]
async fn test_results_are_one_to_one_and_ordered() {
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), fast_config());
    let results = coordinator
        .run(&host(), &Credentials::default(), echo_tasks(5))
        .await;

    assert_eq!(results.len(), 5);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.task_id, format!("t{i}"));
        assert_eq!(result.status, TaskStatus::Succeeded);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), i.to_string());
    }
}

#[tokio::test]
async fn test_batching_preserves_global_order() {
    let coordinator =
        BatchCoordinator::new(LoopbackTransport::new(), fast_config().with_batch_size(3));
    let results = coordinator
        .run(&host(), &Credentials::default(), echo_tasks(7))
        .await;

    assert_eq!(results.len(), 7);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.task_id, format!("t{i}"));
        assert_eq!(result.stdout.trim(), i.to_string());
    }

    // ceil(7 / 3) dispatches over one session
    let history = coordinator.events().get_history();
    assert_eq!(dispatch_count(&history), 3);
}

#[tokio::test]
async fn test_shell_metacharacters_survive_end_to_end() {
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), fast_config());
    let tasks = vec![
        TaskSpec::new("1", "echo \"a\\\"b\""),
        TaskSpec::new("2", "exit 3"),
    ];
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results[0].status, TaskStatus::Succeeded);
    assert_eq!(results[0].exit_code, Some(0));
    assert_eq!(results[0].stdout.trim(), "a\"b");

    assert_eq!(results[1].status, TaskStatus::Failed);
    assert_eq!(results[1].exit_code, Some(3));
}

#[tokio::test]
async fn test_failure_continues_by_default() {
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), fast_config());
    let tasks = vec![
        TaskSpec::new("a", "echo before"),
        TaskSpec::new("b", "exit 7"),
        TaskSpec::new("c", "echo after"),
    ];
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results[1].status, TaskStatus::Failed);
    assert_eq!(results[2].status, TaskStatus::Succeeded);
    assert_eq!(results[2].stdout.trim(), "after");
}

#[tokio::test]
async fn test_stop_on_first_failure_marks_the_rest_not_executed() {
    let config = fast_config()
        .with_batch_size(2)
        .with_stop_on_first_failure(true);
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), config);
    let tasks = vec![
        TaskSpec::new("a", "echo ok"),
        TaskSpec::new("b", "exit 1"),
        TaskSpec::new("c", "echo never"),
        TaskSpec::new("d", "echo never"),
    ];
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results[0].status, TaskStatus::Succeeded);
    assert_eq!(results[1].status, TaskStatus::Failed);
    assert_eq!(results[2].status, TaskStatus::Cancelled);
    assert_eq!(results[3].status, TaskStatus::Cancelled);

    // the second batch was never dispatched
    let history = coordinator.events().get_history();
    assert_eq!(dispatch_count(&history), 1);
}

#[tokio::test]
async fn test_oversized_payload_is_split_before_dispatch() {
    let mut config = fast_config();
    config.max_payload_bytes = 1200;
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), config);

    let filler = "x".repeat(250);
    let tasks: Vec<TaskSpec> = (0..4)
        .map(|i| TaskSpec::new(format!("t{i}"), format!("echo {filler}")))
        .collect();
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.task_id, format!("t{i}"));
        assert_eq!(result.status, TaskStatus::Succeeded);
    }

    let history = coordinator.events().get_history();
    assert!(dispatch_count(&history) >= 2, "expected the batch to split");
}

#[tokio::test]
async fn test_single_oversized_task_is_rejected_not_dispatched() {
    let mut config = fast_config();
    config.max_payload_bytes = 512;
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), config);

    let tasks = vec![
        TaskSpec::new("big", format!("echo {}", "y".repeat(4096))),
        TaskSpec::new("small", "echo fits"),
    ];
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results[0].status, TaskStatus::Failed);
    assert!(results[0].stderr.contains("payload encoding failed"));
    assert_eq!(results[1].status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_empty_task_list_returns_empty_manifest() {
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), fast_config());
    let results = coordinator
        .run(&host(), &Credentials::default(), Vec::new())
        .await;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_per_task_timeout_does_not_block_the_next_task() {
    let config = fast_config().with_per_task_timeout(Duration::from_secs(1));
    let coordinator = BatchCoordinator::new(LoopbackTransport::new(), config);
    let tasks = vec![
        TaskSpec::new("slow", "sleep 30"),
        TaskSpec::new("next", "echo alive"),
    ];
    let results = coordinator
        .run(&host(), &Credentials::default(), tasks)
        .await;

    assert_eq!(results[0].status, TaskStatus::TimedOut);
    assert_eq!(results[1].status, TaskStatus::Succeeded);
    assert_eq!(results[1].stdout.trim(), "alive");
}

/// Counts transport connects so session reuse is observable.
struct CountingTransport {
    inner: LoopbackTransport,
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for CountingTransport {
    async fn connect(
        &self,
        host: &HostSpec,
        credentials: &Credentials,
    ) -> Result<Arc<dyn RemoteChannel>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(host, credentials).await
    }
}

#[tokio::test]
async fn test_one_session_serves_every_batch() {
    let connects = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport {
        inner: LoopbackTransport::new(),
        connects: Arc::clone(&connects),
    };
    let coordinator = BatchCoordinator::new(transport, fast_config().with_batch_size(2));

    let results = coordinator
        .run(&host(), &Credentials::default(), echo_tasks(6))
        .await;
    assert_eq!(results.len(), 6);
    assert!(results.iter().all(|r| r.status == TaskStatus::Succeeded));

    // three batches, one transport connection
    assert_eq!(connects.load(Ordering::SeqCst), 1);
}
