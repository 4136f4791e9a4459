//! End-to-end tests: a coordinator on a paused tokio clock, driven through
//! the public handles.

use std::sync::Arc;
use std::time::Duration;

use ddsched_core::{
    Executor, GeneratorConfig, MonitorConfig, Priority, SchedulerConfig, SimExecutor, TaskId,
    TaskKind,
};
use ddsched_registry::{ListKind, TaskRecord};
use ddsched_scheduler::{
    run_task_body, BodyOutcome, Generator, Monitor, Scheduler, SchedulerError, TaskIds,
    COORDINATOR_UNIT,
};

const EMPTY: &str = "List is empty.";

fn start() -> (Arc<SimExecutor>, Scheduler) {
    let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
    let scheduler = Scheduler::start(&SchedulerConfig::default(), exec.clone());
    (exec, scheduler)
}

fn task(id: u64, kind: TaskKind, release: u64, deadline: u64) -> TaskRecord {
    TaskRecord::new(TaskId(id), format!("task {id}"), kind, release, deadline)
}

#[tokio::test(start_paused = true)]
async fn create_delete_then_sweep() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();
    let t = exec.now();

    let late = handle.submit_create(task(1, TaskKind::Periodic, t, t + 300)).await.unwrap();
    let early = handle.submit_create(task(2, TaskKind::Periodic, t, t + 100)).await.unwrap();
    let middle = handle.submit_create(task(3, TaskKind::Periodic, t, t + 200)).await.unwrap();
    assert_eq!(early.position, 0);
    assert_eq!(middle.position, 1);

    assert_eq!(
        reader.request_snapshot(ListKind::Active).await.unwrap(),
        "Task ID = 2, Deadline = 100\nTask ID = 3, Deadline = 200\nTask ID = 1, Deadline = 300"
    );
    assert_eq!(exec.priority(early.unit), Some(Priority(20)));
    assert_eq!(exec.priority(middle.unit), Some(Priority(19)));
    assert_eq!(exec.priority(late.unit), Some(Priority(18)));

    let done = handle.submit_delete(middle.unit).await.unwrap().unwrap();
    assert_eq!(done.task, TaskId(3));
    assert!(done.met_deadline);
    assert!(!exec.is_alive(middle.unit));
    assert_eq!(
        reader.request_snapshot(ListKind::Active).await.unwrap(),
        "Task ID = 2, Deadline = 100\nTask ID = 1, Deadline = 300"
    );
    assert_eq!(exec.priority(early.unit), Some(Priority(20)));
    assert_eq!(exec.priority(late.unit), Some(Priority(19)));

    tokio::time::sleep(Duration::from_millis(101)).await;
    assert_eq!(
        reader.request_snapshot(ListKind::Active).await.unwrap(),
        "Task ID = 1, Deadline = 300"
    );
    assert_eq!(
        reader.request_snapshot(ListKind::Overdue).await.unwrap(),
        "Task ID = 2, Deadline = 100"
    );
    assert!(!exec.is_alive(early.unit));
    assert_eq!(exec.priority(late.unit), Some(Priority(20)));
    assert_eq!(reader.request_snapshot(ListKind::Completed).await.unwrap(), EMPTY);
}

#[tokio::test(start_paused = true)]
async fn band_exhaustion_rejects_and_terminates() {
    let (exec, scheduler) = start();
    let handle = scheduler.handle();

    let mut admitted = Vec::new();
    for id in 1..=19 {
        let scheduled = handle
            .submit_create(task(id, TaskKind::Periodic, 0, 1000 + id))
            .await
            .unwrap();
        admitted.push(scheduled.unit);
    }
    let before = exec.live_units();
    for id in 20..=21 {
        let err = handle
            .submit_create(task(id, TaskKind::Periodic, 0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Rejected { task, .. } if task == TaskId(id)));
    }
    assert_eq!(exec.live_units(), before);
    assert!(admitted.iter().all(|unit| exec.is_alive(*unit)));
}

#[tokio::test(start_paused = true)]
async fn overdue_history_keeps_newest_four() {
    let (_exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();

    for id in 1..=6 {
        handle
            .submit_create(task(id, TaskKind::Periodic, 0, id * 10))
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(61)).await;

    let overdue = reader.request_snapshot(ListKind::Overdue).await.unwrap();
    let ids: Vec<_> = overdue
        .lines()
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        vec!["Task ID = 3", "Task ID = 4", "Task ID = 5", "Task ID = 6"]
    );
    assert_eq!(reader.request_snapshot(ListKind::Active).await.unwrap(), EMPTY);
}

#[tokio::test(start_paused = true)]
async fn aperiodic_unit_terminated_by_its_timer() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();

    let scheduled = handle
        .submit_create(task(1, TaskKind::Aperiodic, 0, 50))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(49)).await;
    assert!(exec.is_alive(scheduled.unit));

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert!(!exec.is_alive(scheduled.unit));

    // Relocation waits for the next command.
    assert_eq!(
        reader.request_snapshot(ListKind::Overdue).await.unwrap(),
        "Task ID = 1, Deadline = 50"
    );
    assert_eq!(reader.request_snapshot(ListKind::Active).await.unwrap(), EMPTY);
}

#[tokio::test(start_paused = true)]
async fn body_completes_and_deletes_itself() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();

    let scheduled = handle
        .submit_create(task(1, TaskKind::Periodic, 0, 200))
        .await
        .unwrap();
    let outcome = run_task_body(handle.clone(), scheduled.unit, Duration::from_millis(40)).await;

    match outcome {
        BodyOutcome::Completed(Some(done)) => {
            assert_eq!(done.task, TaskId(1));
            assert!(done.met_deadline);
            assert!(done.completed_at >= 40);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!exec.is_alive(scheduled.unit));
    assert_eq!(reader.request_snapshot(ListKind::Active).await.unwrap(), EMPTY);
}

#[tokio::test(start_paused = true)]
async fn late_periodic_body_finds_itself_overdue() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();

    let scheduled = handle
        .submit_create(task(1, TaskKind::Periodic, 0, 50))
        .await
        .unwrap();
    let outcome = run_task_body(handle.clone(), scheduled.unit, Duration::from_millis(100)).await;

    // The delete's sweep moves the task first, so there is nothing to remove.
    assert!(matches!(outcome, BodyOutcome::Completed(None)));
    assert!(!exec.is_alive(scheduled.unit));
    assert_eq!(
        reader.request_snapshot(ListKind::Overdue).await.unwrap(),
        "Task ID = 1, Deadline = 50"
    );
}

#[tokio::test(start_paused = true)]
async fn aperiodic_body_stops_at_deadline() {
    let (exec, scheduler) = start();
    let handle = scheduler.handle();

    let scheduled = handle
        .submit_create(task(1, TaskKind::Aperiodic, 0, 30))
        .await
        .unwrap();
    let outcome = run_task_body(handle.clone(), scheduled.unit, Duration::from_millis(100)).await;

    assert!(matches!(outcome, BodyOutcome::Terminated));
    assert!(exec.now() < 100);
    assert!(!exec.is_alive(scheduled.unit));
}

#[tokio::test(start_paused = true)]
async fn generator_releases_count_tasks() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    let mut reader = scheduler.take_reader().unwrap();

    let config = GeneratorConfig {
        name: "gen".into(),
        kind: TaskKind::Periodic,
        period_ticks: 100,
        relative_deadline_ticks: None,
        execution_ticks: 20,
        count: Some(3),
        offset_ticks: 0,
    };
    let ids = TaskIds::default();
    let generator = Generator::new(
        config,
        Priority(21),
        handle.with_requester("gen"),
        ids.clone(),
        scheduler.subscribe_shutdown(),
    );
    let stats = generator.run().await;
    assert_eq!(stats.released, 3);
    assert_eq!(stats.scheduled, 3);
    assert_eq!(stats.rejected, 0);
    assert_eq!(ids.next(), TaskId(4));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(reader.request_snapshot(ListKind::Active).await.unwrap(), EMPTY);
    assert_eq!(reader.request_snapshot(ListKind::Overdue).await.unwrap(), EMPTY);
    // Only the coordinator's own unit is left.
    assert_eq!(exec.live_units(), 1);
    assert!(exec.find(COORDINATOR_UNIT).is_some());
    assert!(exec.find("gen").is_none());
}

#[tokio::test(start_paused = true)]
async fn monitor_polls_every_list() {
    let (exec, mut scheduler) = start();
    let handle = scheduler.handle();
    handle
        .submit_create(task(9, TaskKind::Periodic, 0, 500))
        .await
        .unwrap();

    let reader = scheduler.take_reader().unwrap();
    let mut monitor = Monitor::new(
        MonitorConfig::default(),
        Priority(22),
        reader,
        exec.clone(),
        scheduler.subscribe_shutdown(),
    );
    let snapshots = monitor.poll().await.unwrap();
    assert_eq!(
        snapshots,
        vec![
            (ListKind::Active, "Task ID = 9, Deadline = 500".to_string()),
            (ListKind::Completed, EMPTY.to_string()),
            (ListKind::Overdue, EMPTY.to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stopped_coordinator_is_unavailable() {
    let (exec, scheduler) = start();
    let handle = scheduler.handle();
    scheduler.shutdown();
    scheduler.join().await.unwrap();

    let err = handle
        .submit_create(task(1, TaskKind::Periodic, 0, 100))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ChannelUnavailable("command")));
    assert_eq!(exec.live_units(), 0);
}

#[tokio::test(start_paused = true)]
async fn control_units_follow_configured_priorities() {
    let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
    let mut config = SchedulerConfig::default();
    config.priorities.coordinator = Priority(30);
    let scheduler = Scheduler::start(&config, exec.clone());

    // A round trip guarantees the coordinator loop is running.
    let scheduled = scheduler
        .handle()
        .submit_create(task(1, TaskKind::Periodic, 0, 500))
        .await
        .unwrap();
    let coordinator = exec.find(COORDINATOR_UNIT).unwrap();
    assert_eq!(exec.priority(coordinator), Some(Priority(30)));
    assert_eq!(exec.priority(scheduled.unit), Some(config.priorities.execution_base));

    scheduler.shutdown();
    scheduler.join().await.unwrap();
    assert!(!exec.is_alive(coordinator));
}
