//! End-to-end scheduler tests
//!
//! Exercises the work-graph scheduler: parallel fan-in timing, cycle
//! rejection, dependency ordering, the concurrency bound, deadlock
//! detection, and rollback completeness.

use mnemosyne_engine::coordinator::{AgentState, Coordinator};
use mnemosyne_engine::error::OrchestrationError;
use mnemosyne_engine::graph::{GraphTask, TaskStatus, WorkGraph};
use mnemosyne_engine::parallel::{ParallelExecutor, ParallelExecutorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sleeping_task(id: &str, millis: u64) -> GraphTask {
    GraphTask::new(id, format!("sleep {}ms", millis)).with_executor(Arc::new(move || {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(format!("slept {}ms", millis))
        })
    }))
}

/// The fan-in seed graph: A, B, C depends on {A, B}, D depends on C.
fn fan_in_graph(task_millis: u64) -> WorkGraph {
    let mut graph = WorkGraph::new();
    graph.add(sleeping_task("a", task_millis));
    graph.add(sleeping_task("b", task_millis));
    graph.add(sleeping_task("c", task_millis).depends_on(["a", "b"]));
    graph.add(sleeping_task("d", task_millis).depends_on(["c"]));
    graph
}

#[tokio::test]
async fn test_parallel_fan_in_wall_clock() {
    let coordinator = Coordinator::new();
    let executor = ParallelExecutor::new(
        coordinator.clone(),
        ParallelExecutorConfig {
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(5),
        },
    );

    let started = Instant::now();
    let report = executor.execute(fan_in_graph(50)).await.unwrap();
    let wall = started.elapsed();

    assert_eq!(report.stats.successful, 4);
    assert!(
        report
            .graph
            .tasks()
            .all(|t| t.status == TaskStatus::Completed),
        "all four tasks completed"
    );

    // Critical path is a|b -> c -> d: three 50 ms layers
    assert!(wall >= Duration::from_millis(140), "wall {:?}", wall);
    assert!(wall <= Duration::from_millis(450), "wall {:?}", wall);

    // With a two-wide phase and max_concurrent=4 the efficiency ceiling is
    // ~0.33; just require meaningful overlap
    assert!(report.stats.parallel_efficiency >= 0.2);
    assert!(report.stats.parallel_efficiency <= 1.0);
}

#[tokio::test]
async fn test_parallel_efficiency_at_matching_width() {
    // With max_concurrent=2 the same graph reaches the 0.5 efficiency bar
    let executor = ParallelExecutor::new(
        Coordinator::new(),
        ParallelExecutorConfig {
            max_concurrent: 2,
            spawn_timeout: Duration::from_secs(5),
        },
    );

    let report = executor.execute(fan_in_graph(50)).await.unwrap();
    assert_eq!(report.stats.successful, 4);
    assert!(
        report.stats.parallel_efficiency >= 0.5,
        "efficiency {}",
        report.stats.parallel_efficiency
    );
}

#[tokio::test]
async fn test_dependency_order_is_respected() {
    let executor = ParallelExecutor::new(
        Coordinator::new(),
        ParallelExecutorConfig {
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(5),
        },
    );

    let report = executor.execute(fan_in_graph(20)).await.unwrap();

    // For every edge u -> v: end(u) <= start(v)
    for (upstream, downstream) in [("a", "c"), ("b", "c"), ("c", "d")] {
        let u = report.graph.get(upstream).unwrap();
        let v = report.graph.get(downstream).unwrap();
        assert!(
            u.ended_at.unwrap() <= v.started_at.unwrap(),
            "{} must finish before {} starts",
            upstream,
            downstream
        );
    }
}

#[tokio::test]
async fn test_cycle_rejected_before_any_task_starts() {
    let coordinator = Coordinator::new();
    let executor = ParallelExecutor::new(coordinator.clone(), ParallelExecutorConfig::default());

    let mut graph = WorkGraph::new();
    graph.add(sleeping_task("x", 10).depends_on(["z"]));
    graph.add(sleeping_task("y", 10).depends_on(["x"]));
    graph.add(sleeping_task("z", 10).depends_on(["y"]));

    let err = executor.execute(graph).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));

    // Coordinator untouched: no exec agents were registered
    assert!(coordinator.get_all_agent_states().await.is_empty());
}

#[tokio::test]
async fn test_concurrency_bound_holds_throughout() {
    let active = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let mut graph = WorkGraph::new();
    for i in 0..12 {
        let active = active.clone();
        let high_water = high_water.clone();
        graph.add(
            GraphTask::new(format!("t{}", i), "tracked").with_executor(Arc::new(move || {
                let active = active.clone();
                let high_water = high_water.clone();
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    high_water.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok("ok".to_string())
                })
            })),
        );
    }

    let executor = ParallelExecutor::new(
        Coordinator::new(),
        ParallelExecutorConfig {
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(5),
        },
    );
    let report = executor.execute(graph).await.unwrap();

    assert_eq!(report.stats.successful, 12);
    assert!(
        high_water.load(Ordering::SeqCst) <= 4,
        "concurrency bound exceeded: {}",
        high_water.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_deadlock_detected_on_unrunnable_graph() {
    let executor = ParallelExecutor::new(Coordinator::new(), ParallelExecutorConfig::default());

    // A task stuck outside Pending can never be scheduled; its dependent
    // can never become ready
    let mut graph = WorkGraph::new();
    let mut stuck = GraphTask::new("stuck", "never runnable");
    stuck.status = TaskStatus::Blocked;
    graph.add(stuck);
    graph.add(sleeping_task("child", 10).depends_on(["stuck"]));

    let err = executor.execute(graph).await.unwrap_err();
    match err {
        OrchestrationError::Deadlock { blocked } => {
            assert!(blocked.contains(&"stuck".to_string()));
            assert!(blocked.contains(&"child".to_string()));
        }
        other => panic!("expected deadlock, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rollback_leaves_no_running_agents() {
    let coordinator = Coordinator::new();
    let executor = ParallelExecutor::new(
        coordinator.clone(),
        ParallelExecutorConfig {
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(5),
        },
    );

    // One fast failure while siblings are still sleeping
    let mut graph = WorkGraph::new();
    graph.add(GraphTask::new("bad", "fails fast").with_executor(Arc::new(|| {
        Box::pin(async { Err(OrchestrationError::Other("boom".to_string())) })
    })));
    graph.add(sleeping_task("slow-1", 200));
    graph.add(sleeping_task("slow-2", 200));
    graph.add(sleeping_task("dependent", 10).depends_on(["bad"]));

    let err = executor.execute(graph).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::ExecutionFailed { .. }));

    let states = coordinator.get_all_agent_states().await;
    let running: Vec<_> = states
        .iter()
        .filter(|(id, state)| id.starts_with("exec_") && **state == AgentState::Running)
        .collect();
    assert!(running.is_empty(), "agents still running: {:?}", running);
}

#[tokio::test]
async fn test_timeout_synthesizes_failure_and_rolls_back() {
    let coordinator = Coordinator::new();
    let executor = ParallelExecutor::new(
        coordinator.clone(),
        ParallelExecutorConfig {
            max_concurrent: 2,
            spawn_timeout: Duration::from_millis(40),
        },
    );

    let mut graph = WorkGraph::new();
    graph.add(sleeping_task("hangs", 5_000));
    graph.add(sleeping_task("quick", 5));

    let err = executor.execute(graph).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::ExecutionFailed { failed: 1 }
    ));
}

#[tokio::test]
async fn test_results_and_durations_recorded() {
    let executor = ParallelExecutor::new(Coordinator::new(), ParallelExecutorConfig::default());

    let report = executor.execute(fan_in_graph(20)).await.unwrap();

    for id in ["a", "b", "c", "d"] {
        let task = report.graph.get(id).unwrap();
        assert_eq!(task.result.as_deref(), Some("slept 20ms"));
        assert!(task.duration().unwrap() >= Duration::from_millis(15));
        assert!(task.agent_id.as_deref().unwrap().starts_with("exec_"));
    }

    assert!(report.stats.avg_task_duration_secs > 0.0);
    assert!(report.stats.min_task_duration_secs <= report.stats.max_task_duration_secs);
    assert_eq!(report.stats.completion_rate, 1.0);
}
