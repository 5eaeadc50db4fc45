use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::args::SimConfig;
use crate::backend::BackendShim;
use crate::logging::EventLog;
use crate::model::{Op, TaskState};
use crate::oracle::Oracle;
use crate::scheduler::Scheduler;

pub(crate) async fn run(config: SimConfig, rng: &mut ChaCha8Rng) -> Result<(), String> {
    let mut backend = BackendShim::new(config.clone()).map_err(|err| err.to_string())?;
    let mut tasks: Vec<TaskState> = (0..config.tasks)
        .map(|id| TaskState {
            id,
            partition: None,
        })
        .collect();
    let mut scheduler = Scheduler::new(config.tasks);
    let mut events = EventLog::new(config.first_steps, config.tail_steps);

    let max_steps = config.iterations.unwrap_or(u64::MAX);
    let max_time = config.duration_ms.unwrap_or(u64::MAX);

    let mut step: u64 = 0;
    while step < max_steps && scheduler.now_ms <= max_time {
        let Some(task_id) = scheduler.next_ready(rng) else {
            break;
        };
        let op = next_op(&tasks[task_id], &config, rng);
        let op_display = format_op(&op);
        let outcome = match backend.apply(&mut tasks[task_id], op.clone(), rng).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                events.dump_failure(&reason);
                return Err(reason);
            }
        };

        if let Op::Sleep(ms) = op {
            scheduler.sleep(task_id, ms);
        } else {
            scheduler.mark_ready(task_id);
        }
        let result_label = match outcome.result {
            Ok(()) => "Ok".to_string(),
            Err(ref err) => format!("Err({err:?})"),
        };
        let conn_label = outcome
            .conn_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        events.record(format!(
            "step={} time={}ms task={} op={} conn={} result={}",
            step, scheduler.now_ms, task_id, op_display, conn_label, result_label
        ));

        // let destroys spawned by abandoned handles run before checking
        tokio::task::yield_now().await;

        if let Err(reason) = Oracle::check(&tasks, &backend) {
            events.dump_failure(&reason);
            return Err(reason);
        }
        scheduler.advance_time(1);
        step += 1;
    }

    let factory = backend.manager.factory();
    tracing::info!(
        "complete: steps={} time={}ms tasks={} partitions={} pool_size={} created={} destroyed={}",
        step,
        scheduler.now_ms,
        config.tasks,
        config.partitions,
        config.pool_size,
        factory.created(),
        factory.destroyed()
    );
    let report = backend.manager.shutdown().await;
    tracing::info!(
        destroyed = report.destroyed,
        deferred = report.deferred,
        "pool shut down"
    );
    Ok(())
}

fn next_op(task: &TaskState, config: &SimConfig, rng: &mut ChaCha8Rng) -> Op {
    if rng.random::<f64>() < config.sleep_rate {
        return Op::Sleep(rng.random_range(1..=50));
    }
    if rng.random::<f64>() < config.evict_rate {
        return if rng.random::<bool>() {
            Op::Evict
        } else {
            Op::Sweep
        };
    }
    if rng.random::<f64>() < config.statistics_rate {
        return if rng.random::<bool>() {
            Op::ToggleStatistics
        } else {
            Op::ClearStatistics
        };
    }

    if task.partition.is_none() {
        return Op::Acquire(rng.random_range(0..config.partitions));
    }

    let weights = [
        (Op::Release, 0.6),
        (Op::ReleaseBroken, config.break_rate),
        (Op::Abandon, config.abandon_rate),
        (Op::Sleep(1), 0.3),
    ];
    choose_weighted(&weights, rng)
}

fn choose_weighted(items: &[(Op, f64)], rng: &mut ChaCha8Rng) -> Op {
    let total: f64 = items.iter().map(|(_, weight)| weight.max(0.0)).sum();
    if total <= f64::EPSILON {
        return items
            .first()
            .map(|(op, _)| op.clone())
            .unwrap_or(Op::Sleep(1));
    }
    let mut target = rng.random::<f64>() * total;
    for (op, weight) in items {
        let w = weight.max(0.0);
        if target <= w {
            return op.clone();
        }
        target -= w;
    }
    items
        .last()
        .map(|(op, _)| op.clone())
        .unwrap_or(Op::Sleep(1))
}

fn format_op(op: &Op) -> String {
    match op {
        Op::Sleep(ms) => format!("Sleep({ms}ms)"),
        Op::Acquire(partition) => format!("Acquire(p{partition})"),
        other => format!("{other:?}"),
    }
}
