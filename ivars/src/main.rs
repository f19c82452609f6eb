use std::{process::ExitCode, sync::Arc, thread, time::Instant};

use clap::{Parser, ValueEnum};
use ivars::{RubyObject, Runtime, RuntimeCreateInfo, TableStrategy, Value};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Stamped,
    Synchronized,
}

impl From<Strategy> for TableStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Stamped => TableStrategy::Stamped,
            Strategy::Synchronized => TableStrategy::Synchronized,
        }
    }
}

/// Hammer one class's variable table from many threads and verify that no
/// write was lost.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Strategy::Stamped)]
    strategy: Strategy,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    #[arg(long, default_value_t = 64)]
    objects: usize,
    #[arg(long, default_value_t = 16)]
    variables: usize,
    #[arg(long, default_value_t = 8)]
    rounds: usize,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let runtime = Arc::new(Runtime::new(RuntimeCreateInfo {
        strategy: Some(args.strategy.into()),
        ..Default::default()
    }));
    let class = match runtime.define_class("Workload", None) {
        Ok(class) => class,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let objects: Vec<_> = match (0..args.objects).map(|_| runtime.allocate(class)).collect() {
        Ok(objects) => objects,
        Err(err) => {
            log::error!("allocation failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    let objects = Arc::new(objects);

    let variables = args.variables.max(1);
    let start = Instant::now();
    if let Err(err) = run_workload(&runtime, &objects, args.threads, args.rounds, variables) {
        log::error!("{err}");
        return ExitCode::FAILURE;
    }
    let elapsed = start.elapsed();

    let Verdict {
        mismatches,
        checksum,
    } = verify(&objects, args.threads, args.rounds, variables);

    let names = runtime.variable_names(class).unwrap_or_default();
    log::info!(
        "{:?}: {} threads, {} objects, {} slots, checksum {checksum}, {:?}",
        args.strategy,
        args.threads,
        args.objects,
        names.len(),
        elapsed
    );
    println!(
        "strategy={:?} slots={} checksum={checksum} elapsed={elapsed:?}",
        args.strategy,
        names.len()
    );

    if mismatches > 0 {
        log::error!("{mismatches} variables held unexpected values");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Worker `worker` writes `@w{worker}_v{v}` on object `i` in every round
/// `round`, where `v = (i + worker + round) % variables`.
fn run_workload(
    runtime: &Arc<Runtime>,
    objects: &Arc<Vec<Arc<RubyObject>>>,
    threads: usize,
    rounds: usize,
    variables: usize,
) -> Result<(), String> {
    let workers: Vec<_> = (0..threads)
        .map(|worker| {
            let runtime = runtime.clone();
            let objects = objects.clone();
            thread::spawn(move || -> ivars::Result<()> {
                for round in 0..rounds {
                    for (i, object) in objects.iter().enumerate() {
                        // workers own disjoint names but share the objects
                        let v = (i + worker + round) % variables;
                        let accessor = runtime.get_or_allocate_accessor(
                            object.class().id(),
                            &format!("@w{worker}_v{v}"),
                        )?;
                        accessor.set(object, Value::from_i64((i * variables + v) as i64));
                        runtime.object_id(object);
                    }
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        match worker.join() {
            Ok(result) => result.map_err(|err| err.to_string())?,
            Err(_) => return Err("worker panicked".into()),
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct Verdict {
    mismatches: usize,
    checksum: i64,
}

/// Compare every slot against what [`run_workload`] wrote. Missing writes,
/// wrong values and slots no worker touched all count as mismatches, and a
/// checksum that differs from the expected sum counts once more.
fn verify(
    objects: &[Arc<RubyObject>],
    threads: usize,
    rounds: usize,
    variables: usize,
) -> Verdict {
    let written = |i: usize, worker: usize, v: usize| {
        (0..rounds).any(|round| (i + worker + round) % variables == v)
    };

    let mut mismatches = 0usize;
    let mut checksum = 0i64;
    let mut expected_checksum = 0i64;
    for (i, object) in objects.iter().enumerate() {
        for worker in 0..threads {
            for v in 0..variables {
                let accessor = object
                    .class()
                    .variables()
                    .accessor_for_read(&format!("@w{worker}_v{v}"));
                let value = accessor.get(object);
                let expected = (i * variables + v) as i64;
                if !written(i, worker, v) {
                    if !value.is_undef() {
                        log::warn!("object {i}: @w{worker}_v{v} set but never written");
                        mismatches += 1;
                    }
                    continue;
                }
                expected_checksum += expected;
                match value.as_i64() {
                    Some(n) if n == expected => checksum += n,
                    _ => {
                        log::warn!("object {i}: @w{worker}_v{v} is {value:?}, expected {expected}");
                        mismatches += 1;
                    }
                }
            }
        }
    }
    if checksum != expected_checksum {
        log::error!("checksum {checksum} does not match expected {expected_checksum}");
        mismatches += 1;
    }
    Verdict {
        mismatches,
        checksum,
    }
}
