use anyhow::Result;
use asap_scheduler::{ErrorPolicy, SchedulerConfig};
use clap::{Parser, ValueEnum};
use std::cell::Cell;
use std::rc::Rc;
use tokio::sync::oneshot;
use tokio::task::LocalSet;

#[derive(Parser)]
#[command(name = "burst")]
#[command(about = "Schedule a burst of tasks and report what the scheduler did", long_about = None)]
struct Cli {
    /// Number of tasks to schedule
    #[arg(long, default_value_t = 1000)]
    tasks: u32,

    /// Index of a task that panics
    #[arg(long)]
    fail_at: Option<u32>,

    /// What a drain does with a panicking task
    #[arg(long, value_enum, default_value = "rethrow")]
    policy: Policy,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Rethrow,
    Report,
}

impl From<Policy> for ErrorPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Rethrow => ErrorPolicy::Rethrow,
            Policy::Report => ErrorPolicy::Report,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    LocalSet::new().run_until(run(cli)).await
}

async fn run(cli: Cli) -> Result<()> {
    let scheduler = asap_native::scheduler_with(SchedulerConfig {
        error_policy: cli.policy.into(),
    })?;
    let completed = Rc::new(Cell::new(0u32));

    for i in 0..cli.tasks {
        let completed = completed.clone();
        let fail_at = cli.fail_at;
        scheduler.schedule(move || {
            if fail_at == Some(i) {
                panic!("task {i} failed on purpose");
            }
            completed.set(completed.get() + 1);
        });
    }

    let (tx, rx) = oneshot::channel();
    scheduler.schedule(move || {
        let _ = tx.send(());
    });
    rx.await?;

    println!("{} of {} tasks completed", completed.get(), cli.tasks);
    println!("{:#?}", scheduler.metrics());
    Ok(())
}
