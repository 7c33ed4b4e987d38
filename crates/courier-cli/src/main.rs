mod messages;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::{Duration, sleep};
use tracing_subscriber::EnvFilter;

use courier_core::impls::SqliteStore;
use courier_core::ports::{Store, Transaction, with_write};
use courier_core::{JobQueueEngine, NewJob, QueueConfig, QueueError};

use messages::{DeliveryState, MESSAGES, Message, MessageFactory};

#[derive(Debug, Parser)]
#[command(name = "courier", about = "Durable message delivery on a key-serialized job queue")]
struct Cli {
    /// SQLite database holding messages and job records.
    #[arg(long, global = true, default_value = "courier.db")]
    db: PathBuf,

    /// JSON queue config; defaults apply to missing fields.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Retry without backoff delays.
    #[arg(long, global = true)]
    test_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store messages and enqueue their delivery, then run until they finish.
    Send {
        #[arg(long, default_value_t = 10)]
        messages: usize,

        /// Messages are spread round-robin over this many conversations.
        #[arg(long, default_value_t = 3)]
        keys: usize,

        /// Failed attempts per message before delivery succeeds.
        #[arg(long, default_value_t = 0)]
        fail_times: u32,

        /// Delete job records once they finish.
        #[arg(long)]
        remove: bool,
    },
    /// Recover interrupted deliveries and run until the queue drains.
    Resume {
        #[arg(long, default_value_t = 0)]
        fail_times: u32,
    },
    /// Print job and message counts.
    Status,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::from_path(path)?,
        None => QueueConfig::new(MESSAGES),
    };
    if cli.test_mode {
        config.retry.test_mode = true;
    }
    Ok(config)
}

fn open_store(path: &Path) -> anyhow::Result<Arc<dyn Store>> {
    let store = SqliteStore::open(path).with_context(|| format!("open {}", path.display()))?;
    Ok(Arc::new(store))
}

fn start_engine(
    store: Arc<dyn Store>,
    config: QueueConfig,
    fail_times: u32,
) -> anyhow::Result<JobQueueEngine> {
    let engine = JobQueueEngine::builder(store, Arc::new(MessageFactory::new(fail_times)))
        .config(config)
        .build()?;
    Ok(engine)
}

/// Run until nothing is Ready or Running, or until Ctrl-C.
async fn drain(engine: &JobQueueEngine) -> anyhow::Result<()> {
    engine.set_ready(true);
    let wait = async {
        loop {
            sleep(Duration::from_millis(100)).await;
            if engine.counts()?.pending() == 0 {
                return Ok::<_, QueueError>(());
            }
        }
    };
    tokio::select! {
        result = wait => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; unfinished jobs resume on the next start");
        }
    }
    Ok(())
}

async fn send(
    cli: &Cli,
    count: usize,
    keys: usize,
    fail_times: u32,
    remove: bool,
) -> anyhow::Result<()> {
    let store = open_store(&cli.db)?;
    let engine = start_engine(Arc::clone(&store), load_config(cli)?, fail_times)?;
    let keys = keys.max(1);

    // Ids continue after messages from earlier runs.
    let first = store.read()?.scan(MESSAGES)?.len();

    let ids = with_write(&*store, |txn: &mut dyn Transaction| {
        let mut ids = Vec::with_capacity(count);
        for n in 0..count {
            let message = Message {
                id: format!("msg-{}", first + n),
                conversation: format!("conversation-{}", n % keys),
                body: format!("hello #{n}"),
                state: DeliveryState::Pending,
            };
            message.save(txn)?;
            let job = NewJob::new(message.job_payload())
                .key(message.conversation.clone())
                .remove_after_terminal(remove);
            ids.push(engine.enqueue(job, txn)?);
        }
        Ok::<_, QueueError>(ids)
    })?;
    tracing::info!(jobs = ids.len(), "messages enqueued");

    drain(&engine).await?;
    print_status(&engine, &*store)?;
    engine.shutdown_and_join().await;
    Ok(())
}

async fn resume(cli: &Cli, fail_times: u32) -> anyhow::Result<()> {
    let store = open_store(&cli.db)?;
    let engine = start_engine(Arc::clone(&store), load_config(cli)?, fail_times)?;
    drain(&engine).await?;
    print_status(&engine, &*store)?;
    engine.shutdown_and_join().await;
    Ok(())
}

fn print_status(engine: &JobQueueEngine, store: &dyn Store) -> anyhow::Result<()> {
    let counts = engine.counts()?;
    let txn = store.read()?;
    let mut delivery: BTreeMap<DeliveryState, usize> = BTreeMap::new();
    for (_, value) in txn.scan(MESSAGES)? {
        let message: Message = serde_json::from_value(value)?;
        *delivery.entry(message.state).or_default() += 1;
    }
    let report = serde_json::json!({
        "label": engine.label(),
        "jobs": counts,
        "messages": delivery,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Send {
            messages,
            keys,
            fail_times,
            remove,
        } => send(&cli, messages, keys, fail_times, remove).await,
        Command::Resume { fail_times } => resume(&cli, fail_times).await,
        Command::Status => {
            let store = open_store(&cli.db)?;
            let engine = start_engine(Arc::clone(&store), load_config(&cli)?, 0)?;
            print_status(&engine, &*store)?;
            engine.shutdown_and_join().await;
            Ok(())
        }
    }
}
