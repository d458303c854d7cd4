use std::io;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stream_reconcile::{
    logging, EngineConfig, ObserverSink, SendOutcome, SessionHost, StreamEngine,
};

mod console;

use console::ConsoleHost;

const OBSERVER_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "stream_watch", about = "Send prompts to and follow server-side runs")]
struct Args {
    /// Overrides STREAM_RECONCILE_BASE_URL.
    #[arg(long)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt and stream the reply. Ctrl-C stops the run.
    Send { session: String, prompt: String },
    /// Reattach to every run recorded in the pointer file.
    Resume,
    /// Follow a run read-only. Ctrl-C detaches without stopping it.
    Watch { run_id: String, session: String },
    /// List runs the server reports as active.
    Active,
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let mut config = EngineConfig::from_env();
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    logging::init(&config);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(config, args.command))
}

async fn run(config: EngineConfig, command: Command) -> io::Result<()> {
    let console = Arc::new(ConsoleHost::new());
    let engine = StreamEngine::from_config(
        &config,
        Arc::clone(&console) as Arc<dyn SessionHost>,
        console as Arc<dyn ObserverSink>,
    )
    .map_err(io::Error::other)?;

    match command {
        Command::Send { session, prompt } => {
            let outcome = engine
                .reconciler
                .send(&session, &prompt)
                .await
                .map_err(io::Error::other)?;
            if let SendOutcome::AttachedExisting { run_id, outcome } = &outcome {
                eprintln!("[{session}] a run was already in progress; following {run_id} ({outcome:?})");
            }
            wait_for_tracked_runs(&engine).await
        }
        Command::Resume => {
            let (monitor, resumed) = engine.boot().await;
            if resumed.is_empty() {
                eprintln!("no stored runs to resume");
            }
            for (run_id, outcome) in &resumed {
                eprintln!("{run_id}: {outcome:?}");
            }
            let result = wait_for_tracked_runs(&engine).await;
            monitor.abort();
            result
        }
        Command::Watch { run_id, session } => {
            engine.monitor.attach(&run_id, &session);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(OBSERVER_CHECK_INTERVAL) => {
                        if engine.monitor.observed_run().is_none() {
                            return Ok(());
                        }
                    }
                    signal = tokio::signal::ctrl_c() => {
                        signal?;
                        engine.monitor.detach();
                        return Ok(());
                    }
                }
            }
        }
        Command::Active => {
            let runs = engine
                .monitor
                .active_runs()
                .await
                .map_err(io::Error::other)?;
            if runs.is_empty() {
                eprintln!("no active runs");
            }
            for run in runs.iter() {
                println!("{}\t{}", run.id, run.session_id);
            }
            Ok(())
        }
    }
}

/// Wait until every tracked run has cleared. Ctrl-C stops them instead.
async fn wait_for_tracked_runs(engine: &StreamEngine) -> io::Result<()> {
    let mut version = engine.activity.subscribe();
    loop {
        if engine.reconciler.tracked_runs().is_empty() {
            return Ok(());
        }
        tokio::select! {
            changed = version.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                for run in engine.reconciler.tracked_runs() {
                    if let Err(error) = engine.reconciler.stop(&run.session_id).await {
                        tracing::warn!(run_id = %run.run_id, error = %error, "stop failed; run stays resumable");
                    }
                }
                return Ok(());
            }
        }
    }
}
