/*!
 * DHFS Launcher - Headless Entry Point
 *
 * Starts the server described by LAUNCHER_* environment variables, mirrors
 * its output to the console, and stops it on Ctrl+C. A second Ctrl+C while
 * stopping kills the process group.
 */

use dhfs_launcher::{
    init_tracing, OutputLine, OutputSource, ProcessSupervisor, RuntimeLoader, StartupOptions,
    SupervisorConfig, SupervisorObserver, SupervisorState,
};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Mirrors server output to the console and forwards state changes
struct ConsoleObserver {
    states: flume::Sender<SupervisorState>,
}

impl SupervisorObserver for ConsoleObserver {
    fn on_output_line(&self, line: &OutputLine) {
        // Text is forwarded per read, not per line: no added newlines
        let result = match line.source {
            OutputSource::Stderr => write!(std::io::stderr(), "{}", line.text),
            OutputSource::Stdout | OutputSource::Supervisor => {
                let mut out = std::io::stdout().lock();
                write!(out, "{}", line.text).and_then(|()| out.flush())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to mirror server output");
        }
    }

    fn on_state_change(&self, state: SupervisorState) {
        let _ = self.states.send(state);
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    init_tracing();

    let options = StartupOptions::from_env();
    let config = SupervisorConfig::from_env();
    info!(
        runtime_home = %options.runtime_home,
        payload = %options.payload_path,
        memory = %options.memory_limit,
        "DHFS launcher starting"
    );

    let (states_tx, states) = flume::unbounded();
    let mut builder = ProcessSupervisor::builder().with_config(config);
    if env_flag("LAUNCHER_RUNTIME_PRECHECK") {
        info!("Runtime precheck enabled");
        builder = builder.with_runtime_loader(Arc::new(RuntimeLoader::new()));
    }
    let supervisor = builder.build(ConsoleObserver { states: states_tx })?;

    supervisor.start(&options)?;
    info!("Press Ctrl+C to stop the server");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping server");
                supervisor.stop();
                break;
            }
            state = states.recv_async() => match state {
                Ok(SupervisorState::Stopped) | Err(_) => {
                    warn!("Server exited on its own");
                    return Ok(());
                }
                Ok(SupervisorState::Running) => info!(pid = ?supervisor.pid(), "Server is ready"),
                Ok(state) => info!(%state, "Server state changed"),
            }
        }
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Second interrupt, killing server");
                supervisor.kill();
            }
            state = states.recv_async() => match state {
                Ok(SupervisorState::Stopped) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    info!("DHFS launcher exiting");
    Ok(())
}
