//! Command-line simulator for the web bridge.
//!
//! Wires a host and a surface together in-process and runs scripted session
//! scenarios against them, optionally writing wire traces.

mod scenarios;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use webbridge_core::{HandshakeConfig, LoopbackOptions, OutboxConfig, RetryPolicy};

use crate::scenarios::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScenarioArg {
    All,
    Boot,
    Reload,
    Login,
    Logout,
    Refresh,
    LostPage,
}

impl ScenarioArg {
    fn expand(self) -> Vec<Scenario> {
        match self {
            ScenarioArg::All => Scenario::ALL.to_vec(),
            ScenarioArg::Boot => vec![Scenario::Boot],
            ScenarioArg::Reload => vec![Scenario::Reload],
            ScenarioArg::Login => vec![Scenario::Login],
            ScenarioArg::Logout => vec![Scenario::Logout],
            ScenarioArg::Refresh => vec![Scenario::Refresh],
            ScenarioArg::LostPage => vec![Scenario::LostPage],
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "webbridge-sim")]
#[command(about = "Run host/surface session sync scenarios over loopback transports")]
struct Args {
    /// Scenarios to run, in order
    #[arg(short, long, value_enum, default_values_t = [ScenarioArg::All])]
    scenario: Vec<ScenarioArg>,

    /// Write host.log and surface.log wire traces here
    #[arg(long, env = "WEBBRIDGE_TRACE_DIR")]
    trace_dir: Option<PathBuf>,

    /// Delay between surface ready and the session push
    #[arg(long, env = "WEBBRIDGE_PUSH_DELAY_MS", default_value_t = 100)]
    push_delay_ms: u64,

    /// Delay between the sync ack and reporting synced
    #[arg(long, env = "WEBBRIDGE_SETTLE_DELAY_MS", default_value_t = 500)]
    settle_delay_ms: u64,

    /// Ack window after a push (doubles per re-push)
    #[arg(long, env = "WEBBRIDGE_ACK_TIMEOUT_MS", default_value_t = 1_000)]
    ack_timeout_ms: u64,

    /// Upper bound for the ack wait
    #[arg(long, env = "WEBBRIDGE_ACK_TIMEOUT_MAX_MS", default_value_t = 8_000)]
    ack_timeout_max_ms: u64,

    /// Session pushes per ready or login; above 1 re-pushes until acked
    #[arg(long, env = "WEBBRIDGE_MAX_PUSH_ATTEMPTS", default_value_t = 1)]
    max_push_attempts: u32,

    /// Command sends before giving up
    #[arg(long, env = "WEBBRIDGE_MAX_COMMAND_ATTEMPTS", default_value_t = 5)]
    max_command_attempts: u32,

    /// Login provider used by the scenarios
    #[arg(long, env = "WEBBRIDGE_PROVIDER", default_value = "google")]
    provider: String,

    /// Subject id issued by the simulated auth provider
    #[arg(long, env = "WEBBRIDGE_SUBJECT", default_value = "sim-user")]
    subject: String,

    /// Lifetime of issued tokens, in minutes
    #[arg(long, env = "WEBBRIDGE_TOKEN_LIFETIME_MIN", default_value_t = 60)]
    token_lifetime_min: i64,
}

impl Args {
    fn loopback_options(&self) -> LoopbackOptions {
        let retry = RetryPolicy::new(self.ack_timeout_ms, self.ack_timeout_max_ms);
        LoopbackOptions {
            handshake: HandshakeConfig::default()
                .with_push_delay(Duration::from_millis(self.push_delay_ms))
                .with_settle_delay(Duration::from_millis(self.settle_delay_ms))
                .with_ack_retry(retry)
                .with_max_push_attempts(self.max_push_attempts),
            outbox: OutboxConfig::default()
                .with_retry(retry)
                .with_max_attempts(self.max_command_attempts),
            trace_dir: self.trace_dir.clone(),
        }
    }

    fn scenarios(&self) -> Vec<Scenario> {
        let mut scenarios = Vec::new();
        for arg in &self.scenario {
            for scenario in arg.expand() {
                if !scenarios.contains(&scenario) {
                    scenarios.push(scenario);
                }
            }
        }
        scenarios
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let settings = scenarios::Settings {
        options: args.loopback_options(),
        provider: args.provider.clone(),
        subject: args.subject.clone(),
        token_lifetime: chrono::Duration::minutes(args.token_lifetime_min),
    };
    if let Some(dir) = &args.trace_dir {
        log::info!("writing wire traces to {}", dir.display());
    }

    let mut failed = 0;
    for scenario in args.scenarios() {
        log::info!("running {}", scenario.name());
        let outcome = tokio::select! {
            outcome = scenarios::run(scenario, &settings) => outcome,
            _ = tokio::signal::ctrl_c() => {
                log::warn!("interrupted");
                return ExitCode::from(130);
            }
        };
        match outcome {
            Ok(()) => log::info!("{}: ok", scenario.name()),
            Err(e) => {
                failed += 1;
                log::error!("{}: {}", scenario.name(), e);
            }
        }
    }

    if failed > 0 {
        log::error!("{} scenario(s) failed", failed);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
