//! `trainer`: host entry point for the resistance controller.

mod cli;
mod error_fmt;
mod rt;
mod run;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::Result;
use trainer_config::Logging;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("warning: color-eyre not installed: {e}");
    }

    let code = match real_main(cli) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "command failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                eprintln!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            exit_code_for_error(&err)
        }
    };
    std::process::exit(code);
}

fn real_main(cli: Cli) -> Result<()> {
    let loaded = run::load_config(&cli.config);
    init_tracing(
        cli.json,
        &cli.log_level,
        loaded.as_ref().ok().map(|c| &c.logging),
    );
    let cfg = loaded?;
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match cli.cmd {
        Commands::Run {
            sim,
            script,
            duration_ms,
            no_home,
            telemetry,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || {
                flag.store(true, Ordering::Relaxed);
            })
            .map_err(|e| eyre::eyre!("installing Ctrl-C handler: {e}"))?;
            run::run_loop(
                &cfg,
                &cli.config,
                run::RunArgs {
                    sim,
                    script,
                    duration_ms,
                    no_home,
                    telemetry,
                    rt,
                    rt_prio,
                    rt_lock,
                    rt_cpu,
                },
                cli.json,
                shutdown,
            )
        }
        Commands::Home { sim } => run::home(&cfg, &cli.config, sim, cli.json),
        Commands::Lookup { table, x, y } => {
            run::lookup(&cfg, &cli.config, table.into(), x, y, cli.json)
        }
        Commands::SelfCheck => run::self_check(&cfg, &cli.config),
        Commands::Health => run::health(&cfg, &cli.config),
    }
}

/// Console logs go to stderr so stdout carries only command output. A JSON
/// file sink is added when `[logging].file` is set.
fn init_tracing(json: bool, level: &str, logging: Option<&Logging>) {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    type Boxed = Box<dyn Layer<Registry> + Send + Sync>;
    let mut layers: Vec<Boxed> = Vec::new();

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(l) = logging
        && let Some(file) = l.file.as_deref()
    {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "trainer.log".into());
        let appender = match l.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let filter = EnvFilter::new(l.level.as_deref().unwrap_or("info"));
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter)
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry().with(layers).try_init();
}
