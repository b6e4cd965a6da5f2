use clap::Parser;
use color_eyre::Result;

mod cli;
mod dispatch;
mod verbosity;

use cli::TsukuCli;
use verbosity::{resolve_log_level, LogLevel};

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = TsukuCli::parse();

    let level = resolve_log_level(cli.quiet, cli.verbose, cli.debug, |key| {
        std::env::var(key).ok()
    });
    init_tracing(level);
    if cli.debug {
        std::env::set_var("TSUKU_DEBUG", "1");
    }

    if let Ok(home) = tsuku_core::config::TsukuHome::from_env() {
        tsuku_core::telemetry::show_notice_if_needed(&home, &mut std::io::stderr());
    }

    match dispatch::dispatch(&cli.command) {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(err) => {
            tsuku_core::errmsg::fprint(&mut std::io::stderr(), &err);
            std::process::exit(1);
        }
    }
}

fn init_tracing(level: LogLevel) {
    let filter = format!(
        "tsuku={level},tsuku_cli={level},tsuku_core={level},tsuku_domain={level}",
        level = level.as_filter()
    );
    // DEBUG output carries timestamps and source locations; everything
    // quieter stays terse.
    if level == LogLevel::Debug {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_file(true)
            .with_line_number(true)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
