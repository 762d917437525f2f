mod cli;
mod copy;
mod dir_io;
mod encoding;
mod fingerprint;
mod manifest;
mod merge;
mod populate;
mod report;
mod verify;
mod walker;

use cli::{Cli, LogLevel, Tool};
use encoding::PathEncoder;
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::process::ExitCode;
use tracing::{Event, Level, Subscriber, error};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use walker::AccessDeniedPolicy;

fn default_level(verbose: u8, log_level: Option<LogLevel>) -> &'static str {
    if let Some(level) = log_level {
        return match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
    }
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(default_level(cli.verbose, cli.log_level));
    PathEncoder::init_global(PathEncoder::from_env());

    let access_denied = if cli.strict_permissions {
        AccessDeniedPolicy::Fail
    } else {
        AccessDeniedPolicy::Skip
    };

    let result: anyhow::Result<()> = match cli.tool {
        Tool::CreateDb => handle_create_db(&cli, access_denied),
        Tool::VerifyDir => handle_verify_dir(&cli, access_denied),
        Tool::MergeDir => handle_merge_dir(&cli, access_denied),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(1)
        }
    }
}

fn tool_name(tool: Tool) -> &'static str {
    match tool {
        Tool::CreateDb => "create-db",
        Tool::VerifyDir => "verify-dir",
        Tool::MergeDir => "merge-dir",
    }
}

fn reject_dest(cli: &Cli) -> anyhow::Result<()> {
    if cli.dest.is_some() {
        anyhow::bail!(
            "--tool={} takes a single SOURCE argument",
            tool_name(cli.tool)
        );
    }
    Ok(())
}

fn handle_create_db(cli: &Cli, access_denied: AccessDeniedPolicy) -> anyhow::Result<()> {
    reject_dest(cli)?;
    populate::populate_manifest(&cli.db, &cli.source, access_denied)?;
    Ok(())
}

fn handle_verify_dir(cli: &Cli, access_denied: AccessDeniedPolicy) -> anyhow::Result<()> {
    reject_dest(cli)?;
    verify::verify_tree(&cli.db, &cli.source, access_denied)?;
    Ok(())
}

fn handle_merge_dir(cli: &Cli, access_denied: AccessDeniedPolicy) -> anyhow::Result<()> {
    let Some(dest) = &cli.dest else {
        anyhow::bail!("--tool=merge-dir requires SOURCE and DEST arguments");
    };
    merge::merge_tree(&cli.db, &cli.source, dest, access_denied)?;
    Ok(())
}

fn init_tracing(default_level: &str) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::default_level;
    use crate::cli::LogLevel;

    #[test]
    fn verbosity_counts_map_to_levels() {
        assert_eq!(default_level(0, None), "warn");
        assert_eq!(default_level(1, None), "info");
        assert_eq!(default_level(2, None), "debug");
        assert_eq!(default_level(9, None), "debug");
    }

    #[test]
    fn explicit_log_level_wins() {
        assert_eq!(default_level(0, Some(LogLevel::Trace)), "trace");
        assert_eq!(default_level(2, Some(LogLevel::Error)), "error");
    }
}
