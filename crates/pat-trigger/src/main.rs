//! pat-trigger - start the PAT procedure on an ECU over SocketCAN
//!
//! Binds a raw CAN socket, sends the PAT START command and prints every
//! frame seen on the bus until interrupted.

mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use pat_session::config::ChannelConfig;
use pat_session::{create_channel, CanId, Codec, Command, DecodedEvent, Listener, SessionEngine};
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Overrides;
use crate::output::{OutputContext, OutputFormat};

#[derive(Debug, Parser)]
#[command(name = "pat-trigger")]
#[command(author, version, about = "Send a PAT START command over SocketCAN")]
struct Cli {
    /// CAN interface to bind (e.g. vcan0)
    interface: String,

    /// Configuration file path (TOML)
    #[arg(short, long, env = "PAT_TRIGGER_CONFIG")]
    config: Option<PathBuf>,

    /// Response window per attempt in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Total send attempts, initial send included
    #[arg(long)]
    retries: Option<u32>,

    /// CAN ID the ECU answers on (e.g. 0x701)
    #[arg(long)]
    response_id: Option<CanId>,

    /// Exit once the command is answered or given up on
    #[arg(long)]
    once: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            interface: self.interface.clone(),
            timeout_ms: self.timeout_ms,
            retries: self.retries,
            response_id: self.response_id,
        }
    }
}

/// How a failed argument parse is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgFailure {
    /// `--help` or `--version`: clap prints, exit 0
    Informational,
    /// Missing or extra interface argument: usage text, exit 1
    Usage,
    /// Anything else: clap's message, exit 1
    Invalid,
}

impl ArgFailure {
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => Self::Informational,
            ErrorKind::MissingRequiredArgument
            | ErrorKind::UnknownArgument
            | ErrorKind::TooManyValues => Self::Usage,
            _ => Self::Invalid,
        }
    }

    fn exit_code(self) -> i32 {
        match self {
            Self::Informational => 0,
            Self::Usage | Self::Invalid => 1,
        }
    }
}

fn try_parse_args<I, T>(args: I) -> std::result::Result<Cli, (ArgFailure, clap::Error)>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|e| (ArgFailure::from_kind(e.kind()), e))
}

fn parse_args() -> Cli {
    match try_parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err((failure, e)) => {
            match failure {
                ArgFailure::Usage => {
                    eprintln!("Usage: pat-trigger <can_interface>");
                    eprintln!("Example: pat-trigger vcan0");
                }
                ArgFailure::Informational | ArgFailure::Invalid => {
                    let _ = e.print();
                }
            }
            std::process::exit(failure.exit_code());
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pat_trigger=debug,pat_session=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "pat_trigger=info,pat_session=info".into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = parse_args();
    init_tracing(cli.verbose);

    let ctx = OutputContext::new(cli.output, cli.no_color);
    match run(&cli, &ctx).await {
        Ok(code) => code,
        Err(e) => {
            ctx.error(&format!("Error: {:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, ctx: &OutputContext) -> Result<ExitCode> {
    let file = config::load(cli.config.as_deref())?;
    let config = cli.overrides().apply(file)?;

    let channel = create_channel(&config.channel)
        .await
        .with_context(|| format!("Failed to open CAN interface {}", cli.interface))?;
    match config.channel {
        ChannelConfig::SocketCan(_) => {
            ctx.info(&format!("SocketCAN bound to {}", channel.endpoint()))
        }
        ChannelConfig::Mock(_) => ctx.info(&format!("Mock channel {} ready", channel.endpoint())),
    }

    let engine = SessionEngine::new(channel, Codec::new(config.codec), config.session);

    let (stop_tx, stop_rx) = watch::channel(false);
    let printer = ctx.clone();
    let mut listener = Listener::new(engine.clone(), move |event: &DecodedEvent| {
        printer.frame(event)
    })
    .spawn(stop_rx);

    let handle = engine
        .submit(Command::StartPat)
        .await
        .context("Failed to send PAT START command")?;
    ctx.info(&format!(
        "Sent PAT START command (ID={}, DATA=0x{})",
        handle.frame().id(),
        hex::encode_upper(handle.frame().data())
    ));
    ctx.info("Listening for responses (Ctrl+C to exit)...");

    let outcome = tokio::select! {
        result = handle.wait() => Some(result),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to wait for Ctrl+C")?;
            None
        }
    };

    let acknowledged = match outcome {
        Some(Ok(ref reply)) => {
            ctx.reply(reply);
            ctx.success(&format!(
                "PAT START acknowledged after {} attempt(s)",
                reply.attempts
            ));
            true
        }
        Some(Err(ref e)) => {
            ctx.warn(&format!("PAT START not acknowledged: {}", e));
            false
        }
        None => false,
    };

    if outcome.is_some() && !cli.once {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to wait for Ctrl+C")?;
            }
            joined = &mut listener => {
                let stats = joined
                    .context("Listener task failed")?
                    .context("Listener stopped")?;
                tracing::warn!(?stats, "Listener ended without a stop signal");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    ctx.info("Stopping listener...");
    let _ = stop_tx.send(true);
    let stats = listener
        .await
        .context("Listener task failed")?
        .context("Listener stopped")?;
    tracing::debug!(
        frames = stats.frames_received,
        observed = stats.observed,
        "Session finished"
    );

    if cli.once && !acknowledged {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
