//! CLI entrypoint and subcommand orchestration.

mod config;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};
use proto::{CallToolResult, Content};
use tracker::InvocationView;

#[cfg(not(test))]
use config::Config;
#[cfg(not(test))]
use gateway::{DispatchClient, DispatchServer};
#[cfg(not(test))]
use proto::{CallId, CallToolRequest, PeerInfo};
#[cfg(not(test))]
use tokio::net::TcpListener;
#[cfg(not(test))]
use tracing::{info, warn};
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};
#[cfg(not(test))]
use tracker::LifecycleTracker;

/// Top-level command-line arguments for deskpilot.
#[derive(Parser)]
#[command(name = "deskpilot")]
#[command(about = "Desktop sandbox tool server", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging to ~/.deskpilot/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Print the tool schemas as JSON
    Tools,

    /// Invoke one tool against the dry-run sandbox and print the result
    Call {
        /// Tool name (computer_use, bash_command)
        tool: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Serve the tools over TCP
    Serve {
        /// Listen address, overriding the config file
        #[arg(long)]
        listen: Option<String>,
    },
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Console logs go to stderr so command output on stdout stays parseable.
    // When --debug is passed, debug-level logs also go to
    // ~/.deskpilot/logs/debug.YYYY-MM-DD.log with daily rotation.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let log_dir = std::path::PathBuf::from(home)
            .join(".deskpilot")
            .join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug"));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();

        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command_label(&cli.command),
            log_level = %cli.log_level,
            "========== deskpilot session start =========="
        );
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });

    match cli.command {
        Commands::Tools => cmd_tools(&config),
        Commands::Call { tool, args } => cmd_call(config, tool, args).await,
        Commands::Serve { listen } => cmd_serve(config, listen).await,
    }
}

#[cfg(not(test))]
fn command_label(command: &Commands) -> &'static str {
    match command {
        Commands::Tools => "tools",
        Commands::Call { .. } => "call",
        Commands::Serve { .. } => "serve",
    }
}

#[cfg(not(test))]
/// Prints the tool listing.
fn cmd_tools(config: &Config) -> anyhow::Result<()> {
    let server = DispatchServer::new(config.server_info());
    println!("{}", serde_json::to_string_pretty(&server.list_tools())?);
    Ok(())
}

#[cfg(not(test))]
/// Runs one call through an in-process client/server pair.
async fn cmd_call(config: Config, tool: String, args: String) -> anyhow::Result<()> {
    let arguments = parse_args(&args)?;
    let server = config.build_server()?;
    // one call emits exactly two updates
    let mut updates = server.subscribe(2);

    let client = DispatchClient::new(PeerInfo::new("deskpilot-cli", env!("CARGO_PKG_VERSION")));
    client.connect(&server).await?;

    let call_id = CallId::new();
    let outcome = client
        .call(CallToolRequest::new(&tool, arguments).with_call_id(call_id.clone()))
        .await;
    client.close();

    let mut tracker = LifecycleTracker::new();
    while let Ok(update) = updates.try_recv() {
        tracker.apply(update);
    }
    if let Some(view) = tracker.view(&call_id, Default::default()) {
        eprintln!("{}", status_line(&view));
    }

    let result = outcome?;
    println!("{}", format_result(&result));
    Ok(())
}

#[cfg(not(test))]
/// Serves tools over TCP until interrupted.
async fn cmd_serve(mut config: Config, listen: Option<String>) -> anyhow::Result<()> {
    if let Some(listen) = listen {
        config.transport.listen = listen;
    }
    let addr = config.listen_addr()?;
    let server = config.build_server()?;
    let listener = TcpListener::bind(addr).await?;

    tokio::select! {
        result = server.serve_tcp(listener) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

/// Parses `--args`; an empty string means no arguments.
fn parse_args(raw: &str) -> anyhow::Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(raw).map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))
}

/// Renders result content for the terminal.
fn format_result(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .map(|content| match content {
            Content::Text { text } => text.clone(),
            Content::Image { data, mime_type } => {
                format!("[{mime_type} image, {} base64 chars]", data.len())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-line lifecycle summary, e.g. `[Success] Left clicking at (1, 2)`.
fn status_line(view: &InvocationView) -> String {
    let status = view.status.label().trim_end_matches("...");
    match &view.detail {
        Some(detail) => format!("[{status}] {} {detail}", view.label),
        None => format!("[{status}] {}", view.label),
    }
}
