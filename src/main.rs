use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use huesync::config::{self, AppConfig, BridgeServer};
use huesync::discovery::StaticDiscovery;
use huesync::endpoint::BridgeEndpoint;
use huesync::error::{ApiError, ApiResult};
use huesync::model::EntityUpdate;
use huesync::session::{BridgeEndpointSession, SessionHandle};
use huesync::sink::ChannelSink;
use huesync::transport::HueClient;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: Utf8PathBuf,

    /// Fetch every bridge once, print the result as json, and exit
    #[arg(long)]
    once: bool,
}

/*
 * Formatter function to output in syslog format. This makes sense when running
 * as a service (where output might go to a log file, or the system journal)
 */
#[allow(clippy::match_same_arms)]
fn syslog_format(
    buf: &mut pretty_env_logger::env_logger::fmt::Formatter,
    record: &log::Record,
) -> std::io::Result<()> {
    writeln!(
        buf,
        "<{}>{}: {}",
        match record.level() {
            log::Level::Error => 3,
            log::Level::Warn => 4,
            log::Level::Info => 6,
            log::Level::Debug => 7,
            log::Level::Trace => 7,
        },
        record.target(),
        record.args()
    )
}

fn init_logging() -> ApiResult<()> {
    /* Try to provide reasonable default filters, when RUST_LOG is not specified */
    const DEFAULT_LOG_FILTERS: &[&str] = &[
        "debug",
        "hyper_util=info",
        "reqwest=info",
        "native_tls=info",
    ];

    let log_filters = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTERS.join(","));

    /* Detect if we need syslog or human-readable formatting */
    if std::env::var("SYSTEMD_EXEC_PID").is_ok_and(|pid| pid == std::process::id().to_string()) {
        Ok(pretty_env_logger::env_logger::builder()
            .format(syslog_format)
            .parse_filters(&log_filters)
            .try_init()?)
    } else {
        Ok(pretty_env_logger::formatted_timed_builder()
            .parse_filters(&log_filters)
            .try_init()?)
    }
}

type Session = BridgeEndpointSession<HueClient, ChannelSink>;

fn build_session(
    name: &str,
    server: &BridgeServer,
    config: &AppConfig,
) -> ApiResult<(Session, SessionHandle, broadcast::Receiver<EntityUpdate>)> {
    let token = config::resolve_token(name, server)?;
    let client = HueClient::new(server, config.request_timeout())?;
    let discovery = Arc::new(StaticDiscovery::new(BridgeEndpoint::from_config(
        name, server, token,
    )));

    let sink = ChannelSink::new(256);
    let updates = sink.subscribe();

    let (session, handle) = BridgeEndpointSession::new(name, server, client, sink, discovery)?;
    Ok((session, handle, updates))
}

async fn log_updates(name: String, mut rx: broadcast::Receiver<EntityUpdate>) {
    loop {
        match rx.recv().await {
            Ok(update) => match serde_json::to_string(&update.state) {
                Ok(state) => log::debug!("[{name}] {} {}: {state}", update.entity_type, update.id),
                Err(err) => log::warn!("[{name}] Cannot format update: {err}"),
            },
            Err(broadcast::error::RecvError::Lagged(count)) => {
                log::warn!("[{name}] Update log fell behind, {count} updates skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn install_signal_handlers(handles: &[SessionHandle]) -> ApiResult<()> {
    fn shutdown(msg: &str, handles: &[SessionHandle]) {
        log::warn!("{msg}");
        let _ = std::io::stderr().flush();
        for handle in handles {
            log::debug!("[{}] Stopping session", handle.name());
            handle.shutdown();
        }
    }

    let sessions = handles.to_vec();
    tokio::spawn(async move {
        if matches!(signal::ctrl_c().await, Ok(())) {
            shutdown("Ctrl-C pressed, exiting..", &sessions);
        }
    });

    let sessions = handles.to_vec();
    let mut signal = signal::unix::signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        if matches!(signal.recv().await, Some(())) {
            shutdown("SIGTERM received, exiting..", &sessions);
        }
    });

    Ok(())
}

async fn run_once(config: &AppConfig) -> ApiResult<()> {
    let mut res = BTreeMap::new();

    for (name, server) in &config.bridges {
        let (mut session, _handle, _updates) = build_session(name, server, config)?;
        session.refresh_once().await?;
        res.insert(name.clone(), session.snapshot());
    }

    println!("{}", serde_json::to_string_pretty(&res)?);
    Ok(())
}

async fn run() -> ApiResult<()> {
    let args = Args::parse();

    init_logging()?;

    let config = config::parse(&args.config)?;
    log::debug!("Configuration loaded successfully");

    if !config.has_bridges() {
        return Err(ApiError::service_error(format!(
            "No bridges configured in {}",
            args.config
        )));
    }

    if args.once {
        return run_once(&config).await;
    }

    let mut sessions = JoinSet::new();
    let mut handles = vec![];

    for (name, server) in &config.bridges {
        let (session, handle, updates) = build_session(name, server, &config)?;
        tokio::spawn(log_updates(name.clone(), updates));
        sessions.spawn(session.run());
        handles.push(handle);
    }

    install_signal_handlers(&handles)?;

    while let Some(res) = sessions.join_next().await {
        res??;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        log::error!("Huesync error: {err}");
        log::error!("Fatal error encountered, cannot continue.");
    }
}
