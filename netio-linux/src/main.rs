// netio: command-line applets on top of the netio node.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use netio_core::addr::split_scheme;
use netio_core::{resolve_uri, MessageKind, ParamId, SocketKey};
use netio_linux::{config, Node};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Synchronize named control values between processes
#[derive(Parser, Debug)]
#[command(name = "netio")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Be more verbose (repeat for trace output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log filter (trace, debug, info, warn, error or a tracing directive)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Socket address to publish on (repeatable)
    #[arg(short, long, global = true)]
    listen: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print remote parameters whenever they change
    Watch {
        /// Parameter specs, e.g. unix:@house#lamp
        #[arg(required = true)]
        params: Vec<String>,
    },
    /// Request a write to a remote writable parameter
    Write {
        param: String,
        value: f64,
        /// Give up waiting for the echo after this many milliseconds
        #[arg(long, default_value = "2000")]
        timeout: u64,
    },
    /// Drive OUTPUT from INPUT: output = input * slope + offset + exported 'offset'
    Follow {
        input: String,
        output: String,
        #[arg(short, long, default_value = "1")]
        slope: f64,
        #[arg(short, long, default_value = "0")]
        offset: f64,
        /// Don't actually set the output
        #[arg(short, long)]
        dryrun: bool,
    },
    /// Publish local parameters: NAME=VALUE, with +NAME=VALUE for writable ones
    Publish {
        #[arg(required = true)]
        params: Vec<String>,
    },
    /// Send a message and print its acknowledgment
    Send {
        uri: String,
        text: String,
        #[arg(long, default_value = "2000")]
        timeout: u64,
    },
    /// Print incoming messages and acknowledge them
    Listen {
        /// Acknowledgment text
        #[arg(long, default_value = "ok")]
        reply: String,
    },
    /// Check that a remote node is alive
    Ping {
        uri: String,
        #[arg(long, default_value = "1000")]
        timeout: u64,
    },
}

fn init_tracing(cli: &Cli, configured: Option<&str>) {
    let filter = match (&cli.log_level, cli.verbose) {
        (Some(level), _) => EnvFilter::new(level),
        (None, 0) => EnvFilter::new(configured.unwrap_or("warn")),
        (None, 1) => EnvFilter::new("info"),
        (None, 2) => EnvFilter::new("debug"),
        (None, _) => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load().context("loading configuration")?;
    init_tracing(&cli, cfg.log_level.as_deref());
    cfg.listen.extend(cli.listen.iter().cloned());

    let node = Node::start(cfg)?;
    tokio::select! {
        r = run(node, cli.command) => r,
        r = shutdown_signal() => r,
    }
}

async fn run(mut node: Node, command: Command) -> Result<()> {
    match command {
        Command::Watch { params } => watch(&mut node, &params).await,
        Command::Write {
            param,
            value,
            timeout,
        } => write(&mut node, &param, value, Duration::from_millis(timeout)).await,
        Command::Follow {
            input,
            output,
            slope,
            offset,
            dryrun,
        } => follow(&mut node, &input, &output, slope, offset, dryrun).await,
        Command::Publish { params } => publish(&mut node, &params).await,
        Command::Send { uri, text, timeout } => {
            send(&mut node, &uri, &text, Duration::from_millis(timeout)).await
        }
        Command::Listen { reply } => listen(&mut node, &reply).await,
        Command::Ping { uri, timeout } => ping(&mut node, &uri, Duration::from_millis(timeout)).await,
    }
}

fn create_all(node: &mut Node, specs: &[String]) -> Result<Vec<(String, ParamId)>> {
    specs
        .iter()
        .map(|spec| {
            let id = node
                .create_param(spec)
                .with_context(|| format!("create {}", spec))?;
            Ok((spec.clone(), id))
        })
        .collect()
}

async fn watch(node: &mut Node, specs: &[String]) -> Result<()> {
    let params = create_all(node, specs)?;
    loop {
        node.wait().await;
        for (spec, id) in &params {
            if !node.is_dirty(*id) {
                continue;
            }
            if node.is_present(*id) {
                println!("{} {}", spec, node.get(*id)?);
            } else {
                println!("{} absent", spec);
            }
        }
    }
}

async fn write(node: &mut Node, spec: &str, value: f64, timeout: Duration) -> Result<()> {
    let id = node.create_param(spec)?;
    node.set(id, value)?;
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        node.wait_timeout(left).await;
        // values travel as six-decimal text
        if node.is_present(id) && (node.get(id)? - value).abs() < 1e-6 {
            println!("{} {}", spec, value);
            return Ok(());
        }
    }
    bail!("{}: no confirmation within {:?}", spec, timeout)
}

async fn follow(
    node: &mut Node,
    input: &str,
    output: &str,
    slope: f64,
    offset: f64,
    dryrun: bool,
) -> Result<()> {
    let indev = node.create_param(input)?;
    let outdev = node.create_param(output)?;
    let uoffset = node.create_param("netio:+offset")?;
    node.set(uoffset, 0.0)?;

    loop {
        if node.is_dirty(indev) || node.is_dirty(uoffset) {
            let newvalue = node.get(indev)? * slope + offset + node.get(uoffset)?;
            if !dryrun {
                node.set(outdev, newvalue)
                    .with_context(|| format!("set output {:.3}", newvalue))?;
            }
            info!(
                "{:.3} +{:.3} > {:.3}",
                node.get(indev)?,
                node.get(uoffset)?,
                newvalue
            );
        }
        node.wait().await;
    }
}

async fn publish(node: &mut Node, assignments: &[String]) -> Result<()> {
    if node.config().listen.is_empty() {
        warn!("publishing without --listen: nobody can subscribe");
    }
    let mut params = Vec::new();
    for a in assignments {
        let (name, value) = a
            .split_once('=')
            .with_context(|| format!("expected NAME=VALUE, got '{}'", a))?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("bad value in '{}'", a))?;
        let id = node.create_param(&format!("netio:{}", name))?;
        node.set(id, value)?;
        params.push((name.trim_start_matches('+').to_string(), id));
    }
    // first flush sends the initial values; remote writes show up as dirty
    node.flush();
    loop {
        node.wait().await;
        for (name, id) in &params {
            if node.is_dirty(*id) {
                println!("{} {}", name, node.get(*id)?);
            }
        }
    }
}

async fn send(node: &mut Node, uri: &str, text: &str, timeout: Duration) -> Result<()> {
    let id = node.send_msg(uri, text)?;
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        node.wait_timeout(left).await;
        while let Some(reply) = node.recv_msg() {
            let is_ours = node
                .current_msg()
                .is_some_and(|m| m.kind == MessageKind::Ack && m.id == id);
            if is_ours {
                println!("{}", reply);
                return Ok(());
            }
        }
    }
    bail!("{}: no acknowledgment for message {} within {:?}", uri, id, timeout)
}

async fn listen(node: &mut Node, reply: &str) -> Result<()> {
    if node.config().listen.is_empty() {
        bail!("listen needs at least one --listen address");
    }
    loop {
        node.wait().await;
        while let Some(text) = node.recv_msg() {
            let Some(msg) = node.current_msg() else {
                continue;
            };
            if msg.kind == MessageKind::Ack {
                continue;
            }
            println!("{} {} {}", msg.sender(), msg.id, text);
            node.ack_msg(reply)?;
        }
    }
}

async fn ping(node: &mut Node, uri: &str, timeout: Duration) -> Result<()> {
    let target = node.config().expand(uri)?.to_string();
    let (family, _) = split_scheme(&target)?;
    let addr = resolve_uri(&target)?;
    node.probe(&target)?;
    let key = SocketKey::subscriber(family);
    let started = Instant::now();
    let deadline = started + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        node.wait_timeout(left).await;
        if node.engine().find_peer(key, &addr).is_some() {
            println!("{} alive, {:?}", addr, started.elapsed());
            return Ok(());
        }
    }
    bail!("{}: no answer within {:?}", addr, timeout)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    Ok(())
}
