//! Simple pub/sub server example
//!
//! Run with: cargo run --example simple_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example simple_server                    # binds to 0.0.0.0:8025
//!   cargo run --example simple_server localhost          # binds to 127.0.0.1:8025
//!   cargo run --example simple_server 127.0.0.1:9025     # binds to 127.0.0.1:9025
//!
//! ## Talking to it
//!
//! With websocat:
//!   websocat ws://localhost:8025/
//!
//! Then type frames:
//!   sclock                 subscribe to the server clock
//!   secho.reply            subscribe to echo replies
//!   p24:echoj{"hello":"world"}   publish JSON to echo (2 = all, 4 = name length)
//!
//! ## What the server does
//!
//! - Logs every value published to `log` (closure subscriber)
//! - Republishes every value sent to `echo` on `echo.reply` (async inbox)
//! - Publishes a tick on `clock` once a second, but only while someone is
//!   subscribed to it anywhere

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wsps_rs::{FnSubscriber, Inbox, PubSubServer, Registry, ServerConfig, Visibility};

fn parse_bind_addr(arg: &str) -> Result<SocketAddr, String> {
    const DEFAULT_PORT: u16 = 8025;

    let normalized = arg.replace("localhost", "127.0.0.1");

    if let Ok(addr) = normalized.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = normalized.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    Err(format!(
        "Invalid bind address: '{}'. Expected format: IP:PORT or IP or 'localhost'",
        arg
    ))
}

fn print_usage() {
    eprintln!("Usage: simple_server [BIND_ADDR]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  BIND_ADDR    Address to bind to (default: 0.0.0.0:8025)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(addr_str) => match parse_bind_addr(addr_str) {
            Ok(addr) => ServerConfig::with_addr(addr),
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wsps_rs=debug".parse()?)
                .add_directive("simple_server=debug".parse()?),
        )
        .init();

    let registry = Arc::new(Registry::new());

    // Closure subscriber: runs inline on the publisher's thread
    registry.subscribe(
        "log",
        FnSubscriber::new(|channel, event| {
            tracing::info!(
                channel,
                origin = %event.origin(),
                value = %event.value(),
                "Logged"
            );
        }),
    );

    // Inbox subscriber: hands events to an async task
    let (inbox, mut echoes) = Inbox::new();
    registry.subscribe("echo", inbox);
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some((_, event)) = echoes.recv().await {
                registry.publish("echo.reply", event.value().clone(), None, Visibility::All);
            }
        });
    }

    // Clock: skip the work when nobody listens
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut ticks: i64 = 0;
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                ticks += 1;
                if registry.is_active("clock") {
                    registry.publish("clock", ticks, None, Visibility::All);
                }
            }
        });
    }

    println!("Starting pub/sub server on {}", config.bind_addr);
    println!("Connect with: websocat ws://{}/", config.bind_addr);
    println!();

    let server = PubSubServer::with_registry(config, registry);

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.stats();
    println!(
        "Served {} connections ({} rejected) over {:?}",
        stats.total_connections, stats.rejected_connections, stats.uptime
    );

    Ok(())
}
