//! embercache - A Memcached-Compatible In-Memory LRU Cache Server
//!
//! This is the main entry point for the embercache server.
//! It sets up the TCP listener, storage engine, the background expiry
//! sweeper, and handles incoming connections.

use embercache::commands::CommandHandler;
use embercache::connection::{handle_connection, ConnectionStats};
use embercache::storage::{ExpirySweeper, StorageEngine, SweeperConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Host to bind to
    host: String,
    /// Port to listen on
    port: u16,
    /// Cache byte budget in mebibytes
    capacity_mb: usize,
    /// Seconds between expiry sweeps
    sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: embercache::DEFAULT_HOST.to_string(),
            port: embercache::DEFAULT_PORT,
            capacity_mb: 64,
            sweep_interval_secs: 10,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    if i + 1 < args.len() {
                        config.host = args[i + 1].clone();
                        i += 2;
                    } else {
                        eprintln!("Error: --host requires a value");
                        std::process::exit(1);
                    }
                }
                "--port" | "-p" => {
                    if i + 1 < args.len() {
                        config.port = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid port number");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --port requires a value");
                        std::process::exit(1);
                    }
                }
                "--capacity-mb" | "-c" => {
                    if i + 1 < args.len() {
                        config.capacity_mb = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid capacity");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --capacity-mb requires a value");
                        std::process::exit(1);
                    }
                }
                "--sweep-interval" => {
                    if i + 1 < args.len() {
                        config.sweep_interval_secs = args[i + 1].parse().unwrap_or_else(|_| {
                            eprintln!("Error: invalid sweep interval");
                            std::process::exit(1);
                        });
                        i += 2;
                    } else {
                        eprintln!("Error: --sweep-interval requires a value");
                        std::process::exit(1);
                    }
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("embercache version {}", embercache::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        config
    }

    /// Returns the bind address as a string
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_help() {
    println!(
        r#"
embercache - A Memcached-Compatible In-Memory LRU Cache Server

USAGE:
    embercache [OPTIONS]

OPTIONS:
    -h, --host <HOST>          Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>          Port to listen on (default: 11211)
    -c, --capacity-mb <MB>     Cache capacity in MiB (default: 64)
        --sweep-interval <S>   Seconds between expiry sweeps (default: 10)
    -v, --version              Print version information
        --help                 Print this help message

EXAMPLES:
    embercache                           # Start on 127.0.0.1:11211
    embercache --port 11212              # Start on port 11212
    embercache --capacity-mb 256         # 256 MiB cache budget
    embercache --host 0.0.0.0            # Listen on all interfaces

CONNECTING:
    Any memcached text-protocol client works, or plain netcat:
    $ printf 'set greeting 0 0 5\r\nhello\r\nget greeting\r\n' | nc 127.0.0.1 11211
    STORED
    VALUE greeting 0 5
    hello
    END
"#
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
embercache v{} - Memcached-Compatible In-Memory LRU Cache Server
────────────────────────────────────────────────────────────────
Server started on {}
Cache capacity: {} MiB, expiry sweep every {}s
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        embercache::VERSION,
        config.bind_address(),
        config.capacity_mb,
        config.sweep_interval_secs
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::from_args();

    // Set up logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // Print the banner
    print_banner(&config);

    // Create the storage engine (shared across all connections).
    // Construction fails on a zero byte budget.
    let capacity = config.capacity_mb * 1024 * 1024;
    let storage = Arc::new(StorageEngine::new(capacity)?);
    info!(capacity_bytes = capacity, "Storage engine initialized");

    // Start the background expiry sweeper
    let _sweeper = ExpirySweeper::start(
        Arc::clone(&storage),
        SweeperConfig {
            interval: Duration::from_secs(config.sweep_interval_secs),
        },
    );

    // Create connection statistics
    let stats = Arc::new(ConnectionStats::new());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address()).await?;
    info!("Listening on {}", config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Shutdown signal received, stopping server...");
    };

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&storage), stats) => {}
        _ = shutdown => {}
    }

    let stats = storage.stats();
    info!(
        items = stats.items,
        stores = stats.stores,
        gets = stats.gets,
        hits = stats.hits,
        evictions = stats.evictions,
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    storage: Arc<StorageEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                // Create a command handler for this connection
                let commands = CommandHandler::new(Arc::clone(&storage));
                let stats = Arc::clone(&stats);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, commands, stats).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
