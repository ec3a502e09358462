use clap::{Parser, Subcommand};
use relay_api::auth::{load_or_create_psk, rotate_psk};
use relay_api::{build_router, AppState};
use relay_config::{ConfigPaths, DaemonConfig};
use relayd::{is_process_alive, read_pid_file, remove_pid_file, write_pid_file};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relayd", version = relayd::DAEMON_VERSION, about = "Relay daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the background
    Start {
        #[arg(long, default_value_t = 9400)]
        port: u16,
    },
    /// Run the daemon in the foreground
    Run {
        #[arg(long, default_value_t = 9400)]
        port: u16,
    },
    /// Check daemon status
    Status,
    /// Stop a running daemon
    Stop,
    /// Print or rotate the pre-shared key
    Token {
        /// Generate a new key, invalidating the old one
        #[arg(long)]
        rotate: bool,
    },
    /// Print version
    Version,
}

fn read_pid(paths: &ConfigPaths) -> Option<u32> {
    read_pid_file(&paths.pid_path())
}

fn write_pid(paths: &ConfigPaths) -> anyhow::Result<()> {
    write_pid_file(&paths.pid_path())
}

fn remove_pid(paths: &ConfigPaths) {
    remove_pid_file(&paths.pid_path());
}

fn pid_looks_like_relayd(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let comm_output = std::process::Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .arg("-o")
            .arg("comm=")
            .output();

        match comm_output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .trim()
                .to_ascii_lowercase()
                .ends_with("relayd"),
            _ => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> anyhow::Result<()> {
    let raw_pid = i32::try_from(pid).map_err(|_| anyhow::anyhow!("PID out of range: {}", pid))?;
    // Safety: `raw_pid` is validated as a positive process id for libc::kill.
    let rc = unsafe { libc::kill(raw_pid, signal) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayd=info,relay_api=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let paths = ConfigPaths::new()?;

    match cli.command {
        Commands::Start { port } => {
            let config = DaemonConfig::load()?;
            reject_if_already_running(&paths)?;

            paths.ensure_config_dir()?;
            let psk = load_or_create_psk(&paths.psk_path())?;

            let exe = std::env::current_exe()?;
            let out_log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths.config_dir().join("relayd.out.log"))?;
            let err_log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths.config_dir().join("relayd.err.log"))?;

            std::process::Command::new(&exe)
                .arg("run")
                .arg("--port")
                .arg(port.to_string())
                .stdin(std::process::Stdio::null())
                .stdout(out_log)
                .stderr(err_log)
                .spawn()?;

            println!("Relay daemon started.");
            println!();
            println!("  API: http://{}:{}", config.host, port);
            println!("  PSK: {}", psk);
            println!();

            Ok(())
        }

        Commands::Run { port } => {
            let mut config = DaemonConfig::load()?;
            config.port = port;
            reject_if_already_running(&paths)?;

            paths.ensure_config_dir()?;
            write_pid(&paths)?;

            let psk = load_or_create_psk(&paths.psk_path())?;

            println!("Relay daemon running...");
            println!();
            println!("  API: http://{}:{}", config.host, config.port);
            println!();

            let state = AppState::new(config.clone(), psk).await?;
            state.discovery.start().await?;
            let reconciled = state.mux.reconcile().await;
            if !reconciled.is_empty() {
                tracing::info!("Reconciled {} existing windows", reconciled.len());
            }

            let background_tasks = spawn_background_tasks(&state);

            let shutdown_state = state.clone();
            let app = build_router(state);

            let addr: SocketAddr = config.bind_addr().parse()?;
            tracing::info!("Listening on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;

            let shutdown = async move {
                #[cfg(unix)]
                {
                    let mut terminate =
                        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                            .expect("Failed to install SIGTERM handler");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c()
                        .await
                        .expect("Failed to listen for ctrl+c");
                }
                tracing::info!("Shutting down...");
                for task in &background_tasks {
                    task.abort();
                }
                shutdown_state.bridge.stop().await;
                shutdown_state.discovery.stop().await;
                remove_pid_file(&paths.pid_path());
            };

            axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

            Ok(())
        }

        Commands::Status => {
            match read_pid(&paths) {
                Some(pid) if is_process_alive(pid) && pid_looks_like_relayd(pid) => {
                    println!("Daemon is running (PID {})", pid);
                    let config = DaemonConfig::load()?;
                    match reqwest::get(format!("http://{}/api/status", config.bind_addr())).await {
                        Ok(resp) => {
                            let body: serde_json::Value = resp.json().await?;
                            println!("Version: {}", body["version"].as_str().unwrap_or("unknown"));
                            println!("Active sessions: {}", body["activeSessions"].as_u64().unwrap_or(0));
                            println!("Uptime: {}s", body["uptime"].as_u64().unwrap_or(0));
                        }
                        Err(_) => println!("(Could not reach status endpoint)"),
                    }
                }
                Some(pid) if is_process_alive(pid) => {
                    println!(
                        "PID file points to non-relayd process {}. Cleaning stale PID file.",
                        pid
                    );
                    remove_pid(&paths);
                }
                Some(pid) => {
                    println!("Daemon is not running (stale PID {})", pid);
                    remove_pid(&paths);
                }
                None => println!("Daemon is not running"),
            }
            Ok(())
        }

        Commands::Stop => {
            match read_pid(&paths) {
                Some(pid) if is_process_alive(pid) && pid_looks_like_relayd(pid) => {
                    println!("Stopping daemon (PID {})...", pid);
                    #[cfg(unix)]
                    send_signal(pid, libc::SIGTERM)?;
                    for _ in 0..50 {
                        if !is_process_alive(pid) {
                            break;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                    if is_process_alive(pid) {
                        println!("Force killing...");
                        #[cfg(unix)]
                        send_signal(pid, libc::SIGKILL)?;
                    }
                    remove_pid(&paths);
                    println!("Daemon stopped.");
                }
                Some(pid) if is_process_alive(pid) => {
                    println!(
                        "Refusing to stop PID {} because it is not relayd. Cleaning stale PID file.",
                        pid
                    );
                    remove_pid(&paths);
                }
                Some(pid) => {
                    println!("Daemon not running (stale PID {}), cleaning up.", pid);
                    remove_pid(&paths);
                }
                None => println!("Daemon is not running."),
            }
            Ok(())
        }

        Commands::Token { rotate } => {
            paths.ensure_config_dir()?;
            let psk = if rotate {
                rotate_psk(&paths.psk_path())?
            } else {
                load_or_create_psk(&paths.psk_path())?
            };
            println!("{}", psk);
            if rotate {
                if let Some(pid) = read_pid(&paths) {
                    if is_process_alive(pid) {
                        println!("\nNote: restart the daemon for the new key to take effect.");
                    }
                }
            }
            Ok(())
        }

        Commands::Version => {
            println!("relayd {}", relayd::DAEMON_VERSION);
            Ok(())
        }
    }
}

/// Launches the periodic sweepers/timers each component names but doesn't
/// run on its own: the attach-token sweep (A), the attach rate-limiter
/// sweep (G), the multiplexer's window-list refresh (C), and the terminal
/// bridge's orphan reaper (F).
fn spawn_background_tasks(state: &relay_api::AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();

    let auth = state.auth.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            auth.sweep().await;
        }
    }));

    let rate_limiter = state.rate_limiter.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            rate_limiter.sweep().await;
        }
    }));

    let mux = state.mux.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(relay_mux::MuxManager::refresh_interval());
        loop {
            ticker.tick().await;
            mux.refresh_cache().await;
        }
    }));

    let bridge = state.bridge.clone();
    tasks.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(relay_api::bridge::TerminalBridge::reap_interval());
        loop {
            ticker.tick().await;
            bridge.reap_orphans().await;
        }
    }));

    tasks
}

fn reject_if_already_running(paths: &ConfigPaths) -> anyhow::Result<()> {
    if let Some(pid) = read_pid(paths) {
        if is_process_alive(pid) {
            if !pid_looks_like_relayd(pid) {
                tracing::warn!("PID file points to live non-relayd process {}, cleaning up.", pid);
                remove_pid(paths);
            } else {
                anyhow::bail!("Daemon already running (PID {}). Use 'relayd stop' first.", pid);
            }
        } else {
            tracing::warn!("Removing stale PID file for dead process {}", pid);
            remove_pid(paths);
        }
    }
    Ok(())
}
