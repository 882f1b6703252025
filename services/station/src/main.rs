// station: Scanning-station daemon.
//
// Runs the sync core headless.  Lines on stdin are treated as scanned codes
// and pushed through admission — the operator fallback path when no capture
// shell is attached.

use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "station starting");

    let cfg = {
        let result = match std::env::args().nth(1) {
            Some(path) => mesh_core::load_config_from_path(Path::new(&path)),
            None => mesh_core::load_config(),
        };
        match result {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {}", e);
                std::process::exit(1);
            }
        }
    };
    info!(
        port = cfg.network.port,
        sqlite_path = %cfg.store.sqlite_path,
        display_name = cfg.display_name.as_deref().unwrap_or("-"),
        "config loaded"
    );

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("FATAL: runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let core = match mesh_core::SyncCore::init(cfg).await {
            Ok(core) => core,
            Err(e) => {
                // The host may prefer degraded store-only operation; this
                // daemon has no such mode and aborts.
                error!(error = %e, "init failed");
                std::process::exit(1);
            }
        };
        info!(device_id = %core.device_id(), "sync core running");

        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut health_log = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    break;
                }
                _ = health_log.tick() => {
                    let health = core.query_health().await;
                    info!(
                        peers = health.peers_connected,
                        pending_acks = health.pending_acks,
                        pending_broadcasts = health.pending_broadcasts,
                        last_sync_s = health.time_since_last_sync_s.unwrap_or(-1),
                        "health"
                    );
                }
                line = stdin.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => {
                            let code = line.trim();
                            if code.is_empty() {
                                continue;
                            }
                            if code == "rescan" {
                                core.rescan_peers().await;
                                continue;
                            }
                            match core.submit_scan(code).await {
                                Ok(outcome) if outcome.allowed => {
                                    info!(code, count = outcome.today_count, "ALLOW");
                                }
                                Ok(outcome) => {
                                    let reason = outcome
                                        .reason
                                        .map(|r| r.as_str())
                                        .unwrap_or("denied");
                                    info!(code, reason, "DENY");
                                }
                                Err(e) => warn!(code, error = %e, "submit failed"),
                            }
                        }
                        Ok(None) => {
                            // stdin closed; keep gossiping until ctrl-c.
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!(error = %e, "stdin read failed");
                            stdin_open = false;
                        }
                    }
                }
            }
        }

        core.shutdown().await;
    });
}
