mod bridge;
mod io_thread;

use std::io::Write;
use std::path::PathBuf;

use crossterm::terminal;
use tokio::sync::mpsc;

use hexdesk_supervisor::{ProcessSupervisor, ServerSpec, SupervisorEvent, SupervisorOptions};
use hexdesk_term::SessionEvent;

use bridge::{Bridge, BridgeConfig, SessionKind};

/// Ctrl-Q detaches the console.
const DETACH_KEY: u8 = 0x11;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let home = match home_dir() {
        Some(dir) => dir,
        None => {
            eprintln!("fatal: could not determine home directory");
            std::process::exit(1);
        }
    };
    let hexdesk_home = home.join(".hexdesk");
    if let Err(e) = std::fs::create_dir_all(&hexdesk_home) {
        eprintln!("fatal: failed to create {}: {e}", hexdesk_home.display());
        std::process::exit(1);
    }

    // The protocol server runs for the application's whole lifetime; if it
    // is not installed, sessions still work and the supervisor is skipped.
    let (sup_tx, mut sup_rx) = mpsc::unbounded_channel();
    let server_script = hexdesk_home.join("server").join("main.js");
    let supervisor = if server_script.exists() {
        Some(ProcessSupervisor::start(
            ServerSpec {
                interpreter: "node".to_string(),
                script: server_script,
                args: vec![],
            },
            SupervisorOptions::default(),
            sup_tx,
        ))
    } else {
        log::info!(
            "no server installed at {}, skipping supervisor",
            server_script.display()
        );
        None
    };

    let (bridge, mut events) = Bridge::new(BridgeConfig {
        home,
        agent_binary: std::env::var("HEXDESK_AGENT").unwrap_or_else(|_| "claude".to_string()),
        shell_override: None,
    });

    let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if let Err(e) = bridge.create(0, workdir, SessionKind::Terminal) {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
    if let Ok((cols, rows)) = terminal::size() {
        let _ = bridge.resize(0, cols, rows);
    }

    if let Err(e) = terminal::enable_raw_mode() {
        eprintln!("fatal: failed to enter raw mode: {e}");
        std::process::exit(1);
    }

    // Raw stdin bytes, pumped from a blocking thread into the async loop.
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if stdin_tx.send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
            }
        }
    });

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            bytes = stdin_rx.recv() => {
                let Some(bytes) = bytes else { break };
                if bytes.contains(&DETACH_KEY) {
                    break;
                }
                if let Err(e) = bridge.input(0, &bytes) {
                    log::warn!("input failed: {e}");
                }
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Output { data, .. }) => {
                        let _ = stdout.write_all(data.as_bytes());
                        let _ = stdout.flush();
                    }
                    Some(SessionEvent::Closed { .. }) | None => break,
                    Some(SessionEvent::Created { .. }) => {}
                }
            }
            notice = sup_rx.recv() => {
                if let Some(SupervisorEvent::Failed { attempts }) = notice {
                    let _ = stdout.write_all(
                        format!("\r\nhexdesk: background server gave up after {attempts} restarts\r\n")
                            .as_bytes(),
                    );
                    let _ = stdout.flush();
                }
            }
        }
    }

    let _ = terminal::disable_raw_mode();
    let _ = bridge.kill(0);
    if let Some(supervisor) = supervisor {
        supervisor.stop().await;
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
