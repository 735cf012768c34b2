//! Async driver: spawns the server, pumps its output into the application
//! log, and feeds exits, timers, and health polls through the restart state
//! machine.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::backoff::{BackoffPolicy, ExitDecision, SupervisorCore};

/// Errors from supervisor setup.
#[derive(Debug)]
pub enum SupervisorError {
    InterpreterNotFound(String),
    ScriptMissing(PathBuf),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::InterpreterNotFound(name) => {
                write!(f, "interpreter `{name}` not found on PATH")
            }
            SupervisorError::ScriptMissing(path) => {
                write!(f, "server script missing: {}", path.display())
            }
        }
    }
}

impl std::error::Error for SupervisorError {}

/// User-visible notifications from the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Restart budget exhausted; the server stays down. Sent exactly once.
    Failed { attempts: u32 },
}

/// What to run: an interpreter located on PATH plus the server script.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub interpreter: String,
    pub script: PathBuf,
    pub args: Vec<String>,
}

impl ServerSpec {
    /// Resolve the execution environment: find the interpreter and check
    /// the script exists. Called before every spawn so a fixed install is
    /// picked up by the next restart.
    pub fn resolve(&self) -> Result<PathBuf, SupervisorError> {
        let interpreter = find_on_path(&self.interpreter)
            .ok_or_else(|| SupervisorError::InterpreterNotFound(self.interpreter.clone()))?;
        if !self.script.exists() {
            return Err(SupervisorError::ScriptMissing(self.script.clone()));
        }
        Ok(interpreter)
    }
}

/// Timing knobs; tests shrink these.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub policy: BackoffPolicy,
    /// How long a child must survive before the spawn counts as successful.
    pub stabilize_after: Duration,
    /// Fixed health-check poll interval.
    pub health_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            policy: BackoffPolicy::default(),
            stabilize_after: Duration::from_millis(3000),
            health_interval: Duration::from_millis(5000),
        }
    }
}

/// Handle to the running supervisor task.
///
/// Created once at application startup; [`ProcessSupervisor::stop`] at
/// shutdown cancels any pending restart and health timers before
/// terminating the child, so a deliberate stop never races a scheduled
/// restart.
pub struct ProcessSupervisor {
    stop_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ProcessSupervisor {
    /// Spawn the server and begin supervising it.
    pub fn start(
        spec: ServerSpec,
        options: SupervisorOptions,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = tokio::spawn(run_loop(spec, options, events, stop_rx));
        Self { stop_tx, task }
    }

    /// Intentional shutdown. Terminates the child and waits for the
    /// supervising task to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn run_loop(
    spec: ServerSpec,
    options: SupervisorOptions,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let mut core = SupervisorCore::new(options.policy);
    let mut child: Option<Child> = None;
    // The pending-restart and stabilization timers are plain fields so an
    // intentional stop drops (cancels) them before killing the child.
    let mut restart: Option<Pin<Box<Sleep>>> = None;
    let mut stabilize: Option<Pin<Box<Sleep>>> = None;
    let mut health = tokio::time::interval(options.health_interval);
    health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut health_enabled = false;

    core.on_starting();
    if !spawn_server(&spec, &options, &mut core, &mut child, &mut stabilize) {
        handle_crash(&mut core, &events, &mut restart, &mut stabilize, &mut health_enabled);
    }

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                core.on_stop();
                let _ = restart.take();
                let _ = stabilize.take();
                if let Some(mut child) = child.take() {
                    log::info!("supervisor: stopping server");
                    let _ = child.kill().await;
                }
                return;
            }

            status = wait_child(&mut child), if child.is_some() => {
                log::warn!("supervisor: server exited unexpectedly ({status})");
                child = None;
                handle_crash(&mut core, &events, &mut restart, &mut stabilize, &mut health_enabled);
            }

            _ = sleep_ready(&mut restart), if restart.is_some() => {
                restart = None;
                core.on_restart_due();
                if !spawn_server(&spec, &options, &mut core, &mut child, &mut stabilize) {
                    handle_crash(&mut core, &events, &mut restart, &mut stabilize, &mut health_enabled);
                }
            }

            _ = sleep_ready(&mut stabilize), if stabilize.is_some() => {
                stabilize = None;
                core.on_spawn_confirmed();
                health_enabled = true;
                log::info!("supervisor: server stable, health checks armed");
            }

            _ = health.tick(), if health_enabled => {
                let gone = match child.as_mut() {
                    Some(child) => !matches!(child.try_wait(), Ok(None)),
                    None => true,
                };
                if gone {
                    log::warn!("supervisor: health check lost the server process");
                    child = None;
                    handle_crash(&mut core, &events, &mut restart, &mut stabilize, &mut health_enabled);
                }
            }
        }
    }
}

async fn wait_child(child: &mut Option<Child>) -> String {
    match child.as_mut() {
        Some(child) => match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait error: {e}"),
        },
        // Guarded by `child.is_some()` in the select arm.
        None => std::future::pending().await,
    }
}

async fn sleep_ready(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

fn handle_crash(
    core: &mut SupervisorCore,
    events: &mpsc::UnboundedSender<SupervisorEvent>,
    restart: &mut Option<Pin<Box<Sleep>>>,
    stabilize: &mut Option<Pin<Box<Sleep>>>,
    health_enabled: &mut bool,
) {
    *stabilize = None;
    *health_enabled = false;

    match core.on_exit() {
        ExitDecision::Restart(delay) => {
            log::warn!(
                "supervisor: restart attempt {} in {}ms",
                core.attempts(),
                delay.as_millis()
            );
            *restart = Some(Box::pin(tokio::time::sleep(delay)));
        }
        ExitDecision::Fail => {
            log::error!(
                "supervisor: giving up after {} failed restarts",
                core.attempts()
            );
            let _ = events.send(SupervisorEvent::Failed {
                attempts: core.attempts(),
            });
        }
        ExitDecision::Ignore => {}
    }
}

/// Spawn one server instance. Returns `false` when the spawn itself fails,
/// which the caller treats like an immediate crash so the backoff budget
/// applies to a broken install too.
fn spawn_server(
    spec: &ServerSpec,
    options: &SupervisorOptions,
    core: &mut SupervisorCore,
    child: &mut Option<Child>,
    stabilize: &mut Option<Pin<Box<Sleep>>>,
) -> bool {
    let interpreter = match spec.resolve() {
        Ok(path) => path,
        Err(e) => {
            log::error!("supervisor: {e}");
            return false;
        }
    };

    let spawned = Command::new(&interpreter)
        .arg(&spec.script)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    match spawned {
        Ok(mut proc) => {
            log::info!(
                "supervisor: server started (pid {:?})",
                proc.id()
            );
            if let Some(stdout) = proc.stdout.take() {
                tokio::spawn(pump_lines(stdout, false));
            }
            if let Some(stderr) = proc.stderr.take() {
                tokio::spawn(pump_lines(stderr, true));
            }
            core.on_spawned();
            *child = Some(proc);
            *stabilize = Some(Box::pin(tokio::time::sleep(options.stabilize_after)));
            true
        }
        Err(e) => {
            log::error!("supervisor: spawn failed: {e}");
            *child = None;
            false
        }
    }
}

/// Forward server output line-by-line to the application log.
async fn pump_lines(stream: impl tokio::io::AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            log::warn!("server: {line}");
        } else {
            log::info!("server: {line}");
        }
    }
}

/// Search PATH for an executable, accepting absolute paths as-is.
fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.exists().then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|full| full.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::timeout;

    fn script_with(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{content}").unwrap();
        (dir, path)
    }

    fn fast_options(max_attempts: u32) -> SupervisorOptions {
        SupervisorOptions {
            policy: BackoffPolicy {
                max_attempts,
                base_delay: Duration::from_millis(5),
            },
            stabilize_after: Duration::from_millis(50),
            health_interval: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_resolve_missing_interpreter() {
        let (_dir, script) = script_with("exit 0");
        let spec = ServerSpec {
            interpreter: "definitely-not-a-real-binary-hexdesk".to_string(),
            script,
            args: vec![],
        };
        assert!(matches!(
            spec.resolve(),
            Err(SupervisorError::InterpreterNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_missing_script() {
        let spec = ServerSpec {
            interpreter: "sh".to_string(),
            script: PathBuf::from("/nonexistent/hexdesk-server.js"),
            args: vec![],
        };
        assert!(matches!(
            spec.resolve(),
            Err(SupervisorError::ScriptMissing(_))
        ));
    }

    #[test]
    fn test_find_on_path_absolute() {
        assert_eq!(find_on_path("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert_eq!(find_on_path("/bin/hexdesk-no-such-binary"), None);
    }

    #[tokio::test]
    async fn test_crashing_server_reports_failed_once() {
        let (_dir, script) = script_with("exit 1");
        let spec = ServerSpec {
            interpreter: "sh".to_string(),
            script,
            args: vec![],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let supervisor = ProcessSupervisor::start(spec, fast_options(2), tx);

        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("expected a Failed event before the timeout")
            .unwrap();
        assert_eq!(event, SupervisorEvent::Failed { attempts: 2 });

        // FAILED is terminal and reported once; nothing further arrives.
        assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_healthy_server_stops_cleanly() {
        let (_dir, script) = script_with("sleep 30");
        let spec = ServerSpec {
            interpreter: "sh".to_string(),
            script,
            args: vec![],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let supervisor = ProcessSupervisor::start(spec, fast_options(3), tx);

        // Let it pass the stabilization window and a health tick.
        tokio::time::sleep(Duration::from_millis(150)).await;
        supervisor.stop().await;

        // A deliberate stop must not surface as a failure.
        assert!(rx.try_recv().is_err());
    }
}
