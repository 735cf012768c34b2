use std::path::{Path, PathBuf};
use std::process::Command;

/// Errors from shell-environment resolution.
#[derive(Debug)]
pub enum ShellError {
    IoError(std::io::Error),
}

impl std::fmt::Display for ShellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellError::IoError(err) => write!(f, "shell environment I/O error: {err}"),
        }
    }
}

impl std::error::Error for ShellError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShellError::IoError(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ShellError {
    fn from(err: std::io::Error) -> Self {
        ShellError::IoError(err)
    }
}

/// A resolved shell environment: executable, optional rc file, init script.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub shell: PathBuf,
    pub rc_file: Option<PathBuf>,
    pub init_script: PathBuf,
}

/// Resolves and caches the login shell, its startup file, and a derived PATH.
///
/// One resolver per session. The init script lives in the application's
/// private directory and is regenerated (safe overwrite) on every session
/// construction, so its content is always current and writing it twice is
/// harmless.
pub struct ShellEnvironmentResolver {
    home: PathBuf,
    shell: PathBuf,
    rc_file: Option<PathBuf>,
    init_script: PathBuf,
    path_cache: Option<String>,
}

/// Init script sourced before every real command. Turns off job-control
/// notifications so backgrounded children don't spray `[1] 12345` lines
/// into session output. Not all shells honor every option, hence the
/// silenced errors and the additional output filter downstream.
const INIT_SCRIPT: &str = "\
# hexdesk session bootstrap -- regenerated on session start
set +m 2>/dev/null
if [ -n \"$ZSH_VERSION\" ]; then
  unsetopt monitor 2>/dev/null
  unsetopt notify 2>/dev/null
fi
";

impl ShellEnvironmentResolver {
    /// Build a resolver rooted at `home`.
    ///
    /// `shell_override` takes precedence over `$SHELL`; the final fallback
    /// is `/bin/sh`.
    pub fn new(home: &Path, shell_override: Option<&str>) -> Self {
        let shell = shell_override
            .map(|s| s.to_string())
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string());
        let shell = PathBuf::from(shell);

        let rc_file = rc_file_for(&shell, home);
        let init_script = home.join(".hexdesk").join("init.sh");

        Self {
            home: home.to_path_buf(),
            shell,
            rc_file,
            init_script,
            path_cache: None,
        }
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn rc_file(&self) -> Option<&Path> {
        self.rc_file.as_deref()
    }

    pub fn config(&self) -> ShellConfig {
        ShellConfig {
            shell: self.shell.clone(),
            rc_file: self.rc_file.clone(),
            init_script: self.init_script.clone(),
        }
    }

    /// Write the init script, creating the application directory if needed.
    ///
    /// Idempotent; called once per session construction.
    pub fn ensure_init_script(&self) -> Result<&Path, ShellError> {
        if let Some(dir) = self.init_script.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.init_script, INIT_SCRIPT)?;
        Ok(&self.init_script)
    }

    /// PATH as the login shell sees it, cached after the first call.
    ///
    /// Asks the shell itself (`-l -c`) so rc-file PATH edits are included;
    /// falls back to the host PATH if the probe fails.
    pub fn derived_path(&mut self) -> String {
        if let Some(path) = &self.path_cache {
            return path.clone();
        }

        let probed = Command::new(&self.shell)
            .arg("-l")
            .arg("-c")
            .arg("printf %s \"$PATH\"")
            .output()
            .ok()
            .filter(|out| out.status.success())
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
            .filter(|path| !path.is_empty());

        let path = probed.unwrap_or_else(|| {
            log::debug!("login-shell PATH probe failed, using host PATH");
            std::env::var("PATH").unwrap_or_default()
        });

        self.path_cache = Some(path.clone());
        path
    }

    /// Build the command string actually handed to the shell: source the
    /// init script, then the user's rc file (aliases and functions), then
    /// run the original command.
    pub fn wrapped_command(&self, command: &str) -> String {
        let mut wrapped = String::new();
        wrapped.push_str(&format!(
            ". '{}' 2>/dev/null; ",
            self.init_script.display()
        ));
        if let Some(rc) = &self.rc_file {
            wrapped.push_str(&format!(". '{}' 2>/dev/null; ", rc.display()));
        }
        wrapped.push_str(command);
        wrapped
    }
}

/// Startup file for a shell, by executable name, only if it exists.
fn rc_file_for(shell: &Path, home: &Path) -> Option<PathBuf> {
    let name = shell.file_name()?.to_str()?;
    let rc = match name {
        "zsh" => home.join(".zshrc"),
        "bash" => home.join(".bashrc"),
        _ => return None,
    };
    rc.exists().then_some(rc)
}
