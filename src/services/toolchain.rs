//! Location of the external Python toolchain.
//!
//! Resolves script paths the same way regardless of whether the scripts are
//! bundled next to an embedded interpreter or checked out beside the binary,
//! and builds the [`CommandSpec`]s every subprocess in this crate is spawned from.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use super::settings::AppSettings;

/// A fully resolved subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Blocking command with stdout/stderr captured; used by the JSON queries.
    pub fn to_std_command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Async command with both output pipes captured. The child is killed if
    /// its handle is dropped.
    pub fn to_tokio_command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toolchain {
    settings: AppSettings,
    scripts_root: PathBuf,
}

impl Toolchain {
    pub fn new(settings: AppSettings) -> Self {
        let scripts_root = settings
            .scripts_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        log::debug!(
            "Toolchain: interpreter={:?} embedded={:?} scripts_root={:?}",
            settings.python,
            settings.embedded_python,
            scripts_root
        );
        Self {
            settings,
            scripts_root,
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    pub fn interpreter(&self) -> &Path {
        self.settings
            .embedded_python
            .as_deref()
            .unwrap_or(self.settings.python.as_path())
    }

    /// Extra environment for the embedded interpreter: `PYTHONHOME` two levels
    /// above `bin/python3`, `PYTHONPATH` at the scripts root.
    pub fn environment(&self) -> Vec<(String, OsString)> {
        let Some(embedded) = &self.settings.embedded_python else {
            return Vec::new();
        };
        let mut env = Vec::with_capacity(2);
        if let Some(home) = embedded.parent().and_then(Path::parent) {
            env.push(("PYTHONHOME".to_string(), home.as_os_str().to_owned()));
        }
        env.push((
            "PYTHONPATH".to_string(),
            self.scripts_root.as_os_str().to_owned(),
        ));
        env
    }

    /// Find `name` under the scripts root, the current directory or its parent.
    /// Unresolved names are passed through for the interpreter to look up.
    pub fn script_path(&self, name: &str) -> PathBuf {
        let cwd = std::env::current_dir().ok();
        let mut candidates = vec![self.scripts_root.join(name)];
        if let Some(cwd) = &cwd {
            candidates.push(cwd.join(name));
            if let Some(parent) = cwd.parent() {
                candidates.push(parent.join(name));
            }
        }
        candidates
            .into_iter()
            .find(|p| p.is_file())
            .unwrap_or_else(|| PathBuf::from(name))
    }

    /// `<python> <script> <args...>` run from the scripts root.
    pub fn script_command<I, S>(&self, script: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = self.script_path(script);
        let mut spec = CommandSpec::new(self.interpreter())
            .arg(script.to_string_lossy().into_owned())
            .args(args);
        spec.working_dir = Some(self.scripts_root.clone());
        spec.env = self.environment();
        spec
    }

    /// `<python> -c <code> <args...>` run from the scripts root. Arguments are
    /// read by the snippet through `sys.argv`.
    pub fn inline_command<I, S>(&self, code: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(self.interpreter())
            .arg("-c")
            .arg(code)
            .args(args);
        spec.working_dir = Some(self.scripts_root.clone());
        spec.env = self.environment();
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toolchain_at(root: &Path) -> Toolchain {
        Toolchain::new(AppSettings {
            scripts_dir: Some(root.to_path_buf()),
            ..AppSettings::default()
        })
    }

    #[test]
    fn script_found_under_scripts_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("recorder.py"), "").unwrap();

        let toolchain = toolchain_at(dir.path());
        assert_eq!(toolchain.script_path("recorder.py"), dir.path().join("recorder.py"));
    }

    #[test]
    fn unknown_script_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = toolchain_at(dir.path());
        assert_eq!(
            toolchain.script_path("definitely_not_here_1234.py"),
            PathBuf::from("definitely_not_here_1234.py")
        );
    }

    #[test]
    fn plain_interpreter_has_no_extra_env() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = toolchain_at(dir.path());
        assert_eq!(toolchain.interpreter(), Path::new("python3"));
        assert!(toolchain.environment().is_empty());
    }

    #[test]
    fn embedded_interpreter_sets_python_home_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let toolchain = Toolchain::new(AppSettings {
            scripts_dir: Some(dir.path().to_path_buf()),
            embedded_python: Some(PathBuf::from("/bundle/Python/Current/bin/python3")),
            ..AppSettings::default()
        });

        assert_eq!(
            toolchain.interpreter(),
            Path::new("/bundle/Python/Current/bin/python3")
        );
        let env = toolchain.environment();
        assert_eq!(env[0].0, "PYTHONHOME");
        assert_eq!(env[0].1, OsString::from("/bundle/Python/Current"));
        assert_eq!(env[1].0, "PYTHONPATH");
        assert_eq!(env[1].1, dir.path().as_os_str());
    }

    #[test]
    fn script_command_runs_from_scripts_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("capture_wizard.py"), "").unwrap();
        let toolchain = toolchain_at(dir.path());

        let spec = toolchain.script_command("capture_wizard.py", ["--layout", "7.1"]);
        assert_eq!(spec.program, PathBuf::from("python3"));
        assert_eq!(
            spec.args,
            vec![
                dir.path().join("capture_wizard.py").to_string_lossy().into_owned(),
                "--layout".to_string(),
                "7.1".to_string(),
            ]
        );
        assert_eq!(spec.working_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn display_joins_program_and_args() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo hi");
        assert_eq!(spec.to_string(), "sh -c echo hi");
    }
}
