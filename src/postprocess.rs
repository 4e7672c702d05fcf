//! Bridge to the external decryption tool.
//!
//! The tool is located through an ordered list of [`ToolLocator`]s, run
//! synchronously as `<tool> -i <input> -o <output>` with its output captured
//! in a per-task log, and judged successful only when it exits with status
//! zero *and* the output file exists. Only then are the input, the log and
//! the emptied parent directory removed.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{log_path, Settings};

/// A resolved command: program plus leading arguments (the script path when
/// the tool runs through an interpreter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// One strategy for finding the tool.
pub trait ToolLocator: Send + Sync {
    fn locate(&self) -> Option<ToolCommand>;
}

/// A fixed command always resolves to itself.
impl ToolLocator for ToolCommand {
    fn locate(&self) -> Option<ToolCommand> {
        Some(self.clone())
    }
}

/// First locator that finds something wins.
pub fn resolve_tool(locators: &[Box<dyn ToolLocator>]) -> Option<ToolCommand> {
    locators.iter().find_map(|l| l.locate())
}

/// Look for an executable in a `PATH`-style directory list.
#[derive(Clone, Debug)]
pub struct PathSearch {
    program: String,
    search_path: Option<OsString>,
}

impl PathSearch {
    pub fn new(program: impl Into<String>, search_path: Option<OsString>) -> Self {
        Self {
            program: program.into(),
            search_path,
        }
    }

    /// Search the current process `PATH`.
    pub fn from_env(program: impl Into<String>) -> Self {
        Self::new(program, std::env::var_os("PATH"))
    }

    fn candidates(&self, dir: &Path) -> Vec<PathBuf> {
        let base = dir.join(&self.program);
        if cfg!(windows) && base.extension().is_none() {
            ["exe", "bat", "cmd"]
                .iter()
                .map(|ext| base.with_extension(ext))
                .collect()
        } else {
            vec![base]
        }
    }
}

impl ToolLocator for PathSearch {
    fn locate(&self) -> Option<ToolCommand> {
        let direct = Path::new(&self.program);
        if direct.components().count() > 1 {
            return is_executable(direct).then(|| ToolCommand::new(direct));
        }
        let path = self.search_path.as_ref()?;
        std::env::split_paths(path)
            .flat_map(|dir| self.candidates(&dir))
            .find(|candidate| is_executable(candidate))
            .map(ToolCommand::new)
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Look for a pip install of the tool (`site-packages/<pkg>/<pkg>.py`)
/// anywhere below `root` and run it through the first interpreter found.
pub struct InstallLayoutProbe {
    root: PathBuf,
    package: String,
    interpreters: Vec<Box<dyn ToolLocator>>,
}

impl InstallLayoutProbe {
    pub fn new(root: impl Into<PathBuf>, package: impl Into<String>, interpreters: Vec<Box<dyn ToolLocator>>) -> Self {
        Self {
            root: root.into(),
            package: package.into(),
            interpreters,
        }
    }

    fn find_script(&self) -> Option<PathBuf> {
        let script = format!("{}.py", self.package);
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir() && e.file_name() == "site-packages")
            .map(|e| e.path().join(&self.package).join(&script))
            .find(|p| p.is_file())
    }
}

impl ToolLocator for InstallLayoutProbe {
    fn locate(&self) -> Option<ToolCommand> {
        let script = self.find_script()?;
        let Some(interpreter) = resolve_tool(&self.interpreters) else {
            tracing::warn!("found {} but no python interpreter", script.display());
            return None;
        };
        tracing::info!("using script {}", script.display());
        Some(interpreter.arg(script))
    }
}

/// `PATH` lookup first, then the pip layout under the configured root.
pub fn default_locators(settings: &Settings) -> Vec<Box<dyn ToolLocator>> {
    let interpreters: Vec<Box<dyn ToolLocator>> = vec![
        Box::new(PathSearch::from_env("python3")),
        Box::new(PathSearch::from_env("python")),
    ];
    vec![
        Box::new(PathSearch::from_env(settings.tool.clone())),
        Box::new(InstallLayoutProbe::new(
            settings.tool_search_root.clone(),
            settings.tool.clone(),
            interpreters,
        )),
    ]
}

#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("post-processing tool not found")]
    ToolNotFound,
    #[error("could not open log {0}: {1}")]
    Log(PathBuf, #[source] std::io::Error),
    #[error("could not start tool: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("tool exited with {0}")]
    Exit(ExitStatus),
    #[error("tool exited cleanly but {0} was not created")]
    MissingOutput(PathBuf),
}

#[derive(Debug)]
pub enum ProcessState {
    Pending,
    Running,
    Succeeded,
    Failed(ProcessFailure),
}

#[derive(Debug)]
pub struct ProcessTask {
    pub input: PathBuf,
    pub output: PathBuf,
    pub log_file: PathBuf,
    pub state: ProcessState,
}

impl ProcessTask {
    pub fn succeeded(&self) -> bool {
        matches!(self.state, ProcessState::Succeeded)
    }

    pub fn failure(&self) -> Option<&ProcessFailure> {
        match &self.state {
            ProcessState::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Independent, best-effort filesystem cleanup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupStep {
    RemoveFile(PathBuf),
    RemoveDirIfEmpty(PathBuf),
}

impl CleanupStep {
    /// `Ok(true)` when something was removed.
    fn apply(&self) -> std::io::Result<bool> {
        match self {
            CleanupStep::RemoveFile(path) => match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e),
            },
            CleanupStep::RemoveDirIfEmpty(dir) => {
                if !dir.is_dir() || fs::read_dir(dir)?.next().is_some() {
                    return Ok(false);
                }
                fs::remove_dir(dir)?;
                Ok(true)
            }
        }
    }
}

/// Run every step; failures are logged and swallowed.
pub fn run_cleanup(steps: &[CleanupStep]) {
    for step in steps {
        match step.apply() {
            Ok(true) => tracing::info!("cleanup: {step:?}"),
            Ok(false) => tracing::debug!("cleanup: nothing to do for {step:?}"),
            Err(e) => tracing::warn!("cleanup failed for {step:?}: {e}"),
        }
    }
}

pub struct PostProcessor {
    locators: Vec<Box<dyn ToolLocator>>,
    logs_dir: PathBuf,
}

impl PostProcessor {
    pub fn new(locators: Vec<Box<dyn ToolLocator>>, logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            locators,
            logs_dir: logs_dir.into(),
        }
    }

    /// Convert `input` into `output`. Never fails past this call: the
    /// outcome is recorded on the returned task.
    pub fn process(&self, input: &Path, output: &Path) -> ProcessTask {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut task = ProcessTask {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            log_file: log_path(&self.logs_dir, "libray", &name),
            state: ProcessState::Pending,
        };

        let Some(tool) = resolve_tool(&self.locators) else {
            tracing::error!("post-processing tool not found, keeping {}", input.display());
            task.state = ProcessState::Failed(ProcessFailure::ToolNotFound);
            return task;
        };

        tracing::info!("processing {}", input.display());
        task.state = ProcessState::Running;
        task.state = match self.invoke(&tool, &task) {
            Ok(()) => ProcessState::Succeeded,
            Err(failure) => ProcessState::Failed(failure),
        };

        match &task.state {
            ProcessState::Succeeded => {
                tracing::info!("processed: {}", output.display());
                let mut steps = vec![
                    CleanupStep::RemoveFile(task.input.clone()),
                    CleanupStep::RemoveFile(task.log_file.clone()),
                ];
                if let Some(parent) = input.parent() {
                    steps.push(CleanupStep::RemoveDirIfEmpty(parent.to_path_buf()));
                }
                run_cleanup(&steps);
            }
            ProcessState::Failed(failure) => {
                tracing::error!(
                    "error processing {}: {failure}. See '{}'",
                    input.display(),
                    task.log_file.display()
                );
            }
            _ => {}
        }
        task
    }

    fn invoke(&self, tool: &ToolCommand, task: &ProcessTask) -> Result<(), ProcessFailure> {
        let log_err = |e| ProcessFailure::Log(task.log_file.clone(), e);
        fs::create_dir_all(&self.logs_dir).map_err(log_err)?;
        let log = File::create(&task.log_file).map_err(log_err)?;
        let log_stderr = log.try_clone().map_err(log_err)?;

        // the Command owns the log handles; dropping it here closes them
        // before any cleanup tries to delete the log
        let status = Command::new(&tool.program)
            .args(&tool.args)
            .arg("-i")
            .arg(&task.input)
            .arg("-o")
            .arg(&task.output)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_stderr))
            .status();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                if let Ok(mut log) = fs::OpenOptions::new().append(true).open(&task.log_file) {
                    let _ = writeln!(log, "Exception: {e}");
                }
                return Err(ProcessFailure::Spawn(e));
            }
        };

        if !status.success() {
            return Err(ProcessFailure::Exit(status));
        }
        if !task.output.exists() {
            return Err(ProcessFailure::MissingOutput(task.output.clone()));
        }
        Ok(())
    }
}
