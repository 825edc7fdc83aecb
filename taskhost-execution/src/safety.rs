//! Safety preflight for worker executables
//!
//! A task may only be spawned when its working directory is a usable
//! directory and its executable is a regular, non-writable file that lives
//! strictly inside that directory. The preflight runs at startup and again
//! right before every spawn. Filesystem state can still change between the
//! check and the spawn; the check narrows that window but cannot close it.

use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use taskhost_config::TaskConfig;
use thiserror::Error;

/// Permission tested for the current user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    /// Whether the current (effective) user has this permission on `path`
    #[cfg(unix)]
    pub fn permitted(self, path: &Path) -> bool {
        use nix::unistd::{access, AccessFlags};

        let flags = match self {
            Access::Read => AccessFlags::R_OK,
            Access::Write => AccessFlags::W_OK,
            Access::Execute => AccessFlags::X_OK,
        };
        access(path, flags).is_ok()
    }

    #[cfg(not(unix))]
    pub fn permitted(self, path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(metadata) => match self {
                Access::Write => !metadata.permissions().readonly(),
                Access::Read | Access::Execute => true,
            },
            Err(_) => false,
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "readable"),
            Access::Write => write!(f, "writable"),
            Access::Execute => write!(f, "executable"),
        }
    }
}

/// One reason a task configuration is unsafe to run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("working directory is not configured")]
    WorkDirMissing,

    #[error("working directory {} does not exist", .0.display())]
    WorkDirNotFound(PathBuf),

    #[error("working directory {} is not a directory", .0.display())]
    WorkDirNotADirectory(PathBuf),

    #[error("working directory {} is not {access} by the current user", .path.display())]
    WorkDirAccess { path: PathBuf, access: Access },

    #[error("command is empty")]
    EmptyCommand,

    #[error("executable {0} is not restricted to a directory (prepend ./ for the working directory)")]
    NotPathRestricted(String),

    #[error("executable {} does not exist", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("executable {} is not a regular file", .0.display())]
    ExecutableNotAFile(PathBuf),

    #[error("executable {} is not executable by the current user", .0.display())]
    ExecutableNotExecutable(PathBuf),

    #[error("executable {} must not be writable by the current user", .0.display())]
    ExecutableWritable(PathBuf),

    #[error(
        "executable {} is outside of working directory {}",
        .executable.display(),
        .work_dir.display()
    )]
    OutsideWorkDir { executable: PathBuf, work_dir: PathBuf },
}

/// A task configuration rejected by the preflight, with every violation found
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task {task} failed its safety checks: {}", format_violations(.violations))]
pub struct SafetyError {
    pub task: String,
    pub violations: Vec<Violation>,
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Command that passed the preflight. Paths are canonical, so spawning does
/// not depend on how the configuration spelled them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
}

/// Stateless validator for task configurations
pub struct SafetyChecker;

impl SafetyChecker {
    /// Run every check against `config`.
    ///
    /// All violations are collected rather than stopping at the first one.
    pub fn check(config: &TaskConfig) -> Result<VerifiedCommand, SafetyError> {
        let mut violations = Vec::new();

        let work_dir = check_work_dir(config.work_dir.as_deref(), &mut violations);
        let executable = check_executable(config, work_dir.as_deref(), &mut violations);

        match (work_dir, executable) {
            (Some(work_dir), Some(executable)) if violations.is_empty() => Ok(VerifiedCommand {
                executable,
                args: config.args.clone(),
                work_dir,
            }),
            _ => Err(SafetyError {
                task: config.name.clone(),
                violations,
            }),
        }
    }
}

/// Canonical working directory, or `None` when nothing further can be
/// checked against it.
fn check_work_dir(work_dir: Option<&Path>, violations: &mut Vec<Violation>) -> Option<PathBuf> {
    let Some(work_dir) = work_dir else {
        violations.push(Violation::WorkDirMissing);
        return None;
    };

    let canonical = match std::fs::canonicalize(work_dir) {
        Ok(path) => path,
        Err(_) => {
            violations.push(Violation::WorkDirNotFound(work_dir.to_path_buf()));
            return None;
        }
    };

    if !canonical.is_dir() {
        violations.push(Violation::WorkDirNotADirectory(canonical));
        return None;
    }

    for access in [Access::Read, Access::Write, Access::Execute] {
        if !access.permitted(&canonical) {
            violations.push(Violation::WorkDirAccess {
                path: canonical.clone(),
                access,
            });
        }
    }

    Some(canonical)
}

fn check_executable(
    config: &TaskConfig,
    work_dir: Option<&Path>,
    violations: &mut Vec<Violation>,
) -> Option<PathBuf> {
    let command = config.command();
    let Some(executable) = command.first() else {
        violations.push(Violation::EmptyCommand);
        return None;
    };

    // Bare names would be looked up on PATH
    if !executable.contains('/') && !executable.contains(MAIN_SEPARATOR) {
        violations.push(Violation::NotPathRestricted(executable.to_string()));
    }

    let work_dir = work_dir?;
    let candidate = work_dir.join(executable);
    let canonical = match std::fs::canonicalize(&candidate) {
        Ok(path) => path,
        Err(_) => {
            violations.push(Violation::ExecutableNotFound(candidate));
            return None;
        }
    };

    if canonical.is_file() {
        if !Access::Execute.permitted(&canonical) {
            violations.push(Violation::ExecutableNotExecutable(canonical.clone()));
        }
        if !config.allow_writable_executable && Access::Write.permitted(&canonical) {
            violations.push(Violation::ExecutableWritable(canonical.clone()));
        }
    } else {
        violations.push(Violation::ExecutableNotAFile(canonical.clone()));
    }

    // Component-wise, so /srv/app-evil is not inside /srv/app
    if !canonical.starts_with(work_dir) || canonical == work_dir {
        violations.push(Violation::OutsideWorkDir {
            executable: canonical.clone(),
            work_dir: work_dir.to_path_buf(),
        });
    }

    Some(canonical)
}
