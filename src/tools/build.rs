//! Build orchestration: ninja builds and CMake reconfiguration of the
//! compiler tree

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ToolConfig;
use crate::tools::process::{command_line, run_with_timeout, ProcessOutput};
use crate::utils::{Error, Result};

/// Targets built in fast mode
pub const FAST_TARGETS: &[&str] = &["llvm-tblgen", "llc", "FileCheck", "intrinsics_gen"];

const NINJA_TIMEOUT: Duration = Duration::from_secs(1200);
const CMAKE_TIMEOUT: Duration = Duration::from_secs(600);

/// Matches kept per pattern in an error summary
const SUMMARY_MATCHES: usize = 5;

static ERROR_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?m)error:.*$", r"(?m)FAILED:.*$", r"(?m)CMake Error.*$"]
        .iter()
        .map(|pattern| {
            Regex::new(pattern).unwrap_or_else(|e| panic!("BUG: invalid error pattern {}: {}", pattern, e))
        })
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    pub error_summary: String,
    pub command: String,
}

impl BuildResult {
    fn from_output(output: Result<ProcessOutput>, command: String) -> Self {
        match output {
            Ok(output) => {
                let success = output.success();
                let error_summary = if success {
                    String::new()
                } else {
                    extract_error_summary(&output.stdout, &output.stderr)
                };
                Self {
                    success,
                    returncode: output.code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                    error_summary,
                    command,
                }
            }
            Err(Error::Timeout { .. }) => Self::failure("Command timed out.", "Timeout.", command),
            Err(err) => {
                let message = err.to_string();
                Self::failure(&message, &message, command)
            }
        }
    }

    fn failure(stderr: &str, summary: &str, command: String) -> Self {
        Self {
            success: false,
            returncode: -1,
            stdout: String::new(),
            stderr: stderr.to_string(),
            error_summary: summary.to_string(),
            command,
        }
    }
}

/// The last few `error:`, `FAILED:` and `CMake Error` lines of a failed run
pub fn extract_error_summary(stdout: &str, stderr: &str) -> String {
    let log = format!("{}\n{}", stdout, stderr);
    let mut matches = Vec::new();
    for pattern in ERROR_PATTERNS.iter() {
        let found: Vec<&str> = pattern.find_iter(&log).map(|m| m.as_str()).collect();
        let skip = found.len().saturating_sub(SUMMARY_MATCHES);
        matches.extend(found.into_iter().skip(skip));
    }
    if matches.is_empty() {
        "Command failed. Check full logs.".to_string()
    } else {
        matches.join("\n...\n").trim().to_string()
    }
}

pub struct Builder {
    config: ToolConfig,
    ninja: PathBuf,
    cmake: PathBuf,
}

impl Builder {
    pub fn new(config: ToolConfig) -> Self {
        Self { config, ninja: PathBuf::from("ninja"), cmake: PathBuf::from("cmake") }
    }

    /// Use other `ninja` and `cmake` executables
    pub fn with_programs(mut self, ninja: impl Into<PathBuf>, cmake: impl Into<PathBuf>) -> Self {
        self.ninja = ninja.into();
        self.cmake = cmake.into();
        self
    }

    /// Build `target` (space separated targets allowed). `reconfigure`
    /// takes precedence and only runs CMake.
    pub fn run_build(&self, target: &str, fast_mode: bool, clean: bool, reconfigure: bool) -> BuildResult {
        if reconfigure {
            info!("Reconfiguring {}", self.config.build_dir.display());
            if self.config.install_dir.exists() {
                if let Err(err) = fs::remove_dir_all(&self.config.install_dir) {
                    warn!("Could not remove {}: {}", self.config.install_dir.display(), err);
                }
            }
            return self.run_cmake();
        }

        if clean {
            let mut command = Command::new(&self.ninja);
            command.arg("-C").arg(&self.config.build_dir).args(["-t", "clean"]);
            if let Err(err) = run_with_timeout(&mut command, None, NINJA_TIMEOUT) {
                warn!("Clean failed: {}", err);
            }
        }

        let targets: Vec<&str> = if fast_mode {
            FAST_TARGETS.to_vec()
        } else {
            target.split_whitespace().collect()
        };
        let mut command = Command::new(&self.ninja);
        command.arg("-C").arg(&self.config.build_dir).args(&targets);
        let line = command_line(&command);
        BuildResult::from_output(run_with_timeout(&mut command, None, NINJA_TIMEOUT), line)
    }

    /// Configure the build directory from scratch
    pub fn run_cmake(&self) -> BuildResult {
        let mut command = Command::new(&self.cmake);
        command.args(self.cmake_flags());
        let line = command_line(&command);
        if let Err(source) = fs::create_dir_all(&self.config.build_dir) {
            let err = Error::io(&self.config.build_dir, source);
            return BuildResult::from_output(Err(err), line);
        }
        BuildResult::from_output(run_with_timeout(&mut command, None, CMAKE_TIMEOUT), line)
    }

    pub fn cmake_flags(&self) -> Vec<String> {
        let mut flags = vec![
            "-G".to_string(),
            "Ninja".to_string(),
            "-B".to_string(),
            self.config.build_dir.display().to_string(),
            "-S".to_string(),
            self.config.iree_src_path.display().to_string(),
            format!("-DCMAKE_INSTALL_PREFIX={}", self.config.install_dir.display()),
        ];
        flags.extend(
            [
                "-DCMAKE_BUILD_TYPE=RelWithDebInfo",
                "-DCMAKE_CXX_FLAGS=-Wno-error=cpp -Wno-error=maybe-uninitialized -fno-omit-frame-pointer -fdebug-types-section",
                "-DCMAKE_C_FLAGS=-fno-omit-frame-pointer -fdebug-types-section",
                "-DIREE_ENABLE_LLD=ON",
                "-DIREE_ENABLE_RUNTIME_TRACING=OFF",
                "-DIREE_ENABLE_COMPILER_TRACING=OFF",
                "-DIREE_BUILD_SAMPLES=OFF",
                "-DIREE_TARGET_BACKEND_DEFAULTS=OFF",
                "-DIREE_TARGET_BACKEND_LLVM_CPU=ON",
                "-DIREE_HAL_DRIVER_DEFAULTS=OFF",
                "-DIREE_HAL_DRIVER_LOCAL_SYNC=ON",
                "-DIREE_HAL_DRIVER_LOCAL_TASK=ON",
                "-DIREE_BUILD_PYTHON_BINDINGS=OFF",
                "-DIREE_ENABLE_ASSERTIONS=ON",
                "-DCMAKE_C_COMPILER_LAUNCHER=ccache",
                "-DCMAKE_CXX_COMPILER_LAUNCHER=ccache",
                "-DIREE_ENABLE_ASAN=OFF",
            ]
            .iter()
            .map(|flag| flag.to_string()),
        );
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> ToolConfig {
        let root = dir.path().to_string_lossy().into_owned();
        ToolConfig::from_lookup(move |name| match name {
            "MERLIN_ROOT" => Some(root.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_error_summary_keeps_last_matches() {
        let stdout = indoc! {"
            [1/3] Building a.o
            FAILED: a.o
            a.cpp:3:1: error: expected ';'
            a.cpp:9:1: error: unknown type
        "};
        assert_eq!(
            extract_error_summary(stdout, ""),
            "error: expected ';'\n...\nerror: unknown type\n...\nFAILED: a.o"
        );

        let many: String = (0..8).map(|i| format!("error: e{}\n", i)).collect();
        let summary = extract_error_summary(&many, "");
        assert!(!summary.contains("e2"));
        assert!(summary.starts_with("error: e3"));
        assert!(summary.ends_with("error: e7"));
    }

    #[test]
    fn test_error_summary_fallback() {
        assert_eq!(extract_error_summary("ok", "warning: x"), "Command failed. Check full logs.");
    }

    #[test]
    fn test_fast_mode_targets() {
        let dir = TempDir::new().unwrap();
        let builder = Builder::new(config(&dir)).with_programs("echo", "echo");
        let result = builder.run_build("install", true, false, false);
        assert!(result.success);
        assert!(result.command.starts_with("echo -C "));
        assert!(result.command.ends_with("llvm-tblgen llc FileCheck intrinsics_gen"));
        assert_eq!(result.error_summary, "");
    }

    #[test]
    fn test_failed_build_is_summarised() {
        let dir = TempDir::new().unwrap();
        let builder = Builder::new(config(&dir)).with_programs("false", "false");
        let result = builder.run_build("iree-compile", false, false, false);
        assert!(!result.success);
        assert_eq!(result.returncode, 1);
        assert_eq!(result.error_summary, "Command failed. Check full logs.");
    }

    #[test]
    fn test_missing_ninja() {
        let dir = TempDir::new().unwrap();
        let builder = Builder::new(config(&dir)).with_programs("/nonexistent/ninja", "cmake");
        let result = builder.run_build("install", false, false, false);
        assert!(!result.success);
        assert_eq!(result.returncode, -1);
        assert!(result.stderr.contains("/nonexistent/ninja"));
    }

    #[test]
    fn test_reconfigure_clears_install_dir() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::create_dir_all(config.install_dir.join("bin")).unwrap();
        let builder = Builder::new(config.clone()).with_programs("ninja", "echo");
        let result = builder.run_build("install", false, false, true);
        assert!(result.success);
        assert!(!config.install_dir.exists());
        assert!(result.command.contains("-DCMAKE_INSTALL_PREFIX="));
        assert!(result.stdout.contains("-G Ninja"));
    }
}
