//! `iree-compile` invocation on IR text

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ToolConfig;
use crate::tools::process::{command_line, run_with_timeout};
use crate::utils::{Error, Result};

const COMPILE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
    /// Compiled module, only when compilation succeeded
    pub artifact_path: Option<String>,
    pub command: String,
    pub duration_seconds: f64,
    pub input_path: String,
}

pub struct Compiler {
    config: ToolConfig,
    timeout: Duration,
}

impl Compiler {
    pub fn new(config: ToolConfig) -> Self {
        Self { config, timeout: COMPILE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base name `compile_<unix seconds>_<first 8 hex of sha256>`
    pub fn artifact_stem(ir_text: &str, timestamp: u64) -> String {
        let digest = format!("{:x}", Sha256::digest(ir_text.as_bytes()));
        format!("compile_{}_{}", timestamp, &digest[..8])
    }

    /// Save `ir_text` to the artifacts directory and compile it with `flags`
    pub fn run_compile(&self, ir_text: &str, flags: &[String]) -> Result<CompileResult> {
        let artifacts = self
            .config
            .ensure_artifacts_dir()
            .map_err(|source| Error::io(&self.config.artifacts_dir, source))?;

        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        let stem = Self::artifact_stem(ir_text, timestamp);
        let input_path = artifacts.join(format!("{}.mlir", stem));
        let output_path: PathBuf = artifacts.join(format!("{}.vmfb", stem));
        fs::write(&input_path, ir_text).map_err(|source| Error::io(&input_path, source))?;

        let mut command = Command::new(&self.config.iree_compile_path);
        command.arg(&input_path).arg("-o").arg(&output_path).args(flags);
        let line = command_line(&command);

        let started = Instant::now();
        let output = run_with_timeout(&mut command, None, self.timeout);
        let duration_seconds = started.elapsed().as_secs_f64();
        let input_path = input_path.display().to_string();

        Ok(match output {
            Ok(output) => CompileResult {
                success: output.success(),
                returncode: output.code,
                artifact_path: output.success().then(|| output_path.display().to_string()),
                stdout: output.stdout,
                stderr: output.stderr,
                command: line,
                duration_seconds,
                input_path,
            },
            Err(err) => {
                let stderr = match err {
                    Error::Timeout { .. } => {
                        format!("Error: Compilation timed out after {} seconds.", self.timeout.as_secs())
                    }
                    other => other.to_string(),
                };
                CompileResult {
                    success: false,
                    returncode: -1,
                    stdout: String::new(),
                    stderr,
                    artifact_path: None,
                    command: line,
                    duration_seconds,
                    input_path,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    fn compiler(dir: &TempDir, program: &str) -> Compiler {
        let root = dir.path().to_string_lossy().into_owned();
        let program = program.to_string();
        Compiler::new(ToolConfig::from_lookup(move |name| match name {
            "MERLIN_ROOT" => Some(root.clone()),
            "IREE_COMPILE_PATH" => Some(program.clone()),
            _ => None,
        }))
    }

    #[test]
    fn test_artifact_stem() {
        // sha256("") = e3b0c442...
        assert_eq!(Compiler::artifact_stem("", 1700000000), "compile_1700000000_e3b0c442");
    }

    #[test]
    fn test_successful_compile_reports_artifact() {
        let dir = TempDir::new().unwrap();
        let flags = vec!["--iree-hal-target-backends=llvm-cpu".to_string()];
        let result = compiler(&dir, "echo").run_compile("module {}\n", &flags).unwrap();

        assert!(result.success);
        assert_eq!(result.returncode, 0);
        assert!(Path::new(&result.input_path).exists());
        assert_eq!(std::fs::read_to_string(&result.input_path).unwrap(), "module {}\n");
        let artifact = result.artifact_path.unwrap();
        assert!(artifact.ends_with(".vmfb"));
        assert!(result.stdout.contains("--iree-hal-target-backends=llvm-cpu"));
        assert!(result.command.starts_with("echo "));
    }

    #[test]
    fn test_failed_compile_has_no_artifact() {
        let dir = TempDir::new().unwrap();
        let result = compiler(&dir, "false").run_compile("module {}\n", &[]).unwrap();
        assert!(!result.success);
        assert_eq!(result.artifact_path, None);
    }

    #[test]
    fn test_slow_compile_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("slow-compile");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let result = compiler(&dir, &script.to_string_lossy())
            .with_timeout(Duration::from_secs(1))
            .run_compile("module {}\n", &[])
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.returncode, -1);
        assert_eq!(result.stderr, "Error: Compilation timed out after 1 seconds.");
    }
}
