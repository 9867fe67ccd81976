//! FileCheck invocation: IR on stdin, expected patterns in a check file

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::ToolConfig;
use crate::tools::process::{command_line, run_with_timeout};
use crate::utils::{Error, Result};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
}

impl VerifyResult {
    fn failure(stderr: String) -> Self {
        Self { success: false, stdout: String::new(), stderr, command: "FileCheck".to_string() }
    }
}

pub struct Verifier {
    config: ToolConfig,
    timeout: Duration,
}

impl Verifier {
    pub fn new(config: ToolConfig) -> Self {
        Self { config, timeout: VERIFY_TIMEOUT }
    }

    /// Check `ir_text` against the `// CHECK:` lines of `expected_pattern_text`.
    /// Only failing to write the check file is an error; tool failures are
    /// reported in the result.
    pub fn verify(&self, ir_text: &str, expected_pattern_text: &str) -> Result<VerifyResult> {
        let mut check_file = tempfile::Builder::new()
            .prefix("check_")
            .suffix(".mlir")
            .tempfile()
            .map_err(|source| Error::io(std::env::temp_dir(), source))?;
        check_file
            .write_all(expected_pattern_text.as_bytes())
            .and_then(|()| check_file.flush())
            .map_err(|source| Error::io(check_file.path(), source))?;

        Ok(self.run(&check_file, ir_text))
    }

    fn run(&self, check_file: &NamedTempFile, ir_text: &str) -> VerifyResult {
        let mut command = Command::new(&self.config.filecheck_path);
        command.arg(check_file.path());
        let line = command_line(&command);

        match run_with_timeout(&mut command, Some(ir_text), self.timeout) {
            Ok(output) => VerifyResult {
                success: output.success(),
                stdout: output.stdout,
                stderr: output.stderr,
                command: line,
            },
            Err(Error::Timeout { .. }) => VerifyResult::failure("Verification timed out.".to_string()),
            Err(_) => VerifyResult::failure(format!(
                "FileCheck binary not found at {}",
                self.config.filecheck_path.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn verifier(program: &str) -> Verifier {
        let program = program.to_string();
        Verifier::new(ToolConfig::from_lookup(move |name| match name {
            "FILECHECK_PATH" => Some(program.clone()),
            _ => None,
        }))
    }

    const IR: &str = indoc! {"
        module {
          func.func @test_function() {
            return
          }
        }
    "};

    #[test]
    fn test_check_file_is_passed_as_argument() {
        // `cat` echoes the check file back instead of matching it
        let result = verifier("cat").verify(IR, "// CHECK: func.func @test_function\n").unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "// CHECK: func.func @test_function\n");
        assert!(result.command.starts_with("cat "));
        assert!(result.command.ends_with(".mlir"));
    }

    #[test]
    fn test_failing_check() {
        let result = verifier("false").verify(IR, "// CHECK: func.func @missing").unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_missing_filecheck() {
        let result = verifier("/nonexistent/FileCheck").verify(IR, "// CHECK: module").unwrap();
        assert_eq!(
            result,
            VerifyResult {
                success: false,
                stdout: String::new(),
                stderr: "FileCheck binary not found at /nonexistent/FileCheck".to_string(),
                command: "FileCheck".to_string(),
            }
        );
    }
}
