//! Tool configuration
//!
//! Paths to the compiler source tree, build directory and the binaries the
//! tool wrappers launch. Each path can be overridden by an environment
//! variable; everything else is derived from `MERLIN_ROOT`.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Build directory below the checkout root when `BUILD_DIR` is not set
const DEFAULT_BUILD_SUBDIR: &str = "build/vanilla/host/debug/iree-spacemit-3.10.0.dev";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolConfig {
    pub merlin_root: PathBuf,
    pub iree_src_path: PathBuf,
    pub llvm_src_path: PathBuf,
    pub build_dir: PathBuf,
    /// Always `build_dir/install`
    pub install_dir: PathBuf,
    pub build_llvm_dir: PathBuf,
    pub filecheck_path: PathBuf,
    pub llvm_lit_path: PathBuf,
    pub build_tools_dir: PathBuf,
    pub iree_compile_path: PathBuf,
    /// Where compile inputs and outputs are written
    pub artifacts_dir: PathBuf,
}

impl ToolConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, default: PathBuf| -> PathBuf {
            lookup(name).filter(|value| !value.is_empty()).map(PathBuf::from).unwrap_or(default)
        };

        let merlin_root = var("MERLIN_ROOT", PathBuf::from("."));
        let iree_src_path = var("IREE_SRC_PATH", merlin_root.join("third_party").join("iree_bar"));
        let llvm_src_path = var("LLVM_SRC_PATH", iree_src_path.join("third_party").join("llvm-project"));

        let build_dir = var("BUILD_DIR", merlin_root.join(DEFAULT_BUILD_SUBDIR));
        let install_dir = build_dir.join("install");

        let build_llvm_dir = var("BUILD_LLVM_DIR", build_dir.join("llvm-project"));
        let llvm_lit_path = var("LLVM_LIT_PATH", build_llvm_dir.join("bin").join("lit"));
        let filecheck_path = var("FILECHECK_PATH", build_llvm_dir.join("bin").join("FileCheck"));

        let build_tools_dir = var("BUILD_TOOLS_DIR", build_dir.join("tools"));
        let iree_compile_path = var("IREE_COMPILE_PATH", build_tools_dir.join("iree-compile"));

        let artifacts_dir = var("ARTIFACTS_DIR", merlin_root.join("data").join("artifacts"));

        Self {
            merlin_root,
            iree_src_path,
            llvm_src_path,
            build_dir,
            install_dir,
            build_llvm_dir,
            filecheck_path,
            llvm_lit_path,
            build_tools_dir,
            iree_compile_path,
            artifacts_dir,
        }
    }

    /// Problems that will make some tool fail, as readable warnings
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.iree_src_path.exists() {
            warnings.push(format!(
                "Source path not found at {}. Reconfiguring will fail.",
                self.iree_src_path.display()
            ));
        }
        if !self.build_ninja().exists() {
            warnings.push(format!(
                "No 'build.ninja' found in {}. Run a build with reconfigure first.",
                self.build_dir.display()
            ));
        }
        warnings
    }

    pub fn build_ninja(&self) -> PathBuf {
        self.build_dir.join("build.ninja")
    }

    /// Make sure the artifacts directory exists
    pub fn ensure_artifacts_dir(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.artifacts_dir)?;
        Ok(&self.artifacts_dir)
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}
