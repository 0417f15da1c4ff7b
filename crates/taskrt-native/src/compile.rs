use std::path::Path;
use std::process::Command;

use taskrt::{TaskError, TaskResult};

/// Platform suffix of shared libraries, including the leading dot.
pub fn lib_ext() -> &'static str {
    if cfg!(target_os = "macos") {
        ".dylib"
    } else if cfg!(target_os = "windows") {
        ".dll"
    } else {
        ".so"
    }
}

/// Builds a C source file into a shared library with `$CC` (default `cc`).
pub fn compile_c(src: &Path, out: &Path) -> TaskResult<()> {
    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let mut cmd = Command::new(&compiler);
    if cfg!(target_os = "macos") {
        cmd.arg("-dynamiclib");
    } else {
        cmd.arg("-shared").arg("-fPIC");
    }
    cmd.arg("-O2");
    cmd.arg("-o").arg(out).arg(src);
    if !cfg!(target_os = "windows") {
        cmd.arg("-lm");
    }

    let output = cmd.output().map_err(|err| {
        TaskError::configuration(format!("failed to run C compiler '{compiler}': {err}"))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TaskError::configuration(format!(
            "C compiler failed on {}: {stderr}",
            src.display()
        )));
    }
    tracing::debug!(src = %src.display(), out = %out.display(), "compiled task library");
    Ok(())
}
