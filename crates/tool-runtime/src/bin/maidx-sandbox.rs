//! Standalone host for `run_script` evaluations.
//!
//! Point `SCRIPT_SANDBOX_BIN` at this binary to keep script children out of
//! the main executable.

use std::process::ExitCode;

fn main() -> ExitCode {
    maidx_tool_runtime::tools::sandbox::serve()
}
