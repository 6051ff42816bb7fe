
use log::trace;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum ExternalToolError {
    #[error("{name} not on PATH")]
    NotFound { name: String },
    #[error("`{command}` failed with exit code {code}:\n{stderr}")]
    Failed { command: String, code: i32, stderr: String }
}

/// Captured output of one finished child process.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    /// The child's exit code; `None` when it was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Capability interface for invoking external tools. The classifier and aggregator cores
/// only ever see this trait, so tests can exercise them with canned alignment, summary,
/// and weight streams instead of spawning real binaries.
pub trait ToolRunner {
    /// Runs a program to completion, capturing stdout and stderr.
    /// # Arguments
    /// * `program` - the program name or resolved path
    /// * `args` - the full argument list
    /// * `working_dir` - optional working directory for the child
    /// # Errors
    /// * if the child cannot be spawned at all
    fn run(&self, program: &str, args: &[String], working_dir: Option<&Path>) -> std::io::Result<ToolOutput>;
}

/// The production `ToolRunner`, backed by blocking `std::process::Command` children.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, program: &str, args: &[String], working_dir: Option<&Path>) -> std::io::Result<ToolOutput> {
        trace!("Running `{} {}`", program, args.join(" "));
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        trace!("Finished running {}", program);
        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr
        })
    }
}

/// Converts a non-zero exit into an `ExternalToolError` with the captured stderr attached.
/// # Arguments
/// * `command_line` - the rendered command line, used in the error message
/// * `output` - the finished child's captured output
pub fn ensure_success(command_line: &str, output: &ToolOutput) -> Result<(), ExternalToolError> {
    if output.success() {
        Ok(())
    } else {
        Err(ExternalToolError::Failed {
            command: command_line.to_string(),
            code: output.exit_code.unwrap_or(-1),
            stderr: output.stderr_lossy()
        })
    }
}

/// Searches for an executable the way a shell would: a candidate containing a path
/// separator is checked directly, anything else is tried against every PATH entry in order.
/// # Arguments
/// * `name` - bare program name or an explicit path
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let full_path = dir.join(name);
        if is_executable(&full_path) {
            return Some(full_path);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.is_file() && path.metadata()
        .map(|metadata| metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Test stand-in for `SystemToolRunner`: a handler closure inspects the invocation,
    /// stages whatever files the real tool would have produced, and returns the canned
    /// process output. Invocations are recorded for assertions.
    pub struct FakeToolRunner {
        handler: Box<dyn Fn(&str, &[String], Option<&Path>) -> std::io::Result<ToolOutput>>,
        pub calls: RefCell<Vec<String>>
    }

    impl FakeToolRunner {
        pub fn new<F>(handler: F) -> FakeToolRunner
        where
            F: Fn(&str, &[String], Option<&Path>) -> std::io::Result<ToolOutput> + 'static
        {
            FakeToolRunner {
                handler: Box::new(handler),
                calls: RefCell::new(vec![])
            }
        }

        /// A successful, outputless process result.
        pub fn ok_output() -> ToolOutput {
            ToolOutput {
                exit_code: Some(0),
                stdout: vec![],
                stderr: vec![]
            }
        }

        /// A failed process result with the given stderr text.
        pub fn failed_output(stderr: &str) -> ToolOutput {
            ToolOutput {
                exit_code: Some(1),
                stdout: vec![],
                stderr: stderr.as_bytes().to_vec()
            }
        }
    }

    impl ToolRunner for FakeToolRunner {
        fn run(&self, program: &str, args: &[String], working_dir: Option<&Path>) -> std::io::Result<ToolOutput> {
            self.calls.borrow_mut().push(format!("{} {}", program, args.join(" ")));
            (self.handler)(program, args, working_dir)
        }
    }
}
