//! Stage descriptors
//!
//! Every external invocation is an explicit value: executable name plus a
//! typed argument list, with the input and output artifacts declared up
//! front so the pipeline can check pre- and postconditions uniformly. All
//! process-launch mechanics live in the runner, which keeps stages testable
//! with a fake.

use std::path::{Path, PathBuf};

/// One argument of a stage invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageArg {
    /// A bare flag, e.g. `-nc`
    Flag(String),
    /// A flag with a value, e.g. `-thresh 100`
    Value(String, String),
    /// A flag with a file path, e.g. `-fel filled.tif`
    Path(String, PathBuf),
}

/// A named unit of external work.
///
/// Constructed when the pipeline is configured, executed at most once per
/// run, never retried automatically.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Stage name, used in diagnostics and state reporting
    pub name: String,
    /// Executable name (resolved by the runner)
    pub executable: String,
    /// Argument template
    pub args: Vec<StageArg>,
    /// Artifacts that must exist and be non-empty before execution
    pub inputs: Vec<PathBuf>,
    /// Artifacts that must exist and be non-empty after success
    pub outputs: Vec<PathBuf>,
    /// Worker processes for multi-process stage execution (1 = plain launch)
    pub processes: usize,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            processes: 1,
        }
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.args.push(StageArg::Flag(flag.into()));
        self
    }

    pub fn value(mut self, flag: impl Into<String>, value: impl ToString) -> Self {
        self.args
            .push(StageArg::Value(flag.into(), value.to_string()));
        self
    }

    /// Declare an input artifact passed via a flag.
    pub fn input(mut self, flag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.args.push(StageArg::Path(flag.into(), path.clone()));
        self.inputs.push(path);
        self
    }

    /// Declare an output artifact passed via a flag.
    pub fn output(mut self, flag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.args.push(StageArg::Path(flag.into(), path.clone()));
        self.outputs.push(path);
        self
    }

    pub fn processes(mut self, processes: usize) -> Self {
        self.processes = processes;
        self
    }

    /// Flatten the argument template into command-line tokens.
    pub fn command_args(&self) -> Vec<String> {
        let mut tokens = Vec::new();
        for arg in &self.args {
            match arg {
                StageArg::Flag(f) => tokens.push(f.clone()),
                StageArg::Value(f, v) => {
                    tokens.push(f.clone());
                    tokens.push(v.clone());
                }
                StageArg::Path(f, p) => {
                    tokens.push(f.clone());
                    tokens.push(p.display().to_string());
                }
            }
        }
        tokens
    }

    /// Look up the path bound to a flag, for runners that re-interpret the
    /// template instead of launching a process.
    pub fn path_arg(&self, flag: &str) -> Option<&Path> {
        self.args.iter().find_map(|arg| match arg {
            StageArg::Path(f, p) if f == flag => Some(p.as_path()),
            _ => None,
        })
    }

    /// Look up the value bound to a flag.
    pub fn value_arg(&self, flag: &str) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            StageArg::Value(f, v) if f == flag => Some(v.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_ordering() {
        let stage = StageSpec::new("threshold", "threshold")
            .input("-ssa", "/tmp/acc.tif")
            .value("-thresh", 100.0)
            .output("-src", "/tmp/src.tif");

        assert_eq!(
            stage.command_args(),
            vec!["-ssa", "/tmp/acc.tif", "-thresh", "100", "-src", "/tmp/src.tif"]
        );
        assert_eq!(stage.inputs, vec![PathBuf::from("/tmp/acc.tif")]);
        assert_eq!(stage.outputs, vec![PathBuf::from("/tmp/src.tif")]);
    }

    #[test]
    fn test_arg_lookup() {
        let stage = StageSpec::new("pitremove", "pitremove")
            .input("-z", "/tmp/dem.tif")
            .output("-fel", "/tmp/fel.tif")
            .value("-thresh", 42);

        assert_eq!(stage.path_arg("-z"), Some(Path::new("/tmp/dem.tif")));
        assert_eq!(stage.path_arg("-missing"), None);
        assert_eq!(stage.value_arg("-thresh"), Some("42"));
    }
}
