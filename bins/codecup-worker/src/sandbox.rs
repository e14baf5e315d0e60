/// Sandbox Program - what runs inside the isolated interpreter
///
/// **Core Responsibility:**
/// Describe one grading run as a JSON manifest (submitted code, wrapped
/// hidden cases, allow-lists, output cap) and read back the single report
/// line the bootstrap writes on its real stdout.
///
/// **Inside the child:**
/// - builtins are replaced by an explicit allow-list
/// - `import` only resolves modules from `ALLOWED_MODULES`
/// - `print` writes to a bounded in-memory buffer
/// - the submitted code runs first, then each case function in order
/// - output printed while cases run is discarded
/// - everything reachable from the namespace (print, import, module
///   views) is built in a helper namespace with no path back to the
///   bootstrap's own `os` / `sys`
/// - the report line carries a per-run token the submission never sees
///
/// The bootstrap is plain Python so both engines can run it unchanged:
/// the process engine passes the manifest path as argv[1], the Docker
/// engine passes it base64-encoded in `PROGRAM_ENV`.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use codecup_common::types::ExecutionReport;
use serde::Serialize;

pub const BOOTSTRAP: &str = include_str!("bootstrap.py");

/// Prefix of the report line, followed by the run's token and `:`;
/// anything else on stdout is ignored
pub const REPORT_MARKER: &str = "@@CODECUP_REPORT@@";

pub const PROGRAM_ENV: &str = "CODECUP_PROGRAM";

/// Characters of load-phase output kept when nothing else is configured
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 10_000;

pub const ALLOWED_BUILTINS: &[&str] = &[
    "__build_class__",
    "abs",
    "all",
    "any",
    "ascii",
    "bin",
    "bool",
    "bytearray",
    "bytes",
    "callable",
    "chr",
    "classmethod",
    "complex",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "frozenset",
    "hasattr",
    "hash",
    "hex",
    "id",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "object",
    "oct",
    "ord",
    "pow",
    "property",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "slice",
    "sorted",
    "staticmethod",
    "str",
    "sum",
    "super",
    "tuple",
    "type",
    "zip",
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "Exception",
    "IndexError",
    "KeyError",
    "LookupError",
    "NameError",
    "NotImplemented",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

pub const ALLOWED_MODULES: &[&str] = &[
    "bisect",
    "collections",
    "copy",
    "datetime",
    "decimal",
    "fractions",
    "functools",
    "heapq",
    "itertools",
    "json",
    "math",
    "operator",
    "random",
    "re",
    "statistics",
    "string",
    "time",
    "typing",
];

/// A hidden case wrapped in its own zero-argument function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramCase {
    pub name: String,
    pub function: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SandboxProgram {
    pub solution: String,
    pub cases: Vec<ProgramCase>,
    pub allowed_builtins: Vec<&'static str>,
    pub allowed_modules: Vec<&'static str>,
    pub max_output_chars: usize,
    /// Per-run secret the bootstrap removes from the manifest before any
    /// submitted code runs
    pub report_token: String,
}

impl SandboxProgram {
    /// Program that only runs `solution`, with no hidden cases
    pub fn new(solution: impl Into<String>, max_output_chars: usize) -> Self {
        Self {
            solution: solution.into(),
            cases: Vec::new(),
            allowed_builtins: ALLOWED_BUILTINS.to_vec(),
            allowed_modules: ALLOWED_MODULES.to_vec(),
            max_output_chars,
            report_token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn with_cases(mut self, cases: Vec<ProgramCase>) -> Self {
        self.cases = cases;
        self
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize sandbox program")
    }

    /// Manifest for transport through an environment variable
    pub fn encoded(&self) -> Result<String> {
        Ok(general_purpose::STANDARD.encode(self.to_json()?))
    }
}

/// Find the report line carrying `token` in the child's stdout.
/// `None` when the child died before writing it or wrote garbage.
pub fn parse_report(stdout: &str, token: &str) -> Option<ExecutionReport> {
    let prefix = format!("{}{}:", REPORT_MARKER, token);
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .and_then(|payload| serde_json::from_str(payload).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_builtins_are_not_allowed() {
        for name in ["open", "eval", "exec", "compile", "__import__", "input", "globals", "getattr"] {
            assert!(!ALLOWED_BUILTINS.contains(&name), "{} must not be allowed", name);
        }
    }

    #[test]
    fn test_allowed_modules_exclude_system_access() {
        for name in ["os", "sys", "subprocess", "socket", "importlib"] {
            assert!(!ALLOWED_MODULES.contains(&name));
        }
        assert!(ALLOWED_MODULES.contains(&"math"));
    }

    #[test]
    fn test_program_manifest_shape() {
        let program = SandboxProgram::new("x = 1", 100).with_cases(vec![ProgramCase {
            name: "test_1".to_string(),
            function: "_codecup_case_1".to_string(),
            source: "def _codecup_case_1():\n    assert x == 1\n".to_string(),
        }]);

        let value: serde_json::Value = serde_json::from_slice(&program.to_json().unwrap()).unwrap();
        assert_eq!(value["solution"], "x = 1");
        assert_eq!(value["cases"][0]["function"], "_codecup_case_1");
        assert_eq!(value["max_output_chars"], 100);
        assert!(value["allowed_modules"].as_array().unwrap().len() > 1);

        let decoded = general_purpose::STANDARD.decode(program.encoded().unwrap()).unwrap();
        assert_eq!(decoded, program.to_json().unwrap());
    }

    #[test]
    fn test_parse_report_ignores_noise() {
        let stdout = format!(
            "stray line\n{}tok:{}\n",
            REPORT_MARKER,
            r#"{"success": true, "stdout": "hi\n", "duration_ms": 1.5, "error": null, "cases": [{"name": "test_1", "passed": true, "error": null}]}"#
        );
        let report = parse_report(&stdout, "tok").unwrap();
        assert!(report.success);
        assert_eq!(report.stdout, "hi\n");
        assert_eq!(report.cases.len(), 1);
        assert!(report.cases[0].passed);
    }

    #[test]
    fn test_parse_report_missing_or_corrupt() {
        assert!(parse_report("", "tok").is_none());
        assert!(parse_report("Segmentation fault\n", "tok").is_none());
        assert!(parse_report(&format!("{}tok:{{not json", REPORT_MARKER), "tok").is_none());
    }

    #[test]
    fn test_report_without_run_token_is_ignored() {
        let forged = r#"{"success": true, "stdout": "", "duration_ms": 0.0, "error": null, "cases": [{"name": "test_1", "passed": true, "error": null}]}"#;
        let stdout = format!("{}{}\n{}guess:{}\n", REPORT_MARKER, forged, REPORT_MARKER, forged);
        assert!(parse_report(&stdout, "tok").is_none());
    }

    #[test]
    fn test_every_program_gets_its_own_token() {
        let first = SandboxProgram::new("x = 1", 10);
        let second = SandboxProgram::new("x = 1", 10);
        assert_eq!(first.report_token.len(), 32);
        assert_ne!(first.report_token, second.report_token);

        let value: serde_json::Value = serde_json::from_slice(&first.to_json().unwrap()).unwrap();
        assert_eq!(value["report_token"], first.report_token.as_str());
    }

    #[test]
    fn test_bootstrap_uses_same_marker_and_env() {
        assert!(BOOTSTRAP.contains(REPORT_MARKER));
        assert!(BOOTSTRAP.contains(PROGRAM_ENV));
        assert!(BOOTSTRAP.contains("report_token"));
    }
}
