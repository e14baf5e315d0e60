/// Test Harness Builder
///
/// **Core Responsibility:**
/// Turn a task's hidden assertion fragments into one zero-argument
/// function per case, named by ordinal, so each case runs and fails
/// independently of the others.
///
/// Fragments are dedented first, then indented one level under the
/// wrapper's `def`. An empty fragment becomes `pass` and therefore passes.

use crate::sandbox::{ProgramCase, SandboxProgram};
use codecup_common::tasks::{HiddenTestCase, Task};

const INDENT: &str = "    ";

pub fn case_function_name(case: &HiddenTestCase) -> String {
    format!("_codecup_case_{}", case.ordinal)
}

pub fn wrap_case(case: &HiddenTestCase) -> ProgramCase {
    let function = case_function_name(case);
    let mut source = format!("def {}():\n", function);

    let body = dedent(&case.fragment);
    if body.trim().is_empty() {
        source.push_str(INDENT);
        source.push_str("pass\n");
    } else {
        for line in body.lines() {
            if !line.trim().is_empty() {
                source.push_str(INDENT);
                source.push_str(line);
            }
            source.push('\n');
        }
    }

    ProgramCase {
        name: case.name(),
        function,
        source,
    }
}

/// Full program for grading `code` against `task`
pub fn materialize(code: &str, task: &Task, max_output_chars: usize) -> SandboxProgram {
    SandboxProgram::new(code, max_output_chars)
        .with_cases(task.hidden_tests.iter().map(wrap_case).collect())
}

/// Strip the indentation common to all non-blank lines
fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|line| if line.trim().is_empty() { "" } else { &line[margin..] })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(ordinal: u32, fragment: &str) -> HiddenTestCase {
        HiddenTestCase {
            ordinal,
            fragment: fragment.to_string(),
        }
    }

    #[test]
    fn test_single_assertion_is_wrapped() {
        let wrapped = wrap_case(&case(1, "assert add(2, 3) == 5"));
        assert_eq!(wrapped.name, "test_1");
        assert_eq!(wrapped.function, "_codecup_case_1");
        assert_eq!(wrapped.source, "def _codecup_case_1():\n    assert add(2, 3) == 5\n");
    }

    #[test]
    fn test_multiline_fragment_keeps_relative_indent() {
        let fragment = "    for i in range(3):\n        assert add(i, 0) == i\n";
        let wrapped = wrap_case(&case(2, fragment));
        assert_eq!(
            wrapped.source,
            "def _codecup_case_2():\n    for i in range(3):\n        assert add(i, 0) == i\n"
        );
    }

    #[test]
    fn test_blank_lines_are_not_indented() {
        let wrapped = wrap_case(&case(3, "x = 1\n\nassert x == 1"));
        assert_eq!(wrapped.source, "def _codecup_case_3():\n    x = 1\n\n    assert x == 1\n");
    }

    #[test]
    fn test_empty_fragment_becomes_pass() {
        let wrapped = wrap_case(&case(4, "   \n"));
        assert_eq!(wrapped.source, "def _codecup_case_4():\n    pass\n");
    }

    #[test]
    fn test_materialize_preserves_case_order() {
        let task = Task {
            id: "1".to_string(),
            name: "Sum".to_string(),
            time_limit_seconds: 5,
            hidden_tests: vec![case(1, "assert True"), case(2, "assert False")],
            excluded_modules: Vec::new(),
        };

        let program = materialize("def add(a, b): return a + b", &task, 100);
        let names: Vec<_> = program.cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["test_1", "test_2"]);
        assert_eq!(program.max_output_chars, 100);
    }
}
