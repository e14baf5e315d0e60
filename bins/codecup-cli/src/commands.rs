// CLI commands for checking submissions and task files
use anyhow::{bail, Context, Result};
use codecup_common::tasks::{parse_task_records, TaskRecord, DEFAULT_TIME_LIMIT_SECONDS};
use codecup_common::types::SecurityVerdict;
use codecup_common::SecurityAnalyzer;
use std::fs;
use std::path::Path;

/// Dry-run view of one task entry
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub id: String,
    pub name: String,
    pub level: String,
    pub category: String,
    pub tags: Vec<String>,
    pub time_limit_seconds: u64,
    pub test_count: usize,
    pub hint_count: usize,
    pub excluded_modules: Vec<String>,
    /// Verdict on the task's reference solution under its own exclusions
    pub reference: SecurityVerdict,
    pub problem: Option<String>,
}

impl TaskSummary {
    pub fn is_valid(&self) -> bool {
        self.problem.is_none() && self.reference.accepted && self.test_count > 0
    }
}

/// Analyze one source file
pub fn check_file(file: &Path, exclude: &[String], json: bool) -> Result<()> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let verdict = SecurityAnalyzer::new()
        .with_excluded_modules(exclude)
        .check(&source);

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&file.display().to_string(), &verdict);
    }

    if !verdict.accepted {
        bail!("{} was rejected", file.display());
    }
    Ok(())
}

fn print_verdict(label: &str, verdict: &SecurityVerdict) {
    if verdict.accepted {
        println!("✅ {} accepted", label);
        if let Some(stats) = verdict.stats {
            println!(
                "   functions: {}, classes: {}, lines: {}",
                stats.functions, stats.classes, stats.lines
            );
        }
    } else {
        let category = verdict
            .category
            .map(|c| c.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        println!("❌ {} rejected [{}]", label, category);
        println!("   {}", verdict.message);
    }
}

pub fn summarize(record: &TaskRecord) -> TaskSummary {
    let task = record.to_task();
    let reference = SecurityAnalyzer::new()
        .with_excluded_modules(&record.exclude)
        .check(&record.code);

    TaskSummary {
        id: record.id(),
        name: record.name.clone(),
        level: record.level.clone(),
        category: record.category.clone(),
        tags: record.effective_tags(),
        time_limit_seconds: task.time_limit_seconds,
        test_count: task.hidden_tests.len(),
        hint_count: record.hints.len(),
        excluded_modules: record.exclude.clone(),
        reference,
        problem: record.validate().err().map(|e| e.to_string()),
    }
}

/// Parse and summarize every task in an import file
pub fn summarize_file(path: &Path) -> Result<Vec<TaskSummary>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let records = parse_task_records(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(records.iter().map(summarize).collect())
}

pub fn validate_tasks(path: &Path) -> Result<()> {
    println!("🔍 Validating {}...", path.display());
    let summaries = summarize_file(path)?;

    let mut seen = std::collections::HashSet::new();
    let mut invalid = 0;
    for summary in &summaries {
        let duplicate = !seen.insert(summary.id.clone());
        println!("\n📋 Task {}: {}", summary.id, summary.name);
        println!("   level: {}, category: {}", summary.level, summary.category);
        println!("   tags: {}", summary.tags.join(", "));
        let default_marker = if summary.time_limit_seconds == DEFAULT_TIME_LIMIT_SECONDS {
            " (default)"
        } else {
            ""
        };
        println!("   time limit: {}s{}", summary.time_limit_seconds, default_marker);
        println!("   tests: {}, hints: {}", summary.test_count, summary.hint_count);
        if !summary.excluded_modules.is_empty() {
            println!("   excluded modules: {}", summary.excluded_modules.join(", "));
        }

        if let Some(problem) = &summary.problem {
            println!("   ❌ {}", problem);
        }
        if summary.test_count == 0 {
            println!("   ❌ no hidden tests");
        }
        if duplicate {
            println!("   ❌ duplicate task id");
        }
        print_verdict("   reference solution", &summary.reference);

        if !summary.is_valid() || duplicate {
            invalid += 1;
        }
    }

    println!();
    if invalid > 0 {
        bail!("{} of {} task(s) invalid", invalid, summaries.len());
    }
    println!("✅ {} task(s) valid", summaries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecup_common::types::ViolationCategory;
    use std::io::Write;

    fn write_tasks(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const TASKS: &str = r#"[
        {
            "num": 1,
            "name": "Sum of two",
            "code": "def add(a, b):\n    return a + b\n",
            "task_text": "Return the sum of a and b.",
            "level": "junior",
            "category": "math",
            "tags": ["basics"],
            "time_limit": 3,
            "test_code": ["assert add(2, 3) == 5", "assert add(-1, 1) == 0"],
            "hints": {"1": "Use +"}
        },
        {
            "num": "2",
            "name": "Shuffle",
            "code": "import random\ndef shuffle(xs):\n    random.shuffle(xs)\n    return xs\n",
            "task_text": "Shuffle a list.",
            "test_code": ["assert sorted(shuffle([2, 1])) == [1, 2]"],
            "exclude": ["random"]
        }
    ]"#;

    #[test]
    fn test_summary_counts_and_defaults() {
        let file = write_tasks(TASKS);
        let summaries = summarize_file(file.path()).unwrap();
        assert_eq!(summaries.len(), 2);

        let first = &summaries[0];
        assert_eq!(first.id, "1");
        assert_eq!(first.test_count, 2);
        assert_eq!(first.hint_count, 1);
        assert_eq!(first.time_limit_seconds, 3);
        assert!(first.tags.contains(&"math".to_string()));
        assert!(first.tags.contains(&"junior".to_string()));
        assert!(first.is_valid());

        let second = &summaries[1];
        assert_eq!(second.time_limit_seconds, DEFAULT_TIME_LIMIT_SECONDS);
        assert_eq!(second.excluded_modules, vec!["random".to_string()]);
    }

    #[test]
    fn test_reference_solution_checked_against_exclusions() {
        let file = write_tasks(TASKS);
        let summaries = summarize_file(file.path()).unwrap();

        let second = &summaries[1];
        assert!(!second.reference.accepted);
        assert_eq!(
            second.reference.category,
            Some(ViolationCategory::ForbiddenImport)
        );
        assert!(!second.is_valid());
        assert!(validate_tasks(file.path()).is_err());
    }

    #[test]
    fn test_missing_required_field_is_reported() {
        let file = write_tasks(r#"{"num": 5, "name": "No text", "code": "x = 1", "test_code": ["assert x == 1"]}"#);
        let summaries = summarize_file(file.path()).unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].problem.as_deref().unwrap().contains("task_text"));
        assert!(!summaries[0].is_valid());
    }

    #[test]
    fn test_valid_file_passes() {
        let file = write_tasks(
            r#"{"num": 1, "name": "One", "code": "def one():\n    return 1\n", "task_text": "Return 1.", "test_code": ["assert one() == 1"]}"#,
        );
        assert!(validate_tasks(file.path()).is_ok());
    }

    #[test]
    fn test_check_file_rejects_forbidden_call() {
        let file = write_tasks("eval('1 + 1')\n");
        assert!(check_file(file.path(), &[], false).is_err());

        let file = write_tasks("import math\nprint(math.pi)\n");
        assert!(check_file(file.path(), &[], true).is_ok());
        assert!(check_file(file.path(), &["math".to_string()], false).is_err());
    }
}
