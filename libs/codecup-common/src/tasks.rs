// Task definitions as seen by the grading pipeline.
// Task storage itself lives elsewhere; this module only reads the import file format.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Wall-clock budget for a task that does not declare one
pub const DEFAULT_TIME_LIMIT_SECONDS: u64 = 10;

/// One hidden assertion of a task. Never leaves the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenTestCase {
    /// 1-based position in the task's test list
    pub ordinal: u32,
    pub fragment: String,
}

impl HiddenTestCase {
    pub fn name(&self) -> String {
        format!("test_{}", self.ordinal)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub time_limit_seconds: u64,
    pub hidden_tests: Vec<HiddenTestCase>,
    /// Extra modules forbidden for this task only
    pub excluded_modules: Vec<String>,
}

impl Task {
    pub fn hidden_fragments(&self) -> impl Iterator<Item = &str> {
        self.hidden_tests.iter().map(|t| t.fragment.as_str())
    }
}

/// Read-only source of task definitions
pub trait TaskProvider: Send + Sync {
    fn task(&self, task_id: &str) -> Option<Task>;
}

/// Task entry in the import file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub num: serde_json::Value,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub task_text: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub time_limit: Option<u64>,
    #[serde(default)]
    pub test_code: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub hints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_level() -> String {
    "junior".to_string()
}

fn default_category() -> String {
    "algorithm".to_string()
}

impl TaskRecord {
    /// Task id: the `num` field rendered as text ("7" and 7 are the same task)
    pub fn id(&self) -> String {
        match &self.num {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Required fields must be present and non-empty
    pub fn validate(&self) -> Result<(), TaskError> {
        let id = self.id();
        let missing = if id.is_empty() || self.num.is_null() {
            Some("num")
        } else if self.name.trim().is_empty() {
            Some("name")
        } else if self.code.trim().is_empty() {
            Some("code")
        } else if self.task_text.trim().is_empty() {
            Some("task_text")
        } else {
            None
        };

        match missing {
            Some(field) => Err(TaskError::Invalid {
                task: if id.is_empty() { self.name.clone() } else { id },
                reason: format!("missing required field '{}'", field),
            }),
            None => Ok(()),
        }
    }

    /// Tags with level and category folded in, deduplicated
    pub fn effective_tags(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        for extra in [&self.level, &self.category] {
            if !tags.contains(extra) {
                tags.push(extra.clone());
            }
        }
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn to_task(&self) -> Task {
        Task {
            id: self.id(),
            name: self.name.clone(),
            time_limit_seconds: self
                .time_limit
                .filter(|limit| *limit > 0)
                .unwrap_or(DEFAULT_TIME_LIMIT_SECONDS),
            hidden_tests: self
                .test_code
                .iter()
                .enumerate()
                .map(|(idx, fragment)| HiddenTestCase {
                    ordinal: (idx + 1) as u32,
                    fragment: fragment.clone(),
                })
                .collect(),
            excluded_modules: self.exclude.clone(),
        }
    }
}

/// The import file holds either one task object or an array of them
pub fn parse_task_records(content: &str) -> Result<Vec<TaskRecord>, TaskError> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    match value {
        serde_json::Value::Array(_) => Ok(serde_json::from_value(value)?),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
        _ => Err(TaskError::Format(
            "expected a task object or an array of tasks".to_string(),
        )),
    }
}

/// Task provider backed by a JSON import file loaded once at start-up
#[derive(Debug, Clone, Default)]
pub struct JsonTaskProvider {
    tasks: HashMap<String, Task>,
}

impl JsonTaskProvider {
    pub fn load(path: &Path) -> Result<Self, TaskError> {
        let content = fs::read_to_string(path).map_err(|source| TaskError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, TaskError> {
        let records = parse_task_records(content)?;
        let mut tasks = HashMap::new();
        for record in records {
            record.validate()?;
            let task = record.to_task();
            tasks.insert(task.id.clone(), task);
        }
        Ok(Self { tasks })
    }

    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl TaskProvider for JsonTaskProvider {
    fn task(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TASKS: &str = r#"[
        {
            "num": 1,
            "name": "Sum of two",
            "code": "def add(a, b):\n    pass",
            "task_text": "Return a + b",
            "time_limit": 2,
            "test_code": ["assert add(2, 3) == 5", "assert add(-1, 1) == 0"],
            "exclude": ["math"]
        },
        {
            "num": "strings-1",
            "name": "Reverse",
            "code": "def rev(s):\n    pass",
            "task_text": "Reverse a string",
            "test_code": ["assert rev('ab') == 'ba'"],
            "tags": ["strings", "junior"]
        }
    ]"#;

    #[test]
    fn test_load_tasks_from_array() {
        let provider = JsonTaskProvider::from_json(TASKS).unwrap();
        assert_eq!(provider.len(), 2);

        let task = provider.task("1").unwrap();
        assert_eq!(task.time_limit_seconds, 2);
        assert_eq!(task.hidden_tests.len(), 2);
        assert_eq!(task.hidden_tests[1].ordinal, 2);
        assert_eq!(task.hidden_tests[1].name(), "test_2");
        assert_eq!(task.excluded_modules, vec!["math".to_string()]);

        let task = provider.task("strings-1").unwrap();
        assert_eq!(task.time_limit_seconds, DEFAULT_TIME_LIMIT_SECONDS);
        assert!(provider.task("missing").is_none());
    }

    #[test]
    fn test_single_object_is_accepted() {
        let records = parse_task_records(
            r#"{"num": 3, "name": "x", "code": "pass", "task_text": "t"}"#,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id(), "3");
        assert_eq!(records[0].level, "junior");
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(matches!(
            parse_task_records("42"),
            Err(TaskError::Format(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let records =
            parse_task_records(r#"{"num": 3, "name": "x", "code": "pass"}"#).unwrap();
        let err = records[0].validate().unwrap_err();
        assert!(err.to_string().contains("task_text"));
    }

    #[test]
    fn test_effective_tags() {
        let records = parse_task_records(TASKS).unwrap();
        assert_eq!(
            records[1].effective_tags(),
            vec!["algorithm".to_string(), "junior".to_string(), "strings".to_string()]
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TASKS.as_bytes()).unwrap();

        let provider = JsonTaskProvider::load(file.path()).unwrap();
        assert!(!provider.is_empty());

        let missing = JsonTaskProvider::load(Path::new("/nonexistent/tasks.json"));
        assert!(matches!(missing, Err(TaskError::Io { .. })));
    }
}
