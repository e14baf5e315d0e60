/// Result Formatter
///
/// **Core Responsibility:**
/// Last pass over a JobResult before it leaves the worker. Every free-text
/// field (overall message, submission output, per-case messages) is:
/// 1. stripped of traceback lines
/// 2. redacted of any hidden test fragment text
/// 3. scrubbed of host temporary-directory paths
/// 4. truncated to a fixed length

use codecup_common::tasks::Task;
use codecup_common::types::JobResult;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

pub const REDACTED: &str = "[hidden]";
pub const PATH_PLACEHOLDER: &str = "<sandbox>";
pub const TRUNCATION_SUFFIX: &str = "... [truncated]";

lazy_static! {
    static ref TEMP_PATH: Regex = Regex::new(
        r#"(?:/private)?(?:/var/folders|/var/tmp|/tmp)(?:/[^\s'",:)]*)?|codecup-run-[A-Za-z0-9_]+"#
    )
    .expect("valid temp path pattern");
    static ref TRACEBACK_LINE: Regex =
        Regex::new(r#"^(?:Traceback \(most recent call last\):|\s+File ".*", line \d+)"#)
            .expect("valid traceback pattern");
}

#[derive(Debug, Clone)]
pub struct ResultFormatter {
    max_message_chars: usize,
    max_output_chars: usize,
    extra_roots: Vec<Regex>,
}

impl ResultFormatter {
    pub fn new(max_message_chars: usize, max_output_chars: usize) -> Self {
        Self {
            max_message_chars,
            max_output_chars,
            extra_roots: Vec::new(),
        }
    }

    /// Also scrub a configured workspace root that lives outside the temp dirs
    pub fn with_scrubbed_root(mut self, root: &Path) -> Self {
        let root = root.display().to_string();
        if !root.is_empty() {
            if let Ok(pattern) = Regex::new(&format!(r#"{}(?:/[^\s'",:)]*)?"#, regex::escape(&root))) {
                self.extra_roots.push(pattern);
            }
        }
        self
    }

    pub fn format(&self, mut result: JobResult, task: &Task) -> JobResult {
        let secrets = hidden_secrets(task);

        result.message = result
            .message
            .map(|m| self.clean(&m, &secrets, self.max_message_chars));
        result.output = result
            .output
            .map(|o| self.clean(&o, &secrets, self.max_output_chars))
            .filter(|o| !o.is_empty());
        for detail in &mut result.test_details {
            detail.message = self.clean(&detail.message, &secrets, self.max_message_chars);
        }
        result
    }

    fn clean(&self, text: &str, secrets: &[String], limit: usize) -> String {
        let mut text = strip_traceback(text);
        for secret in secrets {
            if text.contains(secret.as_str()) {
                text = text.replace(secret.as_str(), REDACTED);
            }
        }
        text = self.scrub_paths(&text);
        truncate(&text, limit)
    }

    pub fn scrub_paths(&self, text: &str) -> String {
        let mut scrubbed = text.to_string();
        for root in &self.extra_roots {
            scrubbed = root.replace_all(&scrubbed, PATH_PLACEHOLDER).into_owned();
        }
        TEMP_PATH.replace_all(&scrubbed, PATH_PLACEHOLDER).into_owned()
    }
}

/// Fragment texts to redact, longest first so a whole fragment wins over
/// any of its lines
fn hidden_secrets(task: &Task) -> Vec<String> {
    let mut secrets: Vec<String> = Vec::new();
    for fragment in task.hidden_fragments() {
        let whole = fragment.trim();
        if !whole.is_empty() {
            secrets.push(whole.to_string());
        }
        for line in fragment.lines().map(str::trim).filter(|l| !l.is_empty()) {
            secrets.push(line.to_string());
        }
    }
    secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    secrets.dedup();
    secrets
}

fn strip_traceback(text: &str) -> String {
    if !text.lines().any(|line| TRACEBACK_LINE.is_match(line)) {
        return text.to_string();
    }
    let mut kept: Vec<&str> = Vec::new();
    let mut skip_source_line = false;
    for line in text.lines() {
        if TRACEBACK_LINE.is_match(line) {
            skip_source_line = line.trim_start().starts_with("File ");
            continue;
        }
        // the indented source echo that follows a `File` line
        if skip_source_line && line.starts_with("    ") {
            skip_source_line = false;
            continue;
        }
        skip_source_line = false;
        kept.push(line);
    }
    kept.join("\n")
}

pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit).collect();
    truncated.push_str(TRUNCATION_SUFFIX);
    truncated
}
