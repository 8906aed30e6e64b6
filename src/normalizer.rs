//! Record normalization
//!
//! Discovers usage-shaped JSONL files under configured root directories and
//! parses them into canonical [`UsageRecord`]s. The logs come from several
//! historical schema generations, so extraction is duck-typed over
//! `serde_json::Value`: for each field an ordered list of probes is tried in
//! priority order and the first hit wins.
//!
//! Recognized line shapes, in order of precedence:
//!
//! 1. Nested `message.model` / `message.usage` (the primary schema)
//! 2. Top-level `usage` object, with standard or alternate field names
//!    (`input_tokens`|`prompt_tokens`, `output_tokens`|`completion_tokens`, ...)
//! 3. Flat top-level token fields
//!
//! Everything here is tolerant: a malformed line is skipped and logged, a
//! non-usage file is skipped after a short probe, an unreadable directory is
//! skipped with a warning. Normalization never fails past the caller for
//! partially unavailable data - it returns whatever could be extracted.

use crate::models::UsageRecord;
use crate::timestamp::TimestampParser;
use chrono::{DateTime, Utc};
use glob::glob;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Timestamp field candidates, tried in order.
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "created_at", "time"];

/// Top-level model field candidates, tried after `message.model`.
const MODEL_FIELDS: &[&str] = &["model", "model_name"];

/// Session id field candidates, tried after `sessionId`.
const SESSION_FIELDS: &[&str] = &["session_id", "conversation_id", "thread_id", "id"];

/// Fields whose presence marks a line as usage-shaped during the file probe.
const USAGE_INDICATORS: &[&str] = &[
    "usage",
    "model",
    "tokens",
    "input_tokens",
    "output_tokens",
    "created_at",
    "timestamp",
];

/// Token fields recognized inside a `usage` sub-object during the file probe.
const USAGE_TOKEN_FIELDS: &[&str] = &[
    "input_tokens",
    "output_tokens",
    "cache_creation_tokens",
    "cache_read_tokens",
    "cache_creation_input_tokens",
    "cache_read_input_tokens",
];

/// A project seen in the normalized data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default)]
struct TokenCounts {
    input: u64,
    output: u64,
    cache_creation: u64,
    cache_read: u64,
}

/// Loads and normalizes usage records from JSONL logs.
///
/// The full normalized, timestamp-sorted record sequence is computed once and
/// cached on the instance; [`RecordNormalizer::reload`] or
/// [`RecordNormalizer::clear_cache`] are the only ways to trigger a re-scan.
/// Callers invoking reload from multiple contexts must serialize those calls;
/// the normalizer itself takes `&mut self` and holds no internal locking.
pub struct RecordNormalizer {
    data_paths: Vec<PathBuf>,
    cache: Option<Vec<UsageRecord>>,
}

impl RecordNormalizer {
    pub fn new(data_paths: Vec<PathBuf>) -> Self {
        Self {
            data_paths,
            cache: None,
        }
    }

    /// Construct against the default log roots (see [`default_data_paths`]).
    pub fn with_default_paths() -> Self {
        Self::new(default_data_paths())
    }

    /// Recursively enumerate `*.jsonl` files under the configured roots,
    /// keeping only files whose leading lines look like usage data.
    pub fn discover_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for data_path in &self.data_paths {
            if !data_path.exists() {
                warn!(path = %data_path.display(), "Data path does not exist");
                continue;
            }

            let pattern = data_path.join("**").join("*.jsonl");
            let candidates = match glob(&pattern.to_string_lossy()) {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(path = %data_path.display(), error = %e, "Error scanning directory");
                    continue;
                }
            };

            let mut seen = 0usize;
            for entry in candidates.flatten() {
                seen += 1;
                if is_usage_file(&entry) {
                    files.push(entry);
                }
            }
            info!(path = %data_path.display(), jsonl_files = seen, "Scanned data path");
        }

        info!(usage_files = files.len(), "Discovered usage data files");
        files
    }

    /// All normalized records across all discovered files, sorted by
    /// timestamp. Computed once and cached; subsequent calls are free.
    pub fn load_records(&mut self) -> &[UsageRecord] {
        if self.cache.is_none() {
            info!("Loading usage data");

            let mut all_records = Vec::new();
            for file_path in self.discover_files() {
                let records = parse_jsonl_file(&file_path);
                debug!(file = %file_path.display(), records = records.len(), "Parsed file");
                all_records.extend(records);
            }

            all_records.sort_by_key(|r| r.timestamp);
            info!(records = all_records.len(), "Loaded usage records");
            self.cache = Some(all_records);
        }

        self.cache.as_deref().unwrap_or(&[])
    }

    /// Drop the cache and re-scan the filesystem.
    pub fn reload(&mut self) -> &[UsageRecord] {
        self.cache = None;
        self.load_records()
    }

    /// Drop the cached record sequence so the next load re-scans.
    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// Filter the cached records by inclusive date range, project ids, and
    /// model names. `None` criteria are ignored.
    pub fn filter_records(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        project_ids: Option<&[String]>,
        models: Option<&[String]>,
    ) -> Vec<UsageRecord> {
        self.load_records()
            .iter()
            .filter(|r| start.map_or(true, |s| r.timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.timestamp <= e))
            .filter(|r| {
                project_ids.map_or(true, |ids| {
                    r.project_id.as_ref().is_some_and(|id| ids.contains(id))
                })
            })
            .filter(|r| models.map_or(true, |ms| ms.contains(&r.model)))
            .cloned()
            .collect()
    }

    /// Distinct projects seen in the data, keyed by project id.
    pub fn projects(&mut self) -> Vec<Project> {
        let mut projects: HashMap<String, Project> = HashMap::new();

        for record in self.load_records() {
            if let Some(id) = &record.project_id {
                projects.entry(id.clone()).or_insert_with(|| Project {
                    id: id.clone(),
                    name: record.project_name.clone().unwrap_or_else(|| id.clone()),
                });
            }
        }

        let mut list: Vec<Project> = projects.into_values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Sorted unique model names seen in the data.
    pub fn models(&mut self) -> Vec<String> {
        let mut models: Vec<String> = self
            .load_records()
            .iter()
            .map(|r| r.model.clone())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    /// Earliest and latest record timestamps, or None when no data exists.
    pub fn date_range(&mut self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let records = self.load_records();
        // Records are sorted by timestamp after loading
        match (records.first(), records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

/// Default log roots: `$CLAUDE_CONFIG_DIR/projects` when set, then
/// `~/.claude/projects`. Only existing directories are returned.
pub fn default_data_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(config_dir) = std::env::var("CLAUDE_CONFIG_DIR") {
        paths.push(PathBuf::from(config_dir).join("projects"));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".claude").join("projects"));
    }

    paths.retain(|p| p.exists());
    paths
}

/// Probe a file's first 3 non-empty lines for usage-shaped JSON. Files that
/// fail the probe are skipped entirely, never partially read.
fn is_usage_file(file_path: &Path) -> bool {
    let file = match File::open(file_path) {
        Ok(f) => f,
        Err(e) => {
            debug!(file = %file_path.display(), error = %e, "Error probing file");
            return false;
        }
    };

    let mut checked = 0;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { return false };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if checked >= 3 {
            break;
        }
        checked += 1;

        if let Ok(data) = serde_json::from_str::<Value>(line) {
            if data.is_object() && has_usage_fields(&data) {
                return true;
            }
        }
    }

    false
}

fn has_usage_fields(data: &Value) -> bool {
    if let Some(usage) = data.get("usage").and_then(Value::as_object) {
        return USAGE_TOKEN_FIELDS.iter().any(|f| usage.contains_key(*f));
    }

    // The nested message shape always carries a top-level timestamp, which
    // the indicator list catches.
    USAGE_INDICATORS.iter().any(|f| data.get(*f).is_some())
}

/// Parse one JSONL file. Each line is handled independently: invalid JSON or
/// failed field extraction skips the line, never the file.
fn parse_jsonl_file(file_path: &Path) -> Vec<UsageRecord> {
    let file = match File::open(file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!(file = %file_path.display(), error = %e, "Error opening file");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line_number = idx + 1;
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(file = %file_path.display(), line = line_number, error = %e, "Error reading line");
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Value>(line) {
            Ok(data) => {
                if let Some(record) = parse_usage_record(&data, file_path) {
                    records.push(record);
                } else {
                    debug!(file = %file_path.display(), line = line_number, "Skipped non-usage line");
                }
            }
            Err(e) => {
                warn!(file = %file_path.display(), line = line_number, error = %e, "Invalid JSON");
            }
        }
    }

    records
}

/// Extract a canonical record from one parsed line. Returns None when the
/// timestamp or the model cannot be extracted; missing token counts default
/// to zero and never reject the record.
fn parse_usage_record(data: &Value, file_path: &Path) -> Option<UsageRecord> {
    let timestamp = extract_timestamp(data)?;
    let model = extract_model(data)?;
    let tokens = extract_tokens(data);
    let (project_id, project_name) = extract_project_info(data, file_path);

    Some(UsageRecord {
        timestamp,
        session_id: extract_session_id(data),
        model,
        input_tokens: tokens.input,
        output_tokens: tokens.output,
        cache_creation_tokens: tokens.cache_creation,
        cache_read_tokens: tokens.cache_read,
        project_id,
        project_name,
        message_id: string_field(data, &["id"]),
        conversation_id: string_field(data, &["conversation_id"]),
    })
}

fn extract_timestamp(data: &Value) -> Option<DateTime<Utc>> {
    for field in TIMESTAMP_FIELDS {
        let parsed = match data.get(*field) {
            Some(Value::String(s)) => TimestampParser::parse(s).ok(),
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(|v| TimestampParser::parse_epoch_seconds(v).ok()),
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }
    None
}

fn extract_model(data: &Value) -> Option<String> {
    // message.model first (primary schema)
    if let Some(model) = data
        .pointer("/message/model")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return Some(model.to_string());
    }

    string_field(data, MODEL_FIELDS)
}

fn extract_tokens(data: &Value) -> TokenCounts {
    // message.usage first (primary schema)
    if let Some(usage) = data.pointer("/message/usage").filter(|u| u.is_object()) {
        return TokenCounts {
            input: token_field(usage, &["input_tokens"]),
            output: token_field(usage, &["output_tokens"]),
            cache_creation: token_field(
                usage,
                &["cache_creation_input_tokens", "cache_creation_tokens"],
            ),
            cache_read: token_field(usage, &["cache_read_input_tokens", "cache_read_tokens"]),
        };
    }

    // Top-level usage object with standard or alternate field names
    if let Some(usage) = data.get("usage").filter(|u| u.is_object()) {
        return TokenCounts {
            input: token_field(usage, &["input_tokens", "prompt_tokens"]),
            output: token_field(usage, &["output_tokens", "completion_tokens"]),
            cache_creation: token_field(
                usage,
                &["cache_creation_tokens", "cache_creation_input_tokens"],
            ),
            cache_read: token_field(usage, &["cache_read_tokens", "cache_read_input_tokens"]),
        };
    }

    // Flat top-level token fields
    TokenCounts {
        input: token_field(data, &["input_tokens"]),
        output: token_field(data, &["output_tokens"]),
        cache_creation: token_field(data, &["cache_creation_tokens"]),
        cache_read: token_field(data, &["cache_read_tokens"]),
    }
}

fn extract_session_id(data: &Value) -> String {
    // sessionId first (primary schema)
    if let Some(id) = data
        .get("sessionId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return id.to_string();
    }

    string_field(data, SESSION_FIELDS).unwrap_or_else(|| "unknown".to_string())
}

/// Project attribution: explicit `cwd` path, then an explicit `project`
/// field, then a best-effort decode of the containing directory name.
fn extract_project_info(data: &Value, file_path: &Path) -> (Option<String>, Option<String>) {
    let mut id = None;
    let mut name = None;

    if let Some(cwd) = data.get("cwd").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        name = Path::new(cwd)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        id = Some(cwd.to_string());
    }

    match data.get("project") {
        Some(Value::Object(project)) => {
            if let Some(pid) = project.get("id").and_then(Value::as_str) {
                id = Some(pid.to_string());
            }
            if let Some(pname) = project.get("name").and_then(Value::as_str) {
                name = Some(pname.to_string());
            }
        }
        Some(Value::String(project)) if !project.is_empty() => {
            id = Some(project.clone());
        }
        _ => {}
    }

    if name.is_none() {
        if let Some(dir_name) = file_path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy())
            .filter(|n| !n.is_empty() && n != "projects")
        {
            name = Some(decode_project_dir(&dir_name));
            if id.is_none() {
                id = Some(dir_name.into_owned());
            }
        }
    }

    (id, name)
}

/// Decode a log directory name back into a path. The log source flattens the
/// project's working directory into the directory name: `E--Projects-app`
/// came from `E:\Projects\app`, `-home-user-app` from `/home/user/app`.
/// Lossy: dashes inside real path segments are indistinguishable from
/// separators.
fn decode_project_dir(dir_name: &str) -> String {
    if let Some(idx) = dir_name.find("--") {
        let drive = &dir_name[..idx];
        let rest = &dir_name[idx + 2..];
        format!("{}:\\{}", drive, rest.replace('-', "\\"))
    } else if let Some(rest) = dir_name.strip_prefix('-') {
        format!("/{}", rest.replace('-', "/"))
    } else {
        dir_name.to_string()
    }
}

fn string_field(data: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| {
        data.get(*f)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn token_field(obj: &Value, fields: &[&str]) -> u64 {
    fields
        .iter()
        .find_map(|f| obj.get(*f).and_then(Value::as_u64))
        .unwrap_or(0)
}
