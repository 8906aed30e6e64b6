use anyhow::Result;
use std::fs;
use std::path::Path;

pub fn write_jsonl(dir: &Path, filename: &str, lines: &[String]) -> Result<()> {
    fs::create_dir_all(dir)?;
    let content = lines.join("\n") + "\n";
    fs::write(dir.join(filename), content)?;
    Ok(())
}

/// A line in the primary log schema (nested message.model / message.usage).
pub fn usage_line(timestamp: &str, session_id: &str, model: &str, input: u64, output: u64) -> String {
    format!(
        r#"{{"timestamp":"{}","sessionId":"{}","id":"msg-{}","message":{{"model":"{}","usage":{{"input_tokens":{},"output_tokens":{},"cache_creation_input_tokens":0,"cache_read_input_tokens":0}}}}}}"#,
        timestamp, session_id, session_id, model, input, output
    )
}
