use bimscript_types::{LogEntry, LogLevel};
use serde_json::json;

#[test]
fn message_renders_strings_verbatim_and_values_as_json() {
    let entry = LogEntry::new(LogLevel::Log, vec![json!("count:"), json!(3), json!({"a": [1, 2]})]);
    assert_eq!(entry.message(), r#"count: 3 {"a":[1,2]}"#);
}

#[test]
fn message_of_no_args_is_empty() {
    assert_eq!(LogEntry::new(LogLevel::Info, vec![]).message(), "");
}

#[test]
fn display_prefixes_level() {
    let entry = LogEntry::new(LogLevel::Warn, vec![json!("careful")]);
    assert_eq!(entry.to_string(), "[warn] careful");
}

#[test]
fn timestamp_is_recent() {
    let before = chrono::Utc::now().timestamp_millis();
    let entry = LogEntry::new(LogLevel::Debug, vec![]);
    let after = chrono::Utc::now().timestamp_millis();
    assert!(entry.timestamp >= before && entry.timestamp <= after);
}

#[test]
fn level_method_names() {
    let names: Vec<&str> = LogLevel::ALL.iter().map(LogLevel::method_name).collect();
    assert_eq!(names, vec!["log", "info", "warn", "error", "debug"]);
}

#[test]
fn level_serializes_lowercase() {
    assert_eq!(serde_json::to_value(LogLevel::Error).unwrap(), json!("error"));
    let entry = LogEntry {
        level: LogLevel::Info,
        args: vec![json!(1)],
        timestamp: 10,
    };
    assert_eq!(
        serde_json::to_value(&entry).unwrap(),
        json!({"level": "info", "args": [1], "timestamp": 10})
    );
}
