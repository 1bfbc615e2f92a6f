//! Reading, validating and writing run inputs and outputs.
//!
//! Inputs are checked as raw JSON before anything is typed so the errors can
//! name the offending record and key. Any failure here aborts the run before
//! a single record is classified.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::{InputError, PipelineError};
use crate::pipeline::types::{EmailRecord, Priority, SampleRecord};

/// Keys every input record must carry, all as strings.
pub const REQUIRED_EMAIL_FIELDS: [&str; 6] = ["date", "from", "subject", "priority", "category", "body"];

/// The only keys the labeler may change.
pub const MUTABLE_FIELDS: [&str; 2] = ["category", "priority"];

pub fn read_json(path: &Path) -> Result<Value, InputError> {
    let raw = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            InputError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            InputError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_str(&raw).map_err(|source| InputError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Pretty-printed JSON with a trailing newline.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InputError> {
    let mut payload = serde_json::to_string_pretty(value).map_err(|source| InputError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    payload.push('\n');
    std::fs::write(path, payload).map_err(|source| InputError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// `inbox.json` → `inbox.labeled.json`, next to the input.
pub fn make_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}.labeled.json"))
}

/// A non-empty JSON list of strings.
pub fn validate_categories(value: Value) -> Result<Vec<String>, InputError> {
    let Value::Array(items) = value else {
        return Err(invalid("categories must be a non-empty JSON list of strings"));
    };
    if items.is_empty() {
        return Err(invalid("categories must be a non-empty JSON list of strings"));
    }
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            other => Err(invalid(format!("category entries must all be strings, got {other}"))),
        })
        .collect()
}

/// A JSON list of email objects. Each carries every required key as a
/// string, and all but the labels are non-empty. Returns the objects
/// untouched so the output can be compared against them.
pub fn validate_input_emails(value: Value) -> Result<Vec<Value>, InputError> {
    let Value::Array(emails) = value else {
        return Err(invalid("input must be a JSON list of email objects"));
    };
    for (index, email) in emails.iter().enumerate() {
        validate_email_record(index, email)?;
    }
    Ok(emails)
}

fn validate_email_record(index: usize, email: &Value) -> Result<(), InputError> {
    let Value::Object(fields) = email else {
        return Err(invalid(format!("email {index}: each record must be a JSON object")));
    };

    let missing: Vec<&str> = REQUIRED_EMAIL_FIELDS
        .iter()
        .copied()
        .filter(|key| !fields.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!(
            "email {index}: missing required keys {missing:?}"
        )));
    }

    for key in REQUIRED_EMAIL_FIELDS {
        let Some(value) = fields[key].as_str() else {
            return Err(invalid(format!("email {index}: field '{key}' must be a string")));
        };
        if !MUTABLE_FIELDS.contains(&key) && value.is_empty() {
            return Err(invalid(format!("email {index}: field '{key}' may not be empty")));
        }
    }
    Ok(())
}

/// Type validated email objects.
pub fn parse_records(emails: &[Value]) -> Result<Vec<EmailRecord>, InputError> {
    emails
        .iter()
        .enumerate()
        .map(|(index, email)| {
            serde_json::from_value(email.clone())
                .map_err(|e| invalid(format!("email {index}: {e}")))
        })
        .collect()
}

/// Solved examples: a JSON list of records whose `category` is non-empty
/// and whose `priority` is `high` or `normal`. Other fields may be missing.
pub fn load_samples(value: Value) -> Result<Vec<SampleRecord>, InputError> {
    let Value::Array(items) = value else {
        return Err(invalid("samples must be a JSON list of email objects"));
    };

    let mut samples = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let mut sample: SampleRecord = serde_json::from_value(item)
            .map_err(|e| invalid(format!("sample {index}: {e}")))?;

        let category = sample.category.trim();
        if category.is_empty() {
            return Err(invalid(format!("sample {index}: category must be non-empty")));
        }
        sample.category = category.to_string();

        let Some(priority) = Priority::parse(&sample.priority) else {
            return Err(invalid(format!(
                "sample {index}: priority must be 'high' or 'normal', got {:?}",
                sample.priority
            )));
        };
        sample.priority = priority.to_string();
        samples.push(sample);
    }
    Ok(samples)
}

/// Check that `labeled` differs from `original` only in its labels, and
/// that both labels are non-empty strings.
pub fn enforce_only_labels_changed(original: &Value, labeled: &Value) -> Result<(), PipelineError> {
    let (Some(original), Some(labeled)) = (original.as_object(), labeled.as_object()) else {
        return Err(PipelineError::FieldMutation("records must be JSON objects".to_string()));
    };

    let same_keys = original.len() == labeled.len() && original.keys().all(|k| labeled.contains_key(k));
    if !same_keys {
        return Err(PipelineError::FieldMutation(
            "labeled record must preserve exactly the same keys".to_string(),
        ));
    }

    for (key, value) in original {
        if MUTABLE_FIELDS.contains(&key.as_str()) {
            continue;
        }
        if labeled.get(key) != Some(value) {
            return Err(PipelineError::FieldMutation(format!("field '{key}' was modified")));
        }
    }

    for field in MUTABLE_FIELDS {
        match labeled.get(field).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => {}
            _ => {
                return Err(PipelineError::FieldMutation(format!(
                    "labeled field '{field}' must be a non-empty string"
                )));
            }
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> InputError {
    InputError::Invalid(message.into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn email() -> Value {
        json!({
            "date": "2024-03-01T09:30:00Z",
            "from": "billing@adt.com",
            "subject": "Your ADT invoice",
            "body": "Your invoice is attached.",
            "category": "",
            "priority": "",
            "thread_id": 42,
        })
    }

    #[test]
    fn output_path_sits_next_to_input() {
        assert_eq!(
            make_output_path(Path::new("/tmp/mail/inbox.json")),
            PathBuf::from("/tmp/mail/inbox.labeled.json")
        );
        assert_eq!(
            make_output_path(Path::new("inbox")),
            PathBuf::from("inbox.labeled.json")
        );
    }

    #[test]
    fn json_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json(&path, &json!(["Junk", "Archive"])).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("]\n"));
        assert_eq!(read_json(&path).unwrap(), json!(["Junk", "Archive"]));
    }

    #[test]
    fn read_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(read_json(&missing), Err(InputError::NotFound { path }) if path == missing));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "[1, 2").unwrap();
        let err = read_json(&broken).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn categories_must_be_non_empty_strings() {
        assert_eq!(
            validate_categories(json!(["Junk", "Archive"])).unwrap(),
            vec!["Junk", "Archive"]
        );
        assert!(validate_categories(json!([])).is_err());
        assert!(validate_categories(json!({"a": 1})).is_err());
        assert!(validate_categories(json!(["Junk", 3])).is_err());
    }

    #[test]
    fn input_emails_require_all_keys_as_strings() {
        assert_eq!(validate_input_emails(json!([email()])).unwrap().len(), 1);

        let mut missing = email();
        missing.as_object_mut().unwrap().remove("body");
        let err = validate_input_emails(json!([email(), missing])).unwrap_err();
        assert!(err.to_string().contains("email 1"));
        assert!(err.to_string().contains("body"));

        let mut numeric = email();
        numeric["subject"] = json!(7);
        assert!(validate_input_emails(json!([numeric])).is_err());

        let mut empty_from = email();
        empty_from["from"] = json!("");
        assert!(validate_input_emails(json!([empty_from])).is_err());

        assert!(validate_input_emails(json!({"emails": []})).is_err());
    }

    #[test]
    fn records_keep_unknown_keys() {
        let records = parse_records(&[email()]).unwrap();
        assert_eq!(records[0].from, "billing@adt.com");
        assert_eq!(records[0].extra["thread_id"], json!(42));
    }

    #[test]
    fn samples_need_labels() {
        let ok = json!([{"from": "a@b.com", "subject": "s", "category": "Work", "priority": "HIGH"}]);
        let samples = load_samples(ok).unwrap();
        assert_eq!(samples[0].priority, "high");
        assert_eq!(samples[0].body, "");

        assert!(load_samples(json!([{"from": "a@b.com", "category": "", "priority": "high"}])).is_err());
        assert!(load_samples(json!([{"from": "a@b.com", "category": "Work", "priority": "urgent"}])).is_err());
        assert!(load_samples(json!("samples")).is_err());
    }

    #[test]
    fn only_labels_may_change() {
        let original = email();
        let mut labeled = original.clone();
        labeled["category"] = json!("ADT");
        labeled["priority"] = json!("normal");
        enforce_only_labels_changed(&original, &labeled).unwrap();

        let mut edited = labeled.clone();
        edited["subject"] = json!("Edited");
        let err = enforce_only_labels_changed(&original, &edited).unwrap_err();
        assert!(err.to_string().contains("'subject' was modified"));

        let mut extra_key = labeled.clone();
        extra_key["confidence"] = json!(0.9);
        assert!(enforce_only_labels_changed(&original, &extra_key).is_err());

        let mut blank = labeled;
        blank["priority"] = json!("");
        assert!(enforce_only_labels_changed(&original, &blank).is_err());
    }
}
