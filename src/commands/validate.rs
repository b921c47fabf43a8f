use crate::error::ValidationError;
use crate::models::feedback::{Submission, STORE_ASSIGNED_FIELDS};
use serde_json::{Map, Value};

/// Checked in this order; the first missing field is the one reported.
pub const REQUIRED_FIELDS: [&str; 4] = ["tester_name", "submission_type", "title", "description"];

/// Validates a raw request body and splits it into a typed submission.
///
/// Unknown fields ride along in `extra` so newer clients are not rejected.
pub fn validate_submission(input: Value) -> Result<Submission, ValidationError> {
    let mut fields = match input {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    for field in REQUIRED_FIELDS {
        if required_str(&fields, field).is_none() {
            return Err(ValidationError::MissingField(field));
        }
    }

    let mut take = |field: &str| match fields.remove(field) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    };
    let tester_name = take("tester_name");
    let submission_type = take("submission_type");
    let title = take("title");
    let description = take("description");

    let severity = match fields.remove("severity") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };

    for key in STORE_ASSIGNED_FIELDS {
        fields.remove(key);
    }

    Ok(Submission {
        tester_name,
        submission_type,
        title,
        description,
        severity,
        extra: fields,
    })
}

fn required_str<'a>(fields: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}
