//! Client-side field validation run before submit.

use regex::Regex;
use tracing::warn;

use crudkit_core::value::is_blank;
use crudkit_core::FieldDescriptor;

/// Error messages for one field. Only editable fields are checked: the user
/// cannot fix a readonly or hidden value.
pub fn validate_field(f: &FieldDescriptor) -> Vec<String> {
    let mut errors = Vec::new();
    if !f.is_editable() { return errors; }
    let label = f.label();
    if is_blank(&f.value) {
        if f.options.required { errors.push(format!("{} is required", label)); }
        return errors;
    }
    let Some(text) = f.value.as_str() else { return errors };
    if let Some(max) = f.options.length {
        if text.chars().count() > max {
            errors.push(format!("{} must be at most {} characters", label, max));
        }
    }
    if let Some(pattern) = &f.options.pattern {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(text) => errors.push(format!("{} has an invalid format", label)),
            Ok(_) => {}
            Err(e) => warn!(field = %f.name, error = %e, "form: ignoring invalid pattern"),
        }
    }
    errors
}
