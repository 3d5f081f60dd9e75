use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::web::templates::escape_html;

/// Inline validation messages keyed by form field name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<&'static str, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn summary(&self) -> String {
        self.0.values().cloned().collect::<Vec<_>>().join(" ")
    }
}

/// A closed set of form options stored in the sheet by label.
pub trait Choice: Copy + PartialEq + 'static {
    const ALL: &'static [Self];

    fn key(self) -> &'static str;
    fn label(self) -> &'static str;

    /// Accepts either the form key or the sheet label.
    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.iter().copied().find(|choice| {
            choice.key().eq_ignore_ascii_case(value) || choice.label().eq_ignore_ascii_case(value)
        })
    }
}

pub fn required(value: &str, field: &'static str, label: &str, errors: &mut FieldErrors) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, format!("{label} is required."));
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn parse_date(
    value: &str,
    field: &'static str,
    label: &str,
    today: NaiveDate,
    errors: &mut FieldErrors,
) -> Option<NaiveDate> {
    let raw = required(value, field, label, errors)?;
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(date) if date > today => {
            errors.add(field, format!("{label} cannot be in the future."));
            None
        }
        Ok(date) => Some(date),
        Err(_) => {
            errors.add(field, format!("{label} must be a date (YYYY-MM-DD)."));
            None
        }
    }
}

/// Parses a quantity. Blank input counts as zero when `allow_blank` is set.
pub fn parse_quantity(
    value: &str,
    field: &'static str,
    label: &str,
    allow_zero: bool,
    allow_blank: bool,
    errors: &mut FieldErrors,
) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if allow_blank {
            return Some(0.0);
        }
        errors.add(field, format!("{label} is required."));
        return None;
    }

    match trimmed.replace(',', "").parse::<f64>() {
        Ok(number) if !number.is_finite() => {
            errors.add(field, format!("{label} must be a number."));
            None
        }
        Ok(number) if number < 0.0 || (!allow_zero && number == 0.0) => {
            let bound = if allow_zero { "zero or more" } else { "greater than zero" };
            errors.add(field, format!("{label} must be {bound}."));
            None
        }
        Ok(number) => Some(number),
        Err(_) => {
            errors.add(field, format!("{label} must be a number."));
            None
        }
    }
}

pub fn parse_choice<T: Choice>(value: &str, field: &'static str, label: &str, errors: &mut FieldErrors) -> Option<T> {
    let raw = required(value, field, label, errors)?;
    let parsed = T::parse(&raw);
    if parsed.is_none() {
        errors.add(field, format!("Choose a valid {}.", label.to_lowercase()));
    }
    parsed
}

pub fn format_quantity(value: f64) -> String {
    format!("{value}")
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Element id for a form field. Pages that repeat a form give each copy its
/// own prefix so ids stay unique.
fn field_id(id_prefix: &str, name: &str) -> String {
    if id_prefix.is_empty() {
        name.to_string()
    } else {
        format!("{id_prefix}-{name}")
    }
}

fn field_wrapper(id: &str, name: &str, label: &str, control: String, errors: &FieldErrors) -> String {
    let (class, message) = match errors.get(name) {
        Some(message) => (
            "field invalid",
            format!(r#"<div class="field-error">{}</div>"#, escape_html(message)),
        ),
        None => ("field", String::new()),
    };
    format!(
        r#"<div class="{class}"><label for="{id}">{label}</label>{control}{message}</div>"#,
        label = escape_html(label),
    )
}

pub fn text_input(
    id_prefix: &str,
    name: &str,
    label: &str,
    input_type: &str,
    value: &str,
    errors: &FieldErrors,
) -> String {
    let id = field_id(id_prefix, name);
    let control = format!(
        r#"<input id="{id}" name="{name}" type="{input_type}" value="{value}"{extra}>"#,
        value = escape_html(value),
        extra = if input_type == "number" { r#" step="any" min="0""# } else { "" },
    );
    field_wrapper(&id, name, label, control, errors)
}

pub fn textarea(id_prefix: &str, name: &str, label: &str, value: &str, errors: &FieldErrors) -> String {
    let id = field_id(id_prefix, name);
    let control = format!(
        r#"<textarea id="{id}" name="{name}" rows="3">{value}</textarea>"#,
        value = escape_html(value),
    );
    field_wrapper(&id, name, label, control, errors)
}

pub fn select_input<T: Choice>(
    id_prefix: &str,
    name: &str,
    label: &str,
    selected: &str,
    errors: &FieldErrors,
) -> String {
    let id = field_id(id_prefix, name);
    let current = T::parse(selected);
    let mut options = String::from(r#"<option value="">Select…</option>"#);
    for choice in T::ALL {
        options.push_str(&format!(
            r#"<option value="{key}"{selected}>{label}</option>"#,
            key = choice.key(),
            label = escape_html(choice.label()),
            selected = if current == Some(*choice) { " selected" } else { "" },
        ));
    }
    let control = format!(r#"<select id="{id}" name="{name}">{options}</select>"#);
    field_wrapper(&id, name, label, control, errors)
}
