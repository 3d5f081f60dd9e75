use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    modules::{
        fuel::ReportQuery,
        form::{
            Choice, FieldErrors, format_quantity, format_timestamp, parse_choice, parse_date,
            parse_quantity, parse_timestamp, required, select_input, text_input, textarea,
        },
    },
    store::{SheetRecord, append_record},
    web::{
        AppState,
        auth::{AuthUser, require_user},
        templates::{NavItem, PageLayout, flash_error, flash_success, render_page},
    },
};

pub fn router() -> Router<AppState> {
    Router::new().route("/refrigerant", get(refrigerant_page).post(submit_refrigerant))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefrigerantType {
    R22,
    R410A,
    R134A,
    R404A,
    R407C,
    R32,
    Other,
}

impl Choice for RefrigerantType {
    const ALL: &'static [Self] = &[
        RefrigerantType::R22,
        RefrigerantType::R410A,
        RefrigerantType::R134A,
        RefrigerantType::R404A,
        RefrigerantType::R407C,
        RefrigerantType::R32,
        RefrigerantType::Other,
    ];

    fn key(self) -> &'static str {
        match self {
            RefrigerantType::R22 => "r22",
            RefrigerantType::R410A => "r410a",
            RefrigerantType::R134A => "r134a",
            RefrigerantType::R404A => "r404a",
            RefrigerantType::R407C => "r407c",
            RefrigerantType::R32 => "r32",
            RefrigerantType::Other => "other",
        }
    }

    fn label(self) -> &'static str {
        match self {
            RefrigerantType::R22 => "R-22",
            RefrigerantType::R410A => "R-410A",
            RefrigerantType::R134A => "R-134a",
            RefrigerantType::R404A => "R-404A",
            RefrigerantType::R407C => "R-407C",
            RefrigerantType::R32 => "R-32",
            RefrigerantType::Other => "Other",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RefrigerantRecord {
    pub submission_id: Uuid,
    pub date: NaiveDate,
    pub equipment_id: String,
    pub refrigerant_type: RefrigerantType,
    /// Pounds added to the system.
    pub charged_lbs: f64,
    /// Pounds recovered from the system.
    pub recovered_lbs: f64,
    pub service_reason: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

impl SheetRecord for RefrigerantRecord {
    const HEADER: &'static [&'static str] = &[
        "Submission ID",
        "Date",
        "Equipment ID",
        "Refrigerant Type",
        "Charged (lbs)",
        "Recovered (lbs)",
        "Service Reason",
        "Submitted By",
        "Submitted At",
    ];

    fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.submission_id.to_string(),
            self.date.format("%Y-%m-%d").to_string(),
            self.equipment_id.clone(),
            self.refrigerant_type.label().to_string(),
            format_quantity(self.charged_lbs),
            format_quantity(self.recovered_lbs),
            self.service_reason.clone(),
            self.submitted_by.clone(),
            format_timestamp(self.submitted_at),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self> {
        let cell = |idx: usize| row.get(idx).map(|value| value.trim()).unwrap_or_default();
        let quantity = |idx: usize| -> Result<f64> {
            match cell(idx) {
                "" => Ok(0.0),
                raw => raw.parse::<f64>().with_context(|| format!("invalid quantity `{raw}`")),
            }
        };

        let submitted_by = cell(7);
        if submitted_by.is_empty() {
            return Err(anyhow!("row has no submitter"));
        }

        Ok(Self {
            submission_id: Uuid::parse_str(cell(0)).context("invalid submission id")?,
            date: NaiveDate::parse_from_str(cell(1), "%Y-%m-%d").context("invalid date")?,
            equipment_id: cell(2).to_string(),
            refrigerant_type: RefrigerantType::parse(cell(3))
                .ok_or_else(|| anyhow!("unknown refrigerant `{}`", cell(3)))?,
            charged_lbs: quantity(4)?,
            recovered_lbs: quantity(5)?,
            service_reason: cell(6).to_string(),
            submitted_by: submitted_by.to_string(),
            submitted_at: parse_timestamp(cell(8)).ok_or_else(|| anyhow!("invalid timestamp"))?,
        })
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefrigerantForm {
    pub date: String,
    pub equipment_id: String,
    pub refrigerant_type: String,
    pub charged_lbs: String,
    pub recovered_lbs: String,
    pub service_reason: String,
}

impl RefrigerantForm {
    pub fn validate(&self, submitter: &str, now: DateTime<Utc>) -> Result<RefrigerantRecord, FieldErrors> {
        let mut errors = FieldErrors::new();

        let date = parse_date(&self.date, "date", "Service date", now.date_naive(), &mut errors);
        let equipment_id = required(&self.equipment_id, "equipment_id", "Equipment ID", &mut errors);
        let refrigerant_type =
            parse_choice::<RefrigerantType>(&self.refrigerant_type, "refrigerant_type", "Refrigerant type", &mut errors);
        let charged = parse_quantity(&self.charged_lbs, "charged_lbs", "Quantity charged", true, true, &mut errors);
        let recovered =
            parse_quantity(&self.recovered_lbs, "recovered_lbs", "Quantity recovered", true, true, &mut errors);
        let service_reason = required(&self.service_reason, "service_reason", "Service reason", &mut errors);

        if let (Some(charged), Some(recovered)) = (charged, recovered) {
            if charged == 0.0 && recovered == 0.0 {
                errors.add("charged_lbs", "Enter the pounds charged, recovered, or both.");
            }
        }

        let submitter = submitter.trim();
        if submitter.is_empty() {
            errors.add("submitter", "Your session has no display name; log in again.");
        }

        match (date, equipment_id, refrigerant_type, charged, recovered, service_reason) {
            (
                Some(date),
                Some(equipment_id),
                Some(refrigerant_type),
                Some(charged_lbs),
                Some(recovered_lbs),
                Some(service_reason),
            ) if errors.is_empty() => Ok(RefrigerantRecord {
                submission_id: Uuid::new_v4(),
                date,
                equipment_id,
                refrigerant_type,
                charged_lbs,
                recovered_lbs,
                service_reason,
                submitted_by: submitter.to_string(),
                submitted_at: now,
            }),
            _ => Err(errors),
        }
    }
}

/// Charged and recovered pounds per refrigerant, for the admin overview.
#[derive(Debug, Default, PartialEq)]
pub struct RefrigerantTotals {
    pub record_count: usize,
    pub by_type: Vec<(String, f64, f64)>,
}

pub fn summarize_refrigerant(records: &[RefrigerantRecord]) -> RefrigerantTotals {
    let mut by_type: BTreeMap<&'static str, (f64, f64)> = BTreeMap::new();
    for record in records {
        let entry = by_type.entry(record.refrigerant_type.label()).or_default();
        entry.0 += record.charged_lbs;
        entry.1 += record.recovered_lbs;
    }

    RefrigerantTotals {
        record_count: records.len(),
        by_type: by_type
            .into_iter()
            .map(|(name, (charged, recovered))| (name.to_string(), charged, recovered))
            .collect(),
    }
}

fn render_refrigerant_page(user: &AuthUser, values: &RefrigerantForm, errors: &FieldErrors, flash: &str) -> String {
    let body = format!(
        r#"            <section class="panel">
                <h2>New refrigerant service record</h2>
                <form method="post" action="/refrigerant">
                <div class="grid-2">
                    {date}
                    {equipment}
                    {refrigerant}
                    {charged}
                    {recovered}
                </div>
                {reason}
                <button type="submit">Submit record</button>
                </form>
            </section>"#,
        date = text_input("", "date", "Service date", "date", &values.date, errors),
        equipment = text_input("", "equipment_id", "Equipment ID", "text", &values.equipment_id, errors),
        refrigerant = select_input::<RefrigerantType>(
            "",
            "refrigerant_type",
            "Refrigerant type",
            &values.refrigerant_type,
            errors
        ),
        charged = text_input("", "charged_lbs", "Quantity charged (lbs)", "number", &values.charged_lbs, errors),
        recovered = text_input(
            "",
            "recovered_lbs",
            "Quantity recovered (lbs)",
            "number",
            &values.recovered_lbs,
            errors
        ),
        reason = textarea("", "service_reason", "Service reason", &values.service_reason, errors),
    );

    render_page(PageLayout {
        heading: "Refrigerant usage report",
        note_html: "Record refrigerant added to or recovered from chillers, HVAC units, walk-in coolers and vehicles during service.",
        user,
        active: NavItem::Refrigerant,
        flash_html: flash,
        body_html: &body,
    })
}

pub async fn refrigerant_page(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<ReportQuery>,
) -> Response {
    let user = match require_user(&state, &jar) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let flash = if params.status.as_deref() == Some("submitted") {
        flash_success("Refrigerant record submitted. Thank you!")
    } else {
        String::new()
    };

    Html(render_refrigerant_page(
        &user,
        &RefrigerantForm::default(),
        &FieldErrors::new(),
        &flash,
    ))
    .into_response()
}

pub async fn submit_refrigerant(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<RefrigerantForm>,
) -> Response {
    let user = match require_user(&state, &jar) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    let record = match form.validate(user.display_name(), Utc::now()) {
        Ok(record) => record,
        Err(errors) => {
            let flash = flash_error("Please correct the highlighted fields; nothing was saved.");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Html(render_refrigerant_page(&user, &form, &errors, &flash)),
            )
                .into_response();
        }
    };

    match append_record(&portal.store, &portal.worksheets.refrigerant, &record).await {
        Ok(()) => {
            info!(
                submission_id = %record.submission_id,
                submitter = %record.submitted_by,
                "refrigerant record submitted"
            );
            Redirect::to("/refrigerant?status=submitted").into_response()
        }
        Err(err) => {
            error!(?err, "failed to save refrigerant record");
            let flash = flash_error("The record could not be saved to the spreadsheet. Please try again later.");
            (
                StatusCode::BAD_GATEWAY,
                Html(render_refrigerant_page(&user, &form, &FieldErrors::new(), &flash)),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
    }

    fn complete_form() -> RefrigerantForm {
        RefrigerantForm {
            date: "2024-03-14".into(),
            equipment_id: "CHILLER-2".into(),
            refrigerant_type: "r410a".into(),
            charged_lbs: "12".into(),
            recovered_lbs: String::new(),
            service_reason: "Leak repair on condenser coil".into(),
        }
    }

    #[test]
    fn complete_form_builds_record_with_blank_recovery_as_zero() {
        let record = complete_form().validate("Robin Smith", now()).unwrap();
        assert_eq!(record.refrigerant_type, RefrigerantType::R410A);
        assert_eq!(record.charged_lbs, 12.0);
        assert_eq!(record.recovered_lbs, 0.0);
        assert_eq!(record.submitted_by, "Robin Smith");
        assert_eq!(record.submitted_at, now());
    }

    #[test]
    fn requires_some_refrigerant_movement() {
        let mut form = complete_form();
        form.charged_lbs = "0".into();
        let errors = form.validate("Robin Smith", now()).unwrap_err();
        assert!(errors.get("charged_lbs").unwrap().contains("charged, recovered"));
    }

    #[test]
    fn missing_reason_and_bad_number_are_reported() {
        let mut form = complete_form();
        form.service_reason = " ".into();
        form.recovered_lbs = "two".into();
        let errors = form.validate("Robin Smith", now()).unwrap_err();
        assert_eq!(errors.get("service_reason"), Some("Service reason is required."));
        assert!(errors.get("recovered_lbs").is_some());
    }

    #[test]
    fn record_survives_the_sheet_row_format() {
        let record = complete_form().validate("Robin Smith", now()).unwrap();
        let row = record.to_row();
        assert_eq!(row.len(), RefrigerantRecord::HEADER.len());
        assert_eq!(row[3], "R-410A");
        assert_eq!(RefrigerantRecord::from_row(&row).unwrap(), record);
    }

    #[test]
    fn totals_group_by_refrigerant() {
        let first = complete_form().validate("Robin Smith", now()).unwrap();
        let mut second = first.clone();
        second.charged_lbs = 3.0;
        second.recovered_lbs = 1.5;
        let mut third = first.clone();
        third.refrigerant_type = RefrigerantType::R22;

        let totals = summarize_refrigerant(&[first, second, third]);
        assert_eq!(totals.record_count, 3);
        assert_eq!(
            totals.by_type,
            vec![
                ("R-22".to_string(), 12.0, 0.0),
                ("R-410A".to_string(), 15.0, 1.5),
            ]
        );
    }
}
