use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::{
    extract::{Form, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::Utc;
use rust_xlsxwriter::{Format, Workbook};
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    modules::{
        form::{Choice, FieldErrors, format_timestamp},
        refrigerant::{RefrigerantRecord, RefrigerantTotals, summarize_refrigerant},
    },
    store::{SheetRecord, StoredRecord, read_records, replace_record},
    web::{
        AppState,
        auth::require_admin,
        templates::{NavItem, PageLayout, escape_html, flash_error, flash_success, render_page},
    },
};

use super::{FuelForm, FuelRecord, render_fuel_fields};

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Default, Deserialize)]
pub struct AdminQuery {
    pub status: Option<String>,
    pub error: Option<String>,
}

/// Correction posted from the review table.
#[derive(Deserialize)]
pub struct FuelEditForm {
    submission_id: Uuid,
    #[serde(default)]
    date: String,
    #[serde(default)]
    department: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    equipment_id: String,
    #[serde(default)]
    fuel_type: String,
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    unit: String,
}

impl FuelEditForm {
    fn into_parts(self) -> (Uuid, FuelForm) {
        (
            self.submission_id,
            FuelForm {
                date: self.date,
                department: self.department,
                category: self.category,
                equipment_id: self.equipment_id,
                fuel_type: self.fuel_type,
                quantity: self.quantity,
                unit: self.unit,
            },
        )
    }
}

/// Totals in gallons for the review charts.
#[derive(Debug, Default, PartialEq)]
pub struct FuelSummary {
    pub record_count: usize,
    pub total_gallons: f64,
    pub by_period: Vec<(String, f64)>,
    pub by_department: Vec<(String, f64)>,
    pub by_fuel_type: Vec<(String, f64)>,
}

pub fn summarize_fuel(records: &[FuelRecord]) -> FuelSummary {
    let mut by_period: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_department: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_fuel_type: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_gallons = 0.0;

    for record in records {
        let gallons = record.gallons();
        total_gallons += gallons;
        *by_period
            .entry(record.date.format("%Y-%m").to_string())
            .or_default() += gallons;
        *by_department.entry(record.department.clone()).or_default() += gallons;
        *by_fuel_type
            .entry(record.fuel_type.label().to_string())
            .or_default() += gallons;
    }

    FuelSummary {
        record_count: records.len(),
        total_gallons,
        by_period: by_period.into_iter().collect(),
        by_department: largest_first(by_department),
        by_fuel_type: largest_first(by_fuel_type),
    }
}

fn largest_first(totals: BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut entries: Vec<_> = totals.into_iter().collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

pub async fn review_page(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<AdminQuery>,
) -> Response {
    let user = match require_admin(&state, &jar) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    let fuel = match read_records::<FuelRecord>(&portal.store, &portal.worksheets.fuel).await {
        Ok(loaded) => loaded,
        Err(err) => {
            error!(?err, "failed to load fuel records for review");
            let body = r#"            <section class="panel"><p class="note">Fuel records are unavailable right now.</p></section>"#;
            let flash = flash_error("The spreadsheet could not be read. Please try again later.");
            let page = render_page(PageLayout {
                heading: "Admin review",
                note_html: "Submitted fuel records.",
                user: &user,
                active: NavItem::Admin,
                flash_html: &flash,
                body_html: body,
            });
            return (StatusCode::BAD_GATEWAY, Html(page)).into_response();
        }
    };

    let refrigerant_totals =
        match read_records::<RefrigerantRecord>(&portal.store, &portal.worksheets.refrigerant).await {
            Ok(loaded) => {
                let records: Vec<_> = loaded.records.into_iter().map(|stored| stored.record).collect();
                Some(summarize_refrigerant(&records))
            }
            Err(err) => {
                warn!(?err, "failed to load refrigerant records for review");
                None
            }
        };

    let records: Vec<FuelRecord> = fuel.records.iter().map(|stored| stored.record.clone()).collect();
    let summary = summarize_fuel(&records);

    let mut flash = compose_admin_flash(&params);
    if fuel.skipped > 0 {
        flash.push_str(&flash_error(&format!(
            "{} row(s) in the fuel worksheet could not be read and are not shown.",
            fuel.skipped
        )));
    }

    let body = format!(
        r#"            <section class="panel">
                <h2>Overview</h2>
                <p class="note"><strong>{count}</strong> fuel records · <strong>{total}</strong> gallons in total (liters converted).</p>
                <a href="/admin/fuel/export"><button type="button">Export fuel records (.xlsx)</button></a>
            </section>
            <section class="grid-2">
                {by_period}
                {by_department}
            </section>
            <section>
                {by_fuel_type}
            </section>
            <section>
                {refrigerant}
            </section>
            <section class="panel">
                <h2>Fuel records</h2>
                {records_table}
            </section>"#,
        count = summary.record_count,
        total = format_gallons(summary.total_gallons),
        by_period = render_bar_chart("Gallons by month", "Month", &summary.by_period),
        by_department = render_bar_chart("Gallons by department", "Department", &summary.by_department),
        by_fuel_type = render_bar_chart("Gallons by fuel type", "Fuel type", &summary.by_fuel_type),
        refrigerant = render_refrigerant_section(refrigerant_totals.as_ref()),
        records_table = render_records_table(&fuel.records),
    );

    Html(render_page(PageLayout {
        heading: "Admin review",
        note_html: "Review submitted fuel records, correct mistakes and export the inventory data.",
        user: &user,
        active: NavItem::Admin,
        flash_html: &flash,
        body_html: &body,
    }))
    .into_response()
}

pub async fn update_record(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<FuelEditForm>,
) -> Response {
    let user = match require_admin(&state, &jar) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    let (submission_id, values) = form.into_parts();
    let fields = match values.validate_fields(Utc::now().date_naive()) {
        Ok(fields) => fields,
        Err(errors) => {
            warn!(%submission_id, problems = %errors.summary(), "rejected fuel correction");
            return Redirect::to("/admin?error=invalid_edit").into_response();
        }
    };

    let result = replace_record(
        &portal.store,
        &portal.worksheets.fuel,
        submission_id,
        |existing: &FuelRecord| {
            fields.apply_to(
                existing.submission_id,
                existing.submitted_by.clone(),
                existing.submitted_at,
            )
        },
    )
    .await;

    match result {
        Ok(Some(_)) => {
            info!(%submission_id, editor = %user.username, "fuel record corrected");
            Redirect::to("/admin?status=updated").into_response()
        }
        Ok(None) => Redirect::to("/admin?error=record_missing").into_response(),
        Err(err) => {
            error!(?err, %submission_id, "failed to update fuel record");
            Redirect::to("/admin?error=store_unavailable").into_response()
        }
    }
}

pub async fn export_records(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    if let Err(response) = require_admin(&state, &jar) {
        return response;
    }
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    let records = match read_records::<FuelRecord>(&portal.store, &portal.worksheets.fuel).await {
        Ok(loaded) => loaded
            .records
            .into_iter()
            .map(|stored| stored.record)
            .collect::<Vec<_>>(),
        Err(err) => {
            error!(?err, "failed to load fuel records for export");
            return Redirect::to("/admin?error=store_unavailable").into_response();
        }
    };

    let bytes = match build_fuel_workbook(&records) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(?err, "failed to build fuel export workbook");
            return Redirect::to("/admin?error=export_failed").into_response();
        }
    };

    let filename = format!("fuel-records-{}.xlsx", Utc::now().format("%Y%m%d"));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE));
    match HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        Ok(disposition) => {
            headers.insert(header::CONTENT_DISPOSITION, disposition);
        }
        Err(err) => warn!(?err, "invalid export filename header"),
    }

    (headers, bytes).into_response()
}

/// Fuel records plus a monthly totals sheet.
pub fn build_fuel_workbook(records: &[FuelRecord]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("Fuel records")
        .context("failed to name records sheet")?;
    for (col, title) in FuelRecord::HEADER.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *title, &bold)
            .context("failed to write export header")?;
    }
    for (idx, record) in records.iter().enumerate() {
        let row = (idx + 1) as u32;
        worksheet
            .write_string(row, 0, record.submission_id.to_string())
            .and_then(|ws| ws.write_string(row, 1, record.date.format("%Y-%m-%d").to_string()))
            .and_then(|ws| ws.write_string(row, 2, &record.department))
            .and_then(|ws| ws.write_string(row, 3, record.category.label()))
            .and_then(|ws| ws.write_string(row, 4, &record.equipment_id))
            .and_then(|ws| ws.write_string(row, 5, record.fuel_type.label()))
            .and_then(|ws| ws.write_number(row, 6, record.quantity))
            .and_then(|ws| ws.write_string(row, 7, record.unit.label()))
            .and_then(|ws| ws.write_string(row, 8, &record.submitted_by))
            .and_then(|ws| ws.write_string(row, 9, format_timestamp(record.submitted_at)))
            .with_context(|| format!("failed to write export row {row}"))?;
    }

    let summary = summarize_fuel(records);
    let totals = workbook.add_worksheet();
    totals
        .set_name("Totals by month")
        .context("failed to name totals sheet")?;
    totals
        .write_string_with_format(0, 0, "Month", &bold)
        .and_then(|ws| ws.write_string_with_format(0, 1, "Gallons", &bold))
        .context("failed to write totals header")?;
    for (idx, (period, gallons)) in summary.by_period.iter().enumerate() {
        let row = (idx + 1) as u32;
        totals
            .write_string(row, 0, period)
            .and_then(|ws| ws.write_number(row, 1, *gallons))
            .context("failed to write totals row")?;
    }

    workbook
        .save_to_buffer()
        .context("failed to serialize export workbook")
}

fn format_gallons(value: f64) -> String {
    format!("{value:.1}")
}

fn render_bar_chart(title: &str, label: &str, rows: &[(String, f64)]) -> String {
    if rows.is_empty() {
        return format!(
            r#"<div class="panel"><h2>{title}</h2><p class="note">No records yet.</p></div>"#,
            title = escape_html(title)
        );
    }

    let max = rows.iter().map(|(_, value)| *value).fold(0.0_f64, f64::max);
    let body = rows
        .iter()
        .map(|(name, value)| {
            let width = if max > 0.0 { value / max * 100.0 } else { 0.0 };
            format!(
                r#"<tr><td>{name}</td><td style="width:50%"><div class="bar-track"><div class="bar-fill" style="width:{width:.1}%"></div></div></td><td>{value}</td></tr>"#,
                name = escape_html(name),
                value = format_gallons(*value),
            )
        })
        .collect::<String>();

    format!(
        r#"<div class="panel"><h2>{title}</h2><table><thead><tr><th>{label}</th><th></th><th>Gallons</th></tr></thead><tbody>{body}</tbody></table></div>"#,
        title = escape_html(title),
        label = escape_html(label),
    )
}

fn render_refrigerant_section(totals: Option<&RefrigerantTotals>) -> String {
    let Some(totals) = totals else {
        return r#"<div class="panel"><h2>Refrigerant by type</h2><p class="note">Refrigerant records could not be loaded.</p></div>"#.to_string();
    };
    if totals.by_type.is_empty() {
        return r#"<div class="panel"><h2>Refrigerant by type</h2><p class="note">No records yet.</p></div>"#.to_string();
    }

    let rows = totals
        .by_type
        .iter()
        .map(|(name, charged, recovered)| {
            format!(
                "<tr><td>{}</td><td>{charged:.1}</td><td>{recovered:.1}</td><td>{:.1}</td></tr>",
                escape_html(name),
                charged - recovered,
            )
        })
        .collect::<String>();

    format!(
        r#"<div class="panel"><h2>Refrigerant by type</h2><p class="note">{count} service events. Net = charged − recovered (lbs).</p><table><thead><tr><th>Refrigerant</th><th>Charged</th><th>Recovered</th><th>Net</th></tr></thead><tbody>{rows}</tbody></table></div>"#,
        count = totals.record_count,
    )
}

fn render_records_table(records: &[StoredRecord<FuelRecord>]) -> String {
    if records.is_empty() {
        return r#"<p class="note">No fuel records have been submitted yet.</p>"#.to_string();
    }

    let no_errors = FieldErrors::new();
    let rows = records
        .iter()
        .rev()
        .map(|stored| {
            let record = &stored.record;
            let values = FuelForm::from_record(record);
            format!(
                r#"<tr><td>{date}</td><td>{department}</td><td>{category}</td><td>{equipment}</td><td>{fuel}</td><td>{quantity} {unit}</td><td>{by}<br><small>{at}</small></td><td><details><summary>Edit</summary><form method="post" action="/admin/fuel/update"><input type="hidden" name="submission_id" value="{id}">{fields}<button type="submit" class="btn-sm">Save correction</button></form></details></td></tr>"#,
                date = record.date.format("%Y-%m-%d"),
                department = escape_html(&record.department),
                category = record.category.label(),
                equipment = escape_html(&record.equipment_id),
                fuel = record.fuel_type.label(),
                quantity = record.quantity,
                unit = record.unit.label().to_lowercase(),
                by = escape_html(&record.submitted_by),
                at = format_timestamp(record.submitted_at),
                id = record.submission_id,
                fields = render_fuel_fields(&format!("edit-{}", record.submission_id), &values, &no_errors),
            )
        })
        .collect::<String>();

    format!(
        r#"<table><thead><tr><th>Date</th><th>Department</th><th>Category</th><th>Equipment</th><th>Fuel</th><th>Quantity</th><th>Submitted</th><th></th></tr></thead><tbody>{rows}</tbody></table>"#
    )
}

fn compose_admin_flash(params: &AdminQuery) -> String {
    if params.status.as_deref() == Some("updated") {
        return flash_success("Fuel record updated.");
    }

    match params.error.as_deref() {
        Some("invalid_edit") => flash_error(
            "The correction was rejected: every field is required and the quantity must be a positive number.",
        ),
        Some("record_missing") => flash_error("That record no longer exists in the spreadsheet."),
        Some("store_unavailable") => flash_error("The spreadsheet could not be reached. Please try again later."),
        Some("export_failed") => flash_error("The export could not be generated."),
        Some(_) => flash_error("Something went wrong. Please try again."),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::fuel::{FuelType, QuantityUnit, SourceCategory};
    use calamine::{DataType, Reader, Xlsx};
    use chrono::{NaiveDate, TimeZone};
    use std::io::Cursor;

    fn record(date: (i32, u32, u32), department: &str, fuel_type: FuelType, quantity: f64, unit: QuantityUnit) -> FuelRecord {
        FuelRecord {
            submission_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            department: department.into(),
            category: SourceCategory::Vehicle,
            equipment_id: "VAN-3".into(),
            fuel_type,
            quantity,
            unit,
            submitted_by: "Jane Doe".into(),
            submitted_at: Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn summary_groups_by_month_department_and_fuel() {
        let records = vec![
            record((2024, 4, 3), "Facilities", FuelType::Diesel, 10.0, QuantityUnit::Gallons),
            record((2024, 4, 20), "Athletics", FuelType::Gasoline, 37.854_117_84, QuantityUnit::Liters),
            record((2024, 5, 1), "Facilities", FuelType::Diesel, 5.0, QuantityUnit::Gallons),
        ];

        let summary = summarize_fuel(&records);
        assert_eq!(summary.record_count, 3);
        assert!((summary.total_gallons - 25.0).abs() < 1e-9);

        assert_eq!(summary.by_period.len(), 2);
        assert_eq!(summary.by_period[0].0, "2024-04");
        assert!((summary.by_period[0].1 - 20.0).abs() < 1e-9);
        assert_eq!(summary.by_period[1].0, "2024-05");

        assert_eq!(summary.by_department[0].0, "Facilities");
        assert!((summary.by_department[0].1 - 15.0).abs() < 1e-9);
        assert_eq!(summary.by_fuel_type[0].0, "Diesel");
    }

    #[test]
    fn empty_summary_has_no_groups() {
        let summary = summarize_fuel(&[]);
        assert_eq!(summary, FuelSummary::default());
        assert!(render_bar_chart("Gallons by month", "Month", &summary.by_period).contains("No records yet"));
    }

    #[test]
    fn bar_chart_scales_to_largest_value() {
        let html = render_bar_chart(
            "Gallons by department",
            "Department",
            &[("Facilities".into(), 20.0), ("Athletics".into(), 5.0)],
        );
        assert!(html.contains("width:100.0%"));
        assert!(html.contains("width:25.0%"));
    }

    #[test]
    fn workbook_export_matches_records() {
        let records = vec![
            record((2024, 4, 3), "Facilities", FuelType::Diesel, 10.0, QuantityUnit::Gallons),
            record((2024, 5, 9), "Housing", FuelType::Propane, 42.5, QuantityUnit::Gallons),
        ];

        let bytes = build_fuel_workbook(&records).unwrap();
        let mut workbook = Xlsx::new(Cursor::new(bytes)).unwrap();

        let sheet = workbook.worksheet_range("Fuel records").unwrap().unwrap();
        assert_eq!(sheet.get_size(), (3, FuelRecord::HEADER.len()));
        assert_eq!(sheet.get_value((0, 0)), Some(&DataType::String("Submission ID".into())));
        assert_eq!(sheet.get_value((2, 2)), Some(&DataType::String("Housing".into())));
        assert_eq!(sheet.get_value((2, 5)), Some(&DataType::String("Propane".into())));
        assert_eq!(sheet.get_value((2, 6)), Some(&DataType::Float(42.5)));

        let totals = workbook.worksheet_range("Totals by month").unwrap().unwrap();
        assert_eq!(totals.get_value((1, 0)), Some(&DataType::String("2024-04".into())));
        assert_eq!(totals.get_value((2, 1)), Some(&DataType::Float(42.5)));
    }

    #[test]
    fn edit_forms_use_per_row_field_ids() {
        let first = record((2024, 4, 3), "Facilities", FuelType::Diesel, 10.0, QuantityUnit::Gallons);
        let second = record((2024, 4, 4), "Housing", FuelType::Propane, 4.0, QuantityUnit::Gallons);
        let stored = vec![
            StoredRecord {
                row_number: 2,
                record: first.clone(),
            },
            StoredRecord {
                row_number: 3,
                record: second.clone(),
            },
        ];

        let html = render_records_table(&stored);
        for record in [&first, &second] {
            let id = format!("edit-{}-date", record.submission_id);
            assert_eq!(html.matches(&format!(r#"id="{id}""#)).count(), 1);
            assert!(html.contains(&format!(r#"<label for="{id}">"#)));
        }
        assert!(!html.contains(r#"id="date""#));
        assert_eq!(html.matches(r#"name="date""#).count(), 2);
    }

    #[test]
    fn admin_flash_maps_codes() {
        let params = AdminQuery {
            status: None,
            error: Some("record_missing".into()),
        };
        assert!(compose_admin_flash(&params).contains("no longer exists"));
        assert!(compose_admin_flash(&AdminQuery::default()).is_empty());
    }
}
