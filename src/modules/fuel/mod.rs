use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::SignedCookieJar;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

pub(crate) mod admin;

use crate::{
    modules::form::{
        Choice, FieldErrors, format_quantity, format_timestamp, parse_choice, parse_date,
        parse_quantity, parse_timestamp, required, select_input, text_input,
    },
    store::{SheetRecord, append_record},
    web::{
        AppState,
        auth::{AuthUser, require_user},
        templates::{NavItem, PageLayout, flash_error, flash_success, render_page},
    },
};

const LITERS_PER_GALLON: f64 = 3.785_411_784;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/fuel", get(fuel_page).post(submit_fuel))
        .route("/admin", get(admin::review_page))
        .route("/admin/fuel/update", post(admin::update_record))
        .route("/admin/fuel/export", get(admin::export_records))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceCategory {
    Vehicle,
    Equipment,
    Generator,
}

impl Choice for SourceCategory {
    const ALL: &'static [Self] = &[
        SourceCategory::Vehicle,
        SourceCategory::Equipment,
        SourceCategory::Generator,
    ];

    fn key(self) -> &'static str {
        match self {
            SourceCategory::Vehicle => "vehicle",
            SourceCategory::Equipment => "equipment",
            SourceCategory::Generator => "generator",
        }
    }

    fn label(self) -> &'static str {
        match self {
            SourceCategory::Vehicle => "Vehicle",
            SourceCategory::Equipment => "Equipment",
            SourceCategory::Generator => "Generator",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuelType {
    Gasoline,
    Diesel,
    Biodiesel,
    Propane,
    NaturalGas,
    Other,
}

impl Choice for FuelType {
    const ALL: &'static [Self] = &[
        FuelType::Gasoline,
        FuelType::Diesel,
        FuelType::Biodiesel,
        FuelType::Propane,
        FuelType::NaturalGas,
        FuelType::Other,
    ];

    fn key(self) -> &'static str {
        match self {
            FuelType::Gasoline => "gasoline",
            FuelType::Diesel => "diesel",
            FuelType::Biodiesel => "biodiesel",
            FuelType::Propane => "propane",
            FuelType::NaturalGas => "natural_gas",
            FuelType::Other => "other",
        }
    }

    fn label(self) -> &'static str {
        match self {
            FuelType::Gasoline => "Gasoline",
            FuelType::Diesel => "Diesel",
            FuelType::Biodiesel => "Biodiesel (B20)",
            FuelType::Propane => "Propane",
            FuelType::NaturalGas => "Natural gas",
            FuelType::Other => "Other",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityUnit {
    Gallons,
    Liters,
}

impl QuantityUnit {
    pub fn to_gallons(self, quantity: f64) -> f64 {
        match self {
            QuantityUnit::Gallons => quantity,
            QuantityUnit::Liters => quantity / LITERS_PER_GALLON,
        }
    }
}

impl Choice for QuantityUnit {
    const ALL: &'static [Self] = &[QuantityUnit::Gallons, QuantityUnit::Liters];

    fn key(self) -> &'static str {
        match self {
            QuantityUnit::Gallons => "gallons",
            QuantityUnit::Liters => "liters",
        }
    }

    fn label(self) -> &'static str {
        match self {
            QuantityUnit::Gallons => "Gallons",
            QuantityUnit::Liters => "Liters",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuelRecord {
    pub submission_id: Uuid,
    pub date: NaiveDate,
    pub department: String,
    pub category: SourceCategory,
    pub equipment_id: String,
    pub fuel_type: FuelType,
    pub quantity: f64,
    pub unit: QuantityUnit,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
}

impl FuelRecord {
    pub fn gallons(&self) -> f64 {
        self.unit.to_gallons(self.quantity)
    }
}

impl SheetRecord for FuelRecord {
    const HEADER: &'static [&'static str] = &[
        "Submission ID",
        "Date",
        "Department",
        "Source Category",
        "Equipment ID",
        "Fuel Type",
        "Quantity",
        "Unit",
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
            self.department.clone(),
            self.category.label().to_string(),
            self.equipment_id.clone(),
            self.fuel_type.label().to_string(),
            format_quantity(self.quantity),
            self.unit.label().to_string(),
            self.submitted_by.clone(),
            format_timestamp(self.submitted_at),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self> {
        let cell = |idx: usize| row.get(idx).map(|value| value.trim()).unwrap_or_default();

        let submitted_by = cell(8);
        if submitted_by.is_empty() {
            return Err(anyhow!("row has no submitter"));
        }

        Ok(Self {
            submission_id: Uuid::parse_str(cell(0)).context("invalid submission id")?,
            date: NaiveDate::parse_from_str(cell(1), "%Y-%m-%d").context("invalid date")?,
            department: cell(2).to_string(),
            category: SourceCategory::parse(cell(3))
                .ok_or_else(|| anyhow!("unknown source category `{}`", cell(3)))?,
            equipment_id: cell(4).to_string(),
            fuel_type: FuelType::parse(cell(5))
                .ok_or_else(|| anyhow!("unknown fuel type `{}`", cell(5)))?,
            quantity: cell(6).parse::<f64>().context("invalid quantity")?,
            unit: QuantityUnit::parse(cell(7)).ok_or_else(|| anyhow!("unknown unit `{}`", cell(7)))?,
            submitted_by: submitted_by.to_string(),
            submitted_at: parse_timestamp(cell(9)).ok_or_else(|| anyhow!("invalid timestamp"))?,
        })
    }
}

/// Raw form values, kept as typed text so they can be echoed back on error.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct FuelForm {
    pub date: String,
    pub department: String,
    pub category: String,
    pub equipment_id: String,
    pub fuel_type: String,
    pub quantity: String,
    pub unit: String,
}

/// Validated fields shared by new submissions and admin corrections.
pub(crate) struct FuelFields {
    date: NaiveDate,
    department: String,
    category: SourceCategory,
    equipment_id: String,
    fuel_type: FuelType,
    quantity: f64,
    unit: QuantityUnit,
}

impl FuelFields {
    pub(crate) fn apply_to(self, submission_id: Uuid, submitted_by: String, submitted_at: DateTime<Utc>) -> FuelRecord {
        FuelRecord {
            submission_id,
            date: self.date,
            department: self.department,
            category: self.category,
            equipment_id: self.equipment_id,
            fuel_type: self.fuel_type,
            quantity: self.quantity,
            unit: self.unit,
            submitted_by,
            submitted_at,
        }
    }
}

impl FuelForm {
    pub(crate) fn validate_fields(&self, today: NaiveDate) -> Result<FuelFields, FieldErrors> {
        let mut errors = FieldErrors::new();

        let date = parse_date(&self.date, "date", "Date", today, &mut errors);
        let department = required(&self.department, "department", "Department", &mut errors);
        let category = parse_choice::<SourceCategory>(&self.category, "category", "Source category", &mut errors);
        let equipment_id = required(&self.equipment_id, "equipment_id", "Vehicle or equipment ID", &mut errors);
        let fuel_type = parse_choice::<FuelType>(&self.fuel_type, "fuel_type", "Fuel type", &mut errors);
        let quantity = parse_quantity(&self.quantity, "quantity", "Quantity", false, false, &mut errors);
        let unit = parse_choice::<QuantityUnit>(&self.unit, "unit", "Unit", &mut errors);

        match (date, department, category, equipment_id, fuel_type, quantity, unit) {
            (
                Some(date),
                Some(department),
                Some(category),
                Some(equipment_id),
                Some(fuel_type),
                Some(quantity),
                Some(unit),
            ) if errors.is_empty() => Ok(FuelFields {
                date,
                department,
                category,
                equipment_id,
                fuel_type,
                quantity,
                unit,
            }),
            _ => Err(errors),
        }
    }

    /// Builds a new record stamped with the submitter and submission time.
    pub fn validate(&self, submitter: &str, now: DateTime<Utc>) -> Result<FuelRecord, FieldErrors> {
        let fields = self.validate_fields(now.date_naive())?;
        let submitter = submitter.trim();
        if submitter.is_empty() {
            let mut errors = FieldErrors::new();
            errors.add("submitter", "Your session has no display name; log in again.");
            return Err(errors);
        }
        Ok(fields.apply_to(Uuid::new_v4(), submitter.to_string(), now))
    }

    pub(crate) fn from_record(record: &FuelRecord) -> Self {
        Self {
            date: record.date.format("%Y-%m-%d").to_string(),
            department: record.department.clone(),
            category: record.category.key().to_string(),
            equipment_id: record.equipment_id.clone(),
            fuel_type: record.fuel_type.key().to_string(),
            quantity: format_quantity(record.quantity),
            unit: record.unit.key().to_string(),
        }
    }
}

/// The form controls, shared with the admin correction form. `id_prefix`
/// keeps element ids unique when several copies share a page.
pub(crate) fn render_fuel_fields(id_prefix: &str, values: &FuelForm, errors: &FieldErrors) -> String {
    format!(
        r#"<div class="grid-2">
                    {date}
                    {department}
                    {category}
                    {equipment}
                    {fuel_type}
                    {quantity}
                    {unit}
                </div>"#,
        date = text_input(id_prefix, "date", "Date of use", "date", &values.date, errors),
        department = text_input(id_prefix, "department", "Department / unit", "text", &values.department, errors),
        category = select_input::<SourceCategory>(id_prefix, "category", "Source category", &values.category, errors),
        equipment = text_input(
            id_prefix,
            "equipment_id",
            "Vehicle or equipment ID",
            "text",
            &values.equipment_id,
            errors
        ),
        fuel_type = select_input::<FuelType>(id_prefix, "fuel_type", "Fuel type", &values.fuel_type, errors),
        quantity = text_input(id_prefix, "quantity", "Quantity", "number", &values.quantity, errors),
        unit = select_input::<QuantityUnit>(id_prefix, "unit", "Unit", &values.unit, errors),
    )
}

fn render_fuel_page(user: &AuthUser, values: &FuelForm, errors: &FieldErrors, flash: &str) -> String {
    let fields = render_fuel_fields("", values, errors);
    let body = format!(
        r#"            <section class="panel">
                <h2>New fuel usage record</h2>
                <form method="post" action="/fuel">
                {fields}
                <button type="submit">Submit record</button>
                </form>
            </section>"#
    );

    render_page(PageLayout {
        heading: "Fuel usage report",
        note_html: "Report fuel dispensed into university vehicles, equipment and generators. One record per fill-up or delivery.",
        user,
        active: NavItem::Fuel,
        flash_html: flash,
        body_html: &body,
    })
}

#[derive(Default, Deserialize)]
pub struct ReportQuery {
    pub status: Option<String>,
}

pub async fn fuel_page(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<ReportQuery>,
) -> Response {
    let user = match require_user(&state, &jar) {
        Ok(user) => user,
        Err(response) => return response,
    };

    let flash = if params.status.as_deref() == Some("submitted") {
        flash_success("Fuel record submitted. Thank you!")
    } else {
        String::new()
    };

    Html(render_fuel_page(&user, &FuelForm::default(), &FieldErrors::new(), &flash)).into_response()
}

pub async fn submit_fuel(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Form(form): Form<FuelForm>,
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
                Html(render_fuel_page(&user, &form, &errors, &flash)),
            )
                .into_response();
        }
    };

    match append_record(&portal.store, &portal.worksheets.fuel, &record).await {
        Ok(()) => {
            info!(
                submission_id = %record.submission_id,
                submitter = %record.submitted_by,
                "fuel record submitted"
            );
            Redirect::to("/fuel?status=submitted").into_response()
        }
        Err(err) => {
            error!(?err, "failed to save fuel record");
            let flash = flash_error("The record could not be saved to the spreadsheet. Please try again later.");
            (
                StatusCode::BAD_GATEWAY,
                Html(render_fuel_page(&user, &form, &FieldErrors::new(), &flash)),
            )
                .into_response()
        }
    }
}
