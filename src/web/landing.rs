use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::Deserialize;

use crate::web::{
    AppState,
    auth::AuthUser,
    templates::{
        LoginNotice, NavItem, PageLayout, escape_html, flash_error, render_login_page, render_page,
    },
};

#[derive(Default, Deserialize)]
pub struct LandingQuery {
    pub status: Option<String>,
    pub error: Option<String>,
}

pub async fn landing_page(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<LandingQuery>,
) -> Response {
    let portal = match state.portal() {
        Ok(portal) => portal,
        Err(response) => return response,
    };

    match portal.auth.session(&jar).user {
        Some(user) => Html(render_main_page(&user, &params)).into_response(),
        None => {
            let notice = if params.status.as_deref() == Some("logged_out") {
                LoginNotice::LoggedOut
            } else {
                LoginNotice::Prompt
            };
            Html(render_login_page(notice)).into_response()
        }
    }
}

fn render_main_page(user: &AuthUser, params: &LandingQuery) -> String {
    let flash = compose_landing_flash(params);

    let mut tasks = vec![
        (
            "Fuel usage",
            "Report gasoline, diesel, propane and other fuel burned by university vehicles, equipment and generators.",
            "/fuel",
        ),
        (
            "Refrigerant usage",
            "Record refrigerant charged into or recovered from HVAC and refrigeration equipment during service.",
            "/refrigerant",
        ),
    ];
    if user.is_admin {
        tasks.push((
            "Admin review",
            "Review submitted fuel records, see totals by month and department, correct entries and export.",
            "/admin",
        ));
    }

    let cards = tasks
        .iter()
        .map(|(title, description, href)| {
            format!(
                r#"<a class="panel" href="{href}" style="display:block; text-decoration:none; color:inherit;"><h2>{title}</h2><p class="note">{description}</p><strong style="color:#2563eb;">Open →</strong></a>"#,
                title = escape_html(title),
                description = escape_html(description),
                href = href,
            )
        })
        .collect::<String>();

    let body = format!(
        r#"            <section class="grid-2">
                {cards}
            </section>"#
    );
    let note = format!(
        "Welcome, <strong>{}</strong>. Choose a reporting task from the sidebar or below.",
        escape_html(user.display_name())
    );

    render_page(PageLayout {
        heading: "GHG Inventory Reporting",
        note_html: &note,
        user,
        active: NavItem::Home,
        flash_html: &flash,
        body_html: &body,
    })
}

fn compose_landing_flash(params: &LandingQuery) -> String {
    match params.error.as_deref() {
        Some("not_authorized") => flash_error("That page requires administrator access."),
        Some(_) => flash_error("Something went wrong. Please try again."),
        None => String::new(),
    }
}
