use axum::{
    Router,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    modules,
    web::{AppState, auth, landing},
};

const ROBOTS_TXT_BODY: &str = "User-agent: *\nDisallow: /\n";

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(landing::landing_page))
        .route("/login", get(auth::login_page).post(auth::process_login))
        .route("/logout", post(auth::logout))
        .route("/healthz", get(healthz))
        .route("/robots.txt", get(robots_txt))
        .merge(modules::fuel::router())
        .merge(modules::refrigerant::router())
        .with_state(state)
}

async fn robots_txt() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        ROBOTS_TXT_BODY,
    )
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, Response},
    };
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    use crate::{
        config::Secrets,
        store::{MemorySheetStore, SheetStore},
        web::auth::hash_password,
    };

    fn secrets() -> Secrets {
        let admin_hash = hash_password("admin-pass").unwrap();
        let staff_hash = hash_password("staff-pass").unwrap();
        Secrets::from_toml_str(&format!(
            r#"
[credentials.usernames.jdoe]
name = "Jane Doe"
password = "{admin_hash}"
roles = ["admin"]

[credentials.usernames.rsmith]
name = "Robin Smith"
password = "{staff_hash}"

[cookie]
name = "ghg_portal_auth"
key = "router-test-signing-key"
expiry_days = 1
"#
        ))
        .unwrap()
    }

    async fn app() -> (Router, MemorySheetStore) {
        let memory = MemorySheetStore::new();
        let state = AppState::from_parts(&secrets(), SheetStore::Memory(memory.clone()));
        if let Ok(portal) = state.portal() {
            portal.prepare_worksheets().await.unwrap();
        }
        (build_router(state), memory)
    }

    fn form_post(uri: &str, body: String, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get_request(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response<Body>) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn session_cookie(response: &Response<Body>) -> String {
        let raw = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        raw.split(';').next().unwrap().to_string()
    }

    async fn login(app: &Router, username: &str, password: &str) -> String {
        let response = app
            .clone()
            .oneshot(form_post(
                "/login",
                format!("username={username}&password={password}"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        session_cookie(&response)
    }

    fn yesterday() -> String {
        (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string()
    }

    #[tokio::test]
    async fn login_sets_session_and_landing_shows_tasks() {
        let (app, _) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;
        assert!(cookie.starts_with("ghg_portal_auth="));

        let response = app.clone().oneshot(get_request("/", Some(&cookie))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Robin Smith"));
        assert!(html.contains(r#"href="/fuel""#));
        assert!(html.contains(r#"href="/refrigerant""#));
        assert!(!html.contains(r#"href="/admin""#));
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_without_cookie() {
        let (app, _) = app().await;
        let response = app
            .oneshot(form_post("/login", "username=rsmith&password=nope".into(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert!(body_text(response).await.contains("Username/password is incorrect."));
    }

    #[tokio::test]
    async fn protected_pages_require_login() {
        let (app, _) = app().await;
        let response = app.oneshot(get_request("/fuel", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("Please log in"));
    }

    #[tokio::test]
    async fn fuel_submission_appends_one_row() {
        let (app, memory) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;

        let body = format!(
            "date={}&department=Facilities&category=vehicle&equipment_id=TRK-12&fuel_type=diesel&quantity=25.5&unit=gallons",
            yesterday()
        );
        let response = app
            .clone()
            .oneshot(form_post("/fuel", body, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/fuel?status=submitted"
        );

        let rows = memory.read_rows("Fuel").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][2], "Facilities");
        assert_eq!(rows[1][8], "Robin Smith");
        assert!(!rows[1][9].is_empty());
    }

    #[tokio::test]
    async fn invalid_fuel_submission_writes_nothing() {
        let (app, memory) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;

        let body = format!(
            "date={}&department=&category=vehicle&equipment_id=TRK-12&fuel_type=diesel&quantity=25&unit=gallons",
            yesterday()
        );
        let response = app
            .clone()
            .oneshot(form_post("/fuel", body, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_text(response).await.contains("Department is required."));
        assert_eq!(memory.read_rows("Fuel").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refrigerant_submission_appends_one_row() {
        let (app, memory) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;

        let body = format!(
            "date={}&equipment_id=CHILLER-2&refrigerant_type=r410a&charged_lbs=4&recovered_lbs=&service_reason=Leak+repair",
            yesterday()
        );
        let response = app
            .clone()
            .oneshot(form_post("/refrigerant", body, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let rows = memory.read_rows("Refrigerant").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][3], "R-410A");
        assert_eq!(rows[1][6], "Leak repair");
    }

    #[tokio::test]
    async fn invalid_refrigerant_submission_writes_nothing() {
        let (app, memory) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;

        let body = format!(
            "date={}&equipment_id=CHILLER-2&refrigerant_type=r410a&charged_lbs=4&recovered_lbs=&service_reason=",
            yesterday()
        );
        let response = app
            .clone()
            .oneshot(form_post("/refrigerant", body, Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let html = body_text(response).await;
        assert!(html.contains("Service reason is required."));
        assert!(html.contains(r#"value="CHILLER-2""#));
        assert_eq!(memory.read_rows("Refrigerant").await.unwrap().len(), 1);
    }

    async fn seed_fuel_row(app: &Router) {
        let staff = login(app, "rsmith", "staff-pass").await;
        let body = format!(
            "date={}&department=Facilities&category=vehicle&equipment_id=TRK-1&fuel_type=diesel&quantity=10&unit=gallons",
            yesterday()
        );
        let response = app
            .clone()
            .oneshot(form_post("/fuel", body, Some(&staff)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[tokio::test]
    async fn invalid_admin_correction_leaves_row_untouched() {
        let (app, memory) = app().await;
        seed_fuel_row(&app).await;
        let before = memory.read_rows("Fuel").await.unwrap();

        let admin = login(&app, "jdoe", "admin-pass").await;
        let body = format!(
            "submission_id={}&date={}&department=Grounds&category=vehicle&equipment_id=TRK-1&fuel_type=diesel&quantity=0&unit=gallons",
            before[1][0], before[1][1]
        );
        let response = app
            .clone()
            .oneshot(form_post("/admin/fuel/update", body, Some(&admin)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/admin?error=invalid_edit"
        );
        assert_eq!(memory.read_rows("Fuel").await.unwrap(), before);
    }

    #[tokio::test]
    async fn correction_for_unknown_record_is_reported() {
        let (app, memory) = app().await;
        seed_fuel_row(&app).await;
        let before = memory.read_rows("Fuel").await.unwrap();

        let admin = login(&app, "jdoe", "admin-pass").await;
        let body = format!(
            "submission_id={}&date={}&department=Grounds&category=vehicle&equipment_id=TRK-1&fuel_type=diesel&quantity=12&unit=gallons",
            uuid::Uuid::new_v4(),
            before[1][1]
        );
        let response = app
            .clone()
            .oneshot(form_post("/admin/fuel/update", body, Some(&admin)))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/admin?error=record_missing"
        );
        assert_eq!(memory.read_rows("Fuel").await.unwrap(), before);
    }

    #[tokio::test]
    async fn admin_page_is_limited_to_admins() {
        let (app, _) = app().await;

        let staff = login(&app, "rsmith", "staff-pass").await;
        let response = app.clone().oneshot(get_request("/admin", Some(&staff))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/?error=not_authorized"
        );

        let admin = login(&app, "JDoe", "admin-pass").await;
        let response = app.clone().oneshot(get_request("/admin", Some(&admin))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_correction_keeps_submitter_and_other_rows() {
        let (app, memory) = app().await;
        let staff = login(&app, "rsmith", "staff-pass").await;
        for (equipment, quantity) in [("TRK-1", "10"), ("TRK-2", "20")] {
            let body = format!(
                "date={}&department=Facilities&category=vehicle&equipment_id={equipment}&fuel_type=diesel&quantity={quantity}&unit=gallons",
                yesterday()
            );
            let response = app
                .clone()
                .oneshot(form_post("/fuel", body, Some(&staff)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::SEE_OTHER);
        }
        let before = memory.read_rows("Fuel").await.unwrap();
        let target = before[2].clone();

        let admin = login(&app, "jdoe", "admin-pass").await;
        let body = format!(
            "submission_id={}&date={}&department=Grounds&category=equipment&equipment_id=TRK-2&fuel_type=gasoline&quantity=15&unit=liters",
            target[0], target[1]
        );
        let response = app
            .clone()
            .oneshot(form_post("/admin/fuel/update", body, Some(&admin)))
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/admin?status=updated"
        );

        let after = memory.read_rows("Fuel").await.unwrap();
        assert_eq!(after.len(), before.len());
        assert_eq!(after[1], before[1]);
        assert_eq!(after[2][0], target[0]);
        assert_eq!(after[2][2], "Grounds");
        assert_eq!(after[2][7], "Liters");
        assert_eq!(after[2][8], "Robin Smith");
        assert_eq!(after[2][9], target[9]);
    }

    #[tokio::test]
    async fn admin_export_is_an_xlsx_download() {
        let (app, _) = app().await;
        let admin = login(&app, "jdoe", "admin-pass").await;
        let response = app
            .oneshot(get_request("/admin/fuel/export", Some(&admin)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .unwrap()
            .to_string();
        assert!(disposition.starts_with("attachment; filename=\"fuel-records-"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn logout_clears_the_session_cookie() {
        let (app, _) = app().await;
        let cookie = login(&app, "rsmith", "staff-pass").await;

        let response = app
            .clone()
            .oneshot(form_post("/logout", String::new(), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/?status=logged_out"
        );
        let cleared = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap();
        assert!(cleared.starts_with("ghg_portal_auth="));
        assert!(cleared.contains("Max-Age=0"));

        let response = app.oneshot(get_request("/?status=logged_out", None)).await.unwrap();
        assert!(body_text(response).await.contains("You have been logged out."));
    }

    #[tokio::test]
    async fn tampered_cookie_is_ignored() {
        let (app, _) = app().await;
        let response = app
            .oneshot(get_request("/fuel", Some("ghg_portal_auth=forged-value")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn startup_failure_renders_error_page_everywhere() {
        let app = build_router(AppState::failed("Configuration error: missing key `cookie`"));
        for uri in ["/", "/login", "/fuel", "/admin"] {
            let response = app.clone().oneshot(get_request(uri, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
            assert!(body_text(response).await.contains("missing key `cookie`"));
        }
    }

    #[tokio::test]
    async fn health_and_robots_are_public() {
        let (app, _) = app().await;
        let response = app.clone().oneshot(get_request("/healthz", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/robots.txt", None)).await.unwrap();
        assert!(body_text(response).await.contains("Disallow: /"));
    }
}
