use chrono::{Datelike, Utc};

use crate::web::auth::AuthUser;

const PORTAL_TITLE: &str = "GHG Inventory Reporting Portal";

const PAGE_BASE_STYLES: &str = r#"
        :root { color-scheme: light; }
        body { font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f8fafc; color: #0f172a; min-height: 100vh; display: flex; }
        nav.sidebar { width: 220px; flex-shrink: 0; background: #0f172a; color: #e2e8f0; padding: 2rem 1.25rem; box-sizing: border-box; display: flex; flex-direction: column; gap: 0.5rem; }
        nav.sidebar .brand { font-weight: 700; font-size: 1.05rem; margin-bottom: 1.5rem; color: #ffffff; }
        nav.sidebar a { color: #cbd5e1; text-decoration: none; padding: 0.55rem 0.75rem; border-radius: 8px; font-weight: 600; }
        nav.sidebar a:hover, nav.sidebar a.active { background: #1e293b; color: #ffffff; }
        nav.sidebar .who { margin-top: auto; font-size: 0.85rem; color: #94a3b8; }
        nav.sidebar form button { margin-top: 0.75rem; width: 100%; }
        .page { flex: 1; display: flex; flex-direction: column; min-width: 0; }
        header { background: #ffffff; padding: 2rem 1.5rem; border-bottom: 1px solid #e2e8f0; }
        header h1 { margin: 0; }
        header p { margin: 0.5rem 0 0; color: #64748b; }
        main { padding: 2rem 1.5rem; max-width: 1000px; width: 100%; box-sizing: border-box; }
        section { margin-bottom: 2.5rem; }
        .panel { background: #ffffff; border-radius: 12px; border: 1px solid #e2e8f0; padding: 1.5rem; box-shadow: 0 18px 40px rgba(15, 23, 42, 0.08); }
        .panel h2 { margin-top: 0; }
        .field { margin-bottom: 1rem; }
        label { display: block; margin-bottom: 0.4rem; font-weight: 600; color: #0f172a; }
        input, select, textarea { width: 100%; padding: 0.7rem; border-radius: 8px; border: 1px solid #cbd5f5; background: #f8fafc; color: #0f172a; box-sizing: border-box; font-size: 0.95rem; }
        input:focus, select:focus, textarea:focus { outline: none; border-color: #2563eb; box-shadow: 0 0 0 3px rgba(37, 99, 235, 0.12); }
        .field.invalid input, .field.invalid select, .field.invalid textarea { border-color: #dc2626; background: #fef2f2; }
        .field-error { color: #b91c1c; font-size: 0.85rem; margin-top: 0.3rem; }
        .grid-2 { display: grid; gap: 1rem; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr)); }
        button { padding: 0.75rem 1.2rem; border: none; border-radius: 8px; background: #2563eb; color: #ffffff; font-weight: 600; cursor: pointer; transition: background 0.15s ease; }
        button:hover { background: #1d4ed8; }
        .btn-sm { padding: 0.4rem 0.8rem; font-size: 0.85rem; }
        .flash { padding: 1rem 1.25rem; border-radius: 10px; margin-bottom: 1.5rem; font-weight: 600; border: 1px solid transparent; }
        .flash.success { background: #ecfdf3; border-color: #bbf7d0; color: #166534; }
        .flash.error { background: #fef2f2; border-color: #fecaca; color: #b91c1c; }
        .flash.warning { background: #fffbeb; border-color: #fde68a; color: #92400e; }
        table { width: 100%; border-collapse: collapse; margin-top: 1rem; background: #ffffff; border: 1px solid #e2e8f0; }
        th, td { padding: 0.6rem 0.8rem; border-bottom: 1px solid #e2e8f0; text-align: left; font-size: 0.92rem; vertical-align: top; }
        th { background: #f1f5f9; font-weight: 600; }
        .bar-track { background: #e2e8f0; border-radius: 999px; height: 0.75rem; min-width: 120px; }
        .bar-fill { background: #16a34a; border-radius: 999px; height: 100%; }
        .note { color: #475569; font-size: 0.95rem; line-height: 1.6; }
        .app-footer { margin-top: 3rem; text-align: center; font-size: 0.85rem; color: #94a3b8; }
        @media (max-width: 768px) {
            body { flex-direction: column; }
            nav.sidebar { width: 100%; flex-direction: row; flex-wrap: wrap; padding: 1rem; }
            nav.sidebar .brand { margin-bottom: 0; width: 100%; }
            header { padding: 1.5rem 1rem; }
            main { padding: 1.5rem 1rem; }
        }
"#;

/// Sidebar destinations, in display order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavItem {
    Home,
    Fuel,
    Refrigerant,
    Admin,
}

impl NavItem {
    fn href(self) -> &'static str {
        match self {
            NavItem::Home => "/",
            NavItem::Fuel => "/fuel",
            NavItem::Refrigerant => "/refrigerant",
            NavItem::Admin => "/admin",
        }
    }

    fn label(self) -> &'static str {
        match self {
            NavItem::Home => "Home",
            NavItem::Fuel => "Fuel usage",
            NavItem::Refrigerant => "Refrigerant usage",
            NavItem::Admin => "Admin review",
        }
    }
}

pub struct PageLayout<'a> {
    pub heading: &'a str,
    pub note_html: &'a str,
    pub user: &'a AuthUser,
    pub active: NavItem,
    pub flash_html: &'a str,
    pub body_html: &'a str,
}

pub fn render_page(layout: PageLayout<'_>) -> String {
    let PageLayout {
        heading,
        note_html,
        user,
        active,
        flash_html,
        body_html,
    } = layout;

    let sidebar = render_sidebar(user, active);
    let footer = render_footer();

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{heading} · {portal}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
{styles}
    </style>
</head>
<body>
    {sidebar}
    <div class="page">
        <header>
            <h1>{heading}</h1>
            <p>{note_html}</p>
        </header>
        <main>
            {flash_html}
{body_html}
            {footer}
        </main>
    </div>
</body>
</html>"#,
        heading = escape_html(heading),
        portal = PORTAL_TITLE,
        styles = PAGE_BASE_STYLES,
        sidebar = sidebar,
        note_html = note_html,
        flash_html = flash_html,
        body_html = body_html,
        footer = footer,
    )
}

fn render_sidebar(user: &AuthUser, active: NavItem) -> String {
    let mut items = vec![NavItem::Home, NavItem::Fuel, NavItem::Refrigerant];
    if user.is_admin {
        items.push(NavItem::Admin);
    }

    let links = items
        .into_iter()
        .map(|item| {
            format!(
                r#"<a href="{href}"{class}>{label}</a>"#,
                href = item.href(),
                label = item.label(),
                class = if item == active { r#" class="active""# } else { "" },
            )
        })
        .collect::<String>();

    format!(
        r#"<nav class="sidebar">
        <div class="brand">{portal}</div>
        {links}
        <div class="who">Signed in as <strong>{name}</strong>
            <form method="post" action="/logout"><button type="submit" class="btn-sm">Log out</button></form>
        </div>
    </nav>"#,
        portal = PORTAL_TITLE,
        links = links,
        name = escape_html(user.display_name()),
    )
}

/// What the login form says above its fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginNotice {
    Prompt,
    Failed,
    LoggedOut,
    LoginRequired,
}

impl LoginNotice {
    fn flash(self) -> &'static str {
        match self {
            LoginNotice::Prompt => {
                r#"<div class="flash warning">Please enter your username and password.</div>"#
            }
            LoginNotice::Failed => {
                r#"<div class="flash error">Username/password is incorrect.</div>"#
            }
            LoginNotice::LoggedOut => r#"<div class="flash success">You have been logged out.</div>"#,
            LoginNotice::LoginRequired => {
                r#"<div class="flash warning">Please log in to access this page.</div>"#
            }
        }
    }
}

pub fn render_login_page(notice: LoginNotice) -> String {
    let footer = render_footer();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{portal}</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <meta name="robots" content="noindex,nofollow">
    <style>
        :root {{ color-scheme: light; }}
        body {{ font-family: "Helvetica Neue", Arial, sans-serif; display: flex; flex-direction: column; align-items: center; justify-content: center; min-height: 100vh; margin: 0; background: #f1f5f9; color: #0f172a; padding: 1.5rem; box-sizing: border-box; }}
        main {{ width: 100%; max-width: 480px; display: flex; flex-direction: column; align-items: center; gap: 1.5rem; }}
        .panel {{ background: #ffffff; padding: 2.5rem 2.25rem; border-radius: 18px; box-shadow: 0 20px 60px rgba(15, 23, 42, 0.08); width: 100%; border: 1px solid #e2e8f0; box-sizing: border-box; }}
        h1 {{ margin: 0 0 1rem; font-size: 1.6rem; text-align: center; }}
        .flash {{ padding: 0.85rem 1rem; border-radius: 10px; font-weight: 600; border: 1px solid transparent; }}
        .flash.success {{ background: #ecfdf3; border-color: #bbf7d0; color: #166534; }}
        .flash.error {{ background: #fef2f2; border-color: #fecaca; color: #b91c1c; }}
        .flash.warning {{ background: #fffbeb; border-color: #fde68a; color: #92400e; }}
        label {{ display: block; margin-top: 1.2rem; font-weight: 600; }}
        input {{ width: 100%; padding: 0.85rem; margin-top: 0.65rem; border-radius: 10px; border: 1px solid #cbd5f5; background: #f8fafc; font-size: 1rem; box-sizing: border-box; }}
        input:focus {{ outline: none; border-color: #2563eb; box-shadow: 0 0 0 3px rgba(37, 99, 235, 0.15); }}
        button {{ margin-top: 2rem; width: 100%; padding: 0.95rem; border: none; border-radius: 10px; background: #2563eb; color: #ffffff; font-weight: 600; font-size: 1.05rem; cursor: pointer; }}
        button:hover {{ background: #1d4ed8; }}
        .app-footer {{ text-align: center; font-size: 0.85rem; color: #64748b; }}
    </style>
</head>
<body>
    <main>
        <section class="panel">
            <h1>{portal}</h1>
            {flash}
            <form method="post" action="/login">
                <label for="username">Username</label>
                <input id="username" name="username" autocomplete="username" required>
                <label for="password">Password</label>
                <input id="password" type="password" name="password" autocomplete="current-password" required>
                <button type="submit">Log in</button>
            </form>
        </section>
        {footer}
    </main>
</body>
</html>"#,
        portal = PORTAL_TITLE,
        flash = notice.flash(),
        footer = footer,
    )
}

/// Single page shown for every request when the portal could not start.
pub fn render_startup_error(message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{portal}</title>
    <meta name="robots" content="noindex,nofollow">
    <style>
        body {{ font-family: "Helvetica Neue", Arial, sans-serif; margin: 0; background: #f1f5f9; color: #0f172a; display: flex; align-items: center; justify-content: center; min-height: 100vh; }}
        .panel {{ background: #ffffff; padding: 2rem; border-radius: 16px; border: 1px solid #fecaca; max-width: 560px; }}
        h1 {{ margin-top: 0; color: #b91c1c; font-size: 1.4rem; }}
    </style>
</head>
<body>
    <section class="panel">
        <h1>The reporting portal is unavailable</h1>
        <p>{message}</p>
        {footer}
    </section>
</body>
</html>"#,
        portal = PORTAL_TITLE,
        message = escape_html(message),
        footer = render_footer(),
    )
}

pub fn flash_success(message: &str) -> String {
    format!(r#"<div class="flash success">{}</div>"#, escape_html(message))
}

pub fn flash_error(message: &str) -> String {
    format!(r#"<div class="flash error">{}</div>"#, escape_html(message))
}

pub fn render_footer() -> String {
    let current_year = Utc::now().year();
    format!(
        r#"<footer class="app-footer">© {year} Office of Sustainability · GHG inventory program · internal use only</footer>"#,
        year = current_year
    )
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
