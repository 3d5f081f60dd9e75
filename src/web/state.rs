use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::{
    extract::FromRef,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::Key;
use tracing::{error, info, warn};

use crate::{
    config::{self, Secrets},
    modules::{fuel::FuelRecord, refrigerant::RefrigerantRecord},
    store::{GoogleSheetsClient, MemorySheetStore, SheetRecord, SheetStore},
    web::{
        auth::{Authenticator, derive_cookie_key},
        templates::render_startup_error,
    },
};

/// Worksheet titles inside the configured spreadsheet.
#[derive(Clone, Debug)]
pub struct Worksheets {
    pub fuel: String,
    pub refrigerant: String,
}

impl Default for Worksheets {
    fn default() -> Self {
        Self {
            fuel: "Fuel".to_string(),
            refrigerant: "Refrigerant".to_string(),
        }
    }
}

/// Everything a page needs once startup succeeded.
pub struct Portal {
    pub auth: Authenticator,
    pub store: SheetStore,
    pub worksheets: Worksheets,
}

struct StateInner {
    portal: Result<Portal, String>,
    cookie_key: Key,
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.inner.cookie_key.clone()
    }
}

impl AppState {
    /// Loads secrets and connects the store. Failures do not stop the server:
    /// they are kept and rendered as the single error page for every request.
    pub async fn new() -> Self {
        let path = config::secrets_path_from_env();
        let secrets = match config::load_secrets(&path) {
            Ok(secrets) => secrets,
            Err(err) => {
                error!(%err, "failed to load secrets");
                return Self::failed(format!("Configuration error: {err}"));
            }
        };

        let store = match build_store(&secrets) {
            Ok(store) => store,
            Err(err) => {
                error!(?err, "failed to initialize spreadsheet store");
                return Self::failed(format!("Spreadsheet store error: {err:#}"));
            }
        };

        let state = Self::from_parts(&secrets, store);
        if let Ok(portal) = &state.inner.portal {
            info!(backend = portal.store.backend_name(), "spreadsheet store ready");
            if let Err(err) = portal.prepare_worksheets().await {
                warn!(?err, "could not verify worksheet headers; continuing");
            }
        }
        state
    }

    pub fn from_parts(secrets: &Secrets, store: SheetStore) -> Self {
        let worksheets = secrets
            .sheets
            .as_ref()
            .map(|sheets| Worksheets {
                fuel: sheets.fuel_worksheet.clone(),
                refrigerant: sheets.refrigerant_worksheet.clone(),
            })
            .unwrap_or_default();

        Self {
            inner: Arc::new(StateInner {
                portal: Ok(Portal {
                    auth: Authenticator::new(&secrets.credentials, &secrets.cookie),
                    store,
                    worksheets,
                }),
                cookie_key: derive_cookie_key(&secrets.cookie.key),
            }),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StateInner {
                portal: Err(message.into()),
                cookie_key: Key::generate(),
            }),
        }
    }

    /// The running portal, or the startup error page.
    pub fn portal(&self) -> Result<&Portal, Response> {
        self.inner.portal.as_ref().map_err(|message| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render_startup_error(message)),
            )
                .into_response()
        })
    }
}

impl Portal {
    pub async fn prepare_worksheets(&self) -> Result<()> {
        self.store
            .ensure_header(&self.worksheets.fuel, FuelRecord::HEADER)
            .await
            .context("failed to prepare fuel worksheet")?;
        self.store
            .ensure_header(&self.worksheets.refrigerant, RefrigerantRecord::HEADER)
            .await
            .context("failed to prepare refrigerant worksheet")?;
        Ok(())
    }
}

fn build_store(secrets: &Secrets) -> Result<SheetStore> {
    match (&secrets.sheets, &secrets.service_account) {
        (Some(sheets), Some(account)) => Ok(SheetStore::GoogleSheets(GoogleSheetsClient::new(
            sheets,
            account.clone(),
        )?)),
        (Some(_), None) => Err(anyhow!(
            "a spreadsheet is configured but the `gcp_service_account` section is missing"
        )),
        (None, _) => {
            warn!("no spreadsheet configured; submissions are kept in memory only");
            Ok(SheetStore::Memory(MemorySheetStore::new()))
        }
    }
}
