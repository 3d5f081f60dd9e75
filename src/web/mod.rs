pub mod auth;
pub mod landing;
pub mod router;
pub mod state;
pub mod templates;

pub use state::AppState;
