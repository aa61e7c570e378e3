mod auth;
mod model_loaders;

pub use auth::{ProjectContext, require_project_auth};
pub use model_loaders::load_outbox_email_middleware;
