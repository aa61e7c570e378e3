use std::sync::Arc;

use db::DbService;
use services::services::{mailer::Mailer, renderer::TemplateRenderer};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub db: DbService,
    pub config: Arc<Config>,
    pub mailer: Arc<dyn Mailer>,
    pub renderer: Arc<dyn TemplateRenderer>,
}

impl AppState {
    pub fn new(
        db: DbService,
        config: Config,
        mailer: Arc<dyn Mailer>,
        renderer: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            mailer,
            renderer,
        }
    }
}
