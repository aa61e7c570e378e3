pub mod delivery_stats;
pub mod email_draft;
pub mod ids;
pub mod outbox_email;
pub mod project;
pub mod project_user;
