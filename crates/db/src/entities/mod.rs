pub mod email_draft;
pub mod outbox_email;
pub mod project;
pub mod project_user;
