pub mod drafts;
pub mod emails;
pub mod health;
pub mod outbox;
pub mod projects;
pub mod users;
