pub mod capacity;
pub mod categories;
pub mod mailer;
pub mod recipient;
pub mod renderer;
pub mod worker;
