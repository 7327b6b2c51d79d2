pub mod models;
pub mod service;

pub use models::{Session, SessionStatus};
pub use service::SessionService;
