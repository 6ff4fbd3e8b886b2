pub mod app;
pub mod config;
pub mod cookies;
pub mod download;
pub mod error;
pub mod events;
pub mod local_events;
pub mod models;
pub mod poller;
pub mod portal;
pub mod registry;
pub mod reservation;
pub mod session;

pub mod course_page_scraper;
pub mod courses_page_scraper;
pub mod home_page_scraper;
pub mod reservation_page_scraper;

mod ratelimit;
mod text_manipulators;

pub use app::{App, Command};
pub use config::PortalConfig;
pub use events::PortalEvent;
pub use local_events::LocalEventStore;
pub use portal::Portal;
pub use session::Session;
