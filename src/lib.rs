//! `aqi-watch`: polls IQAir for one city, keeps the history in SQL, and
//! serves it over JSON and Server-Sent Events.
//!
//! Module boundaries follow the Explicit Module Boundary Pattern (EMBP):
//! each module exposes a small surface and the binaries only wire them
//! together.
//!
//! - [`source`]: upstream client
//! - [`store`]: persistence and aggregate queries
//! - [`job`]: scheduled fetch-and-persist
//! - [`fanout`]: live update delivery
//! - [`overrides`] / [`auth`]: admin-controlled display overrides
//! - [`routes`]: the HTTP surface
//! - [`indicator`]: status-bar client logic

pub mod auth;
pub mod config;
pub mod error;
pub mod fanout;
pub mod indicator;
pub mod job;
pub mod models;
pub mod overrides;
pub mod routes;
pub mod schema;
pub mod source;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{NewReading, Reading};
pub use routes::{router, AppState};
