//! The sample school/CRM scenario served on top of the engine.

pub mod data;
pub mod entities;
pub mod schema;
pub mod source;

pub use data::{AppData, SchoolData};
pub use entities::{Customer, Department, Greeting, Profile, Student};
pub use schema::build_schema;
pub use source::{DataSource, FixtureSource, RotatingSource};
