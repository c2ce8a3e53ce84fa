pub mod adapters;
pub mod config;
pub mod data;
pub mod ledger;
pub mod models;
pub mod regression;
pub mod rules;
pub mod session;
pub mod suppressions;
pub mod survival;
pub mod table;

pub use config::Policy;
pub use data::{DataValue, Dataset};
pub use models::{DisclosureSummary, OutputRecord, Status};
pub use session::Session;
pub use table::{AggFunc, AggregatedTable, EngineError, GroupSpec, OutcomeGrid};
