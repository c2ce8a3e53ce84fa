pub mod model;
pub mod tabulate;

pub use model::{FittedModel, ModelFitter, ModelSpec};
pub use tabulate::{Aggregator, SimpleAggregator, TableQuery};
