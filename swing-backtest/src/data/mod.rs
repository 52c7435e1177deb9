pub mod loader;
pub mod types;

pub use loader::{parse_timestamp, BarLoader, LoaderError};
pub use types::{Bar, BarSeries, TimeWindow};
