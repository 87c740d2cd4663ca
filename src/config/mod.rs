pub mod models;

pub use models::{
    format_timestamp, parse_legacy_date_time, parse_timestamp, EventConfig, ProfileConfig,
};
