pub mod clock;
pub mod next_fire;
pub mod rule;

pub use clock::{resolve_local, round_to_minute, until_next_minute};
pub use next_fire::next_fire;
pub use rule::{Frequency, RecurrenceRule, ALL_WEEK, WEEKENDS, WORKDAYS};
