pub mod store;
pub mod types;

pub use store::{RunStore, StoreError};
pub use types::{SessionHistory, SessionOutcome, SessionRecord};
