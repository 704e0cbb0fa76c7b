pub mod types;
pub mod varint;

pub use types::{Entry, Key, PageNumber, Value, ENTRY_SIZE, INT_SIZE, NO_PAGE, NUM_PAGES, PAGE_SIZE};
