//! Google exit classification over recorded hop sequences.

pub mod classify;
pub mod table;

pub use classify::{classify, is_google_hop, is_google_org};
pub use table::{
    classify_all, read_hop_table, read_hop_table_path, status_counts, write_classification_table,
    RecordedTrace,
};
