//! CLI presentation: text and json formatters per command family.

mod catalog;
mod status;
mod sync;

pub use catalog::{
    format_ancestors, format_entry_path, format_file_matches, format_listing, format_tree,
    EntryPathView, ListingView,
};
pub use status::{format_check, format_status, StatusView};
pub use sync::{format_init_summary, format_sync_summary, InitSummary};

use crate::error::ApiError;
use serde::Serialize;

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::Output(e.to_string()))
}
