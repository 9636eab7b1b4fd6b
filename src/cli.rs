//! CLI domain: parse, route, output, and presentation only.
//! No catalog logic; a single route table dispatches to the store, reconciler and queries.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_ancestors, format_check, format_entry_path, format_file_matches, format_init_summary,
    format_listing, format_status, format_sync_summary, format_tree,
};
pub use route::{command_root, RunContext};
