//! Integration tests for the scout file-tree catalog

mod cli_commands;
mod closure_invariants;
mod reconcile_scenarios;
mod test_utils;
