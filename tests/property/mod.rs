//! Property-based tests for closure and path invariants

mod path_properties;
