//! Path codec round trips over arbitrary segment names

use proptest::prelude::*;
use scout::tree::path;

fn segment() -> impl Strategy<Value = String> {
    "[^/\\\\\u{0}]{1,12}".prop_filter("relative segments are invalid", |s| s != "." && s != "..")
}

proptest! {
    #[test]
    fn join_then_decompose_is_identity(segments in prop::collection::vec(segment(), 0..8)) {
        let joined = path::join(&segments);
        prop_assert!(joined.starts_with('/'));
        prop_assert_eq!(path::decompose(&joined).unwrap(), segments);
    }

    #[test]
    fn empty_segments_are_rejected(
        head in prop::collection::vec(segment(), 1..4),
        tail in prop::collection::vec(segment(), 0..4),
    ) {
        let broken = format!("{}/{}", path::join(&head), path::join(&tail));
        prop_assert!(path::decompose(&broken).is_err());
    }
}
