//! Property tests for the model-type laws.

use proptest::prelude::*;

use super::{DiskInfo, OperationCode, TargetType};

proptest! {
    // Every integer either maps to exactly one known code or is rejected;
    // the mapping is its own inverse.
    #[test]
    fn prop_operation_code_decode_is_partial_inverse(code in -1000i32..1000) {
        match OperationCode::from_code(code) {
            Some(op) => prop_assert_eq!(op.code(), code),
            None => prop_assert!(!OperationCode::ALL.iter().any(|op| op.code() == code)),
        }
    }

    // A global category never has a global counterpart, and a counterpart,
    // when present, is always global.
    #[test]
    fn prop_global_counterpart_is_global(idx in 0usize..TargetType::ALL.len()) {
        let tt = TargetType::ALL[idx];
        if tt.is_global() {
            prop_assert_eq!(tt.global_counterpart(), None);
        }
        if let Some(g) = tt.global_counterpart() {
            prop_assert!(g.is_global());
        }
    }

    // basename never contains a separator and is always a suffix of the path.
    #[test]
    fn prop_disk_basename(path in "(/[a-z0-9-]{1,8}){0,4}[a-z0-9-]{1,8}") {
        let disk = DiskInfo { disk_id: 1, host_id: 1, path: path.clone() };
        let base = disk.basename();
        prop_assert!(!base.contains('/'));
        prop_assert!(path.ends_with(base));
    }
}
