//! Model types shared by the engine and the storage layer.

mod types;

pub use types::{
    CheckMode, Decision, DiskInfo, EntityId, GrantMatch, OperationCode, TargetRef, TargetType,
};

#[cfg(test)]
mod types_proptest;
