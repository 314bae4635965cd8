//! Change-tracking records for the upsert protocol.
//!
//! Grant tooling edits operation sets and targets through records that
//! remember whether they were loaded from storage (`found`) and whether a
//! setter changed them (`changed`). `save` persists nothing unless changed,
//! INSERTs a fresh record and UPDATEs a loaded one.

use opgrant_domain::{EntityId, TargetType};

use crate::error::{StorageError, StorageResult};
use crate::traits::{AccessStore, TargetFilter};

fn missing_id() -> StorageError {
    StorageError::QueryError {
        message: "record marked found but carries no id".to_string(),
    }
}

/// Editable view of an operation set row.
#[derive(Debug, Clone)]
pub struct OpSetRecord {
    op_set_id: Option<EntityId>,
    name: String,
    found: bool,
    changed: bool,
}

impl OpSetRecord {
    /// Loads an existing set by id.
    pub async fn find<S: AccessStore + ?Sized>(
        store: &S,
        op_set_id: EntityId,
    ) -> StorageResult<Self> {
        let row = store.get_op_set(op_set_id).await?;
        Ok(Self {
            op_set_id: Some(row.op_set_id),
            name: row.name,
            found: true,
            changed: false,
        })
    }

    /// Loads an existing set by name.
    pub async fn find_by_name<S: AccessStore + ?Sized>(
        store: &S,
        name: &str,
    ) -> StorageResult<Self> {
        let row = store.get_op_set_by_name(name).await?;
        Ok(Self {
            op_set_id: Some(row.op_set_id),
            name: row.name,
            found: true,
            changed: false,
        })
    }

    /// Starts a fresh, unsaved record.
    pub fn populate(name: impl Into<String>) -> Self {
        Self {
            op_set_id: None,
            name: name.into(),
            found: false,
            changed: true,
        }
    }

    pub fn op_set_id(&self) -> Option<EntityId> {
        self.op_set_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renames the set, raising the changed flag when the name differs.
    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.name = name;
            self.changed = true;
        }
    }

    /// Persists pending changes. Returns whether a new row was inserted;
    /// `Ok(false)` without touching storage when nothing changed.
    pub async fn save<S: AccessStore + ?Sized>(&mut self, store: &S) -> StorageResult<bool> {
        if !self.changed {
            return Ok(false);
        }
        let is_new = !self.found;
        if is_new {
            self.op_set_id = Some(store.insert_op_set(&self.name).await?);
        } else {
            let id = self.op_set_id.ok_or_else(missing_id)?;
            store.update_op_set(id, &self.name).await?;
        }
        self.found = true;
        self.changed = false;
        Ok(is_new)
    }
}

/// Editable view of an operation target row.
#[derive(Debug, Clone)]
pub struct TargetRecord {
    op_target_id: Option<EntityId>,
    entity_id: Option<EntityId>,
    target_type: TargetType,
    found: bool,
    changed: bool,
}

impl TargetRecord {
    /// Loads an existing target by id.
    pub async fn find<S: AccessStore + ?Sized>(
        store: &S,
        op_target_id: EntityId,
    ) -> StorageResult<Self> {
        let row = store.get_target(op_target_id).await?;
        Ok(Self {
            op_target_id: Some(row.op_target_id),
            entity_id: row.entity_id,
            target_type: row.target_type,
            found: true,
            changed: false,
        })
    }

    /// Starts a fresh, unsaved record.
    pub fn populate(entity_id: Option<EntityId>, target_type: TargetType) -> Self {
        Self {
            op_target_id: None,
            entity_id,
            target_type,
            found: false,
            changed: true,
        }
    }

    pub fn op_target_id(&self) -> Option<EntityId> {
        self.op_target_id
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        self.entity_id
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    /// Points the target at another entity.
    pub fn set_entity_id(&mut self, entity_id: Option<EntityId>) {
        if entity_id != self.entity_id {
            self.entity_id = entity_id;
            self.changed = true;
        }
    }

    /// Changes the target's category.
    pub fn set_target_type(&mut self, target_type: TargetType) {
        if target_type != self.target_type {
            self.target_type = target_type;
            self.changed = true;
        }
    }

    /// Persists pending changes; `has_attr` is re-derived by the store on
    /// update. Returns whether a new row was inserted.
    pub async fn save<S: AccessStore + ?Sized>(&mut self, store: &S) -> StorageResult<bool> {
        if !self.changed {
            return Ok(false);
        }
        let is_new = !self.found;
        if is_new {
            self.op_target_id = Some(store.insert_target(self.entity_id, self.target_type).await?);
        } else {
            let id = self.op_target_id.ok_or_else(missing_id)?;
            store
                .update_target(id, self.entity_id, self.target_type)
                .await?;
        }
        self.found = true;
        self.changed = false;
        Ok(is_new)
    }
}

/// Upserts an operation set by name: returns the existing set's id, or
/// inserts a fresh one.
pub async fn create_or_update_op_set<S: AccessStore + ?Sized>(
    store: &S,
    name: &str,
) -> StorageResult<EntityId> {
    match store.get_op_set_by_name(name).await {
        Ok(row) => Ok(row.op_set_id),
        Err(StorageError::OpSetNameNotFound { .. }) => {
            let mut record = OpSetRecord::populate(name);
            record.save(store).await?;
            record.op_set_id().ok_or_else(missing_id)
        }
        Err(e) => Err(e),
    }
}

/// Upserts a target on `(entity_id, target_type)`: rewrites the existing
/// row (re-deriving `has_attr`) or inserts a fresh one. Returns the target
/// id.
pub async fn create_or_update_target<S: AccessStore + ?Sized>(
    store: &S,
    entity_id: Option<EntityId>,
    target_type: TargetType,
) -> StorageResult<EntityId> {
    let existing = store
        .list_targets(&TargetFilter {
            entity_id,
            target_type: Some(target_type),
            ..Default::default()
        })
        .await?;
    match existing.first() {
        Some(row) => {
            store
                .update_target(row.op_target_id, entity_id, target_type)
                .await?;
            Ok(row.op_target_id)
        }
        None => {
            let mut record = TargetRecord::populate(entity_id, target_type);
            record.save(store).await?;
            record.op_target_id().ok_or_else(missing_id)
        }
    }
}
