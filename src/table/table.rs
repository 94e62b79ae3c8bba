//! Table implementation

use crate::catalog::{Catalog, RowAssignments, RowPredicate, TableHandle, ValueRow};
use crate::data::Value;
use crate::schema::{ColumnSpec, DynRecord, Record, RowSchema, TypedRecord};
use crate::{Result, RowbaseError};
use ahash::{AHashMap, AHashSet};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use std::any::Any;
use std::sync::{Arc, Weak};

/// Row counts above this use a parallel predicate scan.
const PARALLEL_SCAN_THRESHOLD: usize = 50_000;

/// A table over one row type.
///
/// All mutations take the table's write lock; all reads take its read lock.
/// Cross-table checks (foreign-key targets, referencing tables) read the
/// foreign table under that table's own read lock, never holding two write
/// locks at once.
pub struct Table<R: Record> {
    name: String,
    schema: Arc<RowSchema>,
    factory: Box<dyn Fn() -> R + Send + Sync>,
    transient: bool,
    catalog: Weak<Catalog>,
    state: RwLock<TableState<R>>,
    dependents: Mutex<DependentsCache>,
}

impl<R: Record> std::fmt::Debug for Table<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("transient", &self.transient)
            .finish()
    }
}

struct TableState<R> {
    rows: Vec<R>,
    /// Primary-key value (key form) → index into `rows`. Present iff the row
    /// type has a primary key.
    pk_index: AHashMap<Value, usize>,
    next_auto: i64,
}

/// Cached "who references me" set, keyed on the catalog version.
struct DependentsCache {
    version: u64,
    valid: bool,
    entries: Vec<CachedDependent>,
}

struct CachedDependent {
    /// `None` marks a self-reference, checked against the acting table's own
    /// locked rows (the table lock is non-recursive).
    handle: Option<Weak<dyn TableHandle>>,
    fk_columns: Vec<String>,
}

impl<R: TypedRecord> Table<R> {
    /// A table for a compile-time row type.
    pub fn typed(name: impl Into<String>, catalog: Weak<Catalog>) -> Arc<Self> {
        Self::with_parts(name, R::schema(), Box::new(R::empty), false, catalog)
    }
}

impl Table<DynRecord> {
    /// A table for a runtime-described row type. Dynamic tables are excluded
    /// from snapshots when `transient` is set.
    pub fn dynamic(
        name: impl Into<String>,
        schema: Arc<RowSchema>,
        transient: bool,
        catalog: Weak<Catalog>,
    ) -> Arc<Self> {
        let row_schema = schema.clone();
        Self::with_parts(
            name,
            schema,
            Box::new(move || DynRecord::new(row_schema.clone())),
            transient,
            catalog,
        )
    }
}

impl<R: Record> Table<R> {
    fn with_parts(
        name: impl Into<String>,
        schema: Arc<RowSchema>,
        factory: Box<dyn Fn() -> R + Send + Sync>,
        transient: bool,
        catalog: Weak<Catalog>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into().trim().to_string(),
            schema,
            factory,
            transient,
            catalog,
            state: RwLock::new(TableState {
                rows: Vec::new(),
                pk_index: AHashMap::new(),
                next_auto: 1,
            }),
            dependents: Mutex::new(DependentsCache {
                version: 0,
                valid: false,
                entries: Vec::new(),
            }),
        })
    }

    /// Insert a copy of `row`, assigning the auto-increment key when absent.
    /// Returns the stored copy (with its assigned primary key).
    pub fn insert(&self, row: &R) -> Result<R> {
        let mut state = self.state.write();
        self.insert_locked(&mut state, row.clone())
    }

    /// Insert all rows or none.
    ///
    /// Auto-increment assignment happens in two passes so that presets
    /// anywhere in the batch win over assigned values: first every positive
    /// preset advances the counter, then rows without one get fresh keys.
    pub fn insert_range(&self, rows: &[R]) -> Result<Vec<R>> {
        let mut state = self.state.write();
        let mut staged: Vec<R> = rows.to_vec();

        if let Some(pk) = self.schema.primary_key() {
            if pk.auto_increment {
                for row in &staged {
                    if let Some(preset) = preset_key(row, pk) {
                        state.next_auto = state.next_auto.max(preset + 1);
                    }
                }
                for row in &mut staged {
                    if preset_key(row, pk).is_none() {
                        let id = state.next_auto;
                        state.next_auto += 1;
                        row.set(&pk.name, Value::Int64(id))?;
                    }
                }
            }
        }

        let mut batch_keys: AHashSet<Value> = AHashSet::new();
        for row in &staged {
            self.validate_row(&state, row)?;
            if let Some(pk) = self.schema.primary_key() {
                let key = self.pk_key_of(row, pk)?;
                if state.pk_index.contains_key(&key) || !batch_keys.insert(key.clone()) {
                    return Err(RowbaseError::DuplicatePrimaryKey(format!(
                        "{}: {}",
                        self.name, key
                    )));
                }
            }
        }

        for row in &staged {
            let idx = state.rows.len();
            if let Some(pk) = self.schema.primary_key() {
                let key = self.pk_key_of(row, pk)?;
                state.pk_index.insert(key, idx);
            }
            state.rows.push(row.clone());
        }
        Ok(staged)
    }

    /// An independent copy of the row with this primary key.
    pub fn find_by_pk(&self, key: &Value) -> Option<R> {
        let pk = self.schema.primary_key()?;
        let lookup = key.coerce_to(pk.data_type).unwrap_or_else(|_| key.clone());
        let state = self.state.read();
        state
            .pk_index
            .get(&lookup.key_form())
            .map(|&idx| state.rows[idx].clone())
    }

    /// Remove the row with this primary key. Refuses while any other row
    /// still references it.
    pub fn delete_by_pk(&self, key: &Value) -> Result<bool> {
        let Some(pk) = self.schema.primary_key() else {
            return Err(RowbaseError::InvalidArgument(format!(
                "{}: row type has no primary key",
                self.name
            )));
        };
        let lookup = key.coerce_to(pk.data_type).unwrap_or_else(|_| key.clone());
        let mut state = self.state.write();
        let Some(&idx) = state.pk_index.get(&lookup.key_form()) else {
            return Ok(false);
        };
        let mut excluded = AHashSet::new();
        excluded.insert(idx);
        if let Some(referencer) =
            self.find_reference_to(&state, &lookup.key_form(), &excluded)
        {
            return Err(RowbaseError::ReferentialIntegrity(format!(
                "{} row {} is referenced by {}",
                self.name, lookup, referencer
            )));
        }
        self.remove_rows(&mut state, &[idx]);
        Ok(true)
    }

    /// Remove every row matching the predicate. Fails without modifying
    /// anything if any matching row is still referenced.
    pub fn delete(&self, predicate: impl Fn(&R) -> bool) -> Result<usize> {
        let mut state = self.state.write();
        let matched: Vec<usize> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| predicate(&(*row).clone()))
            .map(|(idx, _)| idx)
            .collect();
        if matched.is_empty() {
            return Ok(0);
        }

        if let Some(pk) = self.schema.primary_key() {
            let excluded: AHashSet<usize> = matched.iter().copied().collect();
            for &idx in &matched {
                let key = self.pk_key_of(&state.rows[idx], pk)?;
                if let Some(referencer) = self.find_reference_to(&state, &key, &excluded) {
                    return Err(RowbaseError::ReferentialIntegrity(format!(
                        "{} row {} is referenced by {}",
                        self.name, key, referencer
                    )));
                }
            }
        }

        let count = matched.len();
        self.remove_rows(&mut state, &matched);
        Ok(count)
    }

    /// Mutate a copy of each matching row, re-validate it, and store it.
    /// Returns the number of rows changed.
    pub fn update(
        &self,
        predicate: impl Fn(&R) -> bool,
        mutate: impl Fn(&mut R),
    ) -> Result<usize> {
        self.update_core(
            |row| predicate(row),
            |row| {
                mutate(row);
                Ok(())
            },
        )
    }

    /// Copies of every row, in insertion order.
    pub fn rows(&self) -> Vec<R> {
        self.state.read().rows.to_vec()
    }

    /// Copies of the rows matching the predicate.
    pub fn select(&self, predicate: impl Fn(&R) -> bool + Sync) -> Vec<R> {
        let state = self.state.read();
        if state.rows.len() > PARALLEL_SCAN_THRESHOLD {
            state
                .rows
                .par_iter()
                .map(|row| row.clone())
                .filter(|row| predicate(row))
                .collect()
        } else {
            state
                .rows
                .iter()
                .map(|row| row.clone())
                .filter(|row| predicate(row))
                .collect()
        }
    }

    /// Drop all rows and reset the auto-increment counter.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.rows.clear();
        state.pk_index.clear();
        state.next_auto = 1;
    }

    pub fn len(&self) -> usize {
        self.state.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    // ---- insert pipeline ----

    fn insert_locked(&self, state: &mut TableState<R>, mut row: R) -> Result<R> {
        if let Some(pk) = self.schema.primary_key() {
            if pk.auto_increment {
                match preset_key(&row, pk) {
                    Some(preset) => state.next_auto = state.next_auto.max(preset + 1),
                    None => {
                        let id = state.next_auto;
                        state.next_auto += 1;
                        row.set(&pk.name, Value::Int64(id))?;
                    }
                }
            } else {
                let current = row.get(&pk.name).unwrap_or(Value::Null);
                if current.is_absent() {
                    return Err(RowbaseError::PrimaryKeyMissing(format!(
                        "{}.{}",
                        self.name, pk.name
                    )));
                }
            }
        }

        self.validate_row(state, &row)?;

        if let Some(pk) = self.schema.primary_key() {
            let key = self.pk_key_of(&row, pk)?;
            if state.pk_index.contains_key(&key) {
                return Err(RowbaseError::DuplicatePrimaryKey(format!(
                    "{}: {}",
                    self.name, key
                )));
            }
            state.pk_index.insert(key, state.rows.len());
        }
        state.rows.push(row.clone());
        Ok(row)
    }

    /// Required-field and foreign-key validation shared by insert and update.
    fn validate_row(&self, state: &TableState<R>, row: &R) -> Result<()> {
        for col in self.schema.columns() {
            if col.required {
                let value = row.get(&col.name).unwrap_or(Value::Null);
                if value.is_absent() {
                    return Err(RowbaseError::RequiredMissing(format!(
                        "{}.{}",
                        self.name, col.name
                    )));
                }
            }
        }
        for (col, target_tag) in self.schema.foreign_keys() {
            let value = row.get(&col.name).unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            if target_tag == self.schema.type_tag() {
                if !state.pk_index.contains_key(&value.key_form()) {
                    return Err(RowbaseError::ForeignKeyViolation(format!(
                        "{}.{} = {} has no matching row",
                        self.name, col.name, value
                    )));
                }
                continue;
            }
            let catalog = self.catalog.upgrade().ok_or_else(|| {
                RowbaseError::ForeignKeyViolation(format!(
                    "{}.{}: no catalog to resolve {}",
                    self.name, col.name, target_tag
                ))
            })?;
            let target = catalog.lookup(target_tag).ok_or_else(|| {
                RowbaseError::ForeignKeyViolation(format!(
                    "{}.{}: referenced type {} has no table",
                    self.name, col.name, target_tag
                ))
            })?;
            if !target.contains_pk(&value) {
                return Err(RowbaseError::ForeignKeyViolation(format!(
                    "{}.{} = {} not present in {}",
                    self.name,
                    col.name,
                    value,
                    target.name()
                )));
            }
        }
        Ok(())
    }

    fn update_core(
        &self,
        predicate: impl Fn(&R) -> bool,
        apply: impl Fn(&mut R) -> Result<()>,
    ) -> Result<usize> {
        let mut state = self.state.write();
        let pk = self.schema.primary_key();

        // Stage every mutation first; nothing is stored until the whole
        // batch validates.
        let mut staged: Vec<(usize, R, Option<(Value, Value)>)> = Vec::new();
        let mut new_keys: AHashSet<Value> = AHashSet::new();
        for idx in 0..state.rows.len() {
            let copy = state.rows[idx].clone();
            if !predicate(&copy) {
                continue;
            }
            let mut mutated = copy;
            apply(&mut mutated)?;
            self.validate_row(&state, &mutated)?;

            let mut key_change = None;
            if let Some(pk) = pk {
                let old_key = self.pk_key_of(&state.rows[idx], pk)?;
                let new_key = self.pk_key_of(&mutated, pk)?;
                if new_key != old_key {
                    let collides = match state.pk_index.get(&new_key) {
                        Some(&other) => other != idx,
                        None => false,
                    };
                    if collides || new_keys.contains(&new_key) {
                        return Err(RowbaseError::DuplicatePrimaryKey(format!(
                            "{}: {}",
                            self.name, new_key
                        )));
                    }
                    if let Some(referencer) =
                        self.find_reference_to(&state, &old_key, &AHashSet::new())
                    {
                        return Err(RowbaseError::ReferentialIntegrity(format!(
                            "{} row {} is referenced by {}",
                            self.name, old_key, referencer
                        )));
                    }
                    new_keys.insert(new_key.clone());
                    key_change = Some((old_key, new_key));
                }
            }
            staged.push((idx, mutated, key_change));
        }

        let count = staged.len();
        for (idx, row, key_change) in staged {
            state.rows[idx] = row;
            if let Some((old_key, new_key)) = key_change {
                state.pk_index.remove(&old_key);
                state.pk_index.insert(new_key, idx);
            }
        }
        Ok(count)
    }

    // ---- referencing checks ----

    /// Name of a table holding a foreign key equal to `key`, if any.
    /// `excluded_self_rows` are this table's own rows about to be removed in
    /// the same call; they do not count as referencers.
    fn find_reference_to(
        &self,
        state: &TableState<R>,
        key: &Value,
        excluded_self_rows: &AHashSet<usize>,
    ) -> Option<String> {
        for dependent in self.dependents() {
            match dependent.handle {
                None => {
                    for col in &dependent.fk_columns {
                        let hit = state.rows.iter().enumerate().any(|(idx, row)| {
                            !excluded_self_rows.contains(&idx)
                                && row
                                    .get(col)
                                    .map(|v| v.key_form() == *key)
                                    .unwrap_or(false)
                        });
                        if hit {
                            return Some(self.name.clone());
                        }
                    }
                }
                Some(ref weak) => {
                    let Some(handle) = weak.upgrade() else { continue };
                    for col in &dependent.fk_columns {
                        if handle.holds_reference(col, key) {
                            return Some(handle.name().to_string());
                        }
                    }
                }
            }
        }
        None
    }

    /// Referencing tables, rebuilt when the catalog version has advanced.
    fn dependents(&self) -> Vec<ResolvedDependent> {
        let Some(catalog) = self.catalog.upgrade() else {
            return Vec::new();
        };
        let version = catalog.version();
        let mut cache = self.dependents.lock();
        if !cache.valid || cache.version != version {
            cache.entries = catalog
                .dependents_of(self.schema.type_tag())
                .into_iter()
                .map(|dep| {
                    let is_self = dep.handle.type_tag() == self.schema.type_tag();
                    CachedDependent {
                        handle: if is_self {
                            None
                        } else {
                            Some(Arc::downgrade(&dep.handle))
                        },
                        fk_columns: dep.fk_columns,
                    }
                })
                .collect();
            cache.version = version;
            cache.valid = true;
        }
        cache
            .entries
            .iter()
            .map(|entry| ResolvedDependent {
                handle: entry.handle.clone(),
                fk_columns: entry.fk_columns.clone(),
            })
            .collect()
    }

    fn remove_rows(&self, state: &mut TableState<R>, indices: &[usize]) {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        for idx in sorted.into_iter().rev() {
            state.rows.remove(idx);
        }
        self.rebuild_pk_index(state);
    }

    fn rebuild_pk_index(&self, state: &mut TableState<R>) {
        state.pk_index.clear();
        if let Some(pk) = self.schema.primary_key() {
            for (idx, row) in state.rows.iter().enumerate() {
                if let Some(value) = row.get(&pk.name) {
                    if !value.is_absent() {
                        state.pk_index.insert(value.key_form(), idx);
                    }
                }
            }
        }
    }

    fn pk_key_of(&self, row: &R, pk: &ColumnSpec) -> Result<Value> {
        let value = row.get(&pk.name).unwrap_or(Value::Null);
        if value.is_absent() {
            return Err(RowbaseError::PrimaryKeyMissing(format!(
                "{}.{}",
                self.name, pk.name
            )));
        }
        Ok(value.key_form())
    }

    fn row_to_values(&self, row: &R) -> ValueRow {
        let mut out = ValueRow::with_capacity(self.schema.columns().len());
        for col in self.schema.columns() {
            out.insert(
                col.name.clone(),
                row.get(&col.name).unwrap_or(Value::Null),
            );
        }
        out
    }

    fn make_row(&self) -> R {
        (self.factory)()
    }
}

struct ResolvedDependent {
    handle: Option<Weak<dyn TableHandle>>,
    fk_columns: Vec<String>,
}

impl<R: Record> TableHandle for Table<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_tag(&self) -> &str {
        self.schema.type_tag()
    }

    fn schema(&self) -> Arc<RowSchema> {
        self.schema.clone()
    }

    fn len(&self) -> usize {
        Table::len(self)
    }

    fn is_transient(&self) -> bool {
        self.transient
    }

    fn contains_pk(&self, key: &Value) -> bool {
        let Some(pk) = self.schema.primary_key() else {
            return false;
        };
        let lookup = key.coerce_to(pk.data_type).unwrap_or_else(|_| key.clone());
        self.state.read().pk_index.contains_key(&lookup.key_form())
    }

    fn holds_reference(&self, fk_column: &str, key: &Value) -> bool {
        let Some(col) = self.schema.column_ci(fk_column) else {
            return false;
        };
        let target = key
            .coerce_to(col.data_type)
            .unwrap_or_else(|_| key.clone())
            .key_form();
        self.state.read().rows.iter().any(|row| {
            row.get(&col.name)
                .map(|v| v.key_form() == target)
                .unwrap_or(false)
        })
    }

    fn rows_as_values(&self) -> Vec<ValueRow> {
        let state = self.state.read();
        state.rows.iter().map(|row| self.row_to_values(row)).collect()
    }

    fn insert_values(&self, values: ValueRow) -> Result<()> {
        let mut row = self.make_row();
        for (column, value) in values {
            row.set(&column, value)?;
        }
        let mut state = self.state.write();
        self.insert_locked(&mut state, row)?;
        Ok(())
    }

    fn update_values(
        &self,
        predicate: RowPredicate,
        assignments: RowAssignments,
    ) -> Result<usize> {
        self.update_core(
            |row| predicate(&self.row_to_values(row)),
            |row| {
                for (column, value) in assignments(&self.row_to_values(row))? {
                    row.set(&column, value)?;
                }
                Ok(())
            },
        )
    }

    fn delete_values(&self, predicate: RowPredicate) -> Result<usize> {
        self.delete(|row| predicate(&self.row_to_values(row)))
    }

    fn clear_all(&self) {
        self.clear();
    }

    fn rows_to_json(&self) -> Result<Vec<serde_json::Value>> {
        let state = self.state.read();
        let mut out = Vec::with_capacity(state.rows.len());
        for row in &state.rows {
            let mut object = serde_json::Map::new();
            for col in self.schema.columns() {
                let value = row.get(&col.name).unwrap_or(Value::Null);
                object.insert(col.name.clone(), value.to_json());
            }
            out.push(serde_json::Value::Object(object));
        }
        Ok(out)
    }

    fn load_rows_json(&self, rows: &[serde_json::Value]) -> Result<()> {
        let mut state = self.state.write();
        state.rows.clear();
        state.pk_index.clear();
        state.next_auto = 1;

        for json in rows {
            let object = json.as_object().ok_or_else(|| {
                RowbaseError::Serialization(format!("{}: row is not a JSON object", self.name))
            })?;
            let mut row = self.make_row();
            for col in self.schema.columns() {
                if let Some(cell) = object.get(&col.name) {
                    row.set(&col.name, Value::from_json(cell, col.data_type)?)?;
                }
            }
            if let Some(pk) = self.schema.primary_key() {
                let key = self.pk_key_of(&row, pk)?;
                if state.pk_index.contains_key(&key) {
                    return Err(RowbaseError::DuplicatePrimaryKey(format!(
                        "{}: {}",
                        self.name, key
                    )));
                }
                if pk.auto_increment {
                    if let Some(id) = key.as_integer() {
                        state.next_auto = state.next_auto.max(id + 1);
                    }
                }
                let row_idx = state.rows.len();
                state.pk_index.insert(key, row_idx);
            }
            state.rows.push(row);
        }
        Ok(())
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<R: Record> Drop for Table<R> {
    fn drop(&mut self) {
        if let Some(catalog) = self.catalog.upgrade() {
            catalog.deregister(self.schema.type_tag());
        }
    }
}

fn preset_key<R: Record>(row: &R, pk: &ColumnSpec) -> Option<i64> {
    row.get(&pk.name)
        .and_then(|v| v.as_integer())
        .filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;

    record! {
        pub struct Parent("test.Parent") {
            id: i32 => Int32 [primary_key auto_increment],
            name: String => String [required],
        }
    }

    record! {
        pub struct Child("test.Child") {
            id: i32 => Int32 [primary_key auto_increment],
            parent_id: Option<i32> => Int32 [references "test.Parent"],
            name: String => String,
        }
    }

    fn setup() -> (Arc<Catalog>, Arc<Table<Parent>>, Arc<Table<Child>>) {
        let catalog = Catalog::new();
        let parents = Table::<Parent>::typed("Parents", Arc::downgrade(&catalog));
        let children = Table::<Child>::typed("Children", Arc::downgrade(&catalog));
        let parent_handle: Arc<dyn TableHandle> = parents.clone();
        let child_handle: Arc<dyn TableHandle> = children.clone();
        catalog.register(&parent_handle);
        catalog.register(&child_handle);
        (catalog, parents, children)
    }

    fn parent(name: &str) -> Parent {
        Parent {
            id: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_auto_increment_and_clone_independence() {
        let (_c, parents, _) = setup();
        let mut caller = parent("A");
        let stored = parents.insert(&caller).unwrap();
        assert_eq!(stored.id, 1);

        caller.name = "X".to_string();
        let found = parents.find_by_pk(&Value::Int32(1)).unwrap();
        assert_eq!(found.name, "A");
    }

    #[test]
    fn test_preset_advances_counter() {
        let (_c, parents, _) = setup();
        parents
            .insert(&Parent {
                id: 10,
                name: "M".to_string(),
            })
            .unwrap();
        let next = parents.insert(&parent("N")).unwrap();
        assert_eq!(next.id, 11);
    }

    #[test]
    fn test_nonpositive_preset_is_absent() {
        let (_c, parents, _) = setup();
        let stored = parents
            .insert(&Parent {
                id: -5,
                name: "A".to_string(),
            })
            .unwrap();
        assert_eq!(stored.id, 1);
    }

    #[test]
    fn test_required_rejects_empty_string() {
        let (_c, parents, _) = setup();
        let err = parents.insert(&parent("")).unwrap_err();
        assert!(matches!(err, RowbaseError::RequiredMissing(_)));
        assert!(parents.is_empty());
    }

    #[test]
    fn test_duplicate_pk_rejected() {
        let (_c, parents, _) = setup();
        parents
            .insert(&Parent {
                id: 3,
                name: "A".to_string(),
            })
            .unwrap();
        let err = parents
            .insert(&Parent {
                id: 3,
                name: "B".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, RowbaseError::DuplicatePrimaryKey(_)));
    }

    #[test]
    fn test_fk_checked_on_insert() {
        let (_c, parents, children) = setup();
        let err = children
            .insert(&Child {
                id: 0,
                parent_id: Some(9),
                name: "orphan".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, RowbaseError::ForeignKeyViolation(_)));

        parents.insert(&parent("P")).unwrap();
        children
            .insert(&Child {
                id: 0,
                parent_id: Some(1),
                name: "ok".to_string(),
            })
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_null_fk_allowed() {
        let (_c, _parents, children) = setup();
        children
            .insert(&Child {
                id: 0,
                parent_id: None,
                name: "floating".to_string(),
            })
            .unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn test_delete_refused_while_referenced() {
        let (_c, parents, children) = setup();
        parents.insert(&parent("P")).unwrap();
        children
            .insert(&Child {
                id: 0,
                parent_id: Some(1),
                name: "C".to_string(),
            })
            .unwrap();

        let err = parents.delete_by_pk(&Value::Int32(1)).unwrap_err();
        assert!(matches!(err, RowbaseError::ReferentialIntegrity(_)));
        assert_eq!(parents.len(), 1);

        children.delete(|c| c.parent_id == Some(1)).unwrap();
        assert!(parents.delete_by_pk(&Value::Int32(1)).unwrap());
        assert!(parents.is_empty());
    }

    #[test]
    fn test_update_revalidates() {
        let (_c, parents, children) = setup();
        parents.insert(&parent("P")).unwrap();
        children
            .insert(&Child {
                id: 0,
                parent_id: Some(1),
                name: "C".to_string(),
            })
            .unwrap();

        // Clearing a required field fails and changes nothing.
        let err = parents
            .update(|p| p.id == 1, |p| p.name = String::new())
            .unwrap_err();
        assert!(matches!(err, RowbaseError::RequiredMissing(_)));
        assert_eq!(parents.find_by_pk(&Value::Int32(1)).unwrap().name, "P");

        // Changing a referenced PK fails.
        let err = parents.update(|p| p.id == 1, |p| p.id = 2).unwrap_err();
        assert!(matches!(err, RowbaseError::ReferentialIntegrity(_)));

        // A plain field update succeeds.
        let changed = parents
            .update(|p| p.id == 1, |p| p.name = "P2".to_string())
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(parents.find_by_pk(&Value::Int32(1)).unwrap().name, "P2");
    }

    #[test]
    fn test_update_pk_change_when_unreferenced() {
        let (_c, parents, _children) = setup();
        parents.insert(&parent("P")).unwrap();
        let changed = parents.update(|p| p.id == 1, |p| p.id = 42).unwrap();
        assert_eq!(changed, 1);
        assert!(parents.find_by_pk(&Value::Int32(1)).is_none());
        assert!(parents.find_by_pk(&Value::Int32(42)).is_some());
    }

    #[test]
    fn test_insert_range_is_atomic() {
        let (_c, parents, _) = setup();
        let batch = vec![parent("A"), parent(""), parent("C")];
        assert!(parents.insert_range(&batch).is_err());
        assert!(parents.is_empty());

        let batch = vec![
            parent("A"),
            Parent {
                id: 7,
                name: "B".to_string(),
            },
            parent("C"),
        ];
        let stored = parents.insert_range(&batch).unwrap();
        // Presets win first; fresh keys follow the highest preset.
        assert_eq!(
            stored.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![8, 7, 9]
        );

        let next = parents.insert(&parent("D")).unwrap();
        assert_eq!(next.id, 10);
    }

    #[test]
    fn test_clear_resets_auto_increment() {
        let (_c, parents, _) = setup();
        parents.insert(&parent("A")).unwrap();
        parents.insert(&parent("B")).unwrap();
        parents.clear();
        assert!(parents.is_empty());
        let stored = parents.insert(&parent("C")).unwrap();
        assert_eq!(stored.id, 1);
    }

    #[test]
    fn test_pk_index_matches_rows() {
        let (_c, parents, _) = setup();
        for i in 0..20 {
            parents.insert(&parent(&format!("p{}", i))).unwrap();
        }
        parents.delete(|p| p.id % 3 == 0).unwrap();
        let rows = parents.rows();
        let state = parents.state.read();
        assert_eq!(state.pk_index.len(), rows.len());
        for row in &rows {
            assert_eq!(
                parents.find_by_pk(&Value::Int32(row.id)).unwrap().name,
                row.name
            );
        }
    }

    #[test]
    fn test_json_round_trip() {
        let (_c, parents, _) = setup();
        parents.insert(&parent("A")).unwrap();
        parents
            .insert(&Parent {
                id: 5,
                name: "B".to_string(),
            })
            .unwrap();

        let json = TableHandle::rows_to_json(parents.as_ref()).unwrap();
        let (catalog2, parents2, _) = {
            let c = Catalog::new();
            let p = Table::<Parent>::typed("Parents", Arc::downgrade(&c));
            let handle: Arc<dyn TableHandle> = p.clone();
            c.register(&handle);
            (c, p, ())
        };
        let _ = catalog2;
        parents2.load_rows_json(&json).unwrap();

        assert_eq!(parents2.len(), 2);
        assert_eq!(parents2.find_by_pk(&Value::Int32(5)).unwrap().name, "B");
        // Counter resumes past the highest loaded key.
        let next = parents2.insert(&parent("C")).unwrap();
        assert_eq!(next.id, 6);
    }
}
