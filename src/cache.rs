use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use huesync_api::EntityType;

use crate::model::EntityRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("No {0} data available yet")]
    NotPopulated(EntityType),

    #[error("No {0} with id {1:?}")]
    NotFound(EntityType, String),

    #[error("Cannot store {found} record in {expected} cache")]
    WrongType {
        expected: EntityType,
        found: EntityType,
    },
}

pub type CacheResult<T> = Result<T, CacheError>;

pub type EntityMap = BTreeMap<String, EntityRecord>;

#[derive(Debug, Default)]
struct Table {
    populated: bool,
    records: EntityMap,
}

/// Typed entity storage, one table per entity type.
///
/// A table is either unpopulated (nothing is readable) or holds a complete
/// snapshot. Reads against an unpopulated table fail with
/// [`CacheError::NotPopulated`] rather than returning stale or partial data.
#[derive(Debug, Default)]
pub struct EntityCache {
    tables: BTreeMap<EntityType, Table>,
    refresh: BTreeSet<EntityType>,
}

impl EntityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_type(expected: EntityType, record: &EntityRecord) -> CacheResult<()> {
        let found = record.entity_type();
        if found == expected {
            Ok(())
        } else {
            Err(CacheError::WrongType { expected, found })
        }
    }

    fn table(&self, etype: EntityType) -> CacheResult<&Table> {
        self.tables
            .get(&etype)
            .filter(|table| table.populated)
            .ok_or(CacheError::NotPopulated(etype))
    }

    fn table_mut(&mut self, etype: EntityType) -> CacheResult<&mut Table> {
        self.tables
            .get_mut(&etype)
            .filter(|table| table.populated)
            .ok_or(CacheError::NotPopulated(etype))
    }

    #[must_use]
    pub fn is_populated(&self, etype: EntityType) -> bool {
        self.table(etype).is_ok()
    }

    pub fn get(&self, etype: EntityType, id: &str) -> CacheResult<&EntityRecord> {
        self.table(etype)?
            .records
            .get(id)
            .ok_or_else(|| CacheError::NotFound(etype, id.to_string()))
    }

    /// Typed lookup, e.g. `cache.get_as::<Light>(EntityType::Light, "1")`.
    pub fn get_as<'a, T>(&'a self, etype: EntityType, id: &str) -> CacheResult<&'a T>
    where
        &'a T: TryFrom<&'a EntityRecord, Error = EntityType>,
    {
        self.get(etype, id)?
            .try_into()
            .map_err(|found| CacheError::WrongType {
                expected: etype,
                found,
            })
    }

    pub fn all(&self, etype: EntityType) -> CacheResult<&EntityMap> {
        Ok(&self.table(etype)?.records)
    }

    /// Store a single complete record, replacing any previous one with the
    /// same id. Partial changes go through [`EntityCache::update`] instead.
    ///
    /// Returns whether anything changed, so writing identical content twice
    /// is observable as a no-op.
    pub fn put(&mut self, etype: EntityType, id: &str, record: EntityRecord) -> CacheResult<bool> {
        Self::check_type(etype, &record)?;
        let table = self.table_mut(etype)?;

        if table.records.get(id) == Some(&record) {
            return Ok(false);
        }
        table.records.insert(id.to_string(), record);
        Ok(true)
    }

    /// Modify a record in place. Returns whether the record changed.
    pub fn update(
        &mut self,
        etype: EntityType,
        id: &str,
        func: impl FnOnce(&mut EntityRecord),
    ) -> CacheResult<bool> {
        let record = self
            .table_mut(etype)?
            .records
            .get_mut(id)
            .ok_or_else(|| CacheError::NotFound(etype, id.to_string()))?;

        let before = record.clone();
        func(record);
        let found = record.entity_type();
        if found != etype {
            *record = before;
            return Err(CacheError::WrongType {
                expected: etype,
                found,
            });
        }
        Ok(*record != before)
    }

    /// Swap in a complete snapshot for one entity type.
    ///
    /// Every record is validated before anything is replaced, so a failed
    /// call leaves the previous contents untouched.
    pub fn replace_all(&mut self, etype: EntityType, records: EntityMap) -> CacheResult<()> {
        for record in records.values() {
            Self::check_type(etype, record)?;
        }

        let table = self.tables.entry(etype).or_default();
        table.records = records;
        table.populated = true;
        self.refresh.remove(&etype);
        Ok(())
    }

    /// Forget everything known about one entity type, and signal that a full
    /// fetch is needed before it can be read again.
    pub fn clear(&mut self, etype: EntityType) {
        self.tables.remove(&etype);
        self.refresh.insert(etype);
    }

    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        !self.refresh.is_empty()
    }

    pub fn take_refresh_requests(&mut self) -> BTreeSet<EntityType> {
        std::mem::take(&mut self.refresh)
    }
}
