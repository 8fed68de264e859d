//! Row hydration with cached field-to-ordinal binding.
//!
//! # Invariants
//! - Ordinals are bound once per result layout, never per row.
//! - NULL cells keep the field default; absent columns are skipped.

use crate::db::RowSet;
use crate::model::value::SqlValue;
use crate::model::MappingError;
use crate::registry::{EntityDescriptor, FieldDescriptor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Field-to-ordinal map for one result column layout.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct OrdinalBinding {
    layout: Vec<String>,
    /// Aligned with `EntityDescriptor::fields`; `None` when the column is absent.
    slots: Vec<Option<usize>>,
}

/// Ordinal binding cached per entity type.
///
/// A result set with a different column layout rebinds once and replaces
/// the cached binding.
#[derive(Default)]
pub(crate) struct OrdinalCache {
    binding: RwLock<Option<Arc<OrdinalBinding>>>,
    binds: AtomicUsize,
}

impl OrdinalCache {
    fn binding_for<E: 'static>(
        &self,
        fields: &[FieldDescriptor<E>],
        columns: &[String],
    ) -> Arc<OrdinalBinding> {
        if let Some(current) = self
            .binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if current.layout == columns {
                return Arc::clone(current);
            }
        }

        let slots = fields
            .iter()
            .map(|field| {
                columns
                    .iter()
                    .position(|column| column.eq_ignore_ascii_case(field.column()))
            })
            .collect();
        let fresh = Arc::new(OrdinalBinding {
            layout: columns.to_vec(),
            slots,
        });
        self.binds.fetch_add(1, Ordering::SeqCst);
        *self
            .binding
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&fresh));
        fresh
    }

    pub(crate) fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

/// Builds one entity per row.
///
/// `NULL` columns leave the field at its default; columns missing from the
/// result set are skipped.
pub(crate) fn hydrate_rows<E: Default + 'static>(
    descriptor: &EntityDescriptor<E>,
    rows: RowSet,
) -> Result<Vec<E>, MappingError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let fields = descriptor.fields();
    let binding = descriptor.ordinals.binding_for(fields, &rows.columns);

    rows.rows
        .into_iter()
        .map(|mut row| {
            let mut entity = E::default();
            for (field, slot) in fields.iter().zip(&binding.slots) {
                let Some(cell) = slot.and_then(|ordinal| row.get_mut(ordinal)) else {
                    continue;
                };
                let value = std::mem::replace(cell, SqlValue::Null);
                if value.is_null() {
                    continue;
                }
                field.write(&mut entity, value)?;
            }
            Ok(entity)
        })
        .collect()
}
