//! Selection of history-worthy mutations.
//!
//! Capture is a pure filter over the mutations pending for one commit: it
//! drops excluded types and properties, untracked states, Added mutations
//! unless configured, and Modified mutations left without a modified property.

use crate::catalog::EntityCatalog;
use crate::config::HistoryConfig;
use crate::model::{EntityState, PendingChange};

/// Filters and classifies pending mutations.
#[derive(Debug, Clone, Copy)]
pub struct ChangeCapture<'a> {
    catalog: &'a EntityCatalog,
    config: &'a HistoryConfig,
}

impl<'a> ChangeCapture<'a> {
    /// Creates a capture pass over the given catalog and configuration.
    pub fn new(catalog: &'a EntityCatalog, config: &'a HistoryConfig) -> Self {
        Self { catalog, config }
    }

    /// Returns the mutations that must produce a history record.
    pub fn capture<I>(&self, pending: I) -> Vec<PendingChange>
    where
        I: IntoIterator<Item = PendingChange>,
    {
        pending
            .into_iter()
            .filter_map(|change| self.filter(change))
            .collect()
    }

    fn filter(&self, mut change: PendingChange) -> Option<PendingChange> {
        if matches!(change.state, EntityState::Unchanged | EntityState::Detached) {
            return None;
        }

        if self.catalog.is_type_excluded(&change.entity_name) {
            tracing::debug!(entity = %change.entity_name, "type excluded from history");
            return None;
        }

        let entity_name = change.entity_name.clone();
        change.properties.retain(|p| {
            !p.is_excluded && !self.catalog.is_property_excluded(&entity_name, &p.name)
        });

        match change.state {
            EntityState::Added if !self.config.capture_added => None,
            EntityState::Modified if !change.has_modified_properties() => {
                tracing::debug!(
                    entity = %change.entity_name,
                    handle = %change.entity,
                    "no modified property left after exclusion"
                );
                None
            }
            _ => Some(change),
        }
    }
}
