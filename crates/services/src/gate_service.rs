use std::sync::Arc;

use learn_core::gate::{self, GateDecision, GateError};
use learn_core::model::{ModuleId, ProgressRecord};

use crate::collaborators::Catalog;

/// Gate evaluation bound to the catalog and the configured forced unlock.
#[derive(Clone)]
pub struct GateService {
    catalog: Arc<dyn Catalog>,
    forced_unlock: Option<u32>,
}

impl GateService {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>, forced_unlock: Option<u32>) -> Self {
        Self {
            catalog,
            forced_unlock,
        }
    }

    #[must_use]
    pub fn sections_per_module(&self, module: ModuleId) -> u32 {
        self.catalog.sections_per_module(module)
    }

    /// # Errors
    ///
    /// Returns `GateError` if `section` is outside the module.
    pub fn section(
        &self,
        module: ModuleId,
        record: &ProgressRecord,
        section: u32,
    ) -> Result<GateDecision, GateError> {
        gate::evaluate(
            record,
            section,
            self.catalog.sections_per_module(module),
            self.forced_unlock,
        )
    }

    /// # Errors
    ///
    /// Returns `GateError::EmptyModule` if the catalog lists no sections.
    pub fn module(
        &self,
        module: ModuleId,
        record: &ProgressRecord,
    ) -> Result<Vec<GateDecision>, GateError> {
        gate::evaluate_module(
            record,
            self.catalog.sections_per_module(module),
            self.forced_unlock,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::StaticCatalog;

    #[test]
    fn uses_catalog_size_and_forced_unlock() {
        let catalog = Arc::new(StaticCatalog::uniform(3).with_module(ModuleId::new(2), 5));
        let record = ProgressRecord::new(2, [1]).unwrap();

        let plain = GateService::new(catalog.clone(), None);
        let decisions = plain.module(ModuleId::new(1), &record).unwrap();
        assert_eq!(decisions.len(), 3);
        assert!(decisions[0].is_completed);
        assert!(decisions[1].is_next);
        assert!(decisions[2].locked);

        let forced = GateService::new(catalog, Some(4));
        assert!(!forced.section(ModuleId::new(2), &record, 4).unwrap().locked);
        assert!(forced.section(ModuleId::new(2), &record, 5).unwrap().locked);
    }
}
