//! Interfaces the progression core consumes from the rest of the platform.

use std::collections::HashMap;

use learn_core::model::{Identity, ModuleId, QuizId};

/// Who is learning right now. Authentication happens elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Identity;
}

/// Identity fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticIdentity(pub Identity);

impl IdentityProvider for StaticIdentity {
    fn current(&self) -> Identity {
        self.0
    }
}

/// Where a quiz sits in the course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizPlacement {
    pub module: ModuleId,
    pub section: u32,
}

/// Course structure owned by the content service.
pub trait Catalog: Send + Sync {
    fn sections_per_module(&self, module: ModuleId) -> u32;

    /// The section a quiz closes, if the quiz belongs to a module.
    fn quiz_placement(&self, quiz: QuizId) -> Option<QuizPlacement>;
}

/// In-process catalog: one module size for every module unless overridden.
#[derive(Debug, Clone)]
pub struct StaticCatalog {
    default_sections: u32,
    module_sections: HashMap<ModuleId, u32>,
    placements: HashMap<QuizId, QuizPlacement>,
}

impl StaticCatalog {
    #[must_use]
    pub fn uniform(sections_per_module: u32) -> Self {
        Self {
            default_sections: sections_per_module,
            module_sections: HashMap::new(),
            placements: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: ModuleId, sections: u32) -> Self {
        self.module_sections.insert(module, sections);
        self
    }

    #[must_use]
    pub fn with_quiz(mut self, quiz: QuizId, module: ModuleId, section: u32) -> Self {
        self.placements
            .insert(quiz, QuizPlacement { module, section });
        self
    }
}

impl Catalog for StaticCatalog {
    fn sections_per_module(&self, module: ModuleId) -> u32 {
        self.module_sections
            .get(&module)
            .copied()
            .unwrap_or(self.default_sections)
    }

    fn quiz_placement(&self, quiz: QuizId) -> Option<QuizPlacement> {
        self.placements.get(&quiz).copied()
    }
}
