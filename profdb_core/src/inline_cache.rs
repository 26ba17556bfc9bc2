//! Per-call-site receiver type history
//!
//! Each call site moves through a small state machine:
//!
//! ```text
//! Classes({}) --add C--> Classes({C}) --add past the limit--> Megamorphic
//!      \                     \                                    |
//!       `-------------------- `---- missing types -----> MissingTypes (absorbing)
//! ```
//!
//! Missing types wins over everything: once set, no classes are recorded and
//! the site never turns megamorphic.

use crate::types::{ClassRef, DexPc};
use std::collections::{BTreeMap, BTreeSet};

/// Call-site offset to observed receivers
pub type InlineCacheMap = BTreeMap<DexPc, SiteData>;

static NO_CLASSES: BTreeSet<ClassRef> = BTreeSet::new();

/// State of one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteState {
    /// Up to the configured number of distinct receivers
    Classes(BTreeSet<ClassRef>),
    /// More receivers were seen than the cache keeps
    Megamorphic,
    /// Some receiver could not be attributed to a tracked file
    MissingTypes,
}

/// Receiver history for one call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteData {
    state: SiteState,
}

impl Default for SiteData {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteData {
    pub fn new() -> Self {
        Self {
            state: SiteState::Classes(BTreeSet::new()),
        }
    }

    pub fn megamorphic() -> Self {
        Self {
            state: SiteState::Megamorphic,
        }
    }

    pub fn missing_types() -> Self {
        Self {
            state: SiteState::MissingTypes,
        }
    }

    pub fn state(&self) -> &SiteState {
        &self.state
    }

    /// Recorded receivers; empty for megamorphic and missing-types sites
    pub fn classes(&self) -> &BTreeSet<ClassRef> {
        match &self.state {
            SiteState::Classes(classes) => classes,
            _ => &NO_CLASSES,
        }
    }

    pub fn is_megamorphic(&self) -> bool {
        matches!(self.state, SiteState::Megamorphic)
    }

    pub fn is_missing_types(&self) -> bool {
        matches!(self.state, SiteState::MissingTypes)
    }

    /// Record a receiver. Returns true if the site changed.
    pub fn add_class(&mut self, class: ClassRef, limit: usize) -> bool {
        let SiteState::Classes(classes) = &mut self.state else {
            return false;
        };
        if classes.contains(&class) {
            return false;
        }
        if classes.len() >= limit {
            self.state = SiteState::Megamorphic;
        } else {
            classes.insert(class);
        }
        true
    }

    /// Mark the site megamorphic unless types are already missing
    pub fn set_is_megamorphic(&mut self) {
        if !self.is_missing_types() {
            self.state = SiteState::Megamorphic;
        }
    }

    pub fn set_is_missing_types(&mut self) {
        self.state = SiteState::MissingTypes;
    }

    /// Fold `other` into this site. `remap` translates the other side's class
    /// references into this container's numbering; `None` means the owning file
    /// is not tracked here and the site degrades to missing types.
    pub fn merge_from<F>(&mut self, other: &SiteData, limit: usize, remap: F)
    where
        F: Fn(ClassRef) -> Option<ClassRef>,
    {
        match &other.state {
            SiteState::MissingTypes => self.set_is_missing_types(),
            SiteState::Megamorphic => self.set_is_megamorphic(),
            SiteState::Classes(classes) => {
                for class in classes {
                    match remap(*class) {
                        Some(mapped) => {
                            self.add_class(mapped, limit);
                        }
                        None => {
                            self.set_is_missing_types();
                            return;
                        }
                    }
                }
            }
        }
    }
}
