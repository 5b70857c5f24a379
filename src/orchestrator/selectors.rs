//! Command-line entity selectors.
use std::cell::Cell;

use crate::plugin::ScanEntity;

/// One selector argument and whether it matched anything.
#[derive(Debug)]
struct Selector {
    text: String,
    used: Cell<bool>,
}

/// The selectors given on the command line. No selectors selects everything.
#[derive(Debug, Default)]
pub struct Selectors {
    items: Vec<Selector>,
}

impl Selectors {
    /// Selectors from command-line arguments.
    #[must_use]
    pub fn new(args: &[String]) -> Self {
        Self {
            items: args
                .iter()
                .map(|text| Selector {
                    text: text.clone(),
                    used: Cell::new(false),
                })
                .collect(),
        }
    }

    /// Whether `entity` of plugin `plugin_id` is selected. Every selector that
    /// matches is marked used.
    pub fn select(&self, plugin_id: &str, entity: &ScanEntity) -> bool {
        if self.items.is_empty() {
            return true;
        }
        let mut selected = false;
        for selector in &self.items {
            if selector.text == plugin_id || entity.matches(&selector.text) {
                selector.used.set(true);
                selected = true;
            }
        }
        selected
    }

    /// Selectors that matched no entity.
    #[must_use]
    pub fn unused(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|s| !s.used.get())
            .map(|s| s.text.as_str())
            .collect()
    }
}
