//! Test groups

use serde::{Deserialize, Serialize};

/// Tests that must run one after another, in order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group<R> {
    pub name: String,
    pub tests: Vec<R>,
}

impl<R> Group<R> {
    pub fn new(name: impl Into<String>, tests: Vec<R>) -> Self {
        Self {
            name: name.into(),
            tests,
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}
