//! Capability checks

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TracError};

/// Action granting every other action.
pub const ADMIN_ACTION: &str = "TRAC_ADMIN";

/// The set of actions granted to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    actions: BTreeSet<String>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, action: impl Into<String>) {
        self.actions.insert(action.into());
    }

    pub fn has(&self, action: &str) -> bool {
        self.actions.contains(action) || self.actions.contains(ADMIN_ACTION)
    }

    pub fn require(&self, action: &str) -> Result<()> {
        if self.has(action) {
            Ok(())
        } else {
            Err(TracError::permission_denied(action))
        }
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        PermissionSet {
            actions: iter.into_iter().map(Into::into).collect(),
        }
    }
}
