// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Operator registry
//!
//! Maps stable type names to constructors so that operator descriptors can be
//! rehydrated into live operators. The process-wide registry is populated at
//! start-up; DAG execution never touches it.

use crate::error::{EvalGraphError, Result};
use crate::operator::{Operator, OperatorDescriptor};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Builds an operator from descriptor parameters
pub type OperatorConstructor = fn(Value) -> Result<Box<dyn Operator>>;

#[derive(Clone, Copy)]
struct Entry {
    constructor: OperatorConstructor,
    custom: bool,
}

/// Listing entry returned by [`OperatorRegistry::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorInfo {
    pub type_name: String,
    pub custom: bool,
}

/// Registry for operator constructors
pub struct OperatorRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a built-in operator type
    pub fn register(&self, type_name: &str, constructor: OperatorConstructor) -> Result<()> {
        self.insert(type_name, constructor, false)
    }

    /// Register a user-defined operator type
    pub fn register_custom(&self, type_name: &str, constructor: OperatorConstructor) -> Result<()> {
        self.insert(type_name, constructor, true)
    }

    fn insert(&self, type_name: &str, constructor: OperatorConstructor, custom: bool) -> Result<()> {
        let mut entries = self.entries.write();

        if let Some(existing) = entries.get(type_name) {
            // Constructors are identified by address
            if existing.constructor as usize == constructor as usize {
                debug!("Operator {} already registered", type_name);
                return Ok(());
            }
            return Err(EvalGraphError::DuplicateRegistration(type_name.to_string()));
        }

        info!(
            "Registering {} operator: {}",
            if custom { "custom" } else { "built-in" },
            type_name
        );
        entries.insert(type_name.to_string(), Entry { constructor, custom });
        Ok(())
    }

    /// Rebuild an operator from its descriptor
    pub fn deserialize(&self, descriptor: &OperatorDescriptor) -> Result<Box<dyn Operator>> {
        let entry = self
            .entries
            .read()
            .get(&descriptor.type_name)
            .copied()
            .ok_or_else(|| EvalGraphError::UnknownOperator(descriptor.type_name.clone()))?;

        if entry.custom {
            warn!(
                "Deserializing custom operator {}; it must be registered in every process that loads this descriptor",
                descriptor.type_name
            );
        }

        (entry.constructor)(descriptor.parameters.clone())
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.entries.read().contains_key(type_name)
    }

    pub fn is_custom(&self, type_name: &str) -> bool {
        self.entries
            .read()
            .get(type_name)
            .map(|e| e.custom)
            .unwrap_or(false)
    }

    /// All registered types, sorted by name
    pub fn list(&self) -> Vec<OperatorInfo> {
        let mut list: Vec<OperatorInfo> = self
            .entries
            .read()
            .iter()
            .map(|(name, entry)| OperatorInfo {
                type_name: name.clone(),
                custom: entry.custom,
            })
            .collect();
        list.sort_by(|a, b| a.type_name.cmp(&b.type_name));
        list
    }

    /// Remove a type; returns whether it was present
    pub fn unregister(&self, type_name: &str) -> bool {
        let removed = self.entries.write().remove(type_name).is_some();
        if removed {
            info!("Unregistered operator: {}", type_name);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: Lazy<OperatorRegistry> = Lazy::new(OperatorRegistry::new);

/// The process-wide registry
pub fn global() -> &'static OperatorRegistry {
    &GLOBAL
}

pub fn register_op(type_name: &str, constructor: OperatorConstructor) -> Result<()> {
    global().register(type_name, constructor)
}

pub fn register_custom_op(type_name: &str, constructor: OperatorConstructor) -> Result<()> {
    global().register_custom(type_name, constructor)
}

pub fn deserialize_operator(descriptor: &OperatorDescriptor) -> Result<Box<dyn Operator>> {
    global().deserialize(descriptor)
}

pub fn is_registered(type_name: &str) -> bool {
    global().is_registered(type_name)
}

pub fn is_custom(type_name: &str) -> bool {
    global().is_custom(type_name)
}

pub fn list_operators() -> Vec<OperatorInfo> {
    global().list()
}

pub fn unregister(type_name: &str) -> bool {
    global().unregister(type_name)
}
