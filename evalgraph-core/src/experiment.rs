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

//! Experiment arguments and their Cartesian expansion

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered parameter sweeps.
///
/// Serialized as a JSON object of arrays; key order is declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct ExperimentArgs {
    args: Vec<(String, Vec<Value>)>,
}

impl ExperimentArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or redeclare, keeping position) an argument
    pub fn with_arg(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        let name = name.into();
        match self.args.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = values,
            None => self.args.push((name, values)),
        }
        self
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Number of combinations; an argument with no values yields none
    pub fn num_variants(&self) -> usize {
        self.args.iter().map(|(_, v)| v.len()).product()
    }

    /// Iterate over every combination in declaration order, the last argument
    /// varying fastest. Each call starts a fresh iteration.
    pub fn variants(&self) -> Variants<'_> {
        Variants {
            args: &self.args,
            counter: vec![0; self.args.len()],
            remaining: self.num_variants(),
        }
    }
}

impl TryFrom<Map<String, Value>> for ExperimentArgs {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut args = Vec::with_capacity(map.len());
        for (name, values) in map {
            match values {
                Value::Array(values) => args.push((name, values)),
                other => {
                    return Err(format!(
                        "experiment argument '{}' must be a list, got {}",
                        name, other
                    ))
                }
            }
        }
        Ok(Self { args })
    }
}

impl From<ExperimentArgs> for Map<String, Value> {
    fn from(args: ExperimentArgs) -> Self {
        args.args
            .into_iter()
            .map(|(name, values)| (name, Value::Array(values)))
            .collect()
    }
}

/// One concrete assignment of experiment arguments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub assignment: Vec<(String, Value)>,
    /// `name=value,...`; empty when there are no arguments
    pub label: String,
}

impl Variant {
    fn new(assignment: Vec<(String, Value)>) -> Self {
        let label = assignment
            .iter()
            .map(|(name, value)| format!("{}={}", name, label_value(value)))
            .collect::<Vec<_>>()
            .join(",");
        Self { assignment, label }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.assignment
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

fn label_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Lazy mixed-radix walk over the argument lists
pub struct Variants<'a> {
    args: &'a [(String, Vec<Value>)],
    counter: Vec<usize>,
    remaining: usize,
}

impl Iterator for Variants<'_> {
    type Item = Variant;

    fn next(&mut self) -> Option<Variant> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let assignment = self
            .args
            .iter()
            .zip(&self.counter)
            .map(|((name, values), &i)| (name.clone(), values[i].clone()))
            .collect();

        for (digit, (_, values)) in self.counter.iter_mut().zip(self.args).rev() {
            *digit += 1;
            if *digit < values.len() {
                break;
            }
            *digit = 0;
        }

        Some(Variant::new(assignment))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Variants<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_declaration_order() {
        let args = ExperimentArgs::new()
            .with_arg("template", vec![json!("A"), json!("B")])
            .with_arg("k", vec![json!(1), json!(2)]);

        let labels: Vec<String> = args.variants().map(|v| v.label).collect();
        assert_eq!(labels, vec!["template=A,k=1", "template=A,k=2", "template=B,k=1", "template=B,k=2"]);

        // restartable
        assert_eq!(args.variants().count(), 4);
        assert_eq!(args.variants().next().unwrap().get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_empty_args_yield_one_unlabelled_variant() {
        let variants: Vec<Variant> = ExperimentArgs::new().variants().collect();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].label, "");
        assert!(variants[0].assignment.is_empty());
    }

    #[test]
    fn test_empty_value_list_yields_nothing() {
        let args = ExperimentArgs::new()
            .with_arg("a", vec![json!(1)])
            .with_arg("b", vec![]);
        assert_eq!(args.variants().count(), 0);
    }

    #[test]
    fn test_json_form_keeps_order() {
        let args: ExperimentArgs =
            serde_json::from_value(json!({"z": ["x"], "a": [1, 2]})).unwrap();
        assert_eq!(args.names().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(
            serde_json::to_string(&args).unwrap(),
            r#"{"z":["x"],"a":[1,2]}"#
        );

        assert!(serde_json::from_value::<ExperimentArgs>(json!({"a": 1})).is_err());
    }

    proptest! {
        #[test]
        fn prop_variant_count_is_product(sizes in proptest::collection::vec(1usize..4, 0..4)) {
            let mut args = ExperimentArgs::new();
            for (i, n) in sizes.iter().enumerate() {
                args = args.with_arg(format!("arg{}", i), (0..*n).map(|v| json!(v)).collect());
            }

            let variants: Vec<Variant> = args.variants().collect();
            prop_assert_eq!(variants.len(), sizes.iter().product::<usize>());

            // every combination is distinct
            let mut labels: Vec<&str> = variants.iter().map(|v| v.label.as_str()).collect();
            labels.sort();
            labels.dedup();
            prop_assert_eq!(labels.len(), variants.len());
        }
    }
}
