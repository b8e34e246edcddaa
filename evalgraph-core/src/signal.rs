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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a named column consumed by an operator.
///
/// When `producer` is set the column must come from that node; otherwise it
/// resolves to whichever node declares it, falling back to the initial dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signal {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}

impl Signal {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            producer: None,
        }
    }

    pub fn from_node(producer: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            producer: Some(producer.into()),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.producer {
            Some(p) => write!(f, "{}.{}", p, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

impl From<&str> for Signal {
    fn from(column: &str) -> Self {
        Signal::new(column)
    }
}

impl From<String> for Signal {
    fn from(column: String) -> Self {
        Signal::new(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Signal::new("text").to_string(), "text");
        assert_eq!(
            Signal::from_node("WordCount_0", "word_count").to_string(),
            "WordCount_0.word_count"
        );
    }

    #[test]
    fn test_serialization_omits_missing_producer() {
        let json = serde_json::to_string(&Signal::new("text")).unwrap();
        assert_eq!(json, r#"{"column":"text"}"#);
    }
}
