//! Graph-level operator and model descriptors
//!
//! These are the JSON documents a graph frontend hands to the compiler:
//! operators by name, type, tensor names and attributes; tensors by name
//! and shape.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Attribute payload as it appears in the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Str(String),
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

/// One operator node of the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDescriptor {
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl OperatorDescriptor {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Name of input tensor `index`
    pub fn input(&self, index: usize) -> Result<&str> {
        self.inputs.get(index).map(String::as_str).ok_or_else(|| Error::MissingInput {
            op: self.name.clone(),
            index,
        })
    }

    /// Name of output tensor `index`
    pub fn output(&self, index: usize) -> Result<&str> {
        self.outputs.get(index).map(String::as_str).ok_or_else(|| {
            Error::precondition(&self.name, format!("operator declares no output {index}"))
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// A non-negative integer list attribute
    pub fn ints(&self, name: &str) -> Result<Vec<u32>> {
        match self.attribute(name) {
            None => Err(Error::missing_attribute(&self.name, name)),
            Some(AttributeValue::Ints(values)) => values
                .iter()
                .map(|&v| u32::try_from(v).ok())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| self.invalid(name, "non-negative integers")),
            Some(_) => Err(self.invalid(name, "a list of integers")),
        }
    }

    /// A non-negative integer attribute
    pub fn int(&self, name: &str) -> Result<u32> {
        match self.attribute(name) {
            None => Err(Error::missing_attribute(&self.name, name)),
            Some(AttributeValue::Int(v)) => {
                u32::try_from(*v).map_err(|_| self.invalid(name, "a non-negative integer"))
            }
            Some(_) => Err(self.invalid(name, "an integer")),
        }
    }

    fn invalid(&self, attribute: &str, expected: &str) -> Error {
        Error::InvalidAttribute {
            op: self.name.clone(),
            attribute: attribute.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Tensor declared up front (graph inputs, weights, placeholders)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<u32>,
}

/// Whole graph: declared tensors plus operators in execution order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelDescriptor {
    #[serde(default)]
    pub tensors: Vec<TensorDescriptor>,
    pub operators: Vec<OperatorDescriptor>,
}

impl ModelDescriptor {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_accessors() {
        let desc = OperatorDescriptor::new("pool0", "AdaptiveAvgPool")
            .with_inputs(["x"])
            .with_outputs(["y"])
            .with_attribute("kernel_shape", vec![2i64, 2])
            .with_attribute("num_heads", 8i64)
            .with_attribute("mode", "avg");

        assert_eq!(desc.ints("kernel_shape").unwrap(), vec![2, 2]);
        assert_eq!(desc.int("num_heads").unwrap(), 8);
        assert_eq!(desc.input(0).unwrap(), "x");
        assert_eq!(desc.output(0).unwrap(), "y");
        assert!(matches!(desc.input(1), Err(Error::MissingInput { index: 1, .. })));
        assert!(matches!(desc.ints("strides"), Err(Error::MissingAttribute { .. })));
        assert!(matches!(desc.int("kernel_shape"), Err(Error::InvalidAttribute { .. })));
        assert!(matches!(desc.ints("mode"), Err(Error::InvalidAttribute { .. })));
    }

    #[test]
    fn test_negative_ints_rejected() {
        let desc = OperatorDescriptor::new("p", "AdaptiveAvgPool").with_attribute("strides", vec![-1i64, 2]);
        assert!(matches!(desc.ints("strides"), Err(Error::InvalidAttribute { .. })));
    }

    #[test]
    fn test_model_descriptor_from_json() {
        let text = r#"{
            "tensors": [{ "name": "x", "shape": [1, 3, 8, 8] }],
            "operators": [{
                "name": "pool0",
                "op_type": "AdaptiveAvgPool",
                "inputs": ["x"],
                "outputs": ["y"],
                "attributes": { "kernel_shape": [2, 2], "strides": [2, 2], "alpha": 0.5 }
            }]
        }"#;
        let model = ModelDescriptor::from_json_str(text).unwrap();
        assert_eq!(model.tensors[0].shape, vec![1, 3, 8, 8]);
        let op = &model.operators[0];
        assert_eq!(op.attribute("kernel_shape"), Some(&AttributeValue::Ints(vec![2, 2])));
        assert_eq!(op.attribute("alpha"), Some(&AttributeValue::Float(0.5)));
    }

    #[test]
    fn test_model_descriptor_missing_file() {
        let err = ModelDescriptor::from_path("/nonexistent/model.json").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
