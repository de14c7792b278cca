//! Typed view over a node-graph submission payload.
//!
//! The payload is kept as raw JSON so that node types we know nothing about
//! round-trip untouched; [`Node`] and [`InputValue`] give the resolver and the
//! interceptor a read-only typed window onto it, and [`Graph::set_text`] is
//! the only way a value is ever changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{GraphlateError, Result};

pub type NodeId = String;

/// Node-id → node record, exactly as the host submits it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Graph(Map<String, Value>);

impl Graph {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(GraphlateError::Graph(format!(
                "expected an object of nodes, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Node records that are JSON objects; anything else is not a node.
    pub fn node(&self, id: &str) -> Option<Node<'_>> {
        self.0
            .get_key_value(id)
            .and_then(|(id, value)| value.as_object().map(|raw| Node { id, raw }))
    }

    pub fn nodes(&self) -> impl Iterator<Item = Node<'_>> {
        self.0
            .iter()
            .filter_map(|(id, value)| value.as_object().map(|raw| Node { id, raw }))
    }

    /// Overwrite the string at `field` of node `id`.
    ///
    /// The target must already exist: write-backs replace values and never
    /// add keys or change the shape of the payload.
    pub fn set_text(&mut self, id: &str, field: &FieldPath, text: &str) -> Result<()> {
        let node = self
            .0
            .get_mut(id)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| GraphlateError::Graph(format!("node {} not found", id)))?;

        let slot = match field {
            FieldPath::Input(name) => node
                .get_mut("inputs")
                .and_then(Value::as_object_mut)
                .and_then(|inputs| inputs.get_mut(name)),
            FieldPath::Output(index) => node
                .get_mut("outputs")
                .and_then(Value::as_array_mut)
                .and_then(|outputs| outputs.get_mut(*index)),
            FieldPath::OutputObject(index, key) => node
                .get_mut("outputs")
                .and_then(Value::as_array_mut)
                .and_then(|outputs| outputs.get_mut(*index))
                .and_then(Value::as_object_mut)
                .and_then(|object| object.get_mut(key)),
            FieldPath::OutputEntry(key) => node
                .get_mut("outputs")
                .and_then(Value::as_object_mut)
                .and_then(|outputs| outputs.get_mut(key)),
            FieldPath::OutputEntryObject(key, inner) => node
                .get_mut("outputs")
                .and_then(Value::as_object_mut)
                .and_then(|outputs| outputs.get_mut(key))
                .and_then(Value::as_object_mut)
                .and_then(|object| object.get_mut(inner)),
            FieldPath::Property(name) => node.get_mut(name),
            FieldPath::Title => node.get_mut("title"),
            FieldPath::MetaTitle => node
                .get_mut("_meta")
                .and_then(Value::as_object_mut)
                .and_then(|meta| meta.get_mut("title")),
        }
        .ok_or_else(|| GraphlateError::Graph(format!("node {} has no {}", id, field)))?;

        *slot = Value::String(text.to_string());
        Ok(())
    }
}

/// Borrowed view of one node record.
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    id: &'a str,
    raw: &'a Map<String, Value>,
}

impl<'a> Node<'a> {
    pub fn id(&self) -> &'a str {
        self.id
    }

    /// `class_type` as submitted by the host, `classType` from editor exports.
    pub fn class_type(&self) -> &'a str {
        self.raw
            .get("class_type")
            .or_else(|| self.raw.get("classType"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    pub fn inputs(&self) -> Option<&'a Map<String, Value>> {
        self.raw.get("inputs").and_then(Value::as_object)
    }

    pub fn input(&self, name: &str) -> Option<InputValue<'a>> {
        self.inputs()
            .and_then(|inputs| inputs.get(name))
            .map(InputValue::parse)
    }

    pub fn outputs(&self) -> Outputs<'a> {
        match self.raw.get("outputs") {
            Some(Value::Array(items)) => Outputs::Sequence(items),
            Some(Value::Object(entries)) => Outputs::Mapping(entries),
            _ => Outputs::Absent,
        }
    }

    /// A property stored directly on the node record.
    pub fn property(&self, name: &str) -> Option<&'a Value> {
        self.raw.get(name)
    }

    /// Display title and where it lives.
    pub fn title(&self) -> Option<(&'a str, FieldPath)> {
        if let Some(title) = self.raw.get("title").and_then(Value::as_str) {
            return Some((title, FieldPath::Title));
        }
        self.raw
            .get("_meta")
            .and_then(|meta| meta.get("title"))
            .and_then(Value::as_str)
            .map(|title| (title, FieldPath::MetaTitle))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Outputs<'a> {
    Sequence(&'a [Value]),
    Mapping(&'a Map<String, Value>),
    Absent,
}

/// One input field value.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue<'a> {
    Text(&'a str),
    Link(Link),
    Other(&'a Value),
}

impl<'a> InputValue<'a> {
    pub fn parse(value: &'a Value) -> Self {
        if let Some(text) = value.as_str() {
            return InputValue::Text(text);
        }
        match Link::from_value(value) {
            Some(link) => InputValue::Link(link),
            None => InputValue::Other(value),
        }
    }
}

/// Reference from a consumer's input to `slot` of node `source`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub source: NodeId,
    pub slot: usize,
}

impl Link {
    pub fn new(source: impl Into<NodeId>, slot: usize) -> Self {
        Self {
            source: source.into(),
            slot,
        }
    }

    /// `[source, slot]` with a string or integer id and an integer slot.
    /// Anything else (wrong length, null id, fractional slot) is not a link.
    pub fn from_value(value: &Value) -> Option<Self> {
        let pair = value.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        let source = match &pair[0] {
            Value::String(id) if !id.is_empty() => id.clone(),
            Value::Number(id) if id.is_u64() || id.is_i64() => id.to_string(),
            _ => return None,
        };
        let slot = usize::try_from(pair[1].as_u64()?).ok()?;
        Some(Self { source, slot })
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.source, self.slot)
    }
}

/// Location of a text value inside one node record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldPath {
    Input(String),
    Output(usize),
    OutputObject(usize, String),
    OutputEntry(String),
    OutputEntryObject(String, String),
    Property(String),
    Title,
    MetaTitle,
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldPath::Input(name) => write!(f, "inputs.{}", name),
            FieldPath::Output(index) => write!(f, "outputs[{}]", index),
            FieldPath::OutputObject(index, key) => write!(f, "outputs[{}].{}", index, key),
            FieldPath::OutputEntry(key) => write!(f, "outputs.{}", key),
            FieldPath::OutputEntryObject(key, inner) => write!(f, "outputs.{}.{}", key, inner),
            FieldPath::Property(name) => write!(f, "{}", name),
            FieldPath::Title => write!(f, "title"),
            FieldPath::MetaTitle => write!(f, "_meta.title"),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
