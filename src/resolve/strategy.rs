use serde_json::{Map, Value};

use super::{ExtractionKind, GraphTextResolver, TextSource, Walk};
use crate::graph::{FieldPath, InputValue, Link, Node, Outputs};

const REROUTE_CLASS: &str = "Reroute";

/// Keys holding text inside an output object, in lookup order.
const OBJECT_TEXT_KEYS: &[&str] = &["text", "value", "content", "string", "prompt", "message"];

/// Node-level properties some custom nodes keep their value in.
const NODE_TEXT_PROPERTIES: &[&str] = &[
    "output_value",
    "value",
    "text",
    "string",
    "content",
    "message",
    "prompt",
];

/// Input names that usually carry the prompt text.
const COMMON_TEXT_INPUTS: &[&str] = &[
    "text",
    "prompt",
    "string",
    "value",
    "content",
    "message",
    "text_input",
    "input_text",
    "positive",
    "negative",
];

const COMBINING_MARKERS: &[&str] = &["concat", "combine", "join"];
const SEPARATOR_MARKERS: &[&str] = &["separator", "delimiter"];

/// Titles this short are labels like "Text" or "Out", not content.
const MIN_TITLE_CHARS: usize = 4;
const MIN_SENTENCE_CHARS: usize = 6;

/// One way of reading text out of a source node. [`ExtractionStrategy::ORDER`]
/// is the order the resolver tries them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Pass straight through to the node's first linked input.
    Reroute,
    /// `outputs[slot]` is a string.
    OutputArrayText,
    /// `outputs[slot]` is an object with a text key.
    OutputArrayObject,
    /// `outputs` is a mapping keyed by name.
    OutputMapping,
    /// A text property stored on the node record itself.
    NodeProperty,
    /// Concatenation nodes: join every text fragment.
    Combining,
    /// Literal input fields, following links when none qualifies.
    InputFields,
    /// Last resort: the node's title.
    Title,
}

impl ExtractionStrategy {
    pub const ORDER: [ExtractionStrategy; 8] = [
        ExtractionStrategy::Reroute,
        ExtractionStrategy::OutputArrayText,
        ExtractionStrategy::OutputArrayObject,
        ExtractionStrategy::OutputMapping,
        ExtractionStrategy::NodeProperty,
        ExtractionStrategy::Combining,
        ExtractionStrategy::InputFields,
        ExtractionStrategy::Title,
    ];

    /// Whether this strategy owns `node` outright, so that a miss must not
    /// fall through to later strategies.
    pub fn claims(&self, node: &Node<'_>) -> bool {
        matches!(self, ExtractionStrategy::Reroute) && node.class_type() == REROUTE_CLASS
    }

    pub(crate) fn try_extract(
        &self,
        resolver: &GraphTextResolver,
        walk: &mut Walk<'_>,
        node: Node<'_>,
        slot: usize,
        depth: usize,
    ) -> Option<TextSource> {
        match self {
            ExtractionStrategy::Reroute => reroute(resolver, walk, node, depth),
            ExtractionStrategy::OutputArrayText => output_array_text(node, slot),
            ExtractionStrategy::OutputArrayObject => output_array_object(node, slot),
            ExtractionStrategy::OutputMapping => output_mapping(node, slot),
            ExtractionStrategy::NodeProperty => node_property(node),
            ExtractionStrategy::Combining => combining(resolver, walk, node, slot, depth),
            ExtractionStrategy::InputFields => input_fields(resolver, walk, node, depth),
            ExtractionStrategy::Title => title(node),
        }
    }
}

/// Class names containing `concat`, `combine` or `join` in any case.
pub fn is_combining_node(class_type: &str) -> bool {
    let class_type = class_type.to_lowercase();
    COMBINING_MARKERS.iter().any(|marker| class_type.contains(marker))
}

fn is_separator_field(name: &str) -> bool {
    let name = name.to_lowercase();
    SEPARATOR_MARKERS.iter().any(|marker| name.contains(marker))
}

fn non_blank(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Free text rather than an enum choice or a file name stem.
fn is_sentence_like(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && (trimmed.contains(' ') || trimmed.chars().count() >= MIN_SENTENCE_CHARS)
}

fn reroute(
    resolver: &GraphTextResolver,
    walk: &mut Walk<'_>,
    node: Node<'_>,
    depth: usize,
) -> Option<TextSource> {
    if node.class_type() != REROUTE_CLASS {
        return None;
    }
    let upstream = node.inputs()?.values().find_map(Link::from_value)?;
    resolver.follow(walk, &upstream, depth + 1)
}

fn output_array_text(node: Node<'_>, slot: usize) -> Option<TextSource> {
    let Outputs::Sequence(items) = node.outputs() else {
        return None;
    };
    let text = items.get(slot)?.as_str()?;
    Some(TextSource::new(&node, text, FieldPath::Output(slot), ExtractionKind::Direct))
}

fn object_text<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<(&'a str, String)> {
    keys.iter().find_map(|key| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .filter(|text| non_blank(text))
            .map(|text| (text, key.to_string()))
    })
}

fn output_array_object(node: Node<'_>, slot: usize) -> Option<TextSource> {
    let Outputs::Sequence(items) = node.outputs() else {
        return None;
    };
    let object = items.get(slot)?.as_object()?;
    let (text, key) = object_text(object, OBJECT_TEXT_KEYS)?;
    Some(TextSource::new(
        &node,
        text,
        FieldPath::OutputObject(slot, key),
        ExtractionKind::ExtractedObject,
    ))
}

fn output_mapping(node: Node<'_>, slot: usize) -> Option<TextSource> {
    let Outputs::Mapping(entries) = node.outputs() else {
        return None;
    };
    let slot_key = format!("output_{}", slot);
    let mut keys: Vec<&str> = OBJECT_TEXT_KEYS.to_vec();
    keys.push(&slot_key);

    for key in keys {
        match entries.get(key) {
            Some(Value::String(text)) if non_blank(text) => {
                return Some(TextSource::new(
                    &node,
                    text,
                    FieldPath::OutputEntry(key.to_string()),
                    ExtractionKind::Direct,
                ));
            }
            Some(Value::Object(object)) => {
                if let Some((text, inner)) = object_text(object, OBJECT_TEXT_KEYS) {
                    return Some(TextSource::new(
                        &node,
                        text,
                        FieldPath::OutputEntryObject(key.to_string(), inner),
                        ExtractionKind::ExtractedObject,
                    ));
                }
            }
            _ => {}
        }
    }
    None
}

fn node_property(node: Node<'_>) -> Option<TextSource> {
    NODE_TEXT_PROPERTIES.iter().find_map(|name| {
        let text = node.property(name)?.as_str().filter(|text| non_blank(text))?;
        Some(TextSource::new(
            &node,
            text,
            FieldPath::Property(name.to_string()),
            ExtractionKind::Direct,
        ))
    })
}

fn combining(
    resolver: &GraphTextResolver,
    walk: &mut Walk<'_>,
    node: Node<'_>,
    slot: usize,
    depth: usize,
) -> Option<TextSource> {
    if !is_combining_node(node.class_type()) {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for (name, value) in node.inputs()? {
        if is_separator_field(name) {
            continue;
        }
        match InputValue::parse(value) {
            InputValue::Text(text) if non_blank(text) => parts.push(text.trim().to_string()),
            InputValue::Link(link) => {
                if let Some(found) = resolver.follow(walk, &link, depth + 1) {
                    if non_blank(&found.text) {
                        parts.push(found.text.trim().to_string());
                    }
                }
            }
            _ => {}
        }
    }

    if parts.is_empty() {
        return None;
    }
    Some(TextSource::new(
        &node,
        &parts.join(" "),
        FieldPath::Output(slot),
        ExtractionKind::Combined,
    ))
}

fn input_fields(
    resolver: &GraphTextResolver,
    walk: &mut Walk<'_>,
    node: Node<'_>,
    depth: usize,
) -> Option<TextSource> {
    let inputs = node.inputs()?;

    for name in COMMON_TEXT_INPUTS {
        match node.input(name) {
            Some(InputValue::Text(text)) if non_blank(text) => {
                return Some(TextSource::new(
                    &node,
                    text,
                    FieldPath::Input(name.to_string()),
                    ExtractionKind::Direct,
                ));
            }
            Some(InputValue::Link(link)) => {
                if let Some(found) = resolver.follow(walk, &link, depth + 1) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }

    // Longest sentence-like literal among the remaining fields wins.
    let mut best: Option<(&str, &str)> = None;
    let mut links = Vec::new();
    for (name, value) in inputs {
        if COMMON_TEXT_INPUTS.contains(&name.as_str()) {
            continue;
        }
        match InputValue::parse(value) {
            InputValue::Text(text) if is_sentence_like(text) => {
                let longer = best.is_none_or(|(_, current)| {
                    text.trim().chars().count() > current.trim().chars().count()
                });
                if longer {
                    best = Some((name.as_str(), text));
                }
            }
            InputValue::Link(link) => links.push(link),
            _ => {}
        }
    }

    if let Some((name, text)) = best {
        return Some(TextSource::new(
            &node,
            text,
            FieldPath::Input(name.to_string()),
            ExtractionKind::Direct,
        ));
    }
    links
        .iter()
        .find_map(|link| resolver.follow(walk, link, depth + 1))
}

fn title(node: Node<'_>) -> Option<TextSource> {
    let (text, field) = node.title()?;
    if text.trim().chars().count() < MIN_TITLE_CHARS {
        return None;
    }
    Some(TextSource::new(&node, text, field, ExtractionKind::Title))
}
