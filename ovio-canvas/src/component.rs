use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::action::Action;

/// Free-form property bag (`label`, `text`, `placeholder`, ...).
pub type Properties = Map<String, Value>;

/// Component kinds offered by the editor's library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Container,
    Grid,
    Columns,
    Text,
    Heading,
    Button,
    Image,
    Input,
    Card,
    Hero,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 10] = [
        ComponentKind::Container,
        ComponentKind::Grid,
        ComponentKind::Columns,
        ComponentKind::Text,
        ComponentKind::Heading,
        ComponentKind::Button,
        ComponentKind::Image,
        ComponentKind::Input,
        ComponentKind::Card,
        ComponentKind::Hero,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Container => "container",
            ComponentKind::Grid => "grid",
            ComponentKind::Columns => "columns",
            ComponentKind::Text => "text",
            ComponentKind::Heading => "heading",
            ComponentKind::Button => "button",
            ComponentKind::Image => "image",
            ComponentKind::Input => "input",
            ComponentKind::Card => "card",
            ComponentKind::Hero => "hero",
        }
    }

    /// Label shown in the component library.
    pub fn display_name(&self) -> &'static str {
        match self {
            ComponentKind::Container => "Container",
            ComponentKind::Grid => "Grid",
            ComponentKind::Columns => "Columns",
            ComponentKind::Text => "Text",
            ComponentKind::Heading => "Heading",
            ComponentKind::Button => "Button",
            ComponentKind::Image => "Image",
            ComponentKind::Input => "Input",
            ComponentKind::Card => "Card",
            ComponentKind::Hero => "Hero Section",
        }
    }

    /// Value a property takes when the component does not set it.
    pub fn default_property(&self, name: &str) -> Option<Value> {
        let text = match (self, name) {
            (ComponentKind::Text, "text") => "Sample Text",
            (ComponentKind::Heading, "text") => "Heading",
            (ComponentKind::Button, "label") => "Button",
            (ComponentKind::Input, "placeholder") => "Enter text...",
            _ => return None,
        };
        Some(Value::String(text.to_string()))
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown component kind: {s}"))
    }
}

/// Canvas pixel coordinates.
///
/// JSON has no NaN or infinity, so a stored `null` coordinate reads back as
/// zero instead of failing the whole canvas.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, deserialize_with = "lenient_coord")]
    pub x: f32,
    #[serde(default, deserialize_with = "lenient_coord")]
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Both coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Non-finite coordinates replaced by zero.
    pub fn sanitized(self) -> Self {
        let finite = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self::new(finite(self.x), finite(self.y))
    }
}

fn lenient_coord<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    Ok(Option::<f32>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// A component dropped onto the canvas.
///
/// Serialized in the backend's canvas format:
/// `{"id": kind, "name", "uniqueId", "x", "y", "props", "actions"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedComponent {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    #[serde(rename = "id")]
    pub kind: ComponentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub position: Position,
    #[serde(rename = "props", default)]
    pub properties: Properties,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl PlacedComponent {
    pub fn new(unique_id: impl Into<String>, kind: ComponentKind, position: Position) -> Self {
        Self {
            unique_id: unique_id.into(),
            kind,
            name: Some(kind.display_name().to_string()),
            position,
            properties: Properties::new(),
            actions: Vec::new(),
        }
    }

    /// Property value, falling back to the kind's default.
    pub fn property(&self, name: &str) -> Option<Value> {
        self.properties
            .get(name)
            .cloned()
            .or_else(|| self.kind.default_property(name))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.kind.display_name())
    }

    pub fn action(&self, action_id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == action_id)
    }

    pub(crate) fn action_mut(&mut self, action_id: &str) -> Option<&mut Action> {
        self.actions.iter_mut().find(|a| a.id == action_id)
    }
}

/// Shallow merge: top-level keys from `partial` overwrite `target`.
pub(crate) fn merge_shallow(target: &mut Properties, partial: Properties) -> bool {
    let mut changed = false;
    for (key, value) in partial {
        if target.get(&key) != Some(&value) {
            target.insert(key, value);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!("hero".parse::<ComponentKind>().unwrap(), ComponentKind::Hero);
        assert!("carousel".parse::<ComponentKind>().is_err());
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_wire_shape() {
        let comp = PlacedComponent::new("button-1700000000000", ComponentKind::Button, Position::new(100.0, 100.0));
        let value = serde_json::to_value(&comp).unwrap();
        assert_eq!(
            value,
            json!({
                "uniqueId": "button-1700000000000",
                "id": "button",
                "name": "Button",
                "x": 100.0,
                "y": 100.0,
                "props": {},
                "actions": []
            })
        );
    }

    #[test]
    fn test_parses_backend_canvas_entry() {
        // Shape produced by the backend's msgpack → canvas conversion.
        let raw = json!({
            "id": "text",
            "name": "Text",
            "uniqueId": "text-0",
            "x": 100,
            "y": 150,
            "props": {"text": "Hello"},
            "actions": []
        });
        let comp: PlacedComponent = serde_json::from_value(raw).unwrap();
        assert_eq!(comp.kind, ComponentKind::Text);
        assert_eq!(comp.position, Position::new(100.0, 150.0));
        assert_eq!(comp.property("text"), Some(json!("Hello")));
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let comp: PlacedComponent =
            serde_json::from_value(json!({"id": "input", "uniqueId": "input-1", "x": 0, "y": 0})).unwrap();
        assert!(comp.properties.is_empty());
        assert!(comp.actions.is_empty());
        assert_eq!(comp.display_name(), "Input");
        assert_eq!(comp.property("placeholder"), Some(json!("Enter text...")));
        assert_eq!(comp.property("label"), None);
    }

    #[test]
    fn test_null_coordinate_reads_as_zero() {
        let comp: PlacedComponent =
            serde_json::from_value(json!({"id": "button", "uniqueId": "button-1", "x": null, "y": 10.0})).unwrap();
        assert_eq!(comp.position, Position::new(0.0, 10.0));
    }

    #[test]
    fn test_sanitized_position() {
        assert!(!Position::new(f32::NAN, 1.0).is_finite());
        assert_eq!(Position::new(f32::NAN, f32::INFINITY).sanitized(), Position::new(0.0, 0.0));
        assert_eq!(Position::new(3.0, -4.5).sanitized(), Position::new(3.0, -4.5));
    }

    #[test]
    fn test_merge_shallow_reports_change() {
        let mut props = Properties::new();
        props.insert("label".into(), json!("Go"));

        let mut same = Properties::new();
        same.insert("label".into(), json!("Go"));
        assert!(!merge_shallow(&mut props, same));

        let mut partial = Properties::new();
        partial.insert("label".into(), json!("Stop"));
        partial.insert("color".into(), json!("red"));
        assert!(merge_shallow(&mut props, partial));
        assert_eq!(props.len(), 2);
        assert_eq!(props["label"], json!("Stop"));
    }
}
