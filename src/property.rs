//! Typed property descriptors and their JSON encoding.
//!
//! Every resource and component kind describes its fields as a flat map of
//! named properties. The same map drives persistence (raw values) and the
//! editor (values plus category, editor widget and legal items). Readers
//! accept both shapes, skip missing keys and ignore keys they do not know.

use glam::{Quat, UVec3, Vec2, Vec3, Vec4};
use serde::de::DeserializeOwned;
use serde_json::{Number, Value};
use thiserror::Error;

use crate::name::Name;

/// Property map of one resource.
pub type Properties = serde_json::Map<String, Value>;

/// Editor widget used to present a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Editor {
    Vec2,
    Vec3,
    Vec4,
    String,
    Enum,
    Float,
    Uint,
    Rotation,
    MeshSelector,
    ScriptSelector,
    Flags,
    Color,
}

impl Editor {
    pub fn as_str(self) -> &'static str {
        match self {
            Editor::Vec2 => "vec2",
            Editor::Vec3 => "vec3",
            Editor::Vec4 => "vec4",
            Editor::String => "string",
            Editor::Enum => "enum",
            Editor::Float => "float",
            Editor::Uint => "uint",
            Editor::Rotation => "rotation",
            Editor::MeshSelector => "meshSelector",
            Editor::ScriptSelector => "scriptSelector",
            Editor::Flags => "flags",
            Editor::Color => "color",
        }
    }
}

/// Enumeration stored as its ordinal, with the legal names as metadata.
pub trait PropertyEnum: Copy + Sized {
    const ITEMS: &'static [&'static str];

    fn ordinal(self) -> u32;

    fn from_ordinal(ordinal: u32) -> Option<Self>;
}

/// Declares a fieldless enum usable as an enum property.
#[macro_export]
macro_rules! property_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$variant_meta:meta])* $variant:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$variant_meta])* $variant),+
        }

        impl $crate::property::PropertyEnum for $name {
            const ITEMS: &'static [&'static str] = &[$(stringify!($variant)),+];

            fn ordinal(self) -> u32 {
                self as u32
            }

            fn from_ordinal(ordinal: u32) -> Option<Self> {
                const ALL: &[$name] = &[$($name::$variant),+];
                ALL.get(ordinal as usize).copied()
            }
        }
    };
}

/// Value carried by a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Float(f32),
    Uint(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    UVec3(UVec3),
    Quat(Quat),
    Str(String),
    Enum {
        ordinal: u32,
        items: &'static [&'static str],
    },
    Flags {
        selected: Vec<Name>,
        items: &'static [&'static str],
    },
    ResourceRef {
        kind: &'static str,
        name: Name,
    },
}

impl PropertyValue {
    pub fn enumeration<E: PropertyEnum>(value: E) -> Self {
        PropertyValue::Enum {
            ordinal: value.ordinal(),
            items: E::ITEMS,
        }
    }

    fn type_tag(&self) -> &'static str {
        match self {
            PropertyValue::Float(_) => "float",
            PropertyValue::Uint(_) => "uint",
            PropertyValue::Vec2(_) => "vec2",
            PropertyValue::Vec3(_) => "vec3",
            PropertyValue::Vec4(_) => "vec4",
            PropertyValue::UVec3(_) => "uvec3",
            PropertyValue::Quat(_) => "quat",
            PropertyValue::Str(_) => "string",
            PropertyValue::Enum { .. } => "enum",
            PropertyValue::Flags { .. } => "flags",
            PropertyValue::ResourceRef { .. } => "resource",
        }
    }

    fn is_vector(&self) -> bool {
        matches!(
            self,
            PropertyValue::Vec2(_)
                | PropertyValue::Vec3(_)
                | PropertyValue::Vec4(_)
                | PropertyValue::UVec3(_)
                | PropertyValue::Quat(_)
        )
    }

    /// Bare JSON value without metadata.
    pub fn to_raw(&self) -> Value {
        match self {
            PropertyValue::Float(value) => float_value(*value),
            PropertyValue::Uint(value) => Value::from(*value),
            PropertyValue::Vec2(v) => floats(&v.to_array()),
            PropertyValue::Vec3(v) => floats(&v.to_array()),
            PropertyValue::Vec4(v) => floats(&v.to_array()),
            PropertyValue::UVec3(v) => Value::Array(v.to_array().map(Value::from).to_vec()),
            PropertyValue::Quat(q) => floats(&[q.x, q.y, q.z, q.w]),
            PropertyValue::Str(text) => Value::from(text.as_str()),
            PropertyValue::Enum { ordinal, .. } => Value::from(*ordinal),
            PropertyValue::Flags { selected, .. } => Value::Array(
                selected
                    .iter()
                    .map(|name| Value::from(name.as_str()))
                    .collect(),
            ),
            PropertyValue::ResourceRef { name, .. } => Value::from(name.as_str()),
        }
    }
}

fn float_value(value: f32) -> Value {
    match Number::from_f64(f64::from(value)) {
        Some(number) => Value::Number(number),
        None => {
            log::warn!("Writing non-finite float {value} as 0.0");
            Value::from(0.0)
        }
    }
}

fn floats(values: &[f32]) -> Value {
    Value::Array(values.iter().copied().map(float_value).collect())
}

/// A property value with its editor metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub value: PropertyValue,
    pub category: &'static str,
    pub editor: Editor,
    pub read_only: bool,
    pub internal: bool,
}

impl Property {
    pub fn new(category: &'static str, editor: Editor, value: PropertyValue) -> Self {
        Self {
            value,
            category,
            editor,
            read_only: false,
            internal: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Encodes the property, with metadata when `generate_desc` is set.
    pub fn to_json(&self, generate_desc: bool) -> Value {
        let raw = self.value.to_raw();
        if !generate_desc {
            return raw;
        }
        let mut node = Properties::new();
        node.insert("cat".into(), Value::from(self.category));
        node.insert("type".into(), Value::from(self.value.type_tag()));
        node.insert("editor".into(), Value::from(self.editor.as_str()));
        node.insert("readOnly".into(), Value::from(self.read_only));
        node.insert("internal".into(), Value::from(self.internal));
        let value_key = if self.value.is_vector() {
            "values"
        } else {
            "value"
        };
        node.insert(value_key.into(), raw);
        match &self.value {
            PropertyValue::Enum { items, .. } => {
                node.insert("enumItems".into(), item_list(items));
            }
            PropertyValue::Flags { items, .. } => {
                node.insert("flagItems".into(), item_list(items));
            }
            PropertyValue::ResourceRef { kind, .. } => {
                node.insert("resourceKind".into(), Value::from(*kind));
            }
            _ => {}
        }
        Value::Object(node)
    }
}

fn item_list(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|item| Value::from(*item)).collect())
}

/// Failure to decode one property.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("property `{key}` is not a valid {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("property `{key}` has ordinal {ordinal}, expected one of {items:?}")]
    EnumOutOfRange {
        key: String,
        ordinal: u32,
        items: &'static [&'static str],
    },
    #[error("property `{key}` is malformed")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Collects compiled properties for one resource.
pub struct DescriptorWriter<'a> {
    properties: &'a mut Properties,
    generate_desc: bool,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(properties: &'a mut Properties, generate_desc: bool) -> Self {
        Self {
            properties,
            generate_desc,
        }
    }

    pub fn generate_desc(&self) -> bool {
        self.generate_desc
    }

    pub fn add(&mut self, key: &str, property: Property) {
        let value = property.to_json(self.generate_desc);
        self.properties.insert(key.to_string(), value);
    }

    /// Inserts a pre-encoded value, used for bulk geometry arrays.
    pub fn add_raw(&mut self, key: &str, value: Value) {
        self.properties.insert(key.to_string(), value);
    }
}

/// Reads properties back into typed fields.
///
/// Every accessor leaves its target untouched when the key is absent.
#[derive(Clone, Copy)]
pub struct DescriptorReader<'a> {
    properties: &'a Properties,
}

impl<'a> DescriptorReader<'a> {
    pub fn new(properties: &'a Properties) -> Self {
        Self { properties }
    }

    /// Value payload of a property, in either encoding.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.properties.get(key).map(payload)
    }

    pub fn float(&self, key: &str, target: &mut f32) -> Result<(), DescriptorError> {
        self.read(key, "float", target, |value| {
            value.as_f64().map(|v| v as f32)
        })
    }

    pub fn uint(&self, key: &str, target: &mut u32) -> Result<(), DescriptorError> {
        self.read(key, "uint", target, |value| {
            value.as_u64().and_then(|v| u32::try_from(v).ok())
        })
    }

    pub fn vec2(&self, key: &str, target: &mut Vec2) -> Result<(), DescriptorError> {
        self.read(key, "vec2", target, |value| {
            float_array::<2>(value).map(Vec2::from_array)
        })
    }

    pub fn vec3(&self, key: &str, target: &mut Vec3) -> Result<(), DescriptorError> {
        self.read(key, "vec3", target, |value| {
            float_array::<3>(value).map(Vec3::from_array)
        })
    }

    pub fn vec4(&self, key: &str, target: &mut Vec4) -> Result<(), DescriptorError> {
        self.read(key, "vec4", target, |value| {
            float_array::<4>(value).map(Vec4::from_array)
        })
    }

    pub fn uvec3(&self, key: &str, target: &mut UVec3) -> Result<(), DescriptorError> {
        self.read(key, "uvec3", target, |value| {
            let items = value.as_array().filter(|items| items.len() == 3)?;
            let mut out = [0u32; 3];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = u32::try_from(item.as_u64()?).ok()?;
            }
            Some(UVec3::from_array(out))
        })
    }

    pub fn quat(&self, key: &str, target: &mut Quat) -> Result<(), DescriptorError> {
        self.read(key, "quat", target, |value| {
            float_array::<4>(value).map(|[x, y, z, w]| Quat::from_xyzw(x, y, z, w))
        })
    }

    pub fn string(&self, key: &str, target: &mut String) -> Result<(), DescriptorError> {
        self.read(key, "string", target, |value| {
            value.as_str().map(str::to_string)
        })
    }

    pub fn name(&self, key: &str, target: &mut Name) -> Result<(), DescriptorError> {
        self.read(key, "name", target, |value| value.as_str().map(Name::new))
    }

    /// Decodes an enum from its ordinal. Item names are never accepted.
    pub fn enumeration<E: PropertyEnum>(
        &self,
        key: &str,
        target: &mut E,
    ) -> Result<(), DescriptorError> {
        let mut ordinal = target.ordinal();
        self.read(key, "enum ordinal", &mut ordinal, |value| {
            value.as_u64().and_then(|v| u32::try_from(v).ok())
        })?;
        *target = E::from_ordinal(ordinal).ok_or_else(|| DescriptorError::EnumOutOfRange {
            key: key.to_string(),
            ordinal,
            items: E::ITEMS,
        })?;
        Ok(())
    }

    pub fn flags(&self, key: &str, target: &mut Vec<Name>) -> Result<(), DescriptorError> {
        self.read(key, "flag list", target, |value| {
            value
                .as_array()?
                .iter()
                .map(|item| item.as_str().map(Name::new))
                .collect()
        })
    }

    /// Deserializes a bulk value (e.g. geometry arrays) with serde.
    pub fn raw<T: DeserializeOwned>(&self, key: &str, target: &mut T) -> Result<(), DescriptorError> {
        let Some(value) = self.get(key) else {
            return Ok(());
        };
        *target = T::deserialize(value).map_err(|source| DescriptorError::Malformed {
            key: key.to_string(),
            source,
        })?;
        Ok(())
    }

    fn read<T>(
        &self,
        key: &str,
        expected: &'static str,
        target: &mut T,
        decode: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<(), DescriptorError> {
        let Some(value) = self.get(key) else {
            return Ok(());
        };
        *target = decode(value).ok_or_else(|| DescriptorError::TypeMismatch {
            key: key.to_string(),
            expected,
        })?;
        Ok(())
    }
}

fn payload(node: &Value) -> &Value {
    match node {
        Value::Object(object) => object
            .get("value")
            .or_else(|| object.get("values"))
            .unwrap_or(node),
        other => other,
    }
}

fn float_array<const N: usize>(value: &Value) -> Option<[f32; N]> {
    let items = value.as_array().filter(|items| items.len() == N)?;
    let mut out = [0.0f32; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.as_f64()? as f32;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    property_enum! {
        #[derive(Default)]
        enum Shade {
            #[default]
            Flat,
            Smooth,
            Faceted,
        }
    }

    fn compile(generate_desc: bool) -> Properties {
        let mut properties = Properties::new();
        let mut writer = DescriptorWriter::new(&mut properties, generate_desc);
        writer.add(
            "radius",
            Property::new("Light", Editor::Float, PropertyValue::Float(0.1)),
        );
        writer.add(
            "color",
            Property::new("Light", Editor::Color, PropertyValue::Vec3(Vec3::new(1.0, 0.5, 0.25))),
        );
        writer.add(
            "orientation",
            Property::new(
                "Light",
                Editor::Rotation,
                PropertyValue::Quat(Quat::from_rotation_y(0.3)),
            ),
        );
        writer.add(
            "shade",
            Property::new("Look", Editor::Enum, PropertyValue::enumeration(Shade::Faceted)),
        );
        writer.add(
            "passes",
            Property::new(
                "Look",
                Editor::Flags,
                PropertyValue::Flags {
                    selected: vec![Name::new("Shadow")],
                    items: &["GBuffer", "Shadow"],
                },
            ),
        );
        writer.add(
            "count",
            Property::new("Look", Editor::Uint, PropertyValue::Uint(u32::MAX)).read_only(),
        );
        properties
    }

    fn decode(properties: &Properties) -> (f32, Vec3, Quat, Shade, Vec<Name>, u32) {
        let reader = DescriptorReader::new(properties);
        let mut radius = 0.0;
        let mut color = Vec3::ZERO;
        let mut orientation = Quat::IDENTITY;
        let mut shade = Shade::default();
        let mut passes = Vec::new();
        let mut count = 0;
        reader.float("radius", &mut radius).unwrap();
        reader.vec3("color", &mut color).unwrap();
        reader.quat("orientation", &mut orientation).unwrap();
        reader.enumeration("shade", &mut shade).unwrap();
        reader.flags("passes", &mut passes).unwrap();
        reader.uint("count", &mut count).unwrap();
        (radius, color, orientation, shade, passes, count)
    }

    #[test]
    fn both_encodings_decode_to_the_same_fields() {
        let expected = (
            0.1f32,
            Vec3::new(1.0, 0.5, 0.25),
            Quat::from_rotation_y(0.3),
            Shade::Faceted,
            vec![Name::new("Shadow")],
            u32::MAX,
        );
        assert_eq!(decode(&compile(false)), expected);
        assert_eq!(decode(&compile(true)), expected);
    }

    #[test]
    fn float_survives_text_round_trip() {
        let text = serde_json::to_string(&compile(false)).unwrap();
        let parsed: Properties = serde_json::from_str(&text).unwrap();
        let (radius, ..) = decode(&parsed);
        assert_eq!(radius.to_bits(), 0.1f32.to_bits());
    }

    #[test]
    fn metadata_form_carries_editor_information() {
        let properties = compile(true);
        assert_eq!(properties["shade"]["editor"], "enum");
        assert_eq!(properties["shade"]["enumItems"], json!(["Flat", "Smooth", "Faceted"]));
        assert_eq!(properties["shade"]["value"], 2);
        assert_eq!(properties["color"]["values"], json!([1.0, 0.5, 0.25]));
        assert_eq!(properties["passes"]["flagItems"], json!(["GBuffer", "Shadow"]));
        assert_eq!(properties["count"]["readOnly"], true);
        assert_eq!(properties["radius"]["cat"], "Light");
    }

    #[test]
    fn missing_keys_leave_fields_untouched() {
        let properties = Properties::new();
        let reader = DescriptorReader::new(&properties);
        let mut radius = 4.0;
        reader.float("radius", &mut radius).unwrap();
        assert_eq!(radius, 4.0);
    }

    #[test]
    fn enum_names_are_rejected() {
        let properties = json!({ "shade": "Smooth" });
        let reader = DescriptorReader::new(properties.as_object().unwrap());
        let mut shade = Shade::Flat;
        assert!(matches!(
            reader.enumeration("shade", &mut shade),
            Err(DescriptorError::TypeMismatch { .. })
        ));
        assert_eq!(shade, Shade::Flat);
    }

    #[test]
    fn out_of_range_ordinal_is_reported() {
        let properties = json!({ "shade": { "value": 7 } });
        let reader = DescriptorReader::new(properties.as_object().unwrap());
        let mut shade = Shade::Flat;
        let err = reader.enumeration("shade", &mut shade).unwrap_err();
        assert!(matches!(err, DescriptorError::EnumOutOfRange { ordinal: 7, .. }));
    }

    #[test]
    fn non_finite_floats_are_written_as_zero() {
        let property = Property::new("X", Editor::Float, PropertyValue::Float(f32::NAN));
        assert_eq!(property.to_json(false), json!(0.0));
    }

    #[test]
    fn type_mismatch_names_the_key() {
        let properties = json!({ "radius": "wide" });
        let reader = DescriptorReader::new(properties.as_object().unwrap());
        let mut radius = 1.0;
        let err = reader.float("radius", &mut radius).unwrap_err();
        assert!(err.to_string().contains("radius"));
    }
}
