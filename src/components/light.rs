use glam::Vec3;

use crate::dod::Component;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Point light.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
    /// Kelvin.
    pub temperature: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            radius: 5.0,
            color: Vec3::ONE,
            intensity: 1.0,
            temperature: 6500.0,
        }
    }
}

impl Component for Light {
    const KIND: &'static str = "Light";
    const CAPACITY: u32 = 4096;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "radius",
            Property::new("Light", Editor::Float, PropertyValue::Float(self.radius)),
        );
        out.add(
            "color",
            Property::new("Light", Editor::Color, PropertyValue::Vec3(self.color)),
        );
        out.add(
            "intensity",
            Property::new("Light", Editor::Float, PropertyValue::Float(self.intensity)),
        );
        out.add(
            "temperature",
            Property::new("Light", Editor::Float, PropertyValue::Float(self.temperature)),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.float("radius", &mut self.radius)?;
        reader.vec3("color", &mut self.color)?;
        reader.float("intensity", &mut self.intensity)?;
        reader.float("temperature", &mut self.temperature)
    }
}
