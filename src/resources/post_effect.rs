use glam::{Quat, Vec3};

use crate::dod::{Resource, Storage};
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Global lighting and atmosphere parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PostEffect {
    pub main_light_orientation: Quat,
    pub main_light_color: Vec3,
    pub main_light_intensity: f32,
    pub main_light_temperature: f32,
    pub ambient_factor: f32,
    pub volumetric_scattering: f32,
}

impl Default for PostEffect {
    fn default() -> Self {
        Self {
            main_light_orientation: Quat::IDENTITY,
            main_light_color: Vec3::ONE,
            main_light_intensity: 5.0,
            main_light_temperature: 6500.0,
            ambient_factor: 1.0,
            volumetric_scattering: 0.0,
        }
    }
}

fn float(category: &'static str, value: f32) -> Property {
    Property::new(category, Editor::Float, PropertyValue::Float(value))
}

impl Resource for PostEffect {
    const KIND: &'static str = "PostEffect";
    const CAPACITY: u32 = 64;
    const STORAGE: Storage = Storage::SingleFile("PostEffect.manager.json");

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "mainLightOrientation",
            Property::new(
                "MainLight",
                Editor::Rotation,
                PropertyValue::Quat(self.main_light_orientation),
            ),
        );
        out.add(
            "mainLightColor",
            Property::new("MainLight", Editor::Color, PropertyValue::Vec3(self.main_light_color)),
        );
        out.add("mainLightIntensity", float("MainLight", self.main_light_intensity));
        out.add("mainLightTemperature", float("MainLight", self.main_light_temperature));
        out.add("ambientFactor", float("Ambient", self.ambient_factor));
        out.add("volumetricScattering", float("Volumetrics", self.volumetric_scattering));
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.quat("mainLightOrientation", &mut self.main_light_orientation)?;
        reader.vec3("mainLightColor", &mut self.main_light_color)?;
        reader.float("mainLightIntensity", &mut self.main_light_intensity)?;
        reader.float("mainLightTemperature", &mut self.main_light_temperature)?;
        reader.float("ambientFactor", &mut self.ambient_factor)?;
        reader.float("volumetricScattering", &mut self.volumetric_scattering)
    }
}
