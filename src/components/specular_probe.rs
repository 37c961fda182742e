use std::cmp::Reverse;

use crate::algorithm::parallel_sort_by;
use crate::dod::{Component, ComponentManager, Handle};
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Local reflection probe.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecularProbe {
    pub radius: f32,
    pub falloff_range_perc: f32,
    pub falloff_exponent: f32,
    /// Higher priorities are blended last.
    pub priority: u32,
    pub specular_texture_name: Name,
}

impl Default for SpecularProbe {
    fn default() -> Self {
        Self {
            radius: 5.0,
            falloff_range_perc: 0.05,
            falloff_exponent: 1.0,
            priority: 0,
            specular_texture_name: Name::default(),
        }
    }
}

impl Component for SpecularProbe {
    const KIND: &'static str = "SpecularProbe";
    const CAPACITY: u32 = 512;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "radius",
            Property::new("Probe", Editor::Float, PropertyValue::Float(self.radius)),
        );
        out.add(
            "falloffRangePerc",
            Property::new(
                "Probe",
                Editor::Float,
                PropertyValue::Float(self.falloff_range_perc),
            ),
        );
        out.add(
            "falloffExponent",
            Property::new(
                "Probe",
                Editor::Float,
                PropertyValue::Float(self.falloff_exponent),
            ),
        );
        out.add(
            "priority",
            Property::new("Probe", Editor::Uint, PropertyValue::Uint(self.priority)),
        );
        out.add(
            "specularTextureName",
            Property::new(
                "Probe",
                Editor::String,
                PropertyValue::ResourceRef {
                    kind: "Image",
                    name: self.specular_texture_name.clone(),
                },
            )
            .read_only(),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.float("radius", &mut self.radius)?;
        reader.float("falloffRangePerc", &mut self.falloff_range_perc)?;
        reader.float("falloffExponent", &mut self.falloff_exponent)?;
        reader.uint("priority", &mut self.priority)?;
        reader.name("specularTextureName", &mut self.specular_texture_name)
    }
}

/// Active probes ordered by descending priority.
///
/// Probes of equal priority keep their active-list order.
pub fn sort_by_priority(probes: &ComponentManager<SpecularProbe>) -> Vec<Handle<SpecularProbe>> {
    let mut keyed: Vec<(u32, Handle<SpecularProbe>)> = probes
        .iter()
        .map(|(handle, probe)| (probe.priority, handle))
        .collect();
    parallel_sort_by(&mut keyed, |a, b| Reverse(a.0).cmp(&Reverse(b.0)));
    keyed.into_iter().map(|(_, handle)| handle).collect()
}
