use glam::{Vec2, Vec3, Vec4};

use crate::dod::{Resource, Storage};
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Render passes a material can take part in.
pub const MATERIAL_PASSES: &[&str] = &[
    "GBuffer",
    "GBufferWater",
    "GBufferFoliage",
    "Sky",
    "Shadow",
    "ShadowFoliage",
    "PerPixelPicking",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub albedo_texture_name: Name,
    pub normal_texture_name: Name,
    pub pbr_texture_name: Name,
    pub blend_mask_texture_name: Name,
    pub uv_offset_scale: Vec4,
    pub uv_animation: Vec2,
    pub pbr_bias: Vec3,
    pub refraction_factor: f32,
    pub translucency_thickness: f32,
    pub material_pass_mask: Vec<Name>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo_texture_name: Name::new("checkerboard"),
            normal_texture_name: Name::new("default_NRM"),
            pbr_texture_name: Name::new("default_PBR"),
            blend_mask_texture_name: Name::new("white"),
            uv_offset_scale: Vec4::new(0.0, 0.0, 1.0, 1.0),
            uv_animation: Vec2::ZERO,
            pbr_bias: Vec3::ZERO,
            refraction_factor: 0.0,
            translucency_thickness: 0.0,
            material_pass_mask: ["GBuffer", "Shadow", "PerPixelPicking"]
                .into_iter()
                .map(Name::new)
                .collect(),
        }
    }
}

impl Material {
    /// Image names this material samples from.
    pub fn texture_names(&self) -> [&Name; 4] {
        [
            &self.albedo_texture_name,
            &self.normal_texture_name,
            &self.pbr_texture_name,
            &self.blend_mask_texture_name,
        ]
    }
}

fn texture(name: &Name) -> Property {
    Property::new(
        "Textures",
        Editor::String,
        PropertyValue::ResourceRef {
            kind: "Image",
            name: name.clone(),
        },
    )
}

impl Resource for Material {
    const KIND: &'static str = "Material";
    const CAPACITY: u32 = 1024;
    const STORAGE: Storage = Storage::SingleFile("Material.manager.json");

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add("albedoTextureName", texture(&self.albedo_texture_name));
        out.add("normalTextureName", texture(&self.normal_texture_name));
        out.add("pbrTextureName", texture(&self.pbr_texture_name));
        out.add("blendMaskTextureName", texture(&self.blend_mask_texture_name));
        out.add(
            "uvOffsetScale",
            Property::new("Surface", Editor::Vec4, PropertyValue::Vec4(self.uv_offset_scale)),
        );
        out.add(
            "uvAnimation",
            Property::new("Surface", Editor::Vec2, PropertyValue::Vec2(self.uv_animation)),
        );
        out.add(
            "pbrBias",
            Property::new("Surface", Editor::Vec3, PropertyValue::Vec3(self.pbr_bias)),
        );
        out.add(
            "refractionFactor",
            Property::new(
                "Surface",
                Editor::Float,
                PropertyValue::Float(self.refraction_factor),
            ),
        );
        out.add(
            "translucencyThickness",
            Property::new(
                "Surface",
                Editor::Float,
                PropertyValue::Float(self.translucency_thickness),
            ),
        );
        out.add(
            "materialPassMask",
            Property::new(
                "Passes",
                Editor::Flags,
                PropertyValue::Flags {
                    selected: self.material_pass_mask.clone(),
                    items: MATERIAL_PASSES,
                },
            ),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.name("albedoTextureName", &mut self.albedo_texture_name)?;
        reader.name("normalTextureName", &mut self.normal_texture_name)?;
        reader.name("pbrTextureName", &mut self.pbr_texture_name)?;
        reader.name("blendMaskTextureName", &mut self.blend_mask_texture_name)?;
        reader.vec4("uvOffsetScale", &mut self.uv_offset_scale)?;
        reader.vec2("uvAnimation", &mut self.uv_animation)?;
        reader.vec3("pbrBias", &mut self.pbr_bias)?;
        reader.float("refractionFactor", &mut self.refraction_factor)?;
        reader.float("translucencyThickness", &mut self.translucency_thickness)?;
        reader.flags("materialPassMask", &mut self.material_pass_mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dod::ResourceManager;
    use tempfile::tempdir;

    #[test]
    fn defaults_point_at_builtin_textures() {
        let material = Material::default();
        assert_eq!(material.albedo_texture_name, "checkerboard");
        assert_eq!(material.normal_texture_name, "default_NRM");
        assert_eq!(material.pbr_texture_name, "default_PBR");
        assert_eq!(material.material_pass_mask.len(), 3);
    }

    #[test]
    fn single_file_round_trip() {
        let dir = tempdir().unwrap();
        let mut materials = ResourceManager::<Material>::new();
        let rock = materials.create("rock");
        materials[rock].albedo_texture_name = Name::new("rock_ALB");
        materials[rock].uv_offset_scale = Vec4::new(0.5, 0.25, 2.0, 2.0);
        materials[rock].refraction_factor = 0.33;
        materials[rock].material_pass_mask = vec![Name::new("GBufferWater")];
        let expected = materials[rock].clone();
        materials.save(dir.path()).unwrap();
        assert!(dir.path().join("Material.manager.json").is_file());

        materials.clear();
        materials.load(dir.path()).unwrap();
        let rock = materials.find("rock").unwrap();
        assert_eq!(materials[rock], expected);
    }
}
