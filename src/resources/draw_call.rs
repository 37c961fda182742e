use glam::UVec3;

use crate::dod::{Resource, ResourceFlags, Storage};
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};
use crate::resources::ImageRef;

crate::property_enum! {
    #[derive(Default)]
    pub enum MaterialPass {
        #[default]
        GBuffer,
        GBufferWater,
        GBufferFoliage,
        Sky,
        Shadow,
        ShadowFoliage,
        PerPixelPicking,
    }
}

/// Runtime draw of one sub-mesh with one material pass.
///
/// Draw calls hold descriptor state that points at images, so they are
/// recreated whenever one of their bound images is recompiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawCall {
    pub mesh_name: Name,
    pub sub_mesh: u32,
    pub material_name: Name,
    pub material_pass: MaterialPass,
    pub index_count: u32,
    pub instance_count: u32,
    pub bound_images: Vec<ImageRef>,
    /// Number of times the runtime resources were (re)created.
    pub recreation_count: u32,
}

impl DrawCall {
    pub fn binds(&self, image: ImageRef) -> bool {
        self.bound_images.contains(&image)
    }
}

impl Resource for DrawCall {
    const KIND: &'static str = "DrawCall";
    const CAPACITY: u32 = 16_384;
    const STORAGE: Storage = Storage::Transient;
    const DEFAULT_FLAGS: ResourceFlags = ResourceFlags::VOLATILE;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "meshName",
            Property::new(
                "DrawCall",
                Editor::MeshSelector,
                PropertyValue::ResourceRef {
                    kind: "Mesh",
                    name: self.mesh_name.clone(),
                },
            ),
        );
        out.add(
            "subMesh",
            Property::new("DrawCall", Editor::Uint, PropertyValue::Uint(self.sub_mesh)),
        );
        out.add(
            "materialName",
            Property::new(
                "DrawCall",
                Editor::String,
                PropertyValue::ResourceRef {
                    kind: "Material",
                    name: self.material_name.clone(),
                },
            ),
        );
        out.add(
            "materialPass",
            Property::new(
                "DrawCall",
                Editor::Enum,
                PropertyValue::enumeration(self.material_pass),
            ),
        );
        out.add(
            "indexCount",
            Property::new("DrawCall", Editor::Uint, PropertyValue::Uint(self.index_count)),
        );
        out.add(
            "instanceCount",
            Property::new("DrawCall", Editor::Uint, PropertyValue::Uint(self.instance_count)),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.name("meshName", &mut self.mesh_name)?;
        reader.uint("subMesh", &mut self.sub_mesh)?;
        reader.name("materialName", &mut self.material_name)?;
        reader.enumeration("materialPass", &mut self.material_pass)?;
        reader.uint("indexCount", &mut self.index_count)?;
        reader.uint("instanceCount", &mut self.instance_count)
    }

    fn create_resources(&mut self, _name: &Name) {
        self.recreation_count += 1;
    }
}

/// Runtime compute dispatch, invalidated like [`DrawCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeCall {
    pub gpu_program_name: Name,
    pub dimensions: UVec3,
    pub bound_images: Vec<ImageRef>,
    pub recreation_count: u32,
}

impl Default for ComputeCall {
    fn default() -> Self {
        Self {
            gpu_program_name: Name::default(),
            dimensions: UVec3::ONE,
            bound_images: Vec::new(),
            recreation_count: 0,
        }
    }
}

impl ComputeCall {
    pub fn binds(&self, image: ImageRef) -> bool {
        self.bound_images.contains(&image)
    }
}

impl Resource for ComputeCall {
    const KIND: &'static str = "ComputeCall";
    const CAPACITY: u32 = 1024;
    const STORAGE: Storage = Storage::Transient;
    const DEFAULT_FLAGS: ResourceFlags = ResourceFlags::VOLATILE;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "gpuProgramName",
            Property::new(
                "ComputeCall",
                Editor::String,
                PropertyValue::ResourceRef {
                    kind: "GpuProgram",
                    name: self.gpu_program_name.clone(),
                },
            ),
        );
        out.add(
            "dimensions",
            Property::new("ComputeCall", Editor::Vec3, PropertyValue::UVec3(self.dimensions)),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.name("gpuProgramName", &mut self.gpu_program_name)?;
        reader.uvec3("dimensions", &mut self.dimensions)
    }

    fn create_resources(&mut self, _name: &Name) {
        self.recreation_count += 1;
    }
}
