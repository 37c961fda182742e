use crate::dod::Component;
use crate::name::Name;
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

/// Places a mesh resource on an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshComponent {
    pub mesh_name: Name,
    /// Number of times the runtime state was rebuilt, e.g. after a re-import.
    pub reload_count: u32,
}

impl Component for MeshComponent {
    const KIND: &'static str = "MeshComponent";
    const CAPACITY: u32 = 16_384;

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "meshName",
            Property::new(
                "Mesh",
                Editor::MeshSelector,
                PropertyValue::ResourceRef {
                    kind: "Mesh",
                    name: self.mesh_name.clone(),
                },
            ),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.name("meshName", &mut self.mesh_name)
    }

    fn create_resources(&mut self) {
        self.reload_count += 1;
    }
}
