use crate::dod::{Resource, Storage};
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

crate::property_enum! {
    /// Importer an asset's source file is compiled with.
    #[derive(Default)]
    pub enum AssetType {
        #[default]
        None,
        Mesh,
        ColorTexture,
        AlphaTexture,
        NormalTexture,
        HdrTexture,
    }
}

impl AssetType {
    /// Guesses the type from a source file extension.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "fbx" | "obj" | "xml" => AssetType::Mesh,
            "tga" | "png" => AssetType::ColorTexture,
            "hdr" | "dds" => AssetType::HdrTexture,
            _ => AssetType::None,
        }
    }

    pub fn is_texture(self) -> bool {
        matches!(
            self,
            AssetType::ColorTexture
                | AssetType::AlphaTexture
                | AssetType::NormalTexture
                | AssetType::HdrTexture
        )
    }
}

/// Source file declaration driving the import pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Asset {
    /// File name relative to the source directory of its type.
    pub file_name: String,
    pub asset_type: AssetType,
}

impl Resource for Asset {
    const KIND: &'static str = "Asset";
    const CAPACITY: u32 = 4096;
    const STORAGE: Storage = Storage::MultipleFiles {
        directory: "assets",
        extension: ".asset.json",
    };

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "assetFileName",
            Property::new(
                "Asset",
                Editor::String,
                PropertyValue::Str(self.file_name.clone()),
            ),
        );
        out.add(
            "assetType",
            Property::new(
                "Asset",
                Editor::Enum,
                PropertyValue::enumeration(self.asset_type),
            ),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.string("assetFileName", &mut self.file_name)?;
        reader.enumeration("assetType", &mut self.asset_type)
    }
}
