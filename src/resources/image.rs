use glam::UVec3;

use crate::dod::{Resource, Storage};
use crate::property::{
    DescriptorError, DescriptorReader, DescriptorWriter, Editor, Property, PropertyValue,
};

crate::property_enum! {
    #[derive(Default)]
    pub enum ImageType {
        #[default]
        Texture,
        TextureFromFile,
        RenderTarget,
        RenderTargetCubemap,
    }
}

crate::property_enum! {
    /// GPU format of an image.
    #[derive(Default)]
    pub enum ImageFormat {
        #[default]
        R8G8B8A8UNorm,
        R8G8B8A8Srgb,
        R16G16B16A16Float,
        BC1RGBUNorm,
        BC1RGBSrgb,
        BC2UNorm,
        BC2Srgb,
        BC3UNorm,
        BC3Srgb,
        BC5UNorm,
        BC6UFloat,
        D24UNormS8UInt,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub image_type: ImageType,
    pub image_format: ImageFormat,
    pub image_flags: u32,
    pub dimensions: UVec3,
    pub array_layer_count: u32,
    pub mip_level_count: u32,
    /// Compiled file under the media texture directory.
    pub file_name: String,
}

impl Default for Image {
    fn default() -> Self {
        Self {
            image_type: ImageType::Texture,
            image_format: ImageFormat::R8G8B8A8UNorm,
            image_flags: 0,
            dimensions: UVec3::ONE,
            array_layer_count: 1,
            mip_level_count: 1,
            file_name: String::new(),
        }
    }
}

fn uint(value: u32) -> Property {
    Property::new("Image", Editor::Uint, PropertyValue::Uint(value))
}

impl Resource for Image {
    const KIND: &'static str = "Image";
    const CAPACITY: u32 = 1024;
    const STORAGE: Storage = Storage::SingleFile("Image.manager.json");

    fn compile_descriptor(&self, out: &mut DescriptorWriter<'_>) {
        out.add(
            "imageType",
            Property::new("Image", Editor::Enum, PropertyValue::enumeration(self.image_type)),
        );
        out.add(
            "imageFormat",
            Property::new(
                "Image",
                Editor::Enum,
                PropertyValue::enumeration(self.image_format),
            ),
        );
        out.add("imageFlags", uint(self.image_flags));
        out.add(
            "dimensions",
            Property::new("Image", Editor::Vec3, PropertyValue::UVec3(self.dimensions)),
        );
        out.add("arrayLayerCount", uint(self.array_layer_count));
        out.add("mipLevelCount", uint(self.mip_level_count));
        out.add(
            "fileName",
            Property::new("Image", Editor::String, PropertyValue::Str(self.file_name.clone())),
        );
    }

    fn init_from_descriptor(&mut self, reader: &DescriptorReader<'_>) -> Result<(), DescriptorError> {
        reader.enumeration("imageType", &mut self.image_type)?;
        reader.enumeration("imageFormat", &mut self.image_format)?;
        reader.uint("imageFlags", &mut self.image_flags)?;
        reader.uvec3("dimensions", &mut self.dimensions)?;
        reader.uint("arrayLayerCount", &mut self.array_layer_count)?;
        reader.uint("mipLevelCount", &mut self.mip_level_count)?;
        reader.string("fileName", &mut self.file_name)
    }
}
