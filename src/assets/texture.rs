use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};

use crate::registry::ManagerRegistry;
use crate::resources::{AssetType, Image, ImageFormat, ImageRef, ImageType};

/// Block compression mode requested from the external compressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompression {
    Bc1,
    Bc2,
}

impl BlockCompression {
    pub fn flag(self) -> &'static str {
        match self {
            BlockCompression::Bc1 => "-bc1",
            BlockCompression::Bc2 => "-bc2",
        }
    }
}

/// Produces a block-compressed `.dds` file from a source image.
pub trait TextureCompressor: Send + Sync {
    fn compress(&self, mode: BlockCompression, source: &Path, destination: &Path) -> Result<()>;
}

/// Runs the NVIDIA texture tools command line compressor.
#[derive(Debug, Clone)]
pub struct NvCompress {
    executable: PathBuf,
}

impl NvCompress {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

impl TextureCompressor for NvCompress {
    fn compress(&self, mode: BlockCompression, source: &Path, destination: &Path) -> Result<()> {
        log::debug!(
            "{} {} {} {}",
            self.executable.display(),
            mode.flag(),
            source.display(),
            destination.display()
        );
        let status = Command::new(&self.executable)
            .arg(mode.flag())
            .arg(source)
            .arg(destination)
            .status()
            .with_context(|| {
                format!(
                    "failed to launch texture compressor {}",
                    self.executable.display()
                )
            })?;
        if !status.success() {
            bail!(
                "texture compressor failed on {} ({status})",
                source.display()
            );
        }
        Ok(())
    }
}

/// How a texture asset type is compiled.
fn compile_mode(asset_type: AssetType) -> Option<(Option<BlockCompression>, ImageFormat)> {
    match asset_type {
        AssetType::ColorTexture | AssetType::NormalTexture => {
            Some((Some(BlockCompression::Bc1), ImageFormat::BC1RGBUNorm))
        }
        AssetType::AlphaTexture => Some((Some(BlockCompression::Bc2), ImageFormat::BC2Srgb)),
        // Already compressed cubemaps are copied through.
        AssetType::HdrTexture => Some((None, ImageFormat::BC6UFloat)),
        AssetType::None | AssetType::Mesh => None,
    }
}

/// Compiles `source` into `media_dir/<stem>.dds` and creates or replaces the
/// Image named `<stem>`.
///
/// The Image is only touched after the compiled file was written.
pub fn import_texture(
    registry: &mut ManagerRegistry,
    compressor: &dyn TextureCompressor,
    source: &Path,
    asset_type: AssetType,
    media_dir: &Path,
) -> Result<ImageRef> {
    let (compression, format) = compile_mode(asset_type)
        .ok_or_else(|| anyhow!("asset type {asset_type:?} is not a texture"))?;
    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| anyhow!("texture path {} has no file name", source.display()))?;
    fs::create_dir_all(media_dir)
        .with_context(|| format!("failed to create {}", media_dir.display()))?;
    let file_name = format!("{stem}.dds");
    let destination = media_dir.join(&file_name);

    match compression {
        Some(mode) => compressor.compress(mode, source, &destination)?,
        None => {
            fs::copy(source, &destination).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
        }
    }

    let images = registry.resources_mut::<Image>();
    let handle = match images.find(stem) {
        Some(existing) => {
            images.destroy_resources(&[existing]);
            existing
        }
        None => images.create(stem),
    };
    images.reset_to_default(handle);
    let image = &mut images[handle];
    image.image_type = ImageType::TextureFromFile;
    image.image_format = format;
    image.file_name = file_name;
    images.create_resources(&[handle]);
    log::info!("Compiled texture `{stem}` as {format:?}");
    Ok(handle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dod::ResourceManager;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Records invocations and writes a stub output file.
    #[derive(Default)]
    pub(crate) struct FakeCompressor {
        pub calls: Mutex<Vec<(BlockCompression, PathBuf, PathBuf)>>,
        pub fail: bool,
    }

    impl TextureCompressor for FakeCompressor {
        fn compress(&self, mode: BlockCompression, source: &Path, destination: &Path) -> Result<()> {
            self.calls
                .lock()
                .push((mode, source.to_path_buf(), destination.to_path_buf()));
            if self.fail {
                bail!("compressor exited with status 1");
            }
            fs::write(destination, b"DDS ")?;
            Ok(())
        }
    }

    fn registry() -> ManagerRegistry {
        let mut registry = ManagerRegistry::new();
        registry.register_resource(ResourceManager::<Image>::new());
        registry
    }

    #[test]
    fn color_textures_compress_to_bc1() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("rock_ALB.tga");
        fs::write(&source, b"tga").unwrap();
        let compressor = FakeCompressor::default();
        let mut registry = registry();

        let handle = import_texture(
            &mut registry,
            &compressor,
            &source,
            AssetType::ColorTexture,
            &dir.path().join("media"),
        )
        .unwrap();

        let image = &registry.resources::<Image>()[handle];
        assert_eq!(image.image_format, ImageFormat::BC1RGBUNorm);
        assert_eq!(image.image_type, ImageType::TextureFromFile);
        assert_eq!(image.file_name, "rock_ALB.dds");
        let calls = compressor.calls.lock();
        assert_eq!(calls[0].0.flag(), "-bc1");
        assert_eq!(calls[0].2, dir.path().join("media/rock_ALB.dds"));
    }

    #[test]
    fn alpha_textures_use_bc2() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("leaves.tga");
        fs::write(&source, b"tga").unwrap();
        let compressor = FakeCompressor::default();
        let mut registry = registry();
        let handle = import_texture(
            &mut registry,
            &compressor,
            &source,
            AssetType::AlphaTexture,
            dir.path(),
        )
        .unwrap();
        assert_eq!(
            registry.resources::<Image>()[handle].image_format,
            ImageFormat::BC2Srgb
        );
        assert_eq!(compressor.calls.lock()[0].0, BlockCompression::Bc2);
    }

    #[test]
    fn hdr_cubemaps_are_copied() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("sky.hdr");
        fs::write(&source, b"cubemap").unwrap();
        let compressor = FakeCompressor::default();
        let mut registry = registry();
        let media = dir.path().join("media");
        let handle =
            import_texture(&mut registry, &compressor, &source, AssetType::HdrTexture, &media)
                .unwrap();
        assert!(compressor.calls.lock().is_empty());
        assert_eq!(fs::read(media.join("sky.dds")).unwrap(), b"cubemap");
        assert_eq!(
            registry.resources::<Image>()[handle].image_format,
            ImageFormat::BC6UFloat
        );
    }

    #[test]
    fn compressor_failure_leaves_the_image_untouched() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("rock_ALB.tga");
        let mut registry = registry();
        let existing = registry.resources_mut::<Image>().create("rock_ALB");
        registry.resources_mut::<Image>()[existing].file_name = "old.dds".into();

        let compressor = FakeCompressor {
            fail: true,
            ..FakeCompressor::default()
        };
        let result = import_texture(
            &mut registry,
            &compressor,
            &source,
            AssetType::ColorTexture,
            dir.path(),
        );
        assert!(result.is_err());
        assert_eq!(registry.resources::<Image>()[existing].file_name, "old.dds");
    }

    #[test]
    fn recompiling_keeps_the_image_handle() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("rock_NRM.tga");
        let compressor = FakeCompressor::default();
        let mut registry = registry();
        let first = import_texture(
            &mut registry,
            &compressor,
            &source,
            AssetType::NormalTexture,
            dir.path(),
        )
        .unwrap();
        let second = import_texture(
            &mut registry,
            &compressor,
            &source,
            AssetType::NormalTexture,
            dir.path(),
        )
        .unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.resources::<Image>().active_count(), 1);
    }
}
