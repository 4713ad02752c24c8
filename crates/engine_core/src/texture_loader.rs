// crates/engine_core/src/texture_loader.rs
//! DDS texture loading.
//!
//! Only uncompressed 32-bit RGBA/BGRA surfaces are supported, and only the
//! top mip level is uploaded.

use std::path::Path;
use std::sync::Arc;

use crate::error::{DeviceError, TextureError};
use crate::gpu::{CommandList, Device, Format, HeapType, ResourceDesc, ResourceId, ResourceState, Staging, TrackedResource};

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: usize = 124;
const DATA_OFFSET: usize = 4 + HEADER_SIZE;
const DDPF_FOURCC: u32 = 0x4;

/// A texture resource plus the upload heap its initial copy reads from.
pub struct LoadedTexture {
    pub resource: ResourceId,
    pub upload: Staging,
    pub width: u32,
    pub height: u32,
}

pub trait TextureLoader {
    /// Records the upload of `path` into `list`. The returned upload buffer
    /// must outlive the execution of `list`.
    fn load(&self, device: &Arc<dyn Device>, list: &mut CommandList, path: &Path) -> Result<LoadedTexture, TextureError>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct DdsTextureLoader;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DdsImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureLoader for DdsTextureLoader {
    fn load(&self, device: &Arc<dyn Device>, list: &mut CommandList, path: &Path) -> Result<LoadedTexture, TextureError> {
        let bytes = std::fs::read(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => TextureError::NotFound(path.to_path_buf()),
            _ => TextureError::Io {
                path: path.to_path_buf(),
                err,
            },
        })?;
        let image = parse_dds(path, &bytes)?;
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "texture".to_string());
        Ok(upload_rgba(device, list, image.width, image.height, &image.rgba, &label)?)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

pub fn parse_dds(path: &Path, bytes: &[u8]) -> Result<DdsImage, TextureError> {
    let invalid = |reason: &str| TextureError::InvalidDds {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if bytes.len() < DATA_OFFSET || &bytes[0..4] != DDS_MAGIC {
        return Err(invalid("missing DDS magic or truncated header"));
    }
    if read_u32(bytes, 4) as usize != HEADER_SIZE {
        return Err(invalid("unexpected header size"));
    }

    let height = read_u32(bytes, 12);
    let width = read_u32(bytes, 16);
    let pf_flags = read_u32(bytes, 80);
    let bit_count = read_u32(bytes, 88);
    let red_mask = read_u32(bytes, 92);

    if pf_flags & DDPF_FOURCC != 0 {
        return Err(invalid("compressed and DX10 surfaces are not supported"));
    }
    if bit_count != 32 {
        return Err(invalid("only 32-bit surfaces are supported"));
    }
    if width == 0 || height == 0 {
        return Err(invalid("empty surface"));
    }

    let len = width as usize * height as usize * 4;
    let data = bytes
        .get(DATA_OFFSET..DATA_OFFSET + len)
        .ok_or_else(|| invalid("pixel data shorter than width * height"))?;

    let mut rgba = data.to_vec();
    // BGRA surfaces keep red in the third byte.
    if red_mask == 0x00ff_0000 {
        for texel in rgba.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
    }
    Ok(DdsImage { width, height, rgba })
}

/// Writes an uncompressed RGBA DDS file image.
pub fn encode_dds_rgba(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(DATA_OFFSET + rgba.len());
    out.extend_from_slice(DDS_MAGIC);
    let mut header = [0u32; HEADER_SIZE / 4];
    header[0] = HEADER_SIZE as u32;
    header[1] = 0x1 | 0x2 | 0x4 | 0x8 | 0x1000; // caps | height | width | pitch | pixelformat
    header[2] = height;
    header[3] = width;
    header[4] = width * 4;
    header[18] = 32; // pixel format size
    header[19] = 0x40 | 0x1; // rgb | alpha pixels
    header[21] = 32;
    header[22] = 0x0000_00ff;
    header[23] = 0x0000_ff00;
    header[24] = 0x00ff_0000;
    header[25] = 0xff00_0000;
    header[26] = 0x1000; // DDSCAPS_TEXTURE
    for word in header {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(rgba);
    out
}

/// Creates an RGBA8 texture and records COMMON -> COPY_DEST -> copy -> GENERIC_READ.
pub fn upload_rgba(
    device: &Arc<dyn Device>,
    list: &mut CommandList,
    width: u32,
    height: u32,
    rgba: &[u8],
    label: &str,
) -> Result<LoadedTexture, DeviceError> {
    let desc = ResourceDesc::tex2d(Format::R8G8B8A8Unorm, width, height);
    let resource = device.create_committed_resource(HeapType::Default, &desc, ResourceState::Common, label)?;
    let upload = Staging::with_bytes(device.clone(), rgba, &format!("{label} (upload)"))?;

    let mut tracked = TrackedResource::new(resource, ResourceState::Common);
    tracked.transition(list, ResourceState::CopyDest);
    list.copy_buffer_to_texture(resource, upload.resource);
    tracked.transition(list, ResourceState::GenericRead);

    Ok(LoadedTexture {
        resource,
        upload,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_what_it_encodes() {
        let rgba: Vec<u8> = (0..16u8).collect();
        let file = encode_dds_rgba(2, 2, &rgba);
        let image = parse_dds(Path::new("t.dds"), &file).unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert_eq!(image.rgba, rgba);
    }

    #[test]
    fn bgra_is_swizzled() {
        let mut file = encode_dds_rgba(1, 1, &[10, 20, 30, 40]);
        // Swap the red and blue masks.
        file[92..96].copy_from_slice(&0x00ff_0000u32.to_le_bytes());
        file[100..104].copy_from_slice(&0x0000_00ffu32.to_le_bytes());
        let image = parse_dds(Path::new("t.dds"), &file).unwrap();
        assert_eq!(image.rgba, vec![30, 20, 10, 40]);
    }

    #[test]
    fn rejects_compressed() {
        let mut file = encode_dds_rgba(1, 1, &[0; 4]);
        file[80..84].copy_from_slice(&DDPF_FOURCC.to_le_bytes());
        assert!(matches!(
            parse_dds(Path::new("t.dds"), &file),
            Err(TextureError::InvalidDds { .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_dds(Path::new("t.dds"), b"PNG").is_err());
    }
}
