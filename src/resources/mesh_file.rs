//! Binary mesh container
//!
//! Little-endian layout:
//!
//! ```text
//! "MDL" u32:version
//! u32:vertices u32:indices u32:subsets u32:bones u32:clips
//! Vertex[vertices]            104 bytes each
//! u32[indices]
//! (u32 index_count, u32 start_index, u32 base_vertex)[subsets]
//! (str name, str parent, i32 parent_id, f32[16] offset)[bones]
//! (str name, u32 tracks, (u32 keys, f32[11] key[keys])[tracks])[clips]
//! ```
//!
//! Strings are a u32 byte length followed by UTF-8. A negative parent id is
//! resolved by looking the parent name up among the bones, defaulting to 0.
//! Keyframes are stored as time, translation xyz, scale xyz, rotation xyzw.

use super::{BoneInfo, MeshData, ResourceError, Subset, Vertex};
use crate::animation::{AnimationClip, BoneAnimation, Keyframe};
use glam::{Mat4, Quat, Vec3};
use std::mem::size_of;
use std::path::Path;

pub const MAGIC: &[u8; 3] = b"MDL";
pub const VERSION: u32 = 1;

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], ResourceError> {
        let end = self.offset.checked_add(len).filter(|&e| e <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(ResourceError::InvalidMeshFile(format!(
                "unexpected end of file reading {} at offset {}",
                what, self.offset
            ))),
        }
    }

    fn u32(&mut self, what: &str) -> Result<u32, ResourceError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, what: &str) -> Result<i32, ResourceError> {
        Ok(self.u32(what)? as i32)
    }

    fn f32s<const N: usize>(&mut self, what: &str) -> Result<[f32; N], ResourceError> {
        let mut out = [0.0; N];
        for value in out.iter_mut() {
            *value = f32::from_bits(self.u32(what)?);
        }
        Ok(out)
    }

    fn string(&mut self, what: &str) -> Result<String, ResourceError> {
        let len = self.u32(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ResourceError::InvalidMeshFile(format!("{} is not valid UTF-8", what)))
    }

    /// Guard against absurd counts before allocating for them
    fn count(&mut self, what: &str, min_record: usize) -> Result<usize, ResourceError> {
        let count = self.u32(what)? as usize;
        let remaining = self.bytes.len() - self.offset;
        if count.saturating_mul(min_record) > remaining {
            return Err(ResourceError::InvalidMeshFile(format!(
                "{} count {} exceeds file size",
                what, count
            )));
        }
        Ok(count)
    }
}

/// Parse a mesh container held in memory
pub fn read(bytes: &[u8]) -> Result<MeshData, ResourceError> {
    let mut r = Reader::new(bytes);

    if r.take(MAGIC.len(), "magic")? != MAGIC {
        return Err(ResourceError::InvalidMeshFile("missing 'MDL' magic".into()));
    }
    let version = r.u32("version")?;
    if version != VERSION {
        return Err(ResourceError::InvalidMeshFile(format!(
            "unsupported version {}",
            version
        )));
    }

    let vertex_count = r.u32("vertex count")? as usize;
    let index_count = r.u32("index count")? as usize;
    let subset_count = r.u32("subset count")? as usize;
    let bone_count = r.u32("bone count")? as usize;
    let clip_count = r.u32("clip count")? as usize;

    let mut mesh = MeshData::default();

    let vertex_bytes = r.take(
        vertex_count.saturating_mul(size_of::<Vertex>()),
        "vertices",
    )?;
    mesh.vertices = vertex_bytes
        .chunks_exact(size_of::<Vertex>())
        .map(bytemuck::pod_read_unaligned)
        .collect();

    let index_bytes = r.take(index_count.saturating_mul(4), "indices")?;
    mesh.indices = index_bytes
        .chunks_exact(4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    for _ in 0..subset_count {
        let subset = Subset {
            index_count: r.u32("subset")?,
            start_index: r.u32("subset")?,
            base_vertex: r.u32("subset")?,
        };
        let end = subset.start_index as usize + subset.index_count as usize;
        if end > mesh.indices.len() {
            return Err(ResourceError::InvalidMeshFile(format!(
                "subset covers indices up to {}, only {} stored",
                end,
                mesh.indices.len()
            )));
        }
        mesh.subsets.push(subset);
    }

    let mut raw_parents = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let name = r.string("bone name")?;
        let parent_name = r.string("bone parent name")?;
        raw_parents.push(r.i32("bone parent id")?);
        let offset = Mat4::from_cols_array(&r.f32s::<16>("bone offset")?);
        mesh.bones.push(BoneInfo {
            name,
            parent_name,
            parent_id: 0,
            offset,
        });
    }
    for (i, raw) in raw_parents.into_iter().enumerate() {
        mesh.bones[i].parent_id = if raw >= 0 {
            raw as usize
        } else {
            mesh.bone_index(&mesh.bones[i].parent_name).unwrap_or(0)
        };
        if mesh.bones[i].parent_id >= mesh.bones.len() {
            return Err(ResourceError::InvalidMeshFile(format!(
                "bone '{}' has parent id {} out of range",
                mesh.bones[i].name, mesh.bones[i].parent_id
            )));
        }
    }

    for _ in 0..clip_count {
        let name = r.string("clip name")?;
        let track_count = r.count("track", 4)?;
        let mut clip = AnimationClip::default();
        for _ in 0..track_count {
            let key_count = r.count("keyframe", 11 * 4)?;
            let mut track = BoneAnimation::default();
            for _ in 0..key_count {
                let k = r.f32s::<11>("keyframe")?;
                track.keyframes.push(Keyframe {
                    time: k[0],
                    translation: Vec3::new(k[1], k[2], k[3]),
                    scale: Vec3::new(k[4], k[5], k[6]),
                    rotation: Quat::from_xyzw(k[7], k[8], k[9], k[10]),
                });
            }
            clip.bone_animations.push(track);
        }
        mesh.animations.insert(name, clip);
    }

    if r.offset != bytes.len() {
        log::warn!(
            "Mesh file has {} trailing byte(s)",
            bytes.len() - r.offset
        );
    }

    mesh.ensure_subsets();
    Ok(mesh)
}

/// Read and parse a mesh container from disk
pub fn load(path: &Path) -> Result<MeshData, ResourceError> {
    let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mesh = read(&bytes)?;
    log::debug!(
        "Loaded mesh {}: {} vertices, {} indices, {} subsets, {} bones, {} clips",
        path.display(),
        mesh.vertices.len(),
        mesh.indices.len(),
        mesh.subsets.len(),
        mesh.bones.len(),
        mesh.animations.len()
    );
    Ok(mesh)
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_f32s(out: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn put_str(out: &mut Vec<u8>, value: &str) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

/// Serialize a mesh. Clips are written sorted by name.
pub fn write(mesh: &MeshData) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        32 + mesh.vertex_bytes().len() + mesh.index_bytes().len(),
    );
    out.extend_from_slice(MAGIC);
    put_u32(&mut out, VERSION);
    put_u32(&mut out, mesh.vertices.len() as u32);
    put_u32(&mut out, mesh.indices.len() as u32);
    put_u32(&mut out, mesh.subsets.len() as u32);
    put_u32(&mut out, mesh.bones.len() as u32);
    put_u32(&mut out, mesh.animations.len() as u32);

    out.extend_from_slice(mesh.vertex_bytes());
    for &index in &mesh.indices {
        put_u32(&mut out, index);
    }
    for subset in &mesh.subsets {
        put_u32(&mut out, subset.index_count);
        put_u32(&mut out, subset.start_index);
        put_u32(&mut out, subset.base_vertex);
    }
    for bone in &mesh.bones {
        put_str(&mut out, &bone.name);
        put_str(&mut out, &bone.parent_name);
        put_u32(&mut out, bone.parent_id as u32);
        put_f32s(&mut out, &bone.offset.to_cols_array());
    }

    let mut names: Vec<&String> = mesh.animations.keys().collect();
    names.sort();
    for name in names {
        let clip = &mesh.animations[name];
        put_str(&mut out, name);
        put_u32(&mut out, clip.bone_animations.len() as u32);
        for track in &clip.bone_animations {
            put_u32(&mut out, track.keyframes.len() as u32);
            for k in &track.keyframes {
                put_f32s(&mut out, &[k.time]);
                put_f32s(&mut out, &k.translation.to_array());
                put_f32s(&mut out, &k.scale.to_array());
                put_f32s(&mut out, &k.rotation.to_array());
            }
        }
    }
    out
}

/// Serialize a mesh to disk
pub fn save(mesh: &MeshData, path: &Path) -> Result<(), ResourceError> {
    std::fs::write(path, write(mesh)).map_err(|source| ResourceError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_mesh_survives_write_read() {
        let mesh = MeshData::demo_skinned_column();
        let parsed = read(&write(&mesh)).unwrap();

        assert_eq!(parsed.vertices, mesh.vertices);
        assert_eq!(parsed.indices, mesh.indices);
        assert_eq!(parsed.subsets, mesh.subsets);
        assert_eq!(parsed.bones, mesh.bones);
        assert_eq!(parsed.animations, mesh.animations);
    }

    #[test]
    fn test_negative_parent_id_resolves_by_name() {
        let mut mesh = MeshData::demo_skinned_column();
        mesh.animations.clear();
        let mut bytes = write(&mesh);

        // The file now ends with the "Head" bone: parent id, then the offset matrix
        assert_eq!(mesh.bones[2].parent_name, "Spine");
        let parent_offset = bytes.len() - (4 + 16 * 4);
        bytes[parent_offset..parent_offset + 4].copy_from_slice(&(-1i32).to_le_bytes());

        let parsed = read(&bytes).unwrap();
        assert_eq!(parsed.bones[2].parent_id, 1);
    }

    #[test]
    fn test_rejects_bad_magic_and_truncation() {
        assert!(matches!(
            read(b"OBJ\x01\0\0\0"),
            Err(ResourceError::InvalidMeshFile(_))
        ));

        let bytes = write(&MeshData::demo_skinned_column());
        let err = read(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(err.to_string().contains("unexpected end of file"));
    }

    #[test]
    fn test_rejects_subset_past_index_data() {
        let mut mesh = MeshData::default();
        mesh.vertices = vec![Vertex::default(); 3];
        mesh.indices = vec![0, 1, 2];
        mesh.subsets.push(Subset {
            index_count: 6,
            start_index: 0,
            base_vertex: 0,
        });
        assert!(read(&write(&mesh)).is_err());
    }
}
