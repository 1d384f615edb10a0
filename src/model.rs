//! A skinned mesh bound to a renderer
//!
//! [`Model`] owns the CPU mesh, its animator and every GPU resource created
//! for it. Resources must go back through [`Model::release`] before the
//! renderer that created them is dropped.

use crate::animation::{AnimationError, SkeletalAnimator};
use crate::backend::{
    ConstantBuffer, ConstantSlot, IndexBuffer, PrimitiveTopology, Renderer, RendererError, Shader,
    Texture2D, TextureSlot, VertexBuffer,
};
use crate::resources::{mesh_file, MeshData, ResourceError, Subset, TextureData};
use crate::scene::{Camera, DirectionalLight};
use crate::shader::MAX_BONES;
use crate::ViewerConfig;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use thiserror::Error;

/// Errors raised while loading a model
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Renderer(#[from] RendererError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    Animation(#[from] AnimationError),
    #[error("Mesh has {bones} bones, the shader palette holds {max}")]
    TooManyBones { bones: usize, max: usize },
    #[error("Mesh has no vertices or indices")]
    EmptyMesh,
}

/// Contents of the frame constant buffer, laid out like `FrameUniforms` in
/// the WGSL shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub world: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_world: Mat4,
    pub camera_position: Vec4,
    pub light_direction: Vec4,
    /// Diffuse, ambient, specular and specular power
    pub light_terms: Vec4,
    /// x holds the palette size, 0 disables skinning
    pub options: [u32; 4],
}

impl FrameUniforms {
    pub fn new(world: Mat4, camera: &Camera, light: &DirectionalLight, bone_count: u32) -> Self {
        Self {
            world,
            view: camera.view_matrix(),
            projection: camera.projection_matrix(),
            inverse_world: world.inverse(),
            camera_position: camera.position.extend(1.0),
            light_direction: light.direction.extend(0.0),
            light_terms: Vec4::new(
                light.diffuse,
                light.ambient,
                light.specular,
                light.specular_power,
            ),
            options: [bone_count, 0, 0, 0],
        }
    }
}

/// Size of the bone palette constant buffer
pub const BONE_BUFFER_SIZE: u64 = (MAX_BONES * std::mem::size_of::<Mat4>()) as u64;

/// Decoded textures to bind while drawing a model
#[derive(Debug, Clone, Default)]
pub struct ModelTextures {
    pub diffuse: Option<TextureData>,
    pub normal: Option<TextureData>,
}

impl ModelTextures {
    fn into_slots(self) -> [(TextureSlot, Option<TextureData>); TextureSlot::COUNT] {
        [
            (TextureSlot::Diffuse, self.diffuse),
            (TextureSlot::Normal, self.normal),
        ]
    }
}

/// GPU side of a model. Every field is `None` once released.
#[derive(Debug, Default)]
struct GpuResources {
    vertex_buffer: Option<VertexBuffer>,
    index_buffer: Option<IndexBuffer>,
    frame_constants: Option<ConstantBuffer>,
    bone_constants: Option<ConstantBuffer>,
    textures: [Option<Texture2D>; TextureSlot::COUNT],
}

impl GpuResources {
    /// Create everything or nothing
    fn create<R: Renderer + ?Sized>(
        renderer: &mut R,
        mesh: &MeshData,
        textures: ModelTextures,
    ) -> Result<Self, ModelError> {
        let mut resources = Self::default();
        if let Err(e) = resources.fill(renderer, mesh, textures) {
            resources.release(renderer);
            return Err(e);
        }
        Ok(resources)
    }

    fn fill<R: Renderer + ?Sized>(
        &mut self,
        renderer: &mut R,
        mesh: &MeshData,
        textures: ModelTextures,
    ) -> Result<(), ModelError> {
        self.vertex_buffer = Some(renderer.create_vertex_buffer(&mesh.vertices)?);
        self.index_buffer = Some(renderer.create_index_buffer(&mesh.indices)?);
        self.frame_constants = Some(renderer.create_constant_buffer(
            "frame constants",
            std::mem::size_of::<FrameUniforms>() as u64,
        )?);
        self.bone_constants = Some(renderer.create_constant_buffer("bone palette", BONE_BUFFER_SIZE)?);
        for (slot, data) in textures.into_slots() {
            if let Some(data) = data {
                self.textures[slot.index()] = Some(renderer.upload_texture_2d(&data)?);
            }
        }
        Ok(())
    }

    fn release<R: Renderer + ?Sized>(&mut self, renderer: &mut R) {
        if let Some(buffer) = self.vertex_buffer.take() {
            renderer.release_vertex_buffer(buffer);
        }
        if let Some(buffer) = self.index_buffer.take() {
            renderer.release_index_buffer(buffer);
        }
        if let Some(buffer) = self.frame_constants.take() {
            renderer.release_constant_buffer(buffer);
        }
        if let Some(buffer) = self.bone_constants.take() {
            renderer.release_constant_buffer(buffer);
        }
        for texture in self.textures.iter_mut().filter_map(Option::take) {
            renderer.release_texture_2d(texture);
        }
    }

    fn is_live(&self) -> bool {
        self.vertex_buffer.is_some()
            || self.index_buffer.is_some()
            || self.frame_constants.is_some()
            || self.bone_constants.is_some()
            || self.textures.iter().any(Option::is_some)
    }
}

/// An animated mesh and the GPU resources it is drawn from
#[derive(Debug)]
pub struct Model {
    mesh: MeshData,
    animator: SkeletalAnimator,
    world: Mat4,
    light: DirectionalLight,
    gpu: GpuResources,
}

impl Model {
    /// Upload `mesh` and `textures` and start playing `clip`.
    ///
    /// A clip the mesh does not have leaves every bone in bind pose. Nothing
    /// stays allocated on the renderer when this fails.
    pub fn load<R: Renderer + ?Sized>(
        renderer: &mut R,
        mut mesh: MeshData,
        textures: ModelTextures,
        clip: &str,
    ) -> Result<Self, ModelError> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(ModelError::EmptyMesh);
        }
        if mesh.bones.len() > MAX_BONES {
            return Err(ModelError::TooManyBones {
                bones: mesh.bones.len(),
                max: MAX_BONES,
            });
        }
        mesh.ensure_subsets();

        let mut animator = SkeletalAnimator::new();
        animator.select_clip(&mesh, clip)?;
        animator.evaluate(&mesh.bones);

        let gpu = GpuResources::create(renderer, &mesh, textures)?;
        log::info!(
            "Loaded model: {} vertices, {} triangles, {} subsets, {} bones",
            mesh.vertex_count(),
            mesh.triangle_count(),
            mesh.subsets.len(),
            mesh.bones.len()
        );

        Ok(Self {
            mesh,
            animator,
            world: Mat4::IDENTITY,
            light: DirectionalLight::default(),
            gpu,
        })
    }

    /// Load the mesh and textures named by `config`, falling back to the
    /// built-in demo column when no mesh path is set
    pub fn from_config<R: Renderer + ?Sized>(
        renderer: &mut R,
        config: &ViewerConfig,
    ) -> Result<Self, ModelError> {
        let mesh = match &config.model_path {
            Some(path) => mesh_file::load(path)?,
            None => MeshData::demo_skinned_column(),
        };
        let textures = ModelTextures {
            diffuse: config
                .diffuse_texture
                .as_deref()
                .map(TextureData::load)
                .transpose()?,
            normal: config
                .normal_texture
                .as_deref()
                .map(TextureData::load)
                .transpose()?,
        };

        let mut model = Self::load(renderer, mesh, textures, &config.clip)?;
        model.animator.set_time_scale(config.time_scale);
        Ok(model)
    }

    /// Advance the animation clock and rebuild the bone palette
    pub fn update(&mut self, dt: f32) {
        self.animator.update(dt, &self.mesh.bones);
    }

    /// Upload this frame's constants and draw every subset in storage order.
    ///
    /// Must run between [`Renderer::clear`] and [`Renderer::present`].
    pub fn render<R: Renderer + ?Sized>(&self, renderer: &mut R, shader: &Shader, camera: &Camera) {
        let gpu = &self.gpu;
        let (Some(vertex_buffer), Some(index_buffer), Some(frame), Some(bones)) = (
            &gpu.vertex_buffer,
            &gpu.index_buffer,
            &gpu.frame_constants,
            &gpu.bone_constants,
        ) else {
            log::warn!("Model rendered after release, skipped");
            return;
        };

        renderer.apply_shader(shader);
        renderer.apply_vertex_buffer(vertex_buffer);
        renderer.apply_index_buffer(index_buffer);
        renderer.set_primitive_topology(PrimitiveTopology::TriangleList);

        let palette = self.animator.final_transforms();
        let uniforms = FrameUniforms::new(self.world, camera, &self.light, palette.len() as u32);
        renderer.update_constant_buffer(frame, bytemuck::bytes_of(&uniforms));
        if !palette.is_empty() {
            renderer.update_constant_buffer(bones, bytemuck::cast_slice(palette));
        }
        renderer.apply_constant_buffer(ConstantSlot::Frame, frame);
        renderer.apply_constant_buffer(ConstantSlot::Bones, bones);

        for slot in [TextureSlot::Diffuse, TextureSlot::Normal] {
            if let Some(texture) = &gpu.textures[slot.index()] {
                renderer.apply_texture_2d(slot, texture);
            }
        }

        for subset in &self.mesh.subsets {
            renderer.draw_indexed(
                subset.index_count,
                subset.start_index,
                subset.base_vertex as i32,
            );
        }
    }

    /// Return every GPU resource to `renderer`
    pub fn release<R: Renderer + ?Sized>(mut self, renderer: &mut R) {
        self.gpu.release(renderer);
    }

    pub fn mesh(&self) -> &MeshData {
        &self.mesh
    }

    pub fn subsets(&self) -> &[Subset] {
        &self.mesh.subsets
    }

    pub fn animator(&self) -> &SkeletalAnimator {
        &self.animator
    }

    pub fn animator_mut(&mut self) -> &mut SkeletalAnimator {
        &mut self.animator
    }

    pub fn world(&self) -> Mat4 {
        self.world
    }

    pub fn set_world(&mut self, world: Mat4) {
        self.world = world;
    }

    pub fn light(&self) -> &DirectionalLight {
        &self.light
    }

    pub fn set_light(&mut self, light: DirectionalLight) {
        self.light = light;
    }

    /// Handles of the resources the model draws with
    pub fn vertex_buffer(&self) -> Option<&VertexBuffer> {
        self.gpu.vertex_buffer.as_ref()
    }

    pub fn index_buffer(&self) -> Option<&IndexBuffer> {
        self.gpu.index_buffer.as_ref()
    }

    pub fn frame_constants(&self) -> Option<&ConstantBuffer> {
        self.gpu.frame_constants.as_ref()
    }

    pub fn bone_constants(&self) -> Option<&ConstantBuffer> {
        self.gpu.bone_constants.as_ref()
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&Texture2D> {
        self.gpu.textures[slot.index()].as_ref()
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        if self.gpu.is_live() {
            log::warn!("Model dropped without release, its GPU resources leak");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_uniform_layout() {
        // Matches the WGSL struct: four matrices, three vectors, one uvec4
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 4 * 64 + 4 * 16);
        assert_eq!(BONE_BUFFER_SIZE, 96 * 64);
    }

    #[test]
    fn test_frame_uniforms_from_camera() {
        let camera = Camera::new(glam::Vec3::new(0.0, 0.0, 5.0), glam::Vec3::ZERO);
        let world = Mat4::from_translation(glam::Vec3::X);
        let uniforms = FrameUniforms::new(world, &camera, &DirectionalLight::default(), 3);
        assert_eq!(uniforms.options[0], 3);
        assert_eq!(uniforms.camera_position, Vec4::new(0.0, 0.0, 5.0, 1.0));
        assert!((uniforms.world * uniforms.inverse_world).abs_diff_eq(Mat4::IDENTITY, 1e-6));
        assert_eq!(uniforms.light_terms, Vec4::new(1.0, 0.5, 0.1, 32.0));
    }
}
