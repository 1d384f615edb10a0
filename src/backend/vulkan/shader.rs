//! WGSL to SPIR-V compilation through naga

use crate::backend::traits::{RendererError, RendererResult};

/// SPIR-V words for the vertex and fragment entry points of one WGSL module
pub(super) struct CompiledShader {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// Compile both entry points of a WGSL module.
///
/// Clip space is left untouched; the renderer flips Y with a negative
/// viewport height instead.
pub(super) fn compile_wgsl(
    source: &str,
    vertex_entry: &str,
    fragment_entry: &str,
) -> RendererResult<CompiledShader> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        RendererError::ShaderCreationFailed(format!("WGSL parse error: {}", e.emit_to_string(source)))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| RendererError::ShaderCreationFailed(format!("Validation error: {e}")))?;

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        ..Default::default()
    };

    let write = |stage: naga::ShaderStage, entry_point: &str| -> RendererResult<Vec<u32>> {
        if !module
            .entry_points
            .iter()
            .any(|ep| ep.name == entry_point && ep.stage == stage)
        {
            return Err(RendererError::ShaderCreationFailed(format!(
                "Entry point '{}' not found for stage {:?}",
                entry_point, stage
            )));
        }
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: stage,
            entry_point: entry_point.to_string(),
        };
        naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options)).map_err(|e| {
            RendererError::ShaderCreationFailed(format!("SPIR-V generation error: {e}"))
        })
    };

    Ok(CompiledShader {
        vertex: write(naga::ShaderStage::Vertex, vertex_entry)?,
        fragment: write(naga::ShaderStage::Fragment, fragment_entry)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(position, 1.0);
        }

        @fragment
        fn fs_main() -> @location(0) vec4<f32> {
            return vec4<f32>(1.0, 0.0, 0.0, 1.0);
        }
    "#;

    #[test]
    fn test_compile_both_stages() {
        let compiled = compile_wgsl(SOURCE, "vs_main", "fs_main").unwrap();
        // SPIR-V magic number
        assert_eq!(compiled.vertex[0], 0x0723_0203);
        assert_eq!(compiled.fragment[0], 0x0723_0203);
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_wgsl(SOURCE, "vs_main", "main").err().unwrap();
        assert!(err.to_string().contains("'main'"));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            compile_wgsl("fn broken(", "vs_main", "fs_main"),
            Err(RendererError::ShaderCreationFailed(_))
        ));
    }

    #[test]
    fn test_model_shader_compiles() {
        let desc = crate::shader::descriptor();
        compile_wgsl(&desc.source, &desc.vertex_entry, &desc.fragment_entry).unwrap();
    }
}
