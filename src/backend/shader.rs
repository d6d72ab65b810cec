// Shader program: compile-at-init WGSL stages plus the input layout.
//
// Both stages are compiled to SPIR-V through naga when the program is
// created. Compilation failures (missing file, parse error, missing `main`
// entry point, input signature not matching the vertex layout) abort
// initialization before any GPU resource is touched.

use anyhow::{Context, Result};
use ash::vk;
use naga::back::spv;
use std::path::Path;
use std::sync::Arc;

use super::framebuffer::Viewport;
use super::geometry::Vertex;
use super::{pipeline, GraphicsDevice};
use crate::error::RenderError;

/// Required entry point name in every shader source file.
pub const ENTRY_POINT: &str = "main";

/// A stage compiled to SPIR-V, not yet bound to a device.
#[derive(Debug)]
pub struct CompiledStage {
    pub stage: naga::ShaderStage,
    pub words: Vec<u32>,
}

/// Compiled vertex/fragment stages plus the immutable pipeline-state object
/// binding them together with the vertex input layout and triangle-list
/// topology.
pub struct ShaderProgram {
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    device: Arc<GraphicsDevice>,
}

impl ShaderProgram {
    /// Read and compile both shader sources, verify the vertex input
    /// signature against [`Vertex`], then build the graphics pipeline.
    ///
    /// Compilation runs fully before any Vulkan object is created, so a bad
    /// shader can never leave half-built pipeline state behind.
    pub fn load_from_source(
        device: Arc<GraphicsDevice>,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
        render_pass: vk::RenderPass,
        viewport: Viewport,
        debug_info: bool,
    ) -> Result<Self> {
        let vertex_stage = compile_file(vertex_path.as_ref(), naga::ShaderStage::Vertex, debug_info)?;
        let fragment_stage =
            compile_file(fragment_path.as_ref(), naga::ShaderStage::Fragment, debug_info)?;

        let vertex = create_shader_module(&device, &vertex_stage)?;
        let fragment = match create_shader_module(&device, &fragment_stage) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vertex, None) };
                return Err(e);
            }
        };

        let (pipeline, pipeline_layout) =
            match pipeline::create_graphics_pipeline(&device, render_pass, viewport, vertex, fragment)
            {
                Ok(handles) => handles,
                Err(e) => {
                    unsafe {
                        device.device.destroy_shader_module(fragment, None);
                        device.device.destroy_shader_module(vertex, None);
                    }
                    return Err(e);
                }
            };

        log::info!("Shader program ready (entry point `{ENTRY_POINT}`, stride {})", Vertex::STRIDE);

        Ok(Self {
            vertex,
            fragment,
            pipeline_layout,
            pipeline,
            device,
        })
    }

    /// Record the sticky pipeline bind: both stages, the input layout, and
    /// triangle-list topology in one immutable state object. Stays active for
    /// every subsequent draw in the command buffer.
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        log::debug!("Releasing shader program and pipeline");
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device
                .device
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device.device.destroy_shader_module(self.fragment, None);
            self.device.device.destroy_shader_module(self.vertex, None);
        }
    }
}

/// Read a shader source file and compile it.
fn compile_file(path: &Path, stage: naga::ShaderStage, debug_info: bool) -> Result<CompiledStage> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        RenderError::ShaderCompilation(format!("{}: cannot read source: {e}", path.display()))
    })?;
    let name = path.display().to_string();
    compile_wgsl(&name, &source, stage, debug_info).map_err(Into::into)
}

/// Compile WGSL source text to SPIR-V for one stage.
///
/// The source must declare an entry point named `main` for the requested
/// stage. For the vertex stage the reflected input signature is checked
/// against the fixed [`Vertex`] layout.
pub fn compile_wgsl(
    name: &str,
    source: &str,
    stage: naga::ShaderStage,
    debug_info: bool,
) -> Result<CompiledStage, RenderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        RenderError::ShaderCompilation(format!("{name}:\n{}", e.emit_to_string(source)))
    })?;

    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == stage && ep.name == ENTRY_POINT)
        .ok_or_else(|| {
            RenderError::ShaderCompilation(format!(
                "{name}: missing {stage:?} entry point `{ENTRY_POINT}`"
            ))
        })?;

    if stage == naga::ShaderStage::Vertex {
        check_vertex_inputs(&module, entry, name)?;
    }

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| RenderError::ShaderCompilation(format!("{name}: {e:?}")))?;

    let mut options = spv::Options::default();
    if debug_info {
        options.flags.insert(spv::WriterFlags::DEBUG);
    } else {
        options.flags.remove(spv::WriterFlags::DEBUG);
    }

    let pipeline_options = spv::PipelineOptions {
        shader_stage: stage,
        entry_point: ENTRY_POINT.to_string(),
    };

    let words = spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| RenderError::ShaderCompilation(format!("{name}: SPIR-V emission: {e}")))?;

    Ok(CompiledStage { stage, words })
}

/// Per-vertex input reflected from the compiled vertex stage.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReflectedInput {
    pub location: u32,
    pub components: u8,
}

/// Collect the vertex stage's per-vertex inputs (builtin inputs are skipped).
/// Handles both plain entry point arguments and struct-wrapped ones.
pub fn reflect_vertex_inputs(module: &naga::Module, entry: &naga::EntryPoint) -> Vec<ReflectedInput> {
    let mut inputs = Vec::new();

    let mut push = |binding: &Option<naga::Binding>, ty: naga::Handle<naga::Type>| {
        if let Some(naga::Binding::Location { location, .. }) = binding {
            // Only vector inputs can match the fixed layout; anything else
            // reflects as zero components and fails the signature check.
            let components = match module.types[ty].inner {
                naga::TypeInner::Vector { size, .. } => size as u8,
                _ => 0,
            };
            inputs.push(ReflectedInput {
                location: *location,
                components,
            });
        }
    };

    for arg in &entry.function.arguments {
        match (&arg.binding, &module.types[arg.ty].inner) {
            (None, naga::TypeInner::Struct { members, .. }) => {
                for member in members {
                    push(&member.binding, member.ty);
                }
            }
            _ => push(&arg.binding, arg.ty),
        }
    }

    inputs.sort();
    inputs
}

/// The input layout is fixed: POSITION (vec3, offset 0) at location 0 and
/// COLOR (vec4, offset 12) at location 1. A vertex shader declaring anything
/// else cannot consume the vertex buffer and is rejected at initialization.
fn check_vertex_inputs(module: &naga::Module, entry: &naga::EntryPoint, name: &str) -> Result<(), RenderError> {
    let inputs = reflect_vertex_inputs(module, entry);

    let expected = [
        ReflectedInput { location: 0, components: 3 },
        ReflectedInput { location: 1, components: 4 },
    ];

    if inputs != expected {
        return Err(RenderError::ShaderCompilation(format!(
            "{name}: vertex input signature {inputs:?} does not match the \
             fixed layout [POSITION vec3 @ location 0, COLOR vec4 @ location 1]"
        )));
    }

    Ok(())
}

/// Wrap compiled SPIR-V in a Vulkan shader module.
fn create_shader_module(device: &GraphicsDevice, stage: &CompiledStage) -> Result<vk::ShaderModule> {
    log::debug!("Creating {:?} shader module ({} words)", stage.stage, stage.words.len());
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&stage.words);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .map_err(|e| RenderError::ResourceCreation(format!("shader module: {e}")))
            .context("Failed to create shader module")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_VERTEX: &str = r#"
        struct VertexOutput {
            @builtin(position) position: vec4<f32>,
            @location(0) color: vec4<f32>,
        }

        @vertex
        fn main(@location(0) position: vec3<f32>, @location(1) color: vec4<f32>) -> VertexOutput {
            var output: VertexOutput;
            output.position = vec4<f32>(position, 1.0);
            output.color = color;
            return output;
        }
    "#;

    const VALID_FRAGMENT: &str = r#"
        @fragment
        fn main(@location(0) color: vec4<f32>) -> @location(0) vec4<f32> {
            return color;
        }
    "#;

    fn shader_error(err: RenderError) -> String {
        match err {
            RenderError::ShaderCompilation(msg) => msg,
            other => panic!("expected ShaderCompilation, got {other:?}"),
        }
    }

    #[test]
    fn valid_vertex_stage_compiles_to_spirv() {
        let stage =
            compile_wgsl("triangle.vert", VALID_VERTEX, naga::ShaderStage::Vertex, true).unwrap();
        assert_eq!(stage.stage, naga::ShaderStage::Vertex);
        // SPIR-V magic number heads the word stream.
        assert_eq!(stage.words[0], 0x0723_0203);
    }

    #[test]
    fn valid_fragment_stage_compiles_to_spirv() {
        let stage = compile_wgsl(
            "triangle.frag",
            VALID_FRAGMENT,
            naga::ShaderStage::Fragment,
            false,
        )
        .unwrap();
        assert!(!stage.words.is_empty());
    }

    #[test]
    fn reflected_inputs_match_fixed_layout() {
        let module = naga::front::wgsl::parse_str(VALID_VERTEX).unwrap();
        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.stage == naga::ShaderStage::Vertex)
            .unwrap();

        let inputs = reflect_vertex_inputs(&module, entry);
        assert_eq!(
            inputs,
            vec![
                ReflectedInput { location: 0, components: 3 },
                ReflectedInput { location: 1, components: 4 },
            ]
        );
    }

    #[test]
    fn struct_wrapped_inputs_are_reflected() {
        let source = r#"
            struct VertexInput {
                @location(0) position: vec3<f32>,
                @location(1) color: vec4<f32>,
            }

            @vertex
            fn main(input: VertexInput) -> @builtin(position) vec4<f32> {
                return vec4<f32>(input.position, 1.0) * input.color.a;
            }
        "#;
        let stage = compile_wgsl("wrapped.vert", source, naga::ShaderStage::Vertex, true).unwrap();
        assert!(!stage.words.is_empty());
    }

    #[test]
    fn missing_main_entry_point_is_rejected() {
        let source = r#"
            @vertex
            fn vs_entry(@location(0) position: vec3<f32>, @location(1) color: vec4<f32>)
                -> @builtin(position) vec4<f32> {
                return vec4<f32>(position, 1.0) * color.a;
            }
        "#;
        let err = compile_wgsl("bad.vert", source, naga::ShaderStage::Vertex, true).unwrap_err();
        let msg = shader_error(err);
        assert!(msg.contains("missing"), "unexpected diagnostic: {msg}");
        assert!(msg.contains("main"), "unexpected diagnostic: {msg}");
    }

    #[test]
    fn syntax_error_reports_compiler_diagnostics() {
        let err = compile_wgsl(
            "broken.vert",
            "@vertex fn main( -> f32 {}",
            naga::ShaderStage::Vertex,
            true,
        )
        .unwrap_err();
        let msg = shader_error(err);
        assert!(msg.contains("broken.vert"));
    }

    #[test]
    fn wrong_input_signature_is_rejected() {
        // vec2 position cannot consume the 3-float POSITION field.
        let source = r#"
            @vertex
            fn main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
                return vec4<f32>(position, 0.0, 1.0);
            }
        "#;
        let err = compile_wgsl("narrow.vert", source, naga::ShaderStage::Vertex, true).unwrap_err();
        let msg = shader_error(err);
        assert!(msg.contains("does not match"), "unexpected diagnostic: {msg}");
    }

    #[test]
    fn fragment_source_is_not_a_vertex_stage() {
        let err =
            compile_wgsl("triangle.frag", VALID_FRAGMENT, naga::ShaderStage::Vertex, true)
                .unwrap_err();
        shader_error(err);
    }
}
