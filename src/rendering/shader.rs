//! Shader asset parsing, per-stage compilation and interface linking.
//!
//! An asset is a TOML document:
//!
//! ```toml
//! name = "Scanlines"      # optional
//! vertex = '''...'''      # optional WGSL, defaults to DEFAULT_VERTEX_SHADER
//! fragment = '''...'''    # required WGSL
//! ```
//!
//! Both stages are parsed and validated with naga. Linking checks the
//! interface between the stages and against the renderer's fixed layout:
//!
//! - vertex inputs: `@location(0) position`, `@location(1) tex_coord`, both `vec2<f32>`
//! - entry points: `vs_main` (vertex), `fs_main` (fragment)
//! - group 0: binding 0 `texture_2d<f32>`, binding 1 `sampler`,
//!   binding 2 uniform `{ texture_size: vec2<f32>, output_size: vec2<f32> }`
//! - fragment writes only `@location(0)`
//!
//! The result is a `LinkedShader` value; creating the GPU program from it is
//! the backend's job.

use std::sync::Arc;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{AddressSpace, Binding, Handle, ImageClass, ImageDimension, Module, Scalar, ScalarKind, Type, TypeInner, VectorSize};
use serde::Deserialize;

use super::assets::{fallback_source, normalize_id, ShaderAssetStore, FALLBACK_SHADER_ID};
use crate::error::{MagnifierError, MagnifierResult, ShaderStage};

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

pub const TEXTURE_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const UNIFORM_BINDING: u32 = 2;

/// Uniform block members in the order and at the offsets the backend writes.
pub const UNIFORM_MEMBERS: [(&str, u32); 2] = [("texture_size", 0), ("output_size", 8)];

/// Pass-through vertex stage used when an asset has no `vertex` section.
pub const DEFAULT_VERTEX_SHADER: &str = r#"
struct VertexInput {
    @location(0) position: vec2<f32>,
    @location(1) tex_coord: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coord: vec2<f32>,
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = vec4<f32>(in.position, 0.0, 1.0);
    out.tex_coord = in.tex_coord;
    return out;
}
"#;

#[derive(Debug, Deserialize)]
struct ShaderAsset {
    name: Option<String>,
    vertex: Option<String>,
    fragment: Option<String>,
}

/// Two compiled and interface-checked stages, ready for the GPU.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedShader {
    pub id: String,
    pub name: String,
    pub vertex_source: String,
    pub fragment_source: String,
    /// Inter-stage `@location`s the fragment stage consumes.
    pub varyings: Vec<u32>,
}

/// Parse and validate one stage.
pub fn compile_stage(stage: ShaderStage, source: &str) -> MagnifierResult<Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| MagnifierError::ShaderCompile {
        stage,
        log: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| MagnifierError::ShaderCompile {
            stage,
            log: e.emit_to_string(source),
        })?;

    Ok(module)
}

fn link_error(msg: impl Into<String>) -> MagnifierError {
    MagnifierError::ShaderLink(msg.into())
}

fn find_entry<'a>(
    module: &'a Module,
    name: &str,
    stage: naga::ShaderStage,
) -> MagnifierResult<&'a naga::EntryPoint> {
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.name == name)
        .ok_or_else(|| link_error(format!("entry point '{}' not found", name)))?;
    if entry.stage != stage {
        return Err(link_error(format!(
            "entry point '{}' is a {:?} shader, expected {:?}",
            name, entry.stage, stage
        )));
    }
    Ok(entry)
}

/// Flatten `@location` bindings, descending into struct members.
fn collect_locations(
    module: &Module,
    ty: Handle<Type>,
    binding: Option<&Binding>,
    out: &mut Vec<(u32, Handle<Type>)>,
) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push((*location, ty)),
        Some(Binding::BuiltIn(_)) => {},
        None => {
            if let TypeInner::Struct { members, .. } = &module.types[ty].inner {
                for member in members {
                    collect_locations(module, member.ty, member.binding.as_ref(), out);
                }
            }
        },
    }
}

fn entry_inputs(module: &Module, entry: &naga::EntryPoint) -> Vec<(u32, Handle<Type>)> {
    let mut out = Vec::new();
    for arg in &entry.function.arguments {
        collect_locations(module, arg.ty, arg.binding.as_ref(), &mut out);
    }
    out
}

fn entry_outputs(module: &Module, entry: &naga::EntryPoint) -> Vec<(u32, Handle<Type>)> {
    let mut out = Vec::new();
    if let Some(result) = &entry.function.result {
        collect_locations(module, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

fn is_vec2_f32(inner: &TypeInner) -> bool {
    matches!(
        inner,
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if *scalar == Scalar::F32
    )
}

/// Resource bindings must fit the fixed group-0 layout.
fn check_resources(module: &Module, stage: ShaderStage) -> MagnifierResult<()> {
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var.name.as_deref().unwrap_or("<unnamed>");
        if binding.group != 0 {
            return Err(link_error(format!(
                "{} stage: '{}' uses bind group {}, only group 0 is available",
                stage, name, binding.group
            )));
        }

        let inner = &module.types[var.ty].inner;
        let ok = match binding.binding {
            TEXTURE_BINDING => matches!(
                inner,
                TypeInner::Image {
                    dim: ImageDimension::D2,
                    arrayed: false,
                    class: ImageClass::Sampled {
                        kind: ScalarKind::Float,
                        multi: false,
                    },
                }
            ),
            SAMPLER_BINDING => matches!(inner, TypeInner::Sampler { comparison: false }),
            UNIFORM_BINDING => {
                var.space == AddressSpace::Uniform
                    && match inner {
                        TypeInner::Struct { members, .. } => {
                            members.len() <= UNIFORM_MEMBERS.len()
                                && members.iter().zip(UNIFORM_MEMBERS).all(|(m, (name, offset))| {
                                    m.name.as_deref() == Some(name)
                                        && m.offset == offset
                                        && is_vec2_f32(&module.types[m.ty].inner)
                                })
                        },
                        _ => false,
                    }
            },
            _ => false,
        };
        if !ok {
            return Err(link_error(format!(
                "{} stage: '{}' at @binding({}) does not match the renderer layout",
                stage, name, binding.binding
            )));
        }
    }
    Ok(())
}

/// Check the interface between two compiled stages.
///
/// Returns the inter-stage locations consumed by the fragment stage.
pub fn link(vertex: &Module, fragment: &Module) -> MagnifierResult<Vec<u32>> {
    let vs = find_entry(vertex, VERTEX_ENTRY, naga::ShaderStage::Vertex)?;
    let fs = find_entry(fragment, FRAGMENT_ENTRY, naga::ShaderStage::Fragment)?;

    for (location, ty) in entry_inputs(vertex, vs) {
        if location > 1 || !is_vec2_f32(&vertex.types[ty].inner) {
            return Err(link_error(format!(
                "vertex input @location({}) is not provided; only position (0) and tex_coord (1) as vec2<f32>",
                location
            )));
        }
    }

    let produced = entry_outputs(vertex, vs);
    let mut varyings = Vec::new();
    for (location, ty) in entry_inputs(fragment, fs) {
        let Some((_, out_ty)) = produced.iter().find(|(l, _)| *l == location) else {
            return Err(link_error(format!(
                "fragment input @location({}) is not written by the vertex stage",
                location
            )));
        };
        if vertex.types[*out_ty].inner != fragment.types[ty].inner {
            return Err(link_error(format!(
                "type mismatch at @location({}) between vertex output and fragment input",
                location
            )));
        }
        varyings.push(location);
    }

    for (location, _) in entry_outputs(fragment, fs) {
        if location != 0 {
            return Err(link_error(format!(
                "fragment output @location({}) has no render target",
                location
            )));
        }
    }

    check_resources(vertex, ShaderStage::Vertex)?;
    check_resources(fragment, ShaderStage::Fragment)?;

    varyings.sort_unstable();
    Ok(varyings)
}

/// Parse, compile and link a raw asset document.
///
/// Naga modules built along the way are dropped before returning, on both
/// the success and failure paths.
pub fn compile_asset(id: &str, bytes: &[u8]) -> MagnifierResult<LinkedShader> {
    let parse_error = |reason: String| MagnifierError::ShaderParse {
        asset: id.to_string(),
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| parse_error(format!("not UTF-8: {}", e)))?;
    let asset: ShaderAsset = toml::from_str(text).map_err(|e| parse_error(e.to_string()))?;

    let fragment_source = asset
        .fragment
        .filter(|src| !src.trim().is_empty())
        .ok_or_else(|| parse_error("missing 'fragment' section".to_string()))?;
    let vertex_source = asset
        .vertex
        .filter(|src| !src.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VERTEX_SHADER.to_string());

    let vertex = compile_stage(ShaderStage::Vertex, &vertex_source)?;
    let fragment = compile_stage(ShaderStage::Fragment, &fragment_source)?;
    let varyings = link(&vertex, &fragment)?;

    Ok(LinkedShader {
        id: id.to_string(),
        name: asset.name.unwrap_or_else(|| id.to_string()),
        vertex_source,
        fragment_source,
        varyings,
    })
}

/// Loads shader programs from an asset store.
#[derive(Clone)]
pub struct ShaderProgramLoader {
    store: Arc<dyn ShaderAssetStore>,
}

impl ShaderProgramLoader {
    pub fn new(store: Arc<dyn ShaderAssetStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn ShaderAssetStore {
        self.store.as_ref()
    }

    /// Read, compile and link asset `id`.
    pub fn load(&self, id: &str) -> MagnifierResult<LinkedShader> {
        let id = normalize_id(id);
        let bytes = self.store.read(id)?;
        let linked = compile_asset(id, &bytes)?;
        log::info!("[SHADER] Loaded '{}' ({})", linked.id, linked.name);
        Ok(linked)
    }

    /// The built-in passthrough program, independent of the store.
    pub fn fallback() -> MagnifierResult<LinkedShader> {
        compile_asset(FALLBACK_SHADER_ID, fallback_source().as_bytes())
    }
}
