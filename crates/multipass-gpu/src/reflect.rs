//! Uniform and texture discovery for fragment stages.
//!
//! Binding convention:
//! - scalar uniforms are members of the struct at `@group(0) @binding(0)`
//! - texture unit `n` is the `texture_2d<f32>` at `@group(1) @binding(2n)`,
//!   with its sampler at `@group(1) @binding(2n + 1)`

use multipass_core::error::BackendError;
use naga::{AddressSpace, ScalarKind, TypeInner, VectorSize};

pub const UNIFORM_GROUP: u32 = 0;
pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

/// Parses and validates WGSL, turning failures into [`BackendError::Compile`].
pub fn parse_and_validate(name: &str, source: &str) -> Result<naga::Module, BackendError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|err| BackendError::Compile {
        name: name.to_string(),
        reason: err.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|err| BackendError::Compile {
        name: name.to_string(),
        reason: err.emit_to_string(source),
    })?;

    Ok(module)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    F32,
    Vec2F32,
    /// Present in the block but not settable from a pass.
    Unsupported,
}

impl UniformType {
    pub fn type_name(self) -> &'static str {
        match self {
            UniformType::F32 => "f32",
            UniformType::Vec2F32 => "vec2<f32>",
            UniformType::Unsupported => "an unsupported type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub offset: u32,
    pub ty: UniformType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSlot {
    pub name: String,
    pub binding: u32,
}

impl TextureSlot {
    pub fn unit(&self) -> u32 {
        self.binding / 2
    }

    pub fn sampler_binding(&self) -> u32 {
        self.binding + 1
    }
}

/// What a fragment stage expects to be bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderLayout {
    pub uniforms: Vec<UniformSlot>,
    /// Size of the uniform block rounded up to 16 bytes; 0 without a block.
    pub uniform_size: u64,
    pub textures: Vec<TextureSlot>,
}

impl ShaderLayout {
    pub fn reflect(module: &naga::Module) -> Self {
        let mut layout = ShaderLayout::default();

        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let inner = &module.types[var.ty].inner;

            match (var.space, inner) {
                (AddressSpace::Uniform, TypeInner::Struct { members, span })
                    if binding.group == UNIFORM_GROUP && binding.binding == UNIFORM_BINDING =>
                {
                    layout.uniform_size = u64::from(*span).div_ceil(16) * 16;
                    layout.uniforms = members
                        .iter()
                        .filter_map(|m| {
                            Some(UniformSlot {
                                name: m.name.clone()?,
                                offset: m.offset,
                                ty: classify(&module.types[m.ty].inner),
                            })
                        })
                        .collect();
                }
                (AddressSpace::Handle, TypeInner::Image { .. })
                    if binding.group == TEXTURE_GROUP && binding.binding % 2 == 0 =>
                {
                    if let Some(name) = &var.name {
                        layout.textures.push(TextureSlot {
                            name: name.clone(),
                            binding: binding.binding,
                        });
                    }
                }
                (AddressSpace::Handle, TypeInner::Sampler { .. }) if binding.group == TEXTURE_GROUP => {}
                _ => log::warn!(
                    "ignoring binding @group({}) @binding({}) `{}`: outside the multipass convention",
                    binding.group,
                    binding.binding,
                    var.name.as_deref().unwrap_or("?")
                ),
            }
        }

        layout.textures.sort_by_key(|t| t.binding);
        layout
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformSlot> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureSlot> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn has_uniform_block(&self) -> bool {
        self.uniform_size > 0
    }
}

fn classify(inner: &TypeInner) -> UniformType {
    match inner {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float && s.width == 4 => UniformType::F32,
        TypeInner::Vector {
            size: VectorSize::Bi,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => UniformType::Vec2F32,
        _ => UniformType::Unsupported,
    }
}
