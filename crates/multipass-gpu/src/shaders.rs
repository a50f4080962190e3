use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use multipass_core::error::BackendError;

/// WGSL sources compiled into the binary, addressed by stage name.
pub const BUILTIN_SHADERS: &[(&str, &str)] = &[
    ("passthrough", include_str!("../shaders/passthrough.wgsl")),
    ("pass1-plasma", include_str!("../shaders/pass1-plasma.wgsl")),
    ("pass2-desaturate", include_str!("../shaders/pass2-desaturate.wgsl")),
    ("pass3-sobel", include_str!("../shaders/pass3-sobel.wgsl")),
    ("pass4-clouds", include_str!("../shaders/pass4-clouds.wgsl")),
    ("pass5-colorize", include_str!("../shaders/pass5-colorize.wgsl")),
];

/// Final-target → surface copy.
pub const BLIT_WGSL: &str = include_str!("../shaders/blit.wgsl");

/// Entry points every stage source must define.
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Resolves stage names to WGSL source.
///
/// Lookup order: sources registered with [`with_source`](Self::with_source),
/// the built-in set, then `<dir>/<name>.wgsl`.
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    dir: Option<PathBuf>,
    sources: HashMap<String, String>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_source(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn resolve(&self, name: &str) -> Result<Cow<'static, str>, BackendError> {
        let stem = name.strip_suffix(".wgsl").unwrap_or(name);

        if let Some(source) = self.sources.get(stem) {
            return Ok(Cow::Owned(source.clone()));
        }
        if let Some((_, source)) = BUILTIN_SHADERS.iter().find(|(n, _)| *n == stem) {
            return Ok(Cow::Borrowed(source));
        }
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{stem}.wgsl"));
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    log::debug!("loaded shader `{stem}` from {}", path.display());
                    return Ok(Cow::Owned(source));
                }
                Err(err) => log::warn!("cannot read {}: {err}", path.display()),
            }
        }
        Err(BackendError::UnknownSource(name.to_string()))
    }
}
