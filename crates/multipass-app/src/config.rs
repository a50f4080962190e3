use std::path::PathBuf;

/// Overrides where stage sources not built into the binary are looked up.
pub const SHADER_DIR_ENV: &str = "MULTIPASS_SHADER_DIR";

/// Fixed construction parameters of the demo window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub title: String,
    /// Logical window size.
    pub size: (u32, u32),
    pub shader_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Multipass Demo".to_string(),
            size: (960, 540),
            shader_dir: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::default().with_shader_dir(std::env::var_os(SHADER_DIR_ENV).map(PathBuf::from))
    }

    fn with_shader_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.shader_dir = dir.filter(|d| !d.as_os_str().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_demo_window() {
        let config = AppConfig::default();
        assert_eq!(config.title, "Multipass Demo");
        assert_eq!(config.size, (960, 540));
        assert_eq!(config.shader_dir, None);
    }

    #[test]
    fn empty_shader_dir_is_ignored() {
        let config = AppConfig::default().with_shader_dir(Some(PathBuf::new()));
        assert_eq!(config.shader_dir, None);

        let config = AppConfig::default().with_shader_dir(Some("/opt/shaders".into()));
        assert_eq!(config.shader_dir.as_deref(), Some(std::path::Path::new("/opt/shaders")));
    }
}
