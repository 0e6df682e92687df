//! Version information for envpool.

/// envpool version from Cargo.toml
pub const ENVPOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version reported by the liveness endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VersionInfo {
    pub envpool: &'static str,
    /// Deployment label (e.g. a git sha), if the binary was given one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            envpool: ENVPOOL_VERSION,
            build: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_build(mut self, build: String) -> Self {
        self.build = Some(build);
        self
    }

    /// `0.3.0` or `0.3.0+abc123`.
    pub fn label(&self) -> String {
        match &self.build {
            Some(build) => format!("{}+{}", self.envpool, build),
            None => self.envpool.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_crate_version() {
        let info = VersionInfo::new();
        assert_eq!(info.envpool, ENVPOOL_VERSION);
        assert!(info.build.is_none());
        assert_eq!(info.label(), ENVPOOL_VERSION);
    }

    #[test]
    fn version_label_includes_build() {
        let info = VersionInfo {
            envpool: "0.1.0",
            build: None,
        }
        .with_build("abc123".to_string());
        assert_eq!(info.label(), "0.1.0+abc123");
    }

    #[test]
    fn version_info_serializes_minimal() {
        let info = VersionInfo {
            envpool: "0.1.0",
            build: None,
        };
        insta::assert_json_snapshot!(info, @r#"
        {
          "envpool": "0.1.0"
        }
        "#);
    }
}
