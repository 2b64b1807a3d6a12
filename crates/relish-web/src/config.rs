//! Web server configuration.

use std::path::PathBuf;

use crate::error::WebError;

#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Package whose multi-methods serve `/`. Sub-packages serve the paths
    /// below it.
    pub root_package: String,
    /// Directory holding `static/` and template files.
    pub web_root: PathBuf,
    /// Directory served read-only on the share port.
    pub shared_dir: Option<PathBuf>,
    pub app_port: u16,
    pub share_port: Option<u16>,
    pub explore_port: Option<u16>,
}

impl WebConfig {
    pub fn new(root_package: impl Into<String>, web_root: impl Into<PathBuf>) -> Self {
        WebConfig {
            root_package: root_package.into(),
            web_root: web_root.into(),
            shared_dir: None,
            app_port: 8080,
            share_port: None,
            explore_port: None,
        }
    }

    /// Checks every configured port.
    pub fn validate(&self) -> Result<(), WebError> {
        validate_port(self.app_port)?;
        for port in [self.share_port, self.explore_port].into_iter().flatten() {
            validate_port(port)?;
        }
        Ok(())
    }
}

/// Privileged ports other than HTTP and HTTPS are refused.
pub fn validate_port(port: u16) -> Result<(), WebError> {
    if port < 1024 && port != 80 && port != 443 {
        return Err(WebError::BadRequest(format!(
            "port {port} is reserved; use 80, 443 or a port of 1024 or above"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privileged_ports() {
        assert!(validate_port(80).is_ok());
        assert!(validate_port(443).is_ok());
        assert!(validate_port(8080).is_ok());
        assert!(validate_port(1024).is_ok());
        assert!(validate_port(22).is_err());
        assert!(validate_port(1023).is_err());
    }

    #[test]
    fn validate_checks_optional_ports() {
        let mut config = WebConfig::new("app/web", "/tmp");
        config.explore_port = Some(21);
        assert!(config.validate().is_err());
    }
}
