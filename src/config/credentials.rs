// src/config/credentials.rs
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Basic-auth pair for the benchmark vendor, read from a `user:password` file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Credentials(format!("reading {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Only the first line counts; the password may itself contain `:`.
    pub fn parse(content: &str) -> Result<Self> {
        let line = content.lines().next().unwrap_or_default().trim();
        let (user, pass) = line.split_once(':').ok_or_else(|| {
            PipelineError::Credentials("expected `user:password` on the first line".into())
        })?;
        let (user, pass) = (user.trim(), pass.trim());
        if user.is_empty() || pass.is_empty() {
            return Err(PipelineError::Credentials(
                "username and password must both be non-empty".into(),
            ));
        }
        Ok(Self {
            username: user.to_string(),
            password: pass.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_line_and_trims_newline() {
        let c = Credentials::parse("me@example.com:abc123\nignored:line\n").unwrap();
        assert_eq!(c.username, "me@example.com");
        assert_eq!(c.password, "abc123");
    }

    #[test]
    fn password_may_contain_colon() {
        let c = Credentials::parse("user:pa:ss").unwrap();
        assert_eq!(c.password, "pa:ss");
    }

    #[test]
    fn rejects_missing_separator_and_empty_fields() {
        assert!(matches!(
            Credentials::parse("nocolon"),
            Err(PipelineError::Credentials(_))
        ));
        assert!(Credentials::parse(":secret").is_err());
        assert!(Credentials::parse("").is_err());
    }

    #[test]
    fn debug_output_hides_password() {
        let c = Credentials::parse("user:topsecret").unwrap();
        assert!(!format!("{c:?}").contains("topsecret"));
    }
}
