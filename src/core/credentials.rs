use serde_json::Value;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::atomic::write_atomic;
use crate::error::{ConfigurationError, RunnerError};

/// Environment variable the responder script reads the token from
pub const TOKEN_ENV: &str = "AUTOBUILD_GIT_TOKEN";

/// Credential responder written into the job directory
pub const ASKPASS_FILE: &str = ".git-askpass";

/// JSON keys tried in order when the token file holds an object
const TOKEN_KEYS: &[&str] = &[
    "primary",
    "gitlab_token_primary",
    "secondary",
    "gitlab_token_secondary",
];

const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$AUTOBUILD_GIT_TOKEN\"\n";

/// Non-interactive credential responder for version-control clients
#[derive(Clone)]
pub struct Credentials {
    askpass: PathBuf,
    token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("askpass", &self.askpass)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve the owner's token and write the responder script into `job_dir`
    pub fn prepare(token_root: &Path, owner: &str, job_dir: &Path) -> Result<Self, RunnerError> {
        let token = read_token(token_root, owner)?;

        let askpass = job_dir.join(ASKPASS_FILE);
        write_atomic(&askpass, ASKPASS_SCRIPT.as_bytes())?;
        fs::set_permissions(&askpass, fs::Permissions::from_mode(0o700))?;

        info!("Prepared source-control credentials for {}", owner);
        Ok(Self { askpass, token })
    }

    pub fn askpass_path(&self) -> &Path {
        &self.askpass
    }

    /// Variables handed to every child process
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("GIT_ASKPASS".to_string(), self.askpass.display().to_string()),
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GCM_INTERACTIVE".to_string(), "never".to_string()),
            (TOKEN_ENV.to_string(), self.token.clone()),
        ]
    }
}

/// Token for `owner` from `<token_root>/<owner>.token`, plain text or JSON
pub fn read_token(token_root: &Path, owner: &str) -> Result<String, ConfigurationError> {
    let path = token_root.join(format!("{}.token", owner));
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigurationError::MissingCredential {
                owner: owner.to_string(),
                path,
            })
        }
        Err(e) => return Err(ConfigurationError::ReadError(path, e)),
    };

    let token = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => {
            debug!("Token file {} is JSON", path.display());
            TOKEN_KEYS
                .iter()
                .filter_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|token| !token.is_empty())
                .unwrap_or_default()
                .to_string()
        }
        _ => raw.trim().to_string(),
    };

    if token.is_empty() {
        return Err(ConfigurationError::EmptyCredential {
            owner: owner.to_string(),
            path,
        });
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_plain_text_token_is_trimmed() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("alice.token"), "  glpat-abc\n").unwrap();
        assert_eq!(read_token(temp_dir.path(), "alice").unwrap(), "glpat-abc");
    }

    #[test]
    fn test_json_token_prefers_primary() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("alice.token"),
            r#"{"primary": " ", "secondary": "fallback", "note": "x"}"#,
        )
        .unwrap();
        assert_eq!(read_token(temp_dir.path(), "alice").unwrap(), "fallback");

        fs::write(temp_dir.path().join("bob.token"), r#"{"gitlab_token_primary": "legacy"}"#).unwrap();
        assert_eq!(read_token(temp_dir.path(), "bob").unwrap(), "legacy");
    }

    #[test]
    fn test_missing_and_empty_tokens_are_config_errors() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            read_token(temp_dir.path(), "carol").unwrap_err(),
            ConfigurationError::MissingCredential { .. }
        ));

        fs::write(temp_dir.path().join("carol.token"), "\n  \n").unwrap();
        assert!(matches!(
            read_token(temp_dir.path(), "carol").unwrap_err(),
            ConfigurationError::EmptyCredential { .. }
        ));

        fs::write(temp_dir.path().join("dave.token"), r#"{"primary": ""}"#).unwrap();
        assert!(read_token(temp_dir.path(), "dave").is_err());
    }

    #[test]
    fn test_prepare_writes_executable_responder_without_secret() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("alice.token"), "s3cret").unwrap();
        let job_dir = temp_dir.path().join("job");
        fs::create_dir_all(&job_dir).unwrap();

        let creds = Credentials::prepare(temp_dir.path(), "alice", &job_dir).unwrap();

        let script = fs::read_to_string(creds.askpass_path()).unwrap();
        assert!(!script.contains("s3cret"));
        let mode = fs::metadata(creds.askpass_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        let env = creds.env();
        assert!(env.contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())));
        assert!(env.contains(&(TOKEN_ENV.to_string(), "s3cret".to_string())));
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }

    #[test]
    fn test_responder_prints_token_from_env() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("alice.token"), "s3cret").unwrap();
        let creds = Credentials::prepare(temp_dir.path(), "alice", temp_dir.path()).unwrap();

        let output = std::process::Command::new(creds.askpass_path())
            .arg("Password for 'https://gitlab.example.com': ")
            .env(TOKEN_ENV, "s3cret")
            .output()
            .unwrap();

        assert_eq!(String::from_utf8_lossy(&output.stdout), "s3cret\n");
    }
}
