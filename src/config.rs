use anyhow::{Context, Result, bail};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::client::ClientConfig;

const PRODUCTION_URL: &str = "https://app.visual-layer.com/api/v1";
const STAGING_URL: &str = "https://app.staging-visual-layer.link/api/v1";

/// Named Visual Layer deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Staging,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Production => PRODUCTION_URL,
            Environment::Staging => STAGING_URL,
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            other => bail!("Unknown environment: {other}. Use 'production' or 'staging'."),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => f.write_str("production"),
            Environment::Staging => f.write_str("staging"),
        }
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    key: Option<String>,
    secret: Option<String>,
    environment: Option<String>,
}

pub(crate) fn load_config(
    key: Option<String>,
    secret: Option<String>,
    environment: Option<Environment>,
) -> Result<ClientConfig> {
    let mut key = key.or_else(|| non_empty_env("VISUAL_LAYER_API_KEY"));
    let mut secret = secret.or_else(|| non_empty_env("VISUAL_LAYER_API_SECRET"));
    let mut env_name = non_empty_env("VISUAL_LAYER_ENVIRONMENT");

    let rc_candidates = rc_candidates();

    if key.is_none() || secret.is_none() || (environment.is_none() && env_name.is_none()) {
        for rc_path in &rc_candidates {
            if rc_path.exists() {
                let cfg = read_rc(rc_path).with_context(|| {
                    format!("failed to read configuration file {}", rc_path.display())
                })?;

                if key.is_none() {
                    key = cfg.key;
                }
                if secret.is_none() {
                    secret = cfg.secret;
                }
                if env_name.is_none() {
                    env_name = cfg.environment;
                }
                break;
            }
        }
    }

    let key = key.ok_or_else(|| missing("key", "VISUAL_LAYER_API_KEY", &rc_candidates))?;
    let secret =
        secret.ok_or_else(|| missing("secret", "VISUAL_LAYER_API_SECRET", &rc_candidates))?;

    let environment = match environment {
        Some(e) => e,
        None => match env_name {
            Some(name) => name.parse()?,
            None => Environment::default(),
        },
    };

    Ok(ClientConfig {
        key,
        secret,
        environment,
    })
}

fn missing(field: &str, var: &str, rc_candidates: &[PathBuf]) -> anyhow::Error {
    if rc_candidates.is_empty() {
        return anyhow::anyhow!(
            "Missing configuration: {field} (set {var} or create .visuallayerrc)"
        );
    }
    anyhow::anyhow!(
        "Missing configuration: {field} (set {var} or put `{field}:` in one of: {})",
        rc_candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // `key:` may be followed by the value on the next line.
    let mut pending_key: Option<&str> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(pk) = pending_key.take() {
            if !line.contains(':') {
                cfg.set(pk, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let k = k.trim();
            let v = strip_quotes(v.trim());
            if !matches!(k, "key" | "secret" | "environment") {
                continue;
            }
            if v.is_empty() {
                pending_key = Some(match k {
                    "key" => "key",
                    "secret" => "secret",
                    _ => "environment",
                });
            } else {
                cfg.set(k, v);
            }
        }
    }

    cfg
}

impl RcConfig {
    fn set(&mut self, field: &str, value: &str) {
        let value = Some(value.to_string());
        match field {
            "key" => self.key = value,
            "secret" => self.secret = value,
            "environment" => self.environment = value,
            _ => {}
        }
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn rc_candidates() -> Vec<PathBuf> {
    // 1) VISUAL_LAYER_RC (explicit)
    // 2) ./.visuallayerrc
    // 3) ~/.visuallayerrc
    if let Ok(p) = std::env::var("VISUAL_LAYER_RC") {
        return vec![PathBuf::from(p)];
    }

    let mut v = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        v.push(cwd.join(".visuallayerrc"));
    }
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".visuallayerrc"));
    }
    v
}
