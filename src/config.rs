use crate::errors::AclError;

const DEFAULT_MAX_LIMIT: usize = 1000;
const DEFAULT_PERMISSION_FIELD: &str = "_permissions";

/// Engine-wide defaults that individual schemas may override.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard page-size maximum for entities that declare none.
    pub max_limit: usize,
    /// Where doc permissions are written when a schema names no field.
    pub permission_field: String,
    /// Whether read and list responses carry permission maps by default.
    pub include_permissions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            permission_field: DEFAULT_PERMISSION_FIELD.to_string(),
            include_permissions: true,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, AclError> {
        let defaults = Self::default();

        let max_limit = std::env::var("FIELDGUARD_MAX_LIMIT")
            .map(|val| val.parse::<usize>())
            .unwrap_or(Ok(defaults.max_limit))
            .map_err(|_| AclError::configuration("FIELDGUARD_MAX_LIMIT must be a positive integer"))?;
        if max_limit == 0 {
            return Err(AclError::configuration("FIELDGUARD_MAX_LIMIT must be a positive integer"));
        }

        let permission_field = std::env::var("FIELDGUARD_PERMISSION_FIELD")
            .ok()
            .filter(|val| !val.trim().is_empty())
            .unwrap_or(defaults.permission_field);

        let include_permissions = match std::env::var("FIELDGUARD_INCLUDE_PERMISSIONS") {
            Ok(val) => parse_flag(&val).ok_or_else(|| {
                AclError::configuration("FIELDGUARD_INCLUDE_PERMISSIONS must be true or false")
            })?,
            Err(_) => defaults.include_permissions,
        };

        Ok(Self {
            max_limit,
            permission_field,
            include_permissions,
        })
    }
}

/// Load `.env` from the working directory, falling back to the crate root.
pub fn load_env() {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }
}

/// Install the fmt subscriber; `RUST_LOG` overrides `default_directive`.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_limit, 1000);
        assert_eq!(config.permission_field, "_permissions");
        assert!(config.include_permissions);
    }
}
