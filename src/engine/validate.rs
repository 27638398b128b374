use crate::config::Config;
use crate::deployer::DeployProvider;
use crate::engine::ValidationResult;

/// Check a resolved configuration without touching the network or spawning
/// anything. Every problem found is reported, not just the first.
pub fn validate_config(cfg: &Config) -> ValidationResult {
    let mut result = ValidationResult::ok();

    validate_credentials(cfg, &mut result);
    validate_limits(cfg, &mut result);
    validate_runtime(cfg, &mut result);
    validate_deploy(cfg, &mut result);

    result
}

/* ---------------- credentials ---------------- */

fn validate_credentials(cfg: &Config, result: &mut ValidationResult) {
    if cfg.openai_api_key.is_none() {
        result.push_error(
            "OPENAI_API_KEY_MISSING",
            "OPENAI_API_KEY is not set; code generation is unavailable",
        );
    }

    if !(cfg.openai_base_url.starts_with("http://") || cfg.openai_base_url.starts_with("https://"))
    {
        result.push_error(
            "OPENAI_BASE_URL_INVALID",
            format!("OPENAI_BASE_URL is not an http(s) URL: {}", cfg.openai_base_url),
        );
    }
}

/* ---------------- limits ---------------- */

fn validate_limits(cfg: &Config, result: &mut ValidationResult) {
    if cfg.execution_timeout == 0 {
        result.push_error(
            "TIMEOUT_INVALID",
            "EXECUTION_TIMEOUT must be greater than zero",
        );
    }
}

/* ---------------- runtime ---------------- */

fn validate_runtime(cfg: &Config, result: &mut ValidationResult) {
    if cfg.runtime.python.trim().is_empty() {
        result.push_error("RUNTIME_PYTHON_MISSING", "Python runtime is not configured");
    }

    if cfg.runtime.node.trim().is_empty() {
        result.push_error("RUNTIME_NODE_MISSING", "Node runtime is not configured");
    }

    if cfg.enable_docker && cfg.runtime.docker.trim().is_empty() {
        result.push_error(
            "RUNTIME_DOCKER_MISSING",
            "Docker is enabled but no docker binary is configured",
        );
    }
}

/* ---------------- deploy ---------------- */

fn validate_deploy(cfg: &Config, result: &mut ValidationResult) {
    if let Err(e) = cfg.deploy_provider.parse::<DeployProvider>() {
        result.push_error("PROVIDER_UNKNOWN", e);
    }

    if cfg.deploy_path.exists() && !cfg.deploy_path.is_dir() {
        result.push_error(
            "DEPLOY_PATH_NOT_DIR",
            format!("Deploy path is not a directory: {}", cfg.deploy_path.display()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFile;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::resolve(ConfigFile::default(), move |key| {
            pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    fn codes(result: &ValidationResult) -> Vec<&'static str> {
        result.errors.iter().map(|e| e.code).collect()
    }

    #[test]
    fn complete_config_is_valid() {
        let result = validate_config(&config(&[("OPENAI_API_KEY", "sk-test")]));
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn missing_key_is_reported() {
        let result = validate_config(&config(&[]));
        assert!(!result.is_valid());
        assert_eq!(codes(&result), ["OPENAI_API_KEY_MISSING"]);
    }

    #[test]
    fn all_problems_are_reported_together() {
        let mut cfg = config(&[
            ("EXECUTION_TIMEOUT", "0"),
            ("DEPLOY_PROVIDER", "heroku"),
            ("OPENAI_BASE_URL", "api.example.test"),
        ]);
        cfg.runtime.node = " ".to_string();
        cfg.runtime.docker = String::new();

        let result = validate_config(&cfg);
        let codes = codes(&result);
        for expected in [
            "OPENAI_API_KEY_MISSING",
            "OPENAI_BASE_URL_INVALID",
            "TIMEOUT_INVALID",
            "RUNTIME_NODE_MISSING",
            "RUNTIME_DOCKER_MISSING",
            "PROVIDER_UNKNOWN",
        ] {
            assert!(codes.contains(&expected), "missing {expected} in {codes:?}");
        }
    }

    #[test]
    fn docker_binary_only_matters_when_docker_is_enabled() {
        let mut cfg = config(&[("OPENAI_API_KEY", "sk"), ("ENABLE_DOCKER", "false")]);
        cfg.runtime.docker = String::new();
        assert!(validate_config(&cfg).is_valid());
    }

    #[test]
    fn deploy_path_pointing_at_a_file_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().to_string();
        let result = validate_config(&config(&[("OPENAI_API_KEY", "sk"), ("DEPLOY_PATH", path.as_str())]));
        assert_eq!(codes(&result), ["DEPLOY_PATH_NOT_DIR"]);
    }
}
