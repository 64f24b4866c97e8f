use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use relaycheck_core::{CheckConfig, Endpoint};
use relaycheck_probe::{Checker, describe_failures};
use relaycheck_state::{CacheStore, ResultCache};

use crate::OutputFormat;

pub struct CheckOptions {
    pub input: PathBuf,
    pub config: Option<PathBuf>,
    pub args: Option<String>,
    pub cache_db: PathBuf,
    pub output: Option<PathBuf>,
    pub format: OutputFormat,
}

pub async fn check(options: CheckOptions) -> anyhow::Result<()> {
    let config = load_config(options.config.as_deref(), options.args.as_deref())?;
    let settings = config.validate().context("invalid configuration")?;
    let endpoints = load_endpoints(&options.input)?;

    let cache: Option<Arc<dyn ResultCache>> = if settings.cache {
        if let Some(parent) = options.cache_db.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = CacheStore::open(&options.cache_db, settings.cache_ttl)
            .with_context(|| format!("opening cache {}", options.cache_db.display()))?;
        Some(Arc::new(store))
    } else {
        None
    };

    let checker = Checker::from_settings(settings, cache)?;
    let report = checker.run(endpoints).await;

    for line in describe_failures(&report.buckets.failed) {
        warn!("{line}");
    }
    info!(
        valid = report.buckets.valid.len(),
        incompatible = report.buckets.incompatible.len(),
        failed = report.buckets.failed.len(),
        notified = report.notified,
        "done"
    );

    let rendered = render(&report.into_output(), options.format)?;
    match options.output {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            println!("✓ Wrote {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// File config (or defaults) with the argument string layered on top.
fn load_config(path: Option<&Path>, args: Option<&str>) -> anyhow::Result<CheckConfig> {
    let mut config = match path {
        Some(path) => CheckConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => CheckConfig::default(),
    };
    if let Some(args) = args {
        for key in config.apply_arguments(args)? {
            warn!(%key, "ignoring unknown option");
        }
    }
    Ok(config)
}

fn load_endpoints(path: &Path) -> anyhow::Result<Vec<Endpoint>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let endpoints: Vec<Endpoint> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of endpoints", path.display()))?;
    Ok(endpoints)
}

fn render(endpoints: &[Endpoint], format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(endpoints)?),
        OutputFormat::Text => Ok(endpoints
            .iter()
            .map(|e| match e.latency() {
                Some(latency) => format!("{e} {latency}ms"),
                None => e.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arguments_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaycheck.toml");
        std::fs::write(&path, "timeout = 3000\ncache = true\n").unwrap();

        let config = load_config(Some(&path), Some("timeout=800&show_latency&bogus=1")).unwrap();
        assert_eq!(config.timeout, 800);
        assert!(config.cache);
        assert!(config.show_latency);
    }

    #[test]
    fn defaults_without_file() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config, CheckConfig::default());
    }

    #[test]
    fn endpoints_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");

        std::fs::write(&path, r#"{"name": "a"}"#).unwrap();
        assert!(load_endpoints(&path).is_err());

        std::fs::write(&path, r#"[{"name": "a", "type": "http"}]"#).unwrap();
        let endpoints = load_endpoints(&path).unwrap();
        assert_eq!(endpoints[0].name(), "a");
    }

    #[test]
    fn text_output() {
        let mut a: Endpoint = serde_json::from_value(json!({ "name": "a", "type": "http" })).unwrap();
        a.set_latency("42");
        let b: Endpoint = serde_json::from_value(json!({ "name": "b", "type": "vmess" })).unwrap();

        let text = render(&[a, b], OutputFormat::Text).unwrap();
        assert_eq!(text, "[http] a 42ms\n[vmess] b");
    }

    #[tokio::test]
    async fn empty_input_writes_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nodes.json");
        let output = dir.path().join("out.json");
        std::fs::write(&input, "[]").unwrap();

        check(CheckOptions {
            input,
            config: None,
            args: Some("cache=1".into()),
            cache_db: dir.path().join("db/cache.redb"),
            output: Some(output.clone()),
            format: OutputFormat::Json,
        })
        .await
        .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), "[]");
        assert!(dir.path().join("db/cache.redb").exists());
    }

    #[tokio::test]
    async fn invalid_settings_abort_before_probing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nodes.json");
        std::fs::write(&input, "[]").unwrap();

        let err = check(CheckOptions {
            input,
            config: None,
            args: Some("status=(".into()),
            cache_db: dir.path().join("cache.redb"),
            output: None,
            format: OutputFormat::Json,
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid configuration"));
    }

    #[tokio::test]
    async fn bad_user_agent_aborts_without_touching_cache() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("nodes.json");
        std::fs::write(&input, r#"[{"name": "a", "type": "http", "server": "h", "port": 1}]"#)
            .unwrap();
        let cache_db = dir.path().join("cache.redb");

        let err = check(CheckOptions {
            input,
            config: None,
            args: Some("cache=1&ua=bad%0Aagent".into()),
            cache_db: cache_db.clone(),
            output: None,
            format: OutputFormat::Json,
        })
        .await
        .unwrap_err();

        assert!(format!("{err:#}").contains("`ua`"));
        assert!(!cache_db.exists());
    }
}
