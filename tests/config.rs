// tests/config.rs
use std::path::Path;

use feedpulse::{AppConfig, ProviderConfig, SourceRegistry};

#[test]
fn sample_config_builds_and_initializes_every_source() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/feedpulse.toml");
    let cfg = AppConfig::load_from(&path).expect("sample config parses");
    assert_eq!(cfg.engine.metrics_addr.as_deref(), Some("127.0.0.1:9091"));
    assert!(!cfg.sources.is_empty());

    let registry = SourceRegistry::with_defaults();
    let provider = ProviderConfig::default();
    for source_cfg in cfg.sources {
        let mut source = registry
            .build(source_cfg.clone())
            .unwrap_or_else(|e| panic!("{source_cfg}: {e}"));
        source
            .initialize(&provider)
            .unwrap_or_else(|e| panic!("{}: {e}", source.uid()));
    }
}
