#[cfg(test)]
mod tests {
    use crate::*;
    use isoflow_core::FlowKind;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE_YAML: &str = r#"
runtime:
  max_concurrent_flows: 8
  extraction_timeout_ms: 2500
deadlines:
  default_seconds: 30
  overrides:
    render: 2
    web_trigger: 5
flags:
  global_kill_switch: false
  measurement_enabled: true
  targeting_enabled: false
logging:
  filter: "isoflow=debug"
  json: true
"#;

    #[test]
    fn test_yaml_loading() {
        let config = ConfigLoader::from_yaml_str(SAMPLE_YAML).unwrap();

        assert_eq!(config.runtime.max_concurrent_flows, Some(8));
        assert_eq!(config.runtime.extraction_timeout(), Duration::from_millis(2500));
        assert!(!config.flags.targeting_enabled);
        assert!(config.logging.json);

        let table = config.deadlines.kind_table();
        assert_eq!(table.deadline(FlowKind::Render), Duration::from_secs(2));
        assert_eq!(table.deadline(FlowKind::WebTrigger), Duration::from_secs(5));
        assert_eq!(table.deadline(FlowKind::AppRequest), Duration::from_secs(30));
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = ConfigLoader::from_json_str("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.deadlines.default_seconds, 30);
        assert!(config.flags.measurement_enabled);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = OrchestratorConfig::default();
        config.runtime.max_concurrent_flows = Some(0);
        assert_eq!(ConfigLoader::validate(&config), Err(ConfigError::ZeroConcurrency));

        let mut config = OrchestratorConfig::default();
        config.deadlines.overrides.insert(FlowKind::Render, 0);
        assert_eq!(
            ConfigLoader::validate(&config),
            Err(ConfigError::ZeroDeadline {
                scope: "Render".to_string()
            })
        );

        let err =
            ConfigLoader::from_yaml_str("runtime:\n  extraction_timeout_ms: 0\n").unwrap_err();
        assert!(err.to_string().contains("extraction_timeout_ms"));
    }

    #[test]
    fn test_unknown_kind_is_a_parse_error() {
        let result = ConfigLoader::from_yaml_str("deadlines:\n  overrides:\n    teleport: 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_YAML.as_bytes()).unwrap();

        let config = ConfigLoader::from_yaml_file(file.path()).unwrap();

        let out = tempfile::NamedTempFile::new().unwrap();
        ConfigLoader::save_to_yaml(&config, out.path()).unwrap();
        let reloaded = ConfigLoader::from_yaml_file(out.path()).unwrap();
        assert_eq!(config, reloaded);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ConfigLoader::from_json_file("/nonexistent/isoflow.json").unwrap_err();
        assert!(err.to_string().contains("isoflow.json"));
    }
}
