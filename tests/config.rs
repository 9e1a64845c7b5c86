use tempfile::TempDir;

use adiflog::{
    adif::{AppFieldAlias, DecoderOptions},
    config::{ConfigError, LogConfig},
    reconcile::MatchConfig,
    runtime::handle::RuntimeConfig,
};

#[test]
fn empty_document_yields_defaults() {
    let config = LogConfig::from_toml_str("").expect("parse");
    assert_eq!(config, LogConfig::default());
    assert_eq!(config.matching.probable_window_secs, 1800);
    assert_eq!(config.matching.possible_window_secs, 21600);
    assert_eq!(config.decoder.program_id, "ADIFLOG");
    assert!(!config.runtime.continue_on_structural);
    assert_eq!(
        config.decoder.legacy_app_fields,
        vec![AppFieldAlias {
            from: "APP_EQSL_AG".to_string(),
            to: "EQSL_AG".to_string(),
        }]
    );
}

#[test]
fn partial_sections_keep_other_defaults() {
    let text = r#"
        [matching]
        probable_window_secs = 900
        overwrite_existing = true

        [decoder]
        program_id = "MYLOG"

        [runtime]
        autosave_every_ops = 50
        continue_on_structural = true
    "#;
    let config = LogConfig::from_toml_str(text).expect("parse");
    assert_eq!(
        config.matching,
        MatchConfig {
            probable_window_secs: 900,
            overwrite_existing: true,
            ..MatchConfig::default()
        }
    );
    assert_eq!(config.decoder.program_id, "MYLOG");
    assert_eq!(
        config.decoder.legacy_app_fields,
        DecoderOptions::default().legacy_app_fields
    );
    assert_eq!(
        config.runtime,
        RuntimeConfig {
            autosave_every_ops: 50,
            continue_on_structural: true,
            ..RuntimeConfig::default()
        }
    );
}

#[test]
fn serialized_config_loads_back_from_file() {
    let tmp = TempDir::new().expect("tmp");
    let path = tmp.path().join("adiflog.toml");

    let mut config = LogConfig::default();
    config.matching.location_fields.push("GRIDSQUARE".to_string());
    config.runtime.command_capacity = 16;
    std::fs::write(&path, config.to_toml_string().expect("serialize")).expect("write");

    assert_eq!(LogConfig::load(&path).expect("load"), config);
}

#[test]
fn errors_name_their_cause() {
    assert!(matches!(
        LogConfig::from_toml_str("[matching]\nprobable_window_secs = \"soon\""),
        Err(ConfigError::Parse(_))
    ));

    let tmp = TempDir::new().expect("tmp");
    let missing = tmp.path().join("missing.toml");
    match LogConfig::load(&missing) {
        Err(ConfigError::Io { path, .. }) => assert_eq!(path, missing),
        other => panic!("unexpected: {other:?}"),
    }
}
