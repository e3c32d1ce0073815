use std::fs;

use sludre_lib::settings::{load_settings, Settings, DEFAULT_REPO_ID};

#[test]
fn missing_file_gives_defaults() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = load_settings(&tmp.path().join("settings.json")).unwrap();

    assert_eq!(settings, Settings::default());
    assert_eq!(settings.model_repo_id, DEFAULT_REPO_ID);
}

#[test]
fn file_values_flow_into_identity() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    let cache = tmp.path().join("models");
    fs::write(
        &path,
        serde_json::json!({
            "model_repo_id": "org/other-model",
            "model_cache_dir": cache,
            "manual_model_path": "   ",
            "hf_token": "file-token",
        })
        .to_string(),
    )
    .unwrap();

    let identity = load_settings(&path).unwrap().identity();

    assert_eq!(identity.repository_id, "org/other-model");
    assert_eq!(identity.cache_root, cache);
    assert!(identity.manual_path.is_none());
    assert_eq!(identity.access_token(), Some("file-token"));
}

#[test]
fn unknown_keys_are_ignored_and_missing_keys_defaulted() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    fs::write(&path, r#"{"hotkey": "ctrl+space", "manual_model_path": "/models/hviske"}"#).unwrap();

    let settings = load_settings(&path).unwrap();

    assert_eq!(settings.model_repo_id, DEFAULT_REPO_ID);
    assert_eq!(settings.manual_model_path.as_deref(), Some("/models/hviske"));
}

#[test]
fn malformed_file_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();

    assert!(load_settings(&path).is_err());
}
