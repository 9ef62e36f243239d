//! Manifest files on disk: load, edit, save and reload.

use rust_ljm::manifest::{ConfigManifest, ManifestError, ParamValue};
use rust_ljm::overrides;
use rust_ljm::{conformance, OverrideError};
use tempfile::tempdir;

#[test]
fn test_bundled_manifest_conforms_without_overrides() {
    let report = conformance::check_str(ConfigManifest::builtin_text());
    assert!(report.is_conformant(), "{report}");
    assert_eq!(report.entries_checked(), 34);

    let manifest = ConfigManifest::builtin().unwrap();
    assert_eq!(manifest.len(), 34);
    assert_eq!(manifest.overrides().count(), 0);
    assert!(manifest
        .header()
        .iter()
        .any(|line| line.contains("backslashes")));
    assert!(overrides::resolve(&manifest).unwrap().is_empty());
}

#[test]
fn test_manifest_saved_with_byte_order_mark() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ljm_startup_configs.json");
    std::fs::write(&path, format!("\u{feff}{}", ConfigManifest::builtin_text())).unwrap();

    let manifest = ConfigManifest::load(&path).unwrap();
    assert_eq!(manifest.len(), 34);
    assert_eq!(manifest.header(), ConfigManifest::builtin().unwrap().header());
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(conformance::check_str(&text).is_conformant());
}

#[test]
fn test_set_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ljm_startup_configs.json");

    let mut manifest = ConfigManifest::builtin().unwrap();
    manifest
        .set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_ON_ERROR")
        .unwrap();
    manifest
        .set_from_str("LJM_SEND_RECEIVE_TIMEOUT_MS", "2600")
        .unwrap();
    manifest
        .set_from_str("LJM_DEBUG_LOG_FILE", r"C:\Users\lab\ljm.log")
        .unwrap();
    manifest.save(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("// "));
    // Backslashes are doubled on disk
    assert!(text.contains(r#""C:\\Users\\lab\\ljm.log""#));
    assert!(conformance::check_str(&text).is_conformant());

    let reloaded = ConfigManifest::load(&path).unwrap();
    assert_eq!(reloaded.header(), manifest.header());
    assert_eq!(reloaded.declarations(), manifest.declarations());
    assert_eq!(reloaded.overrides().count(), 3);

    let audit = overrides::audit(&reloaded);
    assert!(audit.is_clean());
    assert!(audit.warnings.is_empty());
    let rendered: Vec<String> = audit.resolved.iter().map(ToString::to_string).collect();
    assert!(rendered.contains(&"LJM_DEBUG_LOG_MODE = 3".to_string()));
    assert!(rendered.contains(&"LJM_SEND_RECEIVE_TIMEOUT_MS = 2600".to_string()));
}

#[test]
fn test_reset_restores_default_marker() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("manifest.json");

    let mut manifest = ConfigManifest::builtin().unwrap();
    manifest
        .set_from_str("LJM_STREAM_SCANS_RETURN", "LJM_STREAM_SCANS_RETURN_ALL_OR_NONE")
        .unwrap();
    manifest
        .set_from_str("LJM_ALLOWS_AUTO_CONDENSE_ADDRESSES", "false")
        .unwrap();
    manifest.reset("LJM_STREAM_SCANS_RETURN").unwrap();
    assert_eq!(manifest.overrides().count(), 1);
    assert_eq!(
        manifest.get("LJM_STREAM_SCANS_RETURN").unwrap().value,
        ParamValue::Default
    );

    manifest.reset_all();
    manifest.save(&path).unwrap();
    let reloaded = ConfigManifest::load(&path).unwrap();
    assert_eq!(reloaded.overrides().count(), 0);
}

#[test]
fn test_illegal_edits_leave_manifest_unchanged() {
    let mut manifest = ConfigManifest::builtin().unwrap();

    let err = manifest
        .set_from_str("LJM_DEBUG_LOG_MODE", "LJM_DEBUG_LOG_MODE_SOMETIMES")
        .unwrap_err();
    assert!(matches!(
        err,
        ManifestError::Override(OverrideError::NotAllowed { .. })
    ));

    let err = manifest
        .set_from_str("LJM_SEND_RECEIVE_TIMEOUT_MS", "soon")
        .unwrap_err();
    assert!(matches!(err, ManifestError::ValueParse { .. }));

    let err = manifest
        .set_value("LJM_DEBUG_LOG_MODE", ParamValue::Boolean(true))
        .unwrap_err();
    assert!(err.to_string().contains("declared integer"));

    let err = manifest.reset("LJM_NOT_A_CONFIG").unwrap_err();
    assert!(matches!(err, ManifestError::UnknownParameter(_)));

    assert_eq!(manifest.overrides().count(), 0);
}

#[test]
fn test_hand_edited_file_with_illegal_override() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("edited.json");
    std::fs::write(
        &path,
        r#"// hand edited
{
  "LJM_CONFIG_VALUES": [
    {"LJM_DEBUG_LOG_MODE": "LJM_DEBUG_LOG_MODE_SOMETIMES", "type": "integer", "values": ["LJM_DEBUG_LOG_MODE_NEVER", "LJM_DEBUG_LOG_MODE_CONTINUOUS", "LJM_DEBUG_LOG_MODE_ON_ERROR"]},
    {"LJM_DEBUG_LOG_FILE": "C:\temp\new.log", "type": "string"},
    {"LJM_SEND_RECEIVE_TIMEOUT_MS": 2600, "type": "integer"}
  ]
}
"#,
    )
    .unwrap();

    // The structure is fine; the overrides are not.
    let manifest = ConfigManifest::load(&path).unwrap();
    let audit = overrides::audit(&manifest);
    assert!(!audit.is_clean());
    assert_eq!(audit.errors.len(), 1);
    assert_eq!(audit.resolved.len(), 2);
    assert_eq!(audit.warnings.len(), 1);
    assert_eq!(audit.warnings[0].name, "LJM_DEBUG_LOG_FILE");
    assert_eq!(audit.warnings[0].character, '\t');

    assert!(overrides::resolve(&manifest).is_err());
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.json");
    let err = ConfigManifest::load(&path).unwrap_err();
    assert!(matches!(err, ManifestError::Read { .. }));
    assert!(err.to_string().contains("absent.json"));
}
