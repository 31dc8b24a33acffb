use chemlog::settings::{ConfigError, Settings, SettingsManager};
use chemlog::LogFormat;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_load_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chemlog.cfg");
    fs::write(
        &path,
        "[scan]\nformat = tight-binding\ncase_insensitive = true\n\n[logging]\nlevel = debug\n",
    )
    .unwrap();

    let manager = SettingsManager::load_from(&path).unwrap();
    assert!(manager.config_source().contains("chemlog.cfg"));
    assert_eq!(manager.level_filter(), log::LevelFilter::Debug);

    let format = manager.log_format().unwrap();
    assert_eq!(format.name, "tight-binding");
    assert!(format.completion.matches("CALCULATION FINISHED"));
}

#[test]
fn test_trigger_overrides_reach_the_engine() {
    let settings = SettingsManager::parse_config(
        "[scan]\nformat = castep\n[triggers]\ncompletion = Finished at\natoms = Ions in cell\n",
    )
    .unwrap();
    let engine = chemlog::ScanEngine::new(settings.log_format().unwrap());

    let record = engine
        .scan_text("Ions in cell: 3\nFinished at 12:00\n", "override.castep")
        .unwrap();
    assert_eq!(record.get_i64("numbAtoms"), Some(3));
    assert_eq!(record.get_bool("run completed"), Some(true));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let result = SettingsManager::load_from(&dir.path().join("nope.cfg"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_invalid_level_rejected() {
    let result = SettingsManager::parse_config("[logging]\nlevel = loud\n");
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
}

#[test]
fn test_invalid_bool_rejected() {
    let result = SettingsManager::parse_config("[scan]\ncase_insensitive = maybe\n");
    assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
}

#[test]
fn test_create_template_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chemlog.cfg");
    SettingsManager::create_template(&path).unwrap();

    let manager = SettingsManager::load_from(&path).unwrap();
    assert_eq!(manager.settings(), &Settings::default());
    assert_eq!(manager.log_format().unwrap(), LogFormat::castep());
}

#[test]
fn test_later_file_only_overrides_keys_it_sets() {
    let dir = tempdir().unwrap();
    let user = dir.path().join("user.cfg");
    let local = dir.path().join("chemlog.cfg");
    fs::write(&user, "[scan]\nformat = cp2k\n[triggers]\ncompletion = Job done\n").unwrap();
    fs::write(&local, "[logging]\nlevel = debug\n[triggers]\nreset = New job\n").unwrap();

    let manager = SettingsManager::load_layered(&[user.clone(), local.clone()]);
    assert_eq!(manager.settings().scan.format, "cp2k");
    assert_eq!(manager.level_filter(), log::LevelFilter::Debug);

    let format = manager.log_format().unwrap();
    assert!(format.completion.matches("Job done"));
    assert!(format.is_reset("New job 2"));
    assert!(manager.config_source().contains("user.cfg"));
    assert!(manager.config_source().contains("chemlog.cfg"));
}

#[test]
fn test_invalid_layer_is_skipped() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.cfg");
    let bad = dir.path().join("bad.cfg");
    fs::write(&good, "[scan]\nformat = tight-binding\n").unwrap();
    fs::write(&bad, "[scan]\nformat = vasp\n[logging]\nlevel = trace\n").unwrap();

    let manager = SettingsManager::load_layered(&[good, bad, dir.path().join("absent.cfg")]);
    assert_eq!(manager.settings().scan.format, "tight-binding");
    assert_eq!(manager.settings().logging.level, "info");
}
