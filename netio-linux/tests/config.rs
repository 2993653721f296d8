use std::io::Write;
use std::time::Duration;

use netio_linux::config::{load_from, ConfigError};

#[test]
fn load_full_file() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        f,
        r#"
keepalive_interval_ms = 250
listen = ["unix:@house", "udp4::7000"]
log_level = "debug"

[presets]
lamp = "unix:@house#lamp"
"#
    )
    .unwrap();
    let c = load_from(f.path()).unwrap();
    assert_eq!(c.keepalive_interval(), Duration::from_millis(250));
    assert_eq!(c.listen, vec!["unix:@house", "udp4::7000"]);
    assert_eq!(c.log_level.as_deref(), Some("debug"));
    assert_eq!(c.expand("lamp").unwrap(), "unix:@house#lamp");
}

#[test]
fn defaults_for_missing_fields() {
    let f = tempfile::NamedTempFile::new().unwrap();
    let c = load_from(f.path()).unwrap();
    assert_eq!(c.keepalive_interval_ms, 1000);
    assert!(c.listen.is_empty());
    assert!(c.presets.is_empty());
}

#[test]
fn rejects_unknown_fields_and_zero_interval() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "proxy_port = 3128").unwrap();
    assert!(matches!(load_from(f.path()), Err(ConfigError::Toml { .. })));

    let mut f = tempfile::NamedTempFile::new().unwrap();
    writeln!(f, "keepalive_interval_ms = 0").unwrap();
    assert!(matches!(load_from(f.path()), Err(ConfigError::Invalid(_))));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_from(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}
