use clayo_widget::config::{AppConfig, Command};
use serial_test::serial;
use std::env;
use std::io::Write;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for key in [
            "CLAYO_SERVER__PORT",
            "CLAYO_SERVER__HOST",
            "CLAYO_WIDGET__ORGANIZATION_ID",
            "CLAYO_WIDGET__API_URL",
            "CLAYO_ORGANIZATION_ID",
            "CLAYO_AGENT_ID",
            "CLAYO_API_URL",
            "CLAYO_HOST_CONFIG",
            "CONFIG_FILE",
            "PORT",
        ] {
            env::remove_var(key);
        }
    }
}

fn load(args: &[&str]) -> AppConfig {
    let mut argv = vec!["clayo-widget"];
    argv.extend_from_slice(args);
    AppConfig::load_from_args(argv)
        .expect("Failed to load config")
        .1
}

fn temp_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp file");
    file
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load(&[]);
    assert_eq!(config.server.port, 3001);
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(config.widget.organization_id.is_none());
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    unsafe {
        env::set_var("CLAYO_SERVER__PORT", "9090");
        env::set_var("CLAYO_WIDGET__ORGANIZATION_ID", "from-env");
    }

    let config = load(&[]);
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.widget.organization_id.as_deref(), Some("from-env"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let file = temp_file(
        ".yaml",
        r"
server:
  port: 7070
widget:
  organization_id: from-file
  api_url: https://api.clayo.co
",
    );
    let path = file.path().to_str().unwrap();

    let config = load(&["--config", path]);
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.widget.organization_id.as_deref(), Some("from-file"));
    assert_eq!(config.widget.api_url.as_deref(), Some("https://api.clayo.co"));
}

#[test]
#[serial]
fn test_precedence_file_env_cli() {
    clear_env_vars();

    let file = temp_file(
        ".yaml",
        r"
server:
  port: 7070
widget:
  organization_id: from-file
",
    );
    unsafe {
        env::set_var("CONFIG_FILE", file.path());
        env::set_var("CLAYO_WIDGET__ORGANIZATION_ID", "from-env");
        env::set_var("CLAYO_SERVER__PORT", "8080");
    }

    let config = load(&[]);
    assert_eq!(config.widget.organization_id.as_deref(), Some("from-env"));
    assert_eq!(config.server.port, 8080);

    let config = load(&["--organization-id", "from-cli", "serve", "--port", "6060"]);
    assert_eq!(config.widget.organization_id.as_deref(), Some("from-cli"));
    assert_eq!(config.server.port, 6060);

    clear_env_vars();
}

#[test]
#[serial]
fn test_unprefixed_port_fallback() {
    clear_env_vars();
    unsafe {
        env::set_var("PORT", "5050");
    }

    let (cli, config) =
        AppConfig::load_from_args(["clayo-widget", "serve"]).expect("Failed to load config");
    assert!(matches!(cli.command, Some(Command::Serve { .. })));
    assert_eq!(config.server.port, 5050);

    clear_env_vars();
}

#[test]
#[serial]
fn test_host_globals_from_file_and_flags() {
    clear_env_vars();

    let host = temp_file(
        ".json",
        r##"{ "organizationId": "file-org", "primaryColor": "#ff0000", "autoOpen": true }"##,
    );
    let path = host.path().to_str().unwrap();

    let config = load(&["--host-config", path, "--organization-id", "cli-org"]);
    let globals = config.host_globals().expect("Failed to read host config");

    assert_eq!(globals["organizationId"], "cli-org");
    assert_eq!(globals["primaryColor"], "#ff0000");
    assert_eq!(globals["autoOpen"], true);
}

#[test]
#[serial]
fn test_host_globals_must_be_object() {
    clear_env_vars();

    let host = temp_file(".json", "[1, 2, 3]");
    let path = host.path().to_str().unwrap();

    let config = load(&["--host-config", path]);
    assert!(config.host_globals().is_err());
}
