use preforkd::config::{AppConfig, FromYaml};

#[test]
fn parses_a_full_config_document() {
    let yaml = r#"
host: 0.0.0.0
port: 9090
tcp_backlog_size: 256
process_count_limit: 8
process_sigterm_timeout: 10
read_buffer: 32768
cgi_res_meta_limit: 16384
protocol: HTTP/1.1
request_timeout: 15
connection_timeout: 45
"#;
    let cfg = AppConfig::from_str(yaml).expect("valid config should parse");

    assert_eq!(cfg.host, "0.0.0.0");
    assert_eq!(cfg.port, 9090);
    assert_eq!(cfg.tcp_backlog_size, 256);
    assert_eq!(cfg.process_count_limit, 8);
    assert_eq!(cfg.process_sigterm_timeout, 10);
    assert_eq!(cfg.read_buffer, 32768);
    assert_eq!(cfg.cgi_res_meta_limit, 16384);
    assert_eq!(cfg.protocol, "HTTP/1.1");
    assert_eq!(cfg.request_timeout, 15);
    assert_eq!(cfg.connection_timeout, 45);
}

#[test]
fn missing_fields_fall_back_to_defaults() {
    let yaml = "port: 7000\n";
    let cfg = AppConfig::from_str(yaml).expect("partial config should parse");

    assert_eq!(cfg.port, 7000);
    assert_eq!(cfg.host, AppConfig::default().host);
    assert_eq!(cfg.process_count_limit, AppConfig::default().process_count_limit);
}

#[test]
fn unknown_keys_are_skipped_rather_than_rejected() {
    let yaml = "port: 8081\nsome_future_field: [1, 2, 3]\n";
    let cfg = AppConfig::from_str(yaml).expect("unknown top-level keys should be skipped");
    assert_eq!(cfg.port, 8081);
}

#[test]
fn malformed_document_reports_a_config_error() {
    let yaml = "port 8081\n";
    let err = AppConfig::from_str(yaml).unwrap_err();
    assert!(format!("{err}").to_lowercase().contains("expected"));
}
