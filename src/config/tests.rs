use super::*;

#[test]
fn defaults_are_sane() {
    let config = AdapterConfig::default();
    assert_eq!(config.device_receive_ack_timeout, Duration::from_secs(30));
    assert!(config.device_receive_ack_can_timeout);
    assert!(!config.abort_on_out_of_order_puback);
    assert_eq!(config.max_pending_inbound_acknowledgements, 16);
}

#[test]
fn parses_overrides_from_toml() {
    let toml = r#"
        abort_on_out_of_order_puback = true
        max_pending_inbound_acknowledgements = 2
        device_receive_ack_timeout = "5s"
        connect_arrival_timeout = "10s"

        [log]
        level = "debug"
    "#;
    let config = AdapterConfig::parse(toml).unwrap();
    assert!(config.abort_on_out_of_order_puback);
    assert_eq!(config.max_pending_inbound_acknowledgements, 2);
    assert_eq!(config.device_receive_ack_timeout, Duration::from_secs(5));
    assert_eq!(config.connect_arrival_timeout, Some(Duration::from_secs(10)));
    assert_eq!(config.log.level, "debug");
}

#[test]
fn rejects_zero_backlog_bound() {
    let toml = "max_pending_inbound_acknowledgements = 0";
    assert!(AdapterConfig::parse(toml).is_err());
}

#[test]
fn substitutes_env_vars_in_file_content() {
    std::env::set_var("ADAPTER_TEST_PREFIX", "dev-");
    let content = substitute_env_vars("service_property_prefix = \"${ADAPTER_TEST_PREFIX}\"");
    assert_eq!(content, "service_property_prefix = \"dev-\"");
    std::env::remove_var("ADAPTER_TEST_PREFIX");
}
