use crate::constant::{CAPABILITIES_ALWAYS_ENABLED, CapabilityFlags};
use crate::opts::{Opts, StreamingPolicy};

#[test]
fn default_opts() {
    let opts = Opts::default();
    assert!(opts.tcp_nodelay);
    assert!(!opts.compress);
    assert!(opts.db.is_none());
    assert!(opts.host.is_none());
    assert_eq!(opts.port, 3306);
    assert!(opts.user.is_empty());
    assert!(opts.password.is_none());
    assert!(!opts.tls);
    assert_eq!(opts.max_allowed_packet, 64 * 1024 * 1024);
    assert!(opts.send_fractional_seconds);
    assert!(opts.send_fractional_seconds_for_time);
    assert!(opts.use_stream_lengths_in_prep_stmts);
    assert_eq!(opts.large_row_size_threshold, 2048);
    assert_eq!(opts.streaming_policy, StreamingPolicy::Refuse);
    assert_eq!(opts.fetch_size, 100);
    assert!(opts.validate().is_ok());
}

#[test]
fn client_capabilities_follow_options() {
    let mut opts = Opts::default();
    let base = opts.client_capabilities();
    assert!(base.contains(CAPABILITIES_ALWAYS_ENABLED));
    assert!(!base.contains(CapabilityFlags::CLIENT_SSL));
    assert!(!base.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));

    opts.db = Some("shop".to_string());
    opts.tls = true;
    opts.compress = true;
    opts.allow_load_local_infile = true;
    let caps = opts.client_capabilities();
    assert!(caps.contains(
        CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_SSL
            | CapabilityFlags::CLIENT_COMPRESS
            | CapabilityFlags::CLIENT_LOCAL_FILES
    ));
}

#[test]
fn always_disabled_bits_are_masked() {
    let opts = Opts {
        capabilities: CapabilityFlags::all(),
        ..Opts::default()
    };
    let caps = opts.client_capabilities();
    assert!(!caps.contains(CapabilityFlags::CLIENT_NO_SCHEMA));
    assert!(!caps.contains(CapabilityFlags::CLIENT_REMEMBER_OPTIONS));
    assert!(caps.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES));
}

#[test]
fn password_factors() {
    let opts = Opts {
        password: Some("a".into()),
        password2: Some("b".into()),
        ..Opts::default()
    };
    assert_eq!(opts.password_for_factor(1), Some("b"));
    assert_eq!(opts.password_for_factor(2), None);
    assert!(opts.client_capabilities().contains(CapabilityFlags::CLIENT_MULTI_FACTOR_AUTHENTICATION));

    let bad = Opts {
        password3: Some("c".into()),
        ..Opts::default()
    };
    assert!(bad.validate().is_err());
}
