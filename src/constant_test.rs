use crate::constant::{
    CAPABILITIES_ALWAYS_DISABLED, CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE,
    CapabilityFlags, ColumnType,
};

#[test]
fn test_capability_flags_classification() {
    const ALL_FLAGS: u32 = 0xFFFFFFFF;

    let always_enabled = CAPABILITIES_ALWAYS_ENABLED;
    let configurable = CAPABILITIES_CONFIGURABLE;
    let always_disabled = CAPABILITIES_ALWAYS_DISABLED;

    assert!(
        always_enabled.intersection(configurable).is_empty(),
        "ALWAYS_ENABLED and CONFIGURABLE must not overlap"
    );
    assert!(
        always_enabled.intersection(always_disabled).is_empty(),
        "ALWAYS_ENABLED and ALWAYS_DISABLED must not overlap"
    );
    assert!(
        configurable.intersection(always_disabled).is_empty(),
        "CONFIGURABLE and ALWAYS_DISABLED must not overlap"
    );

    let union = always_enabled | configurable | always_disabled;
    assert_eq!(
        union.bits(),
        ALL_FLAGS,
        "Missing flags: 0x{:08X}",
        ALL_FLAGS & !union.bits()
    );

    assert!(always_enabled.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
    assert!(always_enabled.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
    assert!(configurable.contains(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES));
    assert!(configurable.contains(CapabilityFlags::CLIENT_COMPRESS));
    assert!(always_disabled.contains(CapabilityFlags::CLIENT_INTERACTIVE));
}

#[test]
fn column_type_from_u8_covers_known_codes() {
    for code in 0u8..=0xFF {
        if let Some(column_type) = ColumnType::from_u8(code) {
            assert_eq!(column_type as u8, code);
        }
    }
    assert_eq!(ColumnType::from_u8(0x15), None);
    assert_eq!(
        ColumnType::from_u8(0xfc),
        Some(ColumnType::MYSQL_TYPE_BLOB)
    );
}

#[test]
fn binary_width_of_fixed_types() {
    assert_eq!(ColumnType::MYSQL_TYPE_TINY.binary_width(), Some(1));
    assert_eq!(ColumnType::MYSQL_TYPE_YEAR.binary_width(), Some(2));
    assert_eq!(ColumnType::MYSQL_TYPE_INT24.binary_width(), Some(4));
    assert_eq!(ColumnType::MYSQL_TYPE_DOUBLE.binary_width(), Some(8));
    assert_eq!(ColumnType::MYSQL_TYPE_DATETIME.binary_width(), None);
    assert_eq!(ColumnType::MYSQL_TYPE_VAR_STRING.binary_width(), None);
}
