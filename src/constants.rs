//! Rows of the published constant table.

use hostlua_core::{
    ABI_VERSION, CALLBACK_ERROR, ConstantEntry, HookEvent, HookMask, LUA_VERSION_NUM, LibFlags,
    MULTRET, REGISTRY_INDEX, Status, ValueKind,
};

/// Every constant, in publication order.
pub fn constant_entries() -> Vec<ConstantEntry> {
    let mut entries = vec![
        ConstantEntry::new("version_num", LUA_VERSION_NUM),
        ConstantEntry::new("abi_version", ABI_VERSION),
        ConstantEntry::new("registryindex", i64::from(REGISTRY_INDEX)),
        ConstantEntry::new("multret", i64::from(MULTRET)),
        ConstantEntry::new("callback_error", i64::from(CALLBACK_ERROR)),
    ];

    entries.extend(
        ValueKind::ALL
            .into_iter()
            .map(|kind| ConstantEntry::new(kind.constant_name(), i64::from(kind.code()))),
    );
    entries.extend(
        Status::ALL
            .into_iter()
            .map(|status| ConstantEntry::new(status.name(), i64::from(status.code()))),
    );
    entries.extend(
        HookEvent::ALL
            .into_iter()
            .map(|event| ConstantEntry::new(event.constant_name(), i64::from(i32::from(event)))),
    );
    entries.extend(
        HookMask::CONSTANTS
            .into_iter()
            .map(|(name, mask)| ConstantEntry::new(name, i64::from(mask.bits()))),
    );
    entries.extend(
        LibFlags::CONSTANTS
            .into_iter()
            .map(|(name, flags)| ConstantEntry::new(name, i64::from(flags.bits()))),
    );

    entries
}
