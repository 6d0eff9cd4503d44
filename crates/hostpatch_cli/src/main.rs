//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `hostpatch_core` linkage without a mobile host.
//! - Walk one resolve, hook and teardown cycle against an in-process module
//!   table and print deterministic output.

use hostpatch_core::{
    CapabilityResolver, CapabilityShape, HostValue, HookLedger, ModuleTable, PatchTarget,
    PlainObject, ProbeSpec,
};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("hostpatch_core ping={}", hostpatch_core::ping());
    println!("hostpatch_core version={}", hostpatch_core::core_version());

    match smoke() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("smoke failed: {message}");
            ExitCode::FAILURE
        }
    }
}

fn smoke() -> Result<(), String> {
    let table = Arc::new(ModuleTable::new());
    table.define(
        1,
        PlainObject::new()
            .with_method("getMessages", |_| Ok(HostValue::List(vec![])))
            .into_value(),
    );
    table.define(
        2,
        PlainObject::new()
            .with_method("getMessages", |args| {
                let channel = args.first().and_then(HostValue::as_str).unwrap_or("");
                Ok(HostValue::List(vec![HostValue::from(format!(
                    "hello from {channel}"
                ))]))
            })
            .into_value(),
    );

    let resolver = CapabilityResolver::new(table);
    let shape = CapabilityShape::props(["getMessages"]);
    let probe = ProbeSpec::non_empty("getMessages", vec![HostValue::from("chan-1")]);
    let handle = resolver
        .resolve(&shape, &probe)
        .map_err(|err| err.to_string())?;
    println!("resolved shape={} module_id={}", handle.shape_key(), handle.module_id());

    let ledger = HookLedger::new();
    let target = PatchTarget::from_handle(&handle, "getMessages").map_err(|err| err.to_string())?;
    let record = ledger
        .install_after(&target, |_, result| {
            let count = result.as_list().map_or(0, |items| items.len());
            Ok(HostValue::from(format!("{count} message(s)")))
        })
        .map_err(|err| err.to_string())?;

    let hooked = handle
        .call("getMessages", &[HostValue::from("chan-1")])
        .map_err(|err| err.to_string())?;
    println!("hooked result={hooked:?}");

    record.dispose().map_err(|err| err.to_string())?;
    let restored = handle
        .call("getMessages", &[HostValue::from("chan-1")])
        .map_err(|err| err.to_string())?;
    println!("restored result={restored:?}");
    Ok(())
}
