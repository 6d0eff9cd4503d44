use hostpatch_core::extension::capability::RuntimeCapability;
use hostpatch_core::{
    first_code_block, CapabilityResolver, CapabilityShape, Extension, ExtensionContext,
    ExtensionError, ExtensionHealth, ExtensionHost, ExtensionManifest, HostServices, HostValue,
    MemoryClipboard, ModuleTable, Notifier, PatchTarget, PlainObject, ProbeSpec, ResolveError,
    SqliteExtensionStorage,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type LoadFn = dyn Fn(&ExtensionContext) -> Result<(), ExtensionError> + Send + Sync;

struct FnExtension {
    manifest: ExtensionManifest,
    load: Box<LoadFn>,
}

impl FnExtension {
    fn new(
        manifest: ExtensionManifest,
        load: impl Fn(&ExtensionContext) -> Result<(), ExtensionError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            manifest,
            load: Box::new(load),
        })
    }
}

impl Extension for FnExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn on_load(&self, ctx: &ExtensionContext) -> Result<(), ExtensionError> {
        (self.load)(ctx)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, _icon: Option<&str>) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

struct Fixture {
    table: Arc<ModuleTable>,
    host: ExtensionHost,
    notifier: Arc<RecordingNotifier>,
    clipboard: Arc<MemoryClipboard>,
}

fn fixture() -> Fixture {
    let table = Arc::new(ModuleTable::new());
    table.define(
        30,
        PlainObject::new()
            .with("displayName", "CodeBlock")
            .with_method("render", |args| {
                Ok(args.first().cloned().unwrap_or(HostValue::Null))
            })
            .into_value(),
    );

    let notifier = Arc::new(RecordingNotifier::default());
    let clipboard = Arc::new(MemoryClipboard::new());
    let storage = Arc::new(SqliteExtensionStorage::in_memory().expect("open storage"));
    let services = HostServices::new(storage)
        .with_notifier(notifier.clone())
        .with_clipboard(clipboard.clone());
    let resolver = Arc::new(CapabilityResolver::new(table.clone()));

    Fixture {
        table,
        host: ExtensionHost::new(resolver, services),
        notifier,
        clipboard,
    }
}

fn render(table: &ModuleTable, text: &str) -> HostValue {
    table
        .get(30)
        .expect("module 30")
        .get_property("render")
        .expect("readable")
        .and_then(|value| value.as_function().cloned())
        .expect("callable")
        .call(&[HostValue::from(text)])
        .expect("render succeeds")
}

fn manifest(id: &str, capabilities: &[RuntimeCapability]) -> ExtensionManifest {
    capabilities
        .iter()
        .fold(ExtensionManifest::new(id, id, "1.0.0"), |manifest, cap| {
            manifest.with_capability(*cap)
        })
}

fn smartcopy() -> Arc<FnExtension> {
    FnExtension::new(
        manifest(
            "community.smartcopy",
            &[RuntimeCapability::Hook, RuntimeCapability::Clipboard],
        ),
        |ctx| {
            let code_block =
                ctx.resolve(&CapabilityShape::named("CodeBlock"), &ProbeSpec::structural())?;
            let clipboard = ctx.clipboard()?;
            let target = PatchTarget::from_handle(&code_block, "render")?;
            ctx.hooks()?.after(&target, move |args, result| {
                let source = args.first().and_then(HostValue::as_str).unwrap_or("");
                if let Some(block) = first_code_block(source) {
                    clipboard.set_text(&block.content)?;
                }
                Ok(HostValue::List(vec![result, HostValue::from("copy-button")]))
            })?;
            Ok(())
        },
    )
}

#[test]
fn activation_installs_hooks_and_deactivation_restores() {
    let mut fx = fixture();
    fx.host.register(smartcopy()).expect("register");
    fx.host.activate("community.smartcopy").expect("activate");

    assert_eq!(
        fx.host.health("community.smartcopy"),
        Some(ExtensionHealth::Healthy)
    );
    assert_eq!(fx.host.active_hooks("community.smartcopy"), 1);

    let rendered = render(&fx.table, "```js\nlet a = 1;\n```");
    assert_eq!(
        rendered,
        HostValue::List(vec![
            HostValue::from("```js\nlet a = 1;\n```"),
            HostValue::from("copy-button"),
        ])
    );
    assert_eq!(fx.clipboard.text().as_deref(), Some("let a = 1;"));

    let report = fx
        .host
        .deactivate("community.smartcopy")
        .expect("deactivate");
    assert!(report.is_clean());
    assert_eq!(report.disposed, 1);
    assert_eq!(render(&fx.table, "plain"), HostValue::from("plain"));
    assert_eq!(
        fx.host.health("community.smartcopy"),
        Some(ExtensionHealth::Inactive)
    );
}

#[test]
fn failed_load_rolls_back_installed_hooks() {
    let mut fx = fixture();
    let half_loaded = FnExtension::new(
        manifest("community.halfloaded", &[RuntimeCapability::Hook]),
        |ctx| {
            let handle =
                ctx.resolve(&CapabilityShape::named("CodeBlock"), &ProbeSpec::structural())?;
            let target = PatchTarget::from_handle(&handle, "render")?;
            ctx.hooks()?
                .after(&target, |_, _| Ok(HostValue::from("hijacked")))?;
            Err(ExtensionError::other("settings unreadable"))
        },
    );
    fx.host.register(half_loaded).expect("register");

    let err = fx
        .host
        .activate("community.halfloaded")
        .expect_err("load fails");
    assert!(matches!(err, ExtensionError::Other(_)));
    assert!(!fx.host.is_active("community.halfloaded"));
    assert_eq!(fx.host.ledger().active_hooks(), 0);
    assert_eq!(render(&fx.table, "plain"), HostValue::from("plain"));
    assert_eq!(
        fx.host.health("community.halfloaded"),
        Some(ExtensionHealth::Unavailable)
    );
}

#[test]
fn panicking_load_is_contained_and_rolled_back() {
    let mut fx = fixture();
    let panicky = FnExtension::new(
        manifest("community.panicky", &[RuntimeCapability::Hook]),
        |ctx| {
            let handle =
                ctx.resolve(&CapabilityShape::named("CodeBlock"), &ProbeSpec::structural())?;
            let target = PatchTarget::from_handle(&handle, "render")?;
            ctx.hooks()?.before(&target, |_| Ok(()))?;
            panic!("extension bug");
        },
    );
    fx.host.register(panicky).expect("register");

    let err = fx.host.activate("community.panicky").expect_err("panic");
    assert!(matches!(
        err,
        ExtensionError::Panicked { phase: "load", .. }
    ));
    assert_eq!(fx.host.ledger().patched_targets(), 0);
}

#[test]
fn missing_component_notifies_user_once() {
    let mut fx = fixture();
    let alts = FnExtension::new(
        manifest("community.alts", &[RuntimeCapability::Storage]),
        |ctx| {
            ctx.resolve(
                &CapabilityShape::props(["getCurrentUser"]),
                &ProbeSpec::structural(),
            )?;
            Ok(())
        },
    );
    fx.host.register(alts).expect("register");

    let err = fx.host.activate("community.alts").expect_err("not found");
    assert!(matches!(
        err,
        ExtensionError::Resolve(ResolveError::ShapeNotFound { .. })
    ));
    let messages = fx.notifier.messages.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("not supported"));
}

#[test]
fn undeclared_capability_is_denied() {
    let mut fx = fixture();
    let sneaky = FnExtension::new(manifest("community.sneaky", &[]), |ctx| {
        ctx.storage()?.set("k", &json!(1))?;
        Ok(())
    });
    fx.host.register(sneaky).expect("register");

    let err = fx.host.activate("community.sneaky").expect_err("denied");
    assert!(matches!(
        err,
        ExtensionError::CapabilityDenied {
            capability: RuntimeCapability::Storage,
            ..
        }
    ));
}

#[test]
fn duplicate_and_invalid_registrations_are_rejected() {
    let mut fx = fixture();
    fx.host.register(smartcopy()).expect("register");
    assert!(matches!(
        fx.host.register(smartcopy()),
        Err(ExtensionError::DuplicateExtensionId(_))
    ));

    let invalid = FnExtension::new(ExtensionManifest::new("Bad Id", "Bad", "1.0.0"), |_| Ok(()));
    assert!(matches!(
        fx.host.register(invalid),
        Err(ExtensionError::InvalidManifest(_))
    ));
    assert!(matches!(
        fx.host.activate("community.unknown"),
        Err(ExtensionError::UnknownExtension(_))
    ));
}

#[test]
fn activate_all_continues_past_failures() {
    let mut fx = fixture();
    let broken = FnExtension::new(manifest("community.broken", &[]), |_| {
        Err(ExtensionError::other("boom"))
    });
    fx.host.register(broken).expect("register");
    fx.host.register(smartcopy()).expect("register");

    let failures = fx.host.activate_all();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "community.broken");
    assert!(fx.host.is_active("community.smartcopy"));

    let reports = fx.host.deactivate_all();
    assert_eq!(reports.len(), 1);
    assert!(!fx.host.is_active("community.smartcopy"));
}

#[test]
fn host_reload_re_resolves_against_new_modules() {
    let mut fx = fixture();
    fx.host.register(smartcopy()).expect("register");
    fx.host.activate("community.smartcopy").expect("activate");
    assert_eq!(fx.host.resolver().cached_len(), 1);

    fx.table.remove(30);
    fx.table.define(
        31,
        PlainObject::new()
            .with("displayName", "CodeBlock")
            .with_method("render", |_| Ok(HostValue::from("v2")))
            .into_value(),
    );

    let failures = fx.host.on_host_reload();
    assert!(failures.is_empty());
    let handle = fx
        .host
        .resolver()
        .cached(&CapabilityShape::named("CodeBlock"))
        .expect("re-resolved");
    assert_eq!(handle.module_id(), 31);
    assert_eq!(fx.host.active_hooks("community.smartcopy"), 1);
}

#[test]
fn deferred_tasks_run_on_host_turn() {
    let mut fx = fixture();
    let ran = Arc::new(Mutex::new(false));
    let flag = ran.clone();
    let deferred = FnExtension::new(manifest("community.deferred", &[]), move |ctx| {
        let flag = flag.clone();
        ctx.tasks().defer("mark", Duration::ZERO, move || {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        Ok(())
    });
    fx.host.register(deferred).expect("register");
    fx.host.activate("community.deferred").expect("activate");

    let summary = fx.host.run_due_tasks();
    assert_eq!(summary.ran, 1);
    assert!(*ran.lock().unwrap());
}
