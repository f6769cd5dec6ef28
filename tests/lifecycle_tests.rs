//! Module lifecycle integration tests: staged loading, dependency
//! resolution, activation transitions, failure cleanup, and teardown order.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{call_log, collect_events, TestApi, TestModule};
use modkit::event::topics;
use modkit::module::Stage;
use modkit::{
    DependencySpec, LoadOptions, Module, ModuleError, ModuleState, Platform,
    ServiceDefinition, ServiceOptions, ServiceValue,
};

#[tokio::test]
async fn test_load_drives_module_to_active() {
    let platform = Platform::new();
    let module = TestModule::new("palette", "1.0.0").build();

    let handle = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    assert_eq!(handle.state(), ModuleState::Active);
    assert_eq!(platform.module_state("palette"), ModuleState::Active);
    assert_eq!(
        module.calls(),
        vec!["palette:initialize", "palette:activate"]
    );
}

#[tokio::test]
async fn test_lazy_load_stops_at_initialized() {
    let platform = Platform::new();
    let module = TestModule::new("palette", "1.0.0").build();

    let handle = platform
        .load_module_with(
            module.clone() as Arc<dyn Module>,
            LoadOptions {
                lazy: true,
                ..LoadOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(handle.state(), ModuleState::Initialized);
    assert_eq!(module.calls(), vec!["palette:initialize"]);

    platform.activate_module("palette").await.unwrap();
    assert_eq!(platform.module_state("palette"), ModuleState::Active);
    assert_eq!(
        module.calls(),
        vec!["palette:initialize", "palette:activate"]
    );
}

#[tokio::test]
async fn test_loading_active_module_returns_existing_handle() {
    let platform = Platform::new();
    let module = TestModule::new("palette", "1.0.0").build();

    let first = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();
    let second = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        module.calls(),
        vec!["palette:initialize", "palette:activate"]
    );
}

#[tokio::test]
async fn test_concurrent_loads_of_same_name_are_coalesced() {
    let platform = Arc::new(Platform::new());
    let calls = call_log();

    // Two distinct instances of the same name, racing. The loader must run
    // exactly one load and give both callers the same handle.
    let first = TestModule::new("racer", "1.0.0")
        .with_calls(calls.clone())
        .with_init_delay(Duration::from_millis(50))
        .build();
    let second = TestModule::new("racer", "1.0.0")
        .with_calls(calls.clone())
        .with_init_delay(Duration::from_millis(50))
        .build();

    let p1 = Arc::clone(&platform);
    let p2 = Arc::clone(&platform);
    let t1 = tokio::spawn(async move { p1.load_module(first as Arc<dyn Module>).await });
    let t2 = tokio::spawn(async move { p2.load_module(second as Arc<dyn Module>).await });

    let h1 = t1.await.unwrap().unwrap();
    let h2 = t2.await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&h1, &h2));
    let initializations = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.ends_with(":initialize"))
        .count();
    assert_eq!(initializations, 1);
}

#[tokio::test]
async fn test_invalid_version_is_rejected_before_hooks() {
    let platform = Platform::new();
    let module = TestModule::new("broken", "not-a-version").build();

    let err = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap_err();

    assert!(matches!(err, ModuleError::InvalidModule(_)));
    assert!(module.calls().is_empty());
    assert!(platform.get_module("broken").is_none());
}

#[tokio::test]
async fn test_missing_required_dependency_is_fatal() {
    let platform = Platform::new();
    let module = TestModule::new("consumer", "1.0.0")
        .with_dependency(DependencySpec::required("absent"))
        .build();

    let err = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap_err();

    match err {
        ModuleError::MissingDependency { module, dependency } => {
            assert_eq!(module, "consumer");
            assert_eq!(dependency, "absent");
        }
        other => panic!("expected MissingDependency, got {other}"),
    }
    assert!(module.calls().is_empty());
    assert!(platform.get_module("consumer").is_none());
}

#[tokio::test]
async fn test_optional_dependency_is_skipped_when_absent() {
    let platform = Platform::new();
    let module = TestModule::new("consumer", "1.0.0")
        .with_dependency(DependencySpec::optional("absent"))
        .build();

    platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    assert_eq!(platform.module_state("consumer"), ModuleState::Active);
    assert!(module.captured("absent").is_none());
}

#[tokio::test]
async fn test_self_dependency_fails_before_initialize() {
    let platform = Platform::new();
    let module = TestModule::new("ouroboros", "1.0.0")
        .with_dependency(DependencySpec::required("ouroboros"))
        .build();

    let err = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap_err();

    match err {
        ModuleError::CircularDependency { chain } => {
            assert_eq!(chain, vec!["ouroboros", "ouroboros"]);
        }
        other => panic!("expected CircularDependency, got {other}"),
    }
    assert!(module.calls().is_empty());
    assert!(platform.get_module("ouroboros").is_none());
}

#[tokio::test]
async fn test_indirect_cycle_fails_before_initialize() {
    let platform = Platform::new();

    // a -> c is optional so a loads while c is absent; the edge still lands
    // in the graph. Loading c then closes c -> b -> a -> c.
    let a = TestModule::new("a", "1.0.0")
        .with_dependency(DependencySpec::optional("c"))
        .with_api()
        .build();
    let b = TestModule::new("b", "1.0.0")
        .with_dependency(DependencySpec::required("a"))
        .with_api()
        .build();
    let c = TestModule::new("c", "1.0.0")
        .with_dependency(DependencySpec::required("b"))
        .build();

    platform.load_module(a as Arc<dyn Module>).await.unwrap();
    platform.load_module(b as Arc<dyn Module>).await.unwrap();

    let err = platform
        .load_module(c.clone() as Arc<dyn Module>)
        .await
        .unwrap_err();

    match err {
        ModuleError::CircularDependency { chain } => {
            assert_eq!(chain, vec!["c", "b", "a", "c"]);
        }
        other => panic!("expected CircularDependency, got {other}"),
    }
    assert!(c.calls().is_empty());
    assert!(platform.get_module("c").is_none());
    // Modules already loaded are untouched
    assert_eq!(platform.module_state("a"), ModuleState::Active);
    assert_eq!(platform.module_state("b"), ModuleState::Active);
}

#[tokio::test]
async fn test_racing_mutual_cycle_never_initializes() {
    let platform = Arc::new(Platform::new());
    let calls = call_log();

    let a = TestModule::new("a", "1.0.0")
        .with_dependency(DependencySpec::required("b"))
        .with_calls(calls.clone())
        .build();
    let b = TestModule::new("b", "1.0.0")
        .with_dependency(DependencySpec::required("a"))
        .with_calls(calls.clone())
        .build();

    let pa = Arc::clone(&platform);
    let pb = Arc::clone(&platform);
    let ta = tokio::spawn(async move { pa.load_module(a as Arc<dyn Module>).await });
    let tb = tokio::spawn(async move { pb.load_module(b as Arc<dyn Module>).await });

    // Depending on interleaving each side reports the cycle or the missing
    // half of it; neither may ever initialize.
    assert!(ta.await.unwrap().is_err());
    assert!(tb.await.unwrap().is_err());
    assert!(calls.lock().unwrap().is_empty());
    assert!(platform.get_module("a").is_none());
    assert!(platform.get_module("b").is_none());
}

#[tokio::test]
async fn test_dependency_version_checking() {
    let platform = Platform::new();
    platform
        .load_module(TestModule::new("logger-mod", "2.3.0").with_api().build() as Arc<dyn Module>)
        .await
        .unwrap();

    // Provider minor above the requirement is compatible
    let ok = TestModule::new("ok-consumer", "1.0.0")
        .with_dependency(DependencySpec::required("logger-mod").with_version("2.1"))
        .build();
    platform
        .load_module(ok.clone() as Arc<dyn Module>)
        .await
        .unwrap();
    assert!(ok.captured("logger-mod").is_some());

    // Major mismatch is rejected
    let major = TestModule::new("major-consumer", "1.0.0")
        .with_dependency(DependencySpec::required("logger-mod").with_version("3.0"))
        .build();
    let err = platform
        .load_module(major as Arc<dyn Module>)
        .await
        .unwrap_err();
    match err {
        ModuleError::IncompatibleVersion {
            dependency,
            required,
            provided,
            ..
        } => {
            assert_eq!(dependency, "logger-mod");
            assert_eq!(required, "3.0");
            assert_eq!(provided, "2.3.0");
        }
        other => panic!("expected IncompatibleVersion, got {other}"),
    }

    // Provider minor below the requirement is rejected
    let minor = TestModule::new("minor-consumer", "1.0.0")
        .with_dependency(DependencySpec::required("logger-mod").with_version("2.9"))
        .build();
    assert!(matches!(
        platform.load_module(minor as Arc<dyn Module>).await,
        Err(ModuleError::IncompatibleVersion { .. })
    ));
}

#[tokio::test]
async fn test_module_receives_service_and_module_dependencies() {
    let platform = Platform::new();

    // A plain registered service
    let logger: ServiceValue = Arc::new(String::from("log-sink"));
    platform
        .registry()
        .register(
            "logger",
            ServiceDefinition::Instance(logger),
            ServiceOptions::new(),
        )
        .unwrap();

    let reporter = TestModule::new("reporter", "1.0.0")
        .with_dependency(DependencySpec::required("logger"))
        .with_api()
        .build();
    platform
        .load_module(reporter.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    // The injected dependency is the same instance the registry resolves
    let injected = reporter.captured("logger").unwrap();
    let resolved = platform.get_service("logger").unwrap();
    assert!(Arc::ptr_eq(&injected, &resolved));

    // The module's API surface is itself resolvable as a service
    let api = platform.get_service_as::<TestApi>("reporter").unwrap();
    assert_eq!(api.module, "reporter");
    assert_eq!(api.version, "1.0.0");
}

#[tokio::test]
async fn test_activation_transitions() {
    let platform = Platform::new();
    let module = TestModule::new("flaky", "1.0.0").failing("activate").build();

    platform
        .load_module_with(
            module.clone() as Arc<dyn Module>,
            LoadOptions {
                lazy: true,
                ..LoadOptions::default()
            },
        )
        .await
        .unwrap();

    // The hook failure lands the module in Error
    let err = platform.activate_module("flaky").await.unwrap_err();
    assert!(matches!(
        err,
        ModuleError::HookFailed {
            hook: Stage::Activate,
            ..
        }
    ));
    assert_eq!(platform.module_state("flaky"), ModuleState::Error);

    // Activation from Error is illegal
    let err = platform.activate_module("flaky").await.unwrap_err();
    match err {
        ModuleError::InvalidTransition { from, to, .. } => {
            assert_eq!(from, ModuleState::Error);
            assert_eq!(to, ModuleState::Active);
        }
        other => panic!("expected InvalidTransition, got {other}"),
    }
}

#[tokio::test]
async fn test_deactivate_and_reactivate() {
    let platform = Platform::new();
    let module = TestModule::new("palette", "1.0.0").build();
    platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    let deactivated = collect_events(platform.event_bus(), topics::MODULE_DEACTIVATED);

    platform.deactivate_module("palette").await.unwrap();
    assert_eq!(platform.module_state("palette"), ModuleState::Inactive);
    assert_eq!(deactivated.lock().unwrap().len(), 1);

    // Deactivating again is a no-op
    platform.deactivate_module("palette").await.unwrap();
    assert_eq!(deactivated.lock().unwrap().len(), 1);

    platform.activate_module("palette").await.unwrap();
    assert_eq!(platform.module_state("palette"), ModuleState::Active);
    assert_eq!(
        module.calls(),
        vec![
            "palette:initialize",
            "palette:activate",
            "palette:deactivate",
            "palette:activate",
        ]
    );
}

#[tokio::test]
async fn test_failed_initialize_cleans_up() {
    let platform = Platform::new();
    let module = TestModule::new("broken", "1.0.0")
        .failing("initialize")
        .with_api()
        .build();

    let err = platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ModuleError::HookFailed {
            hook: Stage::Initialize,
            ..
        }
    ));
    assert!(platform.get_module("broken").is_none());
    // API was never published
    assert!(platform.get_service("broken").is_err());
    // Dispose ran once to release whatever initialize acquired
    assert_eq!(
        module.calls(),
        vec!["broken:initialize", "broken:dispose"]
    );

    let metrics = platform.get_module_metrics("broken").unwrap();
    assert_eq!(metrics.error_count, 1);
    assert!(metrics.last_error.is_some());
}

#[tokio::test]
async fn test_failed_load_leaves_colliding_service_untouched() {
    let platform = Platform::new();
    platform
        .registry()
        .register(
            "palette",
            ServiceDefinition::Instance(Arc::new("pre-existing".to_string()) as ServiceValue),
            ServiceOptions::new(),
        )
        .unwrap();

    // The module shares the service's name but never publishes an API
    // because its initialize hook fails first.
    let module = TestModule::new("palette", "1.0.0")
        .failing("initialize")
        .with_api()
        .build();
    assert!(platform
        .load_module(module as Arc<dyn Module>)
        .await
        .is_err());

    // The unrelated service still resolves and carries no tombstone
    assert_eq!(
        *platform.get_service_as::<String>("palette").unwrap(),
        "pre-existing"
    );
    let metadata = platform.registry().metadata("palette").unwrap();
    assert!(metadata.get("disposed").is_none());
}

#[tokio::test]
async fn test_unload_tears_down_completely() {
    let platform = Platform::new();
    let fired = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);

    let module = TestModule::new("palette", "1.0.0")
        .with_api()
        .with_handler(
            "paint:applied",
            modkit::event::handler(move |_| {
                let fired = Arc::clone(&fired_clone);
                async move {
                    fired.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }),
        )
        .build();
    platform
        .load_module(module.clone() as Arc<dyn Module>)
        .await
        .unwrap();

    platform
        .event_bus()
        .emit("paint:applied", json!({}))
        .await;
    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);

    let unloaded = collect_events(platform.event_bus(), topics::MODULE_UNLOADED);
    platform.unload_module("palette").await.unwrap();

    assert!(platform.get_module("palette").is_none());
    assert_eq!(platform.module_state("palette"), ModuleState::Unloaded);
    assert_eq!(
        module.calls(),
        vec![
            "palette:initialize",
            "palette:activate",
            "palette:deactivate",
            "palette:dispose",
        ]
    );

    // Its subscriptions were removed
    platform
        .event_bus()
        .emit("paint:applied", json!({}))
        .await;
    assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Unload event carries the standard envelope
    let events = unloaded.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["module"], "palette");
    assert_eq!(events[0].payload["version"], "1.0.0");

    // The registry entry survives as a tombstone
    assert!(platform.registry().has("palette"));
    let metadata = platform.registry().metadata("palette").unwrap();
    assert_eq!(metadata.get("disposed"), Some(&json!(true)));
}

#[tokio::test]
async fn test_dispose_unloads_in_reverse_load_order() {
    let platform = Platform::new();
    let calls = call_log();

    let a = TestModule::new("a", "1.0.0")
        .with_api()
        .with_calls(calls.clone())
        .build();
    let b = TestModule::new("b", "1.0.0")
        .with_dependency(DependencySpec::required("a"))
        .with_api()
        .with_calls(calls.clone())
        .build();
    let c = TestModule::new("c", "1.0.0")
        .with_dependency(DependencySpec::required("b"))
        .with_calls(calls.clone())
        .build();

    platform.load_module(a as Arc<dyn Module>).await.unwrap();
    platform.load_module(b as Arc<dyn Module>).await.unwrap();
    platform.load_module(c as Arc<dyn Module>).await.unwrap();
    assert_eq!(platform.loader().load_order(), vec!["a", "b", "c"]);

    platform.dispose().await.unwrap();

    let disposals: Vec<String> = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| call.ends_with(":dispose"))
        .cloned()
        .collect();
    assert_eq!(disposals, vec!["c:dispose", "b:dispose", "a:dispose"]);

    // Disposal is terminal
    assert!(matches!(
        platform
            .load_module(TestModule::new("late", "1.0.0").build() as Arc<dyn Module>)
            .await,
        Err(ModuleError::Disposed)
    ));
}

#[tokio::test]
async fn test_dispose_failure_does_not_stop_teardown() {
    let platform = Platform::new();
    let calls = call_log();

    let a = TestModule::new("a", "1.0.0")
        .with_api()
        .with_calls(calls.clone())
        .build();
    let b = TestModule::new("b", "1.0.0")
        .with_dependency(DependencySpec::required("a"))
        .with_calls(calls.clone())
        .failing("dispose")
        .build();

    platform.load_module(a as Arc<dyn Module>).await.unwrap();
    platform.load_module(b as Arc<dyn Module>).await.unwrap();

    platform.dispose().await.unwrap();

    let disposals: Vec<String> = calls
        .lock()
        .unwrap()
        .iter()
        .filter(|call| call.ends_with(":dispose"))
        .cloned()
        .collect();
    // b's failure is recorded but a still gets torn down, exactly once
    assert_eq!(disposals, vec!["b:dispose", "a:dispose"]);
}

#[tokio::test]
async fn test_lifecycle_events_are_published() {
    let platform = Platform::new();
    let activated = collect_events(platform.event_bus(), topics::MODULE_ACTIVATED);
    let initialized = collect_events(
        platform.event_bus(),
        &topics::module_scoped("palette", "initialized"),
    );

    platform
        .load_module(TestModule::new("palette", "0.3.1").build() as Arc<dyn Module>)
        .await
        .unwrap();

    let events = activated.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].topic, topics::MODULE_ACTIVATED);
    assert_eq!(events[0].payload["module"], "palette");
    assert_eq!(events[0].payload["version"], "0.3.1");
    assert!(events[0].payload["timestamp"].is_u64());
    assert_eq!(initialized.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_module_metrics_record_stage_timings() {
    let platform = Platform::new();
    platform
        .load_module(
            TestModule::new("palette", "1.0.0")
                .with_init_delay(Duration::from_millis(10))
                .build() as Arc<dyn Module>,
        )
        .await
        .unwrap();

    let metrics = platform.get_module_metrics("palette").unwrap();
    assert_eq!(metrics.load_count, 1);
    assert!(metrics.load_ms.is_some());
    assert!(metrics.initialize_ms.is_some());
    assert!(metrics.activate_ms.is_some());
    assert!(metrics.activated_at.is_some());
    assert_eq!(metrics.error_count, 0);
}

#[tokio::test]
async fn test_health_checks_cover_all_loaded_modules() {
    let platform = Platform::new();
    platform
        .load_module(TestModule::new("healthy", "1.0.0").build() as Arc<dyn Module>)
        .await
        .unwrap();
    platform
        .load_module(
            TestModule::new("sick", "1.0.0")
                .failing("health_check")
                .build() as Arc<dyn Module>,
        )
        .await
        .unwrap();

    let results = platform.loader().perform_health_checks().await;
    assert_eq!(results.len(), 2);
    assert!(results["healthy"].is_ok());
    assert!(results["sick"].is_err());
}
