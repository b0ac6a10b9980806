use fenris_assembly::buffer::{Device, Layout};
use fenris_assembly::constraints::ConstraintList;
use fenris_assembly::engine::{Engine, EngineConfig};
use fenris_assembly::exec::{Executor, DEFAULT_PARALLEL_THRESHOLD};
use fenris_assembly::integrators::AssemblyVariant;

#[test]
fn partial_config_uses_defaults() {
    let config: EngineConfig = serde_json::from_str(r#"{ "variant": "reference" }"#).unwrap();
    assert_eq!(config.variant, AssemblyVariant::Reference);
    assert_eq!(config.device, Device::Host);
    assert_eq!(config.parallel_threshold, DEFAULT_PARALLEL_THRESHOLD);

    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.variant, AssemblyVariant::Tensor);
}

#[test]
fn config_round_trips_through_json() {
    let config = EngineConfig {
        variant: AssemblyVariant::Reference,
        device: Device::Accelerator,
        parallel_threshold: 16,
    };
    let json = serde_json::to_string(&config).unwrap();
    let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn engine_hands_out_configured_layouts_and_executors() {
    let engine = Engine::from(EngineConfig {
        device: Device::Accelerator,
        parallel_threshold: 3,
        ..EngineConfig::default()
    });
    assert_eq!(engine.layout(4), Layout::new(4, Device::Accelerator));
    assert_eq!(engine.executor().parallel_threshold(), 3);
    assert_eq!(engine.variant(), AssemblyVariant::Tensor);
}

#[test]
fn dispatch_policy() {
    let executor = Executor::new(10);
    let small = executor.dispatch(10, Device::Host);
    assert!(!small.offload && !small.parallel);

    let large = executor.dispatch(11, Device::Host);
    assert!(!large.offload && large.parallel);

    let offloaded = executor.dispatch(1, Device::Accelerator);
    assert!(offloaded.offload && offloaded.parallel);
}

#[test]
fn deserialized_constraints_are_validated() {
    let json = r#"{ "indices": { "indices": [3, 1], "bound": 4 }, "device": "host" }"#;
    let constraints: ConstraintList = serde_json::from_str(json).unwrap();
    assert_eq!(constraints.indices(), &[3, 1]);
    assert_eq!(constraints.layout(), Layout::host(4));

    let duplicate = r#"{ "indices": { "indices": [1, 1], "bound": 4 }, "device": "host" }"#;
    assert!(serde_json::from_str::<ConstraintList>(duplicate).is_err());
}
