// chainbridge external variable lifecycle tests
// Covers: registration under a chain, single release, clone independence

use std::sync::Arc;
use std::thread;

use chainbridge::loopback;
use chainbridge::{BridgeError, Chain, Core, ExternalVariable, Loopback, VarType, ABI_VERSION};

fn connect() -> Arc<Core> {
    Core::connect(Arc::new(Loopback::new()), ABI_VERSION).unwrap()
}

#[test]
fn test_registration_and_release() {
    let core = connect();
    let chain = Chain::new(&core, "chain1").unwrap();
    assert_eq!(loopback::chain_name(&chain).as_deref(), Some("chain1"));

    let var = ExternalVariable::create(&chain, "x", VarType::INT, VarType::NONE).unwrap();
    assert_eq!(loopback::is_registered(&chain, "x"), Some(true));
    drop(var);
    assert_eq!(loopback::is_registered(&chain, "x"), Some(false));
    assert_eq!(loopback::external_frees(&chain), Some(1));
}

#[test]
fn test_clone_then_dispose() {
    let core = connect();
    let chain = Chain::new(&core, "chain1").unwrap();
    let mut var = ExternalVariable::create(&chain, "x", VarType::INT, VarType::NONE).unwrap();
    var.value().unwrap().set_int(42);

    let copy = var.clone_value().unwrap();
    var.value().unwrap().set_int(7);
    assert_eq!(copy.as_int(), Some(42));
    assert_eq!(var.value().unwrap().as_int(), Some(7));
    var.dispose().unwrap();
    var.dispose().unwrap();
    drop(var);

    assert_eq!(copy.as_int(), Some(42));
    assert_eq!(loopback::external_frees(&chain), Some(1));
}

#[test]
fn test_use_after_dispose() {
    let core = connect();
    let chain = Chain::new(&core, "main").unwrap();
    let mut var = ExternalVariable::create(&chain, "speed", VarType::FLOAT, VarType::NONE).unwrap();
    var.dispose().unwrap();
    assert_eq!(
        var.value().unwrap_err(),
        BridgeError::UseAfterDispose { name: "speed".into() }
    );
    assert!(var.clone_value().is_err());
}

#[test]
fn test_concurrent_dispose_and_drop() {
    let core = connect();
    let chain = Chain::new(&core, "racing").unwrap();
    let vars: Vec<_> = (0..4)
        .map(|i| {
            ExternalVariable::create(&chain, &format!("v{i}"), VarType::BOOL, VarType::NONE)
                .unwrap()
        })
        .collect();
    thread::scope(|scope| {
        for var in &vars {
            for _ in 0..4 {
                scope.spawn(move || var.dispose().unwrap());
            }
        }
    });
    drop(vars);
    assert_eq!(loopback::external_frees(&chain), Some(4));
}

#[test]
fn test_interior_nul_name() {
    let core = connect();
    let chain = Chain::new(&core, "main").unwrap();
    let err =
        ExternalVariable::create(&chain, "bad\0name", VarType::INT, VarType::NONE).unwrap_err();
    assert_eq!(err, BridgeError::InvalidName("bad\0name".into()));
}

#[test]
fn test_duplicate_name_is_rejected() {
    let core = connect();
    let chain = Chain::new(&core, "chain1").unwrap();
    let mut a = ExternalVariable::create(&chain, "x", VarType::INT, VarType::NONE).unwrap();
    a.value().unwrap().set_int(42);

    let err = ExternalVariable::create(&chain, "x", VarType::FLOAT, VarType::NONE).unwrap_err();
    assert_eq!(err, BridgeError::NameInUse { name: "x".into() });

    let value = a.value().unwrap();
    assert_eq!(value.type_tag(), VarType::INT);
    assert_eq!(value.as_int(), Some(42));
    assert_eq!(loopback::is_registered(&chain, "x"), Some(true));
    assert_eq!(loopback::external_frees(&chain), Some(0));

    a.dispose().unwrap();
    assert!(a.value().is_err());
    let b = ExternalVariable::create(&chain, "x", VarType::FLOAT, VarType::NONE).unwrap();
    assert!(chain.has_external("x"));
    drop(b);
    assert!(!chain.has_external("x"));
    assert_eq!(loopback::external_frees(&chain), Some(2));
}

#[test]
fn test_same_name_on_other_chain() {
    let core = connect();
    let first = Chain::new(&core, "first").unwrap();
    let second = Chain::new(&core, "second").unwrap();
    let _a = ExternalVariable::create(&first, "x", VarType::INT, VarType::NONE).unwrap();
    let _b = ExternalVariable::create(&second, "x", VarType::INT, VarType::NONE).unwrap();
    assert!(first.has_external("x"));
    assert!(second.has_external("x"));
}
