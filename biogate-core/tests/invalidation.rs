//! Integration tests for key invalidation.

mod common;

use biogate_core::platform::{KeySpec, KeystoreProvider};
use biogate_core::{is_key_invalidated, Algorithm, BiometricError, ErrorKind, Outcome};
use test_case::test_case;

#[test_case(Algorithm::Symmetric ; "symmetric")]
#[test_case(Algorithm::Asymmetric ; "asymmetric")]
fn test_seal_renews_invalidated_key(algorithm: Algorithm) {
    let harness = common::harness(algorithm);
    harness.seal("k1", b"first");
    assert!(harness.keystore.inner().invalidate("k1"));

    let envelope = harness.seal("k1", b"second");

    assert_eq!(harness.keystore.deleted(), vec!["k1".to_string()]);
    assert_eq!(harness.keystore.inner().generated_specs().len(), 2);
    assert_eq!(
        harness.logger.lines(),
        vec!["warn: Renewing invalidated key.".to_string()]
    );
    assert_eq!(harness.unseal("k1", &envelope).expect("unseal"), b"second");
}

#[test_case(Algorithm::Symmetric ; "symmetric")]
#[test_case(Algorithm::Asymmetric ; "asymmetric")]
fn test_unseal_does_not_renew_invalidated_key(algorithm: Algorithm) {
    let harness = common::harness(algorithm);
    let envelope = harness.seal("k1", b"payload");
    let armed_before = harness.sensor.arm_count();
    harness.keystore.inner().simulate_enrollment_change();

    let mut stream = harness
        .biogate
        .unseal_with_key(Some("k1"), &envelope)
        .subscribe();
    let items = common::drain(&mut stream);

    match items.as_slice() {
        [Err(err)] => {
            assert!(is_key_invalidated(err));
            assert_eq!(err.kind(), ErrorKind::KeyInvalidated);
        }
        other => panic!("unexpected items {other:?}"),
    }
    assert_eq!(harness.sensor.arm_count(), armed_before);
    assert!(harness.keystore.deleted().is_empty());
    assert!(harness.keystore.contains_alias("k1").expect("query"));
}

#[test]
fn test_illegal_block_size_after_arming_removes_key() {
    let harness = common::harness(Algorithm::Symmetric);
    let envelope = harness.seal("k1", b"payload");

    let mut stream = harness
        .biogate
        .unseal_with_key(Some("k1"), &envelope)
        .subscribe();
    assert_eq!(harness.keystore.inner().simulate_enrollment_change(), 1);
    harness.sensor.succeed();

    let items = common::drain(&mut stream);
    assert!(matches!(
        items.as_slice(),
        [Err(BiometricError::KeyInvalidated { key_name })] if key_name == "k1"
    ));
    assert_eq!(harness.keystore.deleted(), vec!["k1".to_string()]);
    assert!(!harness.biogate.key_exists(Some("k1")).expect("query"));
    assert_eq!(
        harness.logger.lines(),
        vec!["warn: Removing invalidated key.".to_string()]
    );
}

#[test]
fn test_illegal_block_size_passes_through_without_enrollment_binding() {
    let harness = common::harness_with(
        common::policy(Algorithm::Symmetric).invalidate_on_enrollment(false),
    );
    let envelope = harness.seal("k1", b"payload");

    let mut stream = harness
        .biogate
        .unseal_with_key(Some("k1"), &envelope)
        .subscribe();
    assert_eq!(harness.keystore.inner().simulate_enrollment_change(), 0);
    harness.keystore.inner().invalidate("k1");
    harness.sensor.succeed();

    let items = common::drain(&mut stream);
    match items.as_slice() {
        [Err(err)] => {
            assert_eq!(err.kind(), ErrorKind::CryptoFailure);
            assert!(!is_key_invalidated(err));
        }
        other => panic!("unexpected items {other:?}"),
    }
    assert!(harness.keystore.deleted().is_empty());
    assert!(harness.logger.lines().is_empty());
}

#[test]
fn test_failed_removal_is_logged() {
    let harness = common::harness(Algorithm::Symmetric);
    let envelope = harness.seal("k1", b"payload");
    harness.keystore.refuse_deletes();

    let mut stream = harness
        .biogate
        .unseal_with_key(Some("k1"), &envelope)
        .subscribe();
    harness.keystore.inner().simulate_enrollment_change();
    harness.sensor.succeed();

    let items = common::drain(&mut stream);
    assert!(matches!(
        items.as_slice(),
        [Err(BiometricError::KeyInvalidated { .. })]
    ));
    let lines = harness.logger.lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "warn: Removing invalidated key.");
    assert!(lines[1].starts_with("error: Could not delete invalidated key."));
}

#[test]
fn test_disposed_unseal_releases_cipher_without_deleting() {
    let harness = common::harness(Algorithm::Symmetric);
    let envelope = harness.seal("k1", b"payload");

    let mut stream = harness
        .biogate
        .unseal_with_key(Some("k1"), &envelope)
        .subscribe();
    harness.keystore.inner().simulate_enrollment_change();
    stream.dispose();
    harness.sensor.succeed();

    assert!(common::drain(&mut stream).is_empty());
    assert!(harness.keystore.deleted().is_empty());
}

#[test]
fn test_every_created_key_requires_user_authentication() {
    for (algorithm, invalidate) in [
        (Algorithm::Symmetric, true),
        (Algorithm::Symmetric, false),
        (Algorithm::Asymmetric, true),
        (Algorithm::Asymmetric, false),
    ] {
        let harness = common::harness_with(
            common::policy(algorithm).invalidate_on_enrollment(invalidate),
        );
        harness.seal("k1", b"payload");
        harness.seal("k2", b"payload");
        harness.keystore.inner().invalidate("k1");
        harness.seal("k1", b"payload");

        let specs = harness.keystore.inner().generated_specs();
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(KeySpec::user_authentication_required));
        assert!(specs
            .iter()
            .all(|spec| spec.invalidated_by_biometric_enrollment() == invalidate));
    }
}

#[test]
fn test_authenticate_ignores_key_state() {
    let harness = common::harness(Algorithm::Symmetric);
    harness.seal("k1", b"payload");
    harness.keystore.inner().simulate_enrollment_change();

    let mut stream = harness.biogate.authenticate().subscribe();
    harness.sensor.succeed();
    assert!(matches!(
        common::drain(&mut stream).as_slice(),
        [Ok(Outcome::Authenticated { .. })]
    ));
}
