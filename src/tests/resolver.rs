use crate::container::opcodes::{OP_CONST_16, OP_RETURN, OP_RETURN_VOID};
use crate::patcher::Patcher;
use crate::signatures::{MethodFingerprint, Signature};
use crate::tests::fixtures::*;
use crate::types::{Instruction, TypeSignature};
use rand::Rng;
use std::rc::Rc;

/// A pool of filler classes with randomized bodies, plus one su check
/// buried in the middle. Randomness only varies the noise; the target's
/// shape is fixed, so resolution must not be affected.
fn noisy_container() -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut classes = vec![];
    for i in 0..10 {
        let mut c = bystander_class(&format!("noise.C{i}"));
        c.methods.push(method(
            &format!("m{i}"),
            "()I",
            vec![
                Instruction::with_literal(OP_CONST_16, vec![0], rng.gen::<i16>() as i64),
                Instruction::plain(OP_RETURN, vec![0]),
            ],
        ));
        classes.push(c);
    }
    classes.insert(6, su_check_class("a.a", "a"));
    container_bytes(classes)
}

#[test]
fn resolution_is_deterministic_across_sessions() {
    let bytes = noisy_container();

    let mut locations = vec![];
    for _ in 0..2 {
        let mut patcher = Patcher::from_bytes(&bytes).unwrap();
        let signature = su_check_signature("su-check");
        patcher.add_patches(vec![Box::new(ReadOnlyPatch::new("inspect", signature.clone()))]).unwrap();
        patcher.resolve_signatures().unwrap();
        let result = signature.result().expect("must resolve");
        locations.push((result.class_index, result.method_index));
    }

    assert_eq!(locations[0], locations[1]);
    assert_eq!(locations[0], (6, 0));
}

#[test]
fn signatures_matching_the_same_class_share_one_proxy() {
    let bytes = container_bytes(vec![su_check_class("a.a", "a")]);
    let mut patcher = Patcher::from_bytes(&bytes).unwrap();

    let by_strings = su_check_signature("by-strings");
    let by_shape = Signature::new(
        "by-shape",
        MethodFingerprint {
            return_type: Some(TypeSignature::Bool),
            parameters: Some(vec![]),
            ..MethodFingerprint::default()
        },
    )
    .unwrap();

    patcher.add_patches(vec![
        Box::new(ReadOnlyPatch::new("one", by_strings.clone())),
        Box::new(ReadOnlyPatch::new("two", by_shape.clone())),
    ]).unwrap();
    patcher.resolve_signatures().unwrap();

    let a = by_strings.result().unwrap();
    let b = by_shape.result().unwrap();
    assert_eq!(a.class_index, b.class_index);
    assert!(Rc::ptr_eq(&a.proxy, &b.proxy), "registry must hand out one proxy per index");
}

#[test]
fn first_match_in_pool_order_wins() {
    // two classes both carry a matching method; and inside the second
    // class a second matching method exists as well
    let mut late = su_check_class("z.z", "z");
    late.methods.push(su_check_class("unused", "second").methods.remove(0));
    let bytes = container_bytes(vec![
        bystander_class("com.app.Main"),
        su_check_class("a.a", "a"),
        late,
    ]);

    let mut patcher = Patcher::from_bytes(&bytes).unwrap();
    let signature = su_check_signature("su-check");
    patcher.add_patches(vec![Box::new(ReadOnlyPatch::new("inspect", signature.clone()))]).unwrap();
    patcher.resolve_signatures().unwrap();

    let result = signature.result().unwrap();
    assert_eq!((result.class_index, result.method_index), (1, 0));
}

#[test]
fn unresolved_signature_is_not_an_error_until_a_patch_requires_it() {
    let bytes = container_bytes(vec![bystander_class("com.app.Main")]);
    let mut patcher = Patcher::from_bytes(&bytes).unwrap();

    let unmatchable = Signature::new(
        "missing",
        MethodFingerprint {
            strings: Some(vec!["no such string anywhere".to_string()]),
            ..MethodFingerprint::default()
        },
    )
    .unwrap();
    patcher.add_patches(vec![Box::new(StubPatch::new("needs-match", unmatchable.clone()))]).unwrap();

    // resolution itself succeeds; the slot just stays empty
    patcher.resolve_signatures().unwrap();
    assert!(unmatchable.result().is_none());

    // the patch turns the absence into its own failure
    let reports = patcher.apply_patches(false, |_| {}).unwrap();
    assert!(!reports[0].succeeded());
    let err = reports[0].outcome.as_ref().unwrap_err();
    assert!(err.details.contains("did not resolve"));
}

#[test]
fn unmatched_methods_keep_bodies_with_return_void_distinct() {
    // a guard against over-matching: a void method must not satisfy a
    // bool-returning fingerprint even when the string matches
    let mut c = bystander_class("com.app.Main");
    c.methods[0].code.insert(
        0,
        Instruction::with_string(
            crate::container::opcodes::OP_CONST_STRING,
            vec![0],
            "/system/bin/su",
        ),
    );
    assert_eq!(c.methods[0].code.last().unwrap().opcode, OP_RETURN_VOID);
    let bytes = container_bytes(vec![c]);

    let mut patcher = Patcher::from_bytes(&bytes).unwrap();
    let signature = su_check_signature("su-check");
    patcher.add_patches(vec![Box::new(ReadOnlyPatch::new("inspect", signature.clone()))]).unwrap();
    patcher.resolve_signatures().unwrap();
    assert!(signature.result().is_none());
}
