//! Assertion helpers for checking circular-range algebra against its
//! laws, and brute-force enumeration for model-based tests.
//!
//! The law checkers collect every violation over a sample set and panic
//! with a combined report, so a broken operation shows all its failures
//! at once instead of one per run.

use std::collections::BTreeSet;
use std::fmt::Write;

use wyvern_ir::Lattice;
use wyvern_range::{CircleRange, IntersectStatus};

/// Expand a range into its concrete members. Guarded against ranges too
/// large to enumerate in a test.
pub fn enumerate(r: &CircleRange) -> BTreeSet<u64> {
    assert!(
        r.cardinality() <= 1 << 20,
        "range {r} too large to enumerate"
    );
    r.iter().collect()
}

fn report(violations: Vec<String>) {
    if violations.is_empty() {
        return;
    }
    let mut msg = format!("{} range law violation(s):\n", violations.len());
    for (i, v) in violations.iter().enumerate() {
        let _ = writeln!(msg, "  {}. {}", i + 1, v);
    }
    panic!("{msg}");
}

/// Check the intersection laws over the sample: idempotence,
/// commutativity, identity with the full range, annihilation with the
/// empty range, and pointwise soundness (the result covers every value
/// common to both operands).
///
/// Every element must share one mask; pass the matching `size`.
pub fn assert_meet_laws(elements: &[CircleRange], size: usize) {
    let mut v = Vec::new();
    let full = CircleRange::full(size);
    let empty = CircleRange::empty();
    for a in elements {
        if a.meet(a) != *a {
            v.push(format!("meet not idempotent for {a}"));
        }
        if a.meet(&full) != *a {
            v.push(format!("meet with full changed {a}"));
        }
        if !a.meet(&empty).is_empty() {
            v.push(format!("meet with empty not empty for {a}"));
        }
        let avals = enumerate(a);
        for b in elements {
            let ab = a.meet(b);
            let ba = b.meet(a);
            if ab != ba {
                v.push(format!("meet not commutative: {a} ∩ {b} = {ab} but {b} ∩ {a} = {ba}"));
            }
            for common in avals.intersection(&enumerate(b)) {
                if !ab.contains(*common) {
                    v.push(format!("{a} ∩ {b} = {ab} lost common value {common:#x}"));
                    break;
                }
            }
        }
    }
    report(v);
}

/// Check the union laws over the sample: idempotence and pointwise
/// coverage of both operands by the join.
pub fn assert_join_laws(elements: &[CircleRange]) {
    let mut v = Vec::new();
    for a in elements {
        if a.join(a) != *a {
            v.push(format!("join not idempotent for {a}"));
        }
        for b in elements {
            let ab = a.join(b);
            for value in enumerate(a).union(&enumerate(b)) {
                if !ab.contains(*value) {
                    v.push(format!("{a} ∪ {b} = {ab} lost value {value:#x}"));
                    break;
                }
            }
        }
    }
    report(v);
}

/// Check complement laws where the complement is representable: double
/// complement restores the range, a range never meets its complement,
/// and containment implies an `EqualOrContained` intersection.
pub fn assert_complement_laws(elements: &[CircleRange], size: usize) {
    let mut v = Vec::new();
    for a in elements {
        let mut c = *a;
        if !c.invert() {
            continue;
        }
        let mut back = c;
        if !back.invert() || back != *a {
            v.push(format!("double complement of {a} gave {back}"));
        }
        if !a.meet(&c).is_empty() {
            v.push(format!("{a} meets its complement {c}"));
        }
        for value in 0..=wyvern_ir::byte_mask(size) {
            if a.contains(value) == c.contains(value) {
                v.push(format!(
                    "{a} and complement {c} agree on membership of {value:#x}"
                ));
                break;
            }
        }
    }
    report(v);
}

/// Check that containment is reflected by the intersect status code and
/// that the meet of nested ranges is (as a set) the smaller one.
pub fn assert_containment_consistent(elements: &[CircleRange]) {
    let mut v = Vec::new();
    for a in elements {
        for b in elements {
            if !a.contains_all(b) || b.is_empty() {
                continue;
            }
            let mut meet = *a;
            let status = meet.intersect(b);
            if status == IntersectStatus::Disjoint {
                v.push(format!("{b} ⊆ {a} but intersect reported disjoint"));
            }
            if enumerate(&meet) != enumerate(b) {
                v.push(format!("{b} ⊆ {a} but {a} ∩ {b} = {meet}"));
            }
        }
    }
    report(v);
}

/// Check the iteration protocol: the count matches the cardinality, the
/// first value is `min`, and stepping past `max` lands on `end`.
pub fn assert_iteration_laws(elements: &[CircleRange]) {
    let mut v = Vec::new();
    for r in elements {
        let values: Vec<u64> = r.iter().collect();
        if values.len() as u128 != r.cardinality() {
            v.push(format!(
                "{r} iterated {} values, cardinality {}",
                values.len(),
                r.cardinality()
            ));
            continue;
        }
        if r.is_empty() {
            continue;
        }
        if values.first() != Some(&r.min()) {
            v.push(format!("{r} iteration does not start at min"));
        }
        let distinct: BTreeSet<u64> = values.iter().copied().collect();
        if distinct.len() != values.len() {
            v.push(format!("{r} iteration repeated a value"));
        }
        if r.max().wrapping_add(r.step()) & r.mask() != r.end() {
            v.push(format!("{r} max/step/end disagree"));
        }
    }
    report(v);
}

/// A diverse set of one-byte ranges for law checks: empty, full,
/// singles, proper arcs, wrapping arcs, and strided variants.
pub fn representative_ranges() -> Vec<CircleRange> {
    let mut out = vec![
        CircleRange::empty(),
        CircleRange::full(1),
        CircleRange::single(0, 1),
        CircleRange::single(0x7F, 1),
        CircleRange::single(0xFF, 1),
        CircleRange::with_bounds(0, 0x10, 1, 1),
        CircleRange::with_bounds(5, 0x25, 1, 1),
        CircleRange::with_bounds(0x80, 0, 1, 1),
        CircleRange::with_bounds(0xF0, 0x10, 1, 1),
        CircleRange::with_bounds(0x40, 0x20, 1, 1),
        CircleRange::with_bounds(0, 0x40, 1, 4),
        CircleRange::with_bounds(2, 0x42, 1, 4),
        CircleRange::with_bounds(0xF8, 0x18, 1, 8),
        CircleRange::with_bounds(0, 0, 1, 2),
        CircleRange::with_bounds(1, 1, 1, 2),
    ];
    // A handful of odd-phase strided arcs.
    for left in [3u64, 0x81] {
        out.push(CircleRange::with_bounds(left, (left + 0x20) & 0xFF, 1, 2));
    }
    out
}
