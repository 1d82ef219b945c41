//! Set algebra on circular ranges: intersection, union, complement, and
//! minimal containers, all driven by the overlap classification below.

use crate::CircleRange;
use wyvern_ir::byte_mask;

/// Outcome of [`CircleRange::intersect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntersectStatus {
    /// The operands share no value; `self` is now empty.
    Disjoint = 0,
    /// The result equals one of the operands (including the case where
    /// the true intersection is a pair of arcs and `self` is kept as its
    /// container).
    EqualOrContained = 1,
    /// A strictly new range was produced.
    Produced = 2,
}

/// Outcome of [`CircleRange::circle_union`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnionStatus {
    /// The union is not a single representable range; `self` is
    /// unchanged and the caller must fall back (usually to
    /// [`CircleRange::minimal_container`]).
    Failed = 0,
    Produced = 1,
}

/// How two proper arcs `[l, r)` and `[l', r')` sit on the circle.
///
/// Listing the four boundaries clockwise, starting from `l` when
/// `l' ∈ [l, r)` and from `l'` otherwise, gives one of:
///
/// - `b` = (l l' r r')   overlap at the end of `[l, r)`
/// - `c` = (l l' r' r)   `[l', r')` inside `[l, r)`
/// - `d` = (l' l r r')   `[l, r)` inside `[l', r')`
/// - `e` = (l' l r' r)   overlap at the start of `[l, r)`
/// - `f` = (l' r' l r)   disjoint
/// - `g` = (l r' l' r)   `[l', r')` wraps across both ends: the
///   intersection is two arcs, the union is the whole circle
///
/// The six pairwise `<=` relations between the boundaries index the
/// 64-entry table; entries marked `-` cannot arise once the callers have
/// peeled off empty, whole-class, and boundary-coincident operands.
const OVERLAP: &[u8; 64] =
    b"gc-be-df---g---e----c-b-------gcdf-------e-d----b---f---gc-be-df";

pub(crate) fn encode_overlap(l: u64, r: u64, l2: u64, r2: u64) -> u8 {
    let mut val = 0usize;
    if l <= r {
        val |= 0x20;
    }
    if l <= l2 {
        val |= 0x10;
    }
    if l <= r2 {
        val |= 0x8;
    }
    if r <= l2 {
        val |= 0x4;
    }
    if r <= r2 {
        val |= 0x2;
    }
    if l2 <= r2 {
        val |= 0x1;
    }
    OVERLAP[val]
}

impl CircleRange {
    /// Intersect `self` with `other` in place.
    ///
    /// When the strides differ, the finer operand is first restricted to
    /// the coarser grid (the result stride is the larger of the two); a
    /// phase mismatch empties the result. A true intersection that would
    /// need two arcs keeps the smaller operand as a sound container.
    pub fn intersect(&mut self, other: &CircleRange) -> IntersectStatus {
        if self.empty {
            return IntersectStatus::Disjoint;
        }
        if other.empty {
            self.set_empty();
            return IntersectStatus::Disjoint;
        }
        debug_assert_eq!(self.mask, other.mask);
        let original = *self;
        let mut o = *other;

        if self.step < o.step {
            let rem = o.left & (o.step - 1);
            self.set_stride(o.step, rem);
            if self.empty {
                return IntersectStatus::Disjoint;
            }
        } else if o.step < self.step {
            let rem = self.left & (self.step - 1);
            o.set_stride(self.step, rem);
            if o.empty {
                self.set_empty();
                return IntersectStatus::Disjoint;
            }
        }
        // Same stride now; the phases must agree.
        if self.left.wrapping_sub(o.left) & (self.step - 1) != 0 {
            self.set_empty();
            return IntersectStatus::Disjoint;
        }

        if self.left == self.right {
            // Self covers its whole stride class.
            self.left = o.left;
            self.right = o.right;
        } else if o.left != o.right {
            if self.left == o.left || self.right == o.right {
                // Nested arcs sharing a boundary; the shorter one is the
                // intersection.
                if o.span() < self.span() {
                    self.left = o.left;
                    self.right = o.right;
                }
            } else if self.left == o.right {
                // The other arc wraps around to end exactly where self
                // begins; any overlap is its tail inside self.
                let off = (o.left.wrapping_sub(self.left) & self.mask) as u128;
                if off < self.span() {
                    self.left = o.left;
                } else {
                    self.set_empty();
                    return IntersectStatus::Disjoint;
                }
            } else {
                match encode_overlap(self.left, self.right, o.left, o.right) {
                    b'a' | b'f' => {
                        self.set_empty();
                        return IntersectStatus::Disjoint;
                    }
                    b'b' => self.left = o.left,
                    b'c' => {
                        self.left = o.left;
                        self.right = o.right;
                    }
                    b'd' => {}
                    b'g' => {
                        // The true intersection is two disjoint arcs; keep
                        // the smaller operand as a representable container.
                        let keep_other = match o.cardinality().cmp(&self.cardinality()) {
                            std::cmp::Ordering::Less => true,
                            std::cmp::Ordering::Greater => false,
                            std::cmp::Ordering::Equal => {
                                (o.left, o.right) < (self.left, self.right)
                            }
                        };
                        if keep_other {
                            self.left = o.left;
                            self.right = o.right;
                        }
                    }
                    b'e' => self.right = o.right,
                    _ => debug_assert!(false, "impossible overlap relation"),
                }
                // Touching boundaries can collapse the assembled arc; the
                // operands were not full classes, so this means empty.
                if self.left == self.right {
                    self.set_empty();
                    return IntersectStatus::Disjoint;
                }
            }
        }
        self.normalize();
        if *self == original || *self == *other {
            IntersectStatus::EqualOrContained
        } else {
            IntersectStatus::Produced
        }
    }

    /// Replace `self` with `self ∪ other` when that union is itself a
    /// single range over a common stride; otherwise leave `self` alone
    /// and report [`UnionStatus::Failed`].
    pub fn circle_union(&mut self, other: &CircleRange) -> UnionStatus {
        if other.empty {
            return UnionStatus::Produced;
        }
        if self.empty {
            *self = *other;
            return UnionStatus::Produced;
        }
        debug_assert_eq!(self.mask, other.mask);
        if self.step != other.step {
            return UnionStatus::Failed;
        }
        if self.left.wrapping_sub(other.left) & (self.step - 1) != 0 {
            return UnionStatus::Failed;
        }
        if self.left == self.right {
            return UnionStatus::Produced;
        }
        if other.left == other.right {
            self.left = other.left;
            self.right = other.right;
            self.normalize();
            return UnionStatus::Produced;
        }
        // Where does each arc start relative to the other? Touching ends
        // count as inside, so adjacent arcs merge seamlessly.
        let modulus = self.modulus();
        let s1 = self.span();
        let s2 = other.span();
        let off21 = (other.left.wrapping_sub(self.left) & self.mask) as u128;
        let off12 = (self.left.wrapping_sub(other.left) & self.mask) as u128;
        let in1 = off21 <= s1;
        let in2 = off12 <= s2;
        if in1 && in2 {
            // Overlapping both ways around: either one contains the
            // other, or together they close the circle.
            if off21 + s2 <= s1 {
                // Other is inside self.
            } else if off12 + s1 <= s2 {
                self.left = other.left;
                self.right = other.right;
            } else {
                self.right = self.left;
            }
        } else if in1 {
            let span = s1.max(off21 + s2);
            if span >= modulus {
                self.right = self.left;
            } else {
                self.right = (self.left as u128 + span) as u64 & self.mask;
            }
        } else if in2 {
            let span = s2.max(off12 + s1);
            self.left = other.left;
            if span >= modulus {
                self.right = self.left;
            } else {
                self.right = (other.left as u128 + span) as u64 & self.mask;
            }
        } else {
            return UnionStatus::Failed;
        }
        self.normalize();
        UnionStatus::Produced
    }

    /// Replace `self` with the smallest representable superset of
    /// `self ∪ other`. The container's stride may grow up to `max_step`
    /// (for instance, merging two distant single values into a
    /// two-element strided range).
    pub fn minimal_container(&mut self, other: &CircleRange, max_step: u64) {
        debug_assert!(max_step.is_power_of_two());
        if other.empty {
            return;
        }
        if self.empty {
            *self = *other;
            return;
        }
        debug_assert_eq!(self.mask, other.mask);
        if self.contains_all(other) {
            return;
        }
        if other.contains_all(self) {
            *self = *other;
            return;
        }
        let modulus = self.modulus();

        // The coarsest stride the container can carry: bounded by each
        // operand's own stride (unless it is a single value), by the
        // phase difference of the two left bounds, and by max_step.
        let diff = self.left.wrapping_sub(other.left) & self.mask;
        let mut step = max_step as u128;
        if diff != 0 {
            step = step.min(1u128 << diff.trailing_zeros());
        }
        if !self.is_single() {
            step = step.min(self.step as u128);
        }
        if !other.is_single() {
            step = step.min(other.step as u128);
        }
        let step = (step.min(modulus >> 1).max(1)) as u64;

        // Spans on the new grid; single values occupy one slot.
        let span1 = if self.is_single() {
            step as u128
        } else {
            self.span()
        };
        let span2 = if other.is_single() {
            step as u128
        } else {
            other.span()
        };
        let offset21 = (other.left.wrapping_sub(self.left) & self.mask) as u128;
        let offset12 = (self.left.wrapping_sub(other.left) & self.mask) as u128;
        let span_c1 = span1.max(offset21 + span2);
        let span_c2 = span2.max(offset12 + span1);

        self.step = step;
        if span_c1.min(span_c2) >= modulus {
            self.right = self.left;
        } else if span_c1 <= span_c2 {
            self.right = ((self.left as u128 + span_c1) as u64) & self.mask;
        } else {
            self.left = other.left;
            self.right = ((other.left as u128 + span_c2) as u64) & self.mask;
        }
        self.normalize();
    }

    /// Replace `self` with its complement. Fails (leaving `self`
    /// unchanged) for strided sets, whose complement is not a single
    /// range.
    pub fn invert(&mut self) -> bool {
        if self.empty {
            if self.mask == 0 {
                return false;
            }
            self.left = 0;
            self.right = 0;
            self.step = 1;
            self.empty = false;
            return true;
        }
        if self.step != 1 {
            return false;
        }
        if self.is_full() {
            self.set_empty();
            return true;
        }
        std::mem::swap(&mut self.left, &mut self.right);
        self.normalize();
        true
    }

    /// Derive a range from a mask covering every possibly-nonzero bit:
    /// the value is at most the mask itself.
    pub fn set_nz_mask(&mut self, nzmask: u64, size: usize) {
        let mask = byte_mask(size);
        let nz = nzmask & mask;
        if nz == mask {
            self.set_full(size);
        } else {
            *self = CircleRange::raw(0, nz + 1, mask, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng(left: u64, right: u64, size: usize, step: u64) -> CircleRange {
        CircleRange::with_bounds(left, right, size, step)
    }

    #[test]
    fn overlap_code_example() {
        // [2, 8) against [5, 12): category b, intersection [5, 8).
        assert_eq!(encode_overlap(2, 8, 5, 12), b'b');
        let mut a = rng(2, 8, 4, 1);
        let b = rng(5, 12, 4, 1);
        assert_eq!(a.intersect(&b), IntersectStatus::Produced);
        assert_eq!(a, rng(5, 8, 4, 1));
    }

    #[test]
    fn intersect_disjoint_and_contained() {
        let mut a = rng(2, 8, 4, 1);
        assert_eq!(
            a.intersect(&rng(10, 20, 4, 1)),
            IntersectStatus::Disjoint
        );
        assert!(a.is_empty());

        let mut a = rng(2, 8, 4, 1);
        assert_eq!(
            a.intersect(&rng(3, 5, 4, 1)),
            IntersectStatus::EqualOrContained
        );
        assert_eq!(a, rng(3, 5, 4, 1));

        let mut a = rng(3, 5, 4, 1);
        assert_eq!(
            a.intersect(&rng(2, 8, 4, 1)),
            IntersectStatus::EqualOrContained
        );
        assert_eq!(a, rng(3, 5, 4, 1));
    }

    #[test]
    fn intersect_with_wrapping_operand() {
        // [0xFFFFFFF0, 0x10) wraps; meet with [0, 0x20).
        let mut a = rng(0xFFFF_FFF0, 0x10, 4, 1);
        let b = rng(0, 0x20, 4, 1);
        assert_eq!(a.intersect(&b), IntersectStatus::Produced);
        assert_eq!(a, rng(0, 0x10, 4, 1));
    }

    #[test]
    fn intersect_aligns_strides() {
        // Multiples of 2 meeting multiples of 4 with equal phase.
        let mut a = rng(0, 40, 4, 2);
        let b = rng(0, 0, 4, 4);
        assert_eq!(a.intersect(&b), IntersectStatus::Produced);
        assert_eq!(a.step(), 4);
        for v in a.iter() {
            assert_eq!(v % 4, 0);
        }
        assert_eq!(a.cardinality(), 10);
    }

    #[test]
    fn intersect_phase_mismatch_is_empty() {
        let mut a = rng(0, 0, 4, 4);
        let mut b = rng(0, 0, 4, 4);
        b.set_stride(4, 0);
        assert_eq!(a.intersect(&b), IntersectStatus::EqualOrContained);

        let mut a = rng(0, 16, 4, 4);
        let b = rng(2, 18, 4, 4);
        assert_eq!(a.intersect(&b), IntersectStatus::Disjoint);
        assert!(a.is_empty());
    }

    #[test]
    fn intersect_two_arc_case_keeps_self() {
        // [2, 14) against a wrapping [10, 6): true intersection is
        // [2, 6) ∪ [10, 14), kept as the container [2, 14).
        let mut a = rng(2, 14, 4, 1);
        let b = rng(10, 6, 4, 1);
        assert_eq!(a.intersect(&b), IntersectStatus::EqualOrContained);
        assert_eq!(a, rng(2, 14, 4, 1));
    }

    #[test]
    fn union_of_overlapping_arcs() {
        let mut a = rng(2, 8, 4, 1);
        assert_eq!(a.circle_union(&rng(5, 12, 4, 1)), UnionStatus::Produced);
        assert_eq!(a, rng(2, 12, 4, 1));
    }

    #[test]
    fn union_of_touching_arcs() {
        let mut a = rng(2, 8, 4, 1);
        assert_eq!(a.circle_union(&rng(8, 12, 4, 1)), UnionStatus::Produced);
        assert_eq!(a, rng(2, 12, 4, 1));

        // Two arcs tiling the whole circle.
        let mut a = rng(0, 8, 1, 1);
        assert_eq!(a.circle_union(&rng(8, 0, 1, 1)), UnionStatus::Produced);
        assert!(a.is_full());
    }

    #[test]
    fn union_failure_modes() {
        let mut a = rng(2, 8, 4, 1);
        assert_eq!(a.circle_union(&rng(20, 30, 4, 1)), UnionStatus::Failed);
        assert_eq!(a, rng(2, 8, 4, 1));

        let mut a = rng(0, 8, 4, 2);
        assert_eq!(a.circle_union(&rng(0, 8, 4, 1)), UnionStatus::Failed);
    }

    #[test]
    fn minimal_container_merges_singles_with_stride() {
        let mut a = CircleRange::single(0, 4);
        a.minimal_container(&CircleRange::single(4, 4), 8);
        assert!(a.contains(0));
        assert!(a.contains(4));
        assert_eq!(a.step(), 4);
        assert_eq!(a.cardinality(), 2);
    }

    #[test]
    fn minimal_container_picks_smaller_gap() {
        // {0x10} and {0xF0} over one byte: going up from 0xF0 wraps to
        // 0x10 in 0x20 steps, far shorter than 0x10 -> 0xF0.
        let mut a = CircleRange::single(0xF0, 1);
        a.minimal_container(&CircleRange::single(0x10, 1), 1);
        assert!(a.contains(0xF0));
        assert!(a.contains(0x10));
        assert!(a.contains(0));
        assert!(!a.contains(0x80));
        assert!(a.cardinality() <= 0x21);
    }

    #[test]
    fn container_is_superset_of_both() {
        let cases = [
            (rng(0, 10, 1, 1), rng(0x40, 0x50, 1, 1)),
            (rng(0xF0, 8, 1, 1), rng(0x20, 0x30, 1, 1)),
            (rng(0, 16, 1, 4), rng(3, 11, 1, 4)),
            (CircleRange::single(7, 1), rng(0x80, 0xA0, 1, 2)),
        ];
        for (a, b) in cases {
            let mut c = a;
            c.minimal_container(&b, 16);
            for v in a.iter().chain(b.iter()) {
                assert!(c.contains(v), "{c} missing {v:#x} from {a} ∪ {b}");
            }
        }
    }

    #[test]
    fn invert_round_trip() {
        let mut a = rng(5, 100, 4, 1);
        assert!(a.invert());
        assert_eq!(a, rng(100, 5, 4, 1));
        assert!(a.invert());
        assert_eq!(a, rng(5, 100, 4, 1));

        let mut f = CircleRange::full(2);
        assert!(f.invert());
        assert!(f.is_empty());
        assert!(f.invert());
        assert!(f.is_full());

        let mut strided = rng(0, 8, 4, 2);
        assert!(!strided.invert());
        assert_eq!(strided, rng(0, 8, 4, 2));
    }

    #[test]
    fn nz_mask_bounds() {
        let mut r = CircleRange::empty();
        r.set_nz_mask(0x0F, 4);
        assert_eq!(r, rng(0, 0x10, 4, 1));

        let mut r = CircleRange::empty();
        r.set_nz_mask(0xFFFF_FFFF, 4);
        assert!(r.is_full());

        let mut r = CircleRange::empty();
        r.set_nz_mask(0, 4);
        assert_eq!(r, CircleRange::single(0, 4));
    }
}
