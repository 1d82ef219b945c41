//! Symbolic transfer of ranges through the IR's integer operators:
//! pull-backs (inverse images) and push-forwards (forward images).
//!
//! Pull-backs are exact or they fail, leaving the caller to treat the
//! input as unconstrained. Push-forwards never fail; where the exact
//! image is not representable they return a sound container, at worst
//! the full range of the output size.

use crate::CircleRange;
use wyvern_ir::{byte_mask, Function, Op, OpCode, Var};

/// What [`CircleRange::pull_back`] learned from an operation.
#[derive(Debug, Default)]
pub struct PullBackResult {
    /// The unique non-constant input whose range should be intersected
    /// with the computed pre-image, when the pull-back succeeded.
    pub constrained: Option<Var>,
    /// A constant input that participated meaningfully in the pull-back.
    pub const_markup: Option<Var>,
}

/// Multiplicative inverse of an odd value mod 2^64.
fn odd_inverse(c: u64) -> u64 {
    debug_assert!(c & 1 == 1);
    let mut inv = c;
    for _ in 0..5 {
        inv = inv.wrapping_mul(2u64.wrapping_sub(c.wrapping_mul(inv)));
    }
    inv
}

fn bits_of(size: usize) -> u32 {
    (8 * size) as u32
}

impl CircleRange {
    /// The reflection `{ c - v : v ∈ self }`.
    pub(crate) fn reflected(&self, c: u64) -> CircleRange {
        if self.empty {
            return *self;
        }
        let left = c.wrapping_sub(self.max()) & self.mask;
        let right = c.wrapping_sub(self.left).wrapping_add(self.step) & self.mask;
        CircleRange::raw(left, right, self.mask, self.step)
    }

    /// Unsigned bounds `(min, max)` of the values, conservatively widened
    /// to the whole domain for ranges that split into two runs.
    pub(crate) fn unsigned_bounds(&self) -> (u64, u64) {
        debug_assert!(!self.empty);
        if self.left < self.right || self.right == 0 {
            (self.left, self.max())
        } else {
            (0, self.mask)
        }
    }

    /// Signed bounds `(min, max)` of the values, conservative for ranges
    /// spanning the sign boundary.
    pub(crate) fn signed_bounds(&self, size: usize) -> (i128, i128) {
        debug_assert!(!self.empty);
        let half = 1u64 << (bits_of(size) - 1);
        let modulus = self.modulus() as i128;
        let conservative = (-(half as i128), half as i128 - 1);
        if self.left == self.right {
            return conservative;
        }
        if self.left < self.right {
            if self.right <= half {
                (self.left as i128, self.max() as i128)
            } else if self.left >= half {
                (self.left as i128 - modulus, self.max() as i128 - modulus)
            } else {
                conservative
            }
        } else if self.right == 0 {
            if self.left >= half {
                (self.left as i128 - modulus, self.max() as i128 - modulus)
            } else {
                conservative
            }
        } else if self.left >= half && self.right <= half {
            // Negative run up to the top, positive run from zero.
            (
                self.left as i128 - modulus,
                self.right.wrapping_sub(self.step) as i128,
            )
        } else {
            conservative
        }
    }

    /// Collapse to a boolean: `{0}`, `{1}`, or `{0, 1}` over one byte,
    /// according to whether the set holds zero and/or nonzero values.
    pub fn convert_to_boolean(&mut self) {
        if self.empty {
            *self = CircleRange::empty();
            return;
        }
        let has_zero = self.contains(0);
        let has_nonzero = !(has_zero && self.is_single());
        *self = match (has_zero, has_nonzero) {
            (true, true) => CircleRange::raw(0, 2, 0xFF, 1),
            (true, false) => CircleRange::bool_range(false),
            (false, _) => CircleRange::bool_range(true),
        };
    }

    /// The set of `size`-byte values `x` for which the comparison
    /// `opc` against constant `c` (sitting in input `cslot`) evaluates
    /// to `taken`.
    pub fn comparison_range(
        opc: OpCode,
        c: u64,
        cslot: usize,
        size: usize,
        taken: bool,
    ) -> CircleRange {
        let mask = byte_mask(size);
        let c = c & mask;
        let half = 1u64 << (bits_of(size) - 1);
        let arc = |l: u64, r: u64| CircleRange::raw(l, r, mask, 1);
        match (opc, cslot, taken) {
            (OpCode::IntEqual, _, true) | (OpCode::IntNotEqual, _, false) => {
                CircleRange::single(c, size)
            }
            (OpCode::IntEqual, _, false) | (OpCode::IntNotEqual, _, true) => {
                arc(c.wrapping_add(1) & mask, c)
            }

            // x < c / x >= c
            (OpCode::IntLess, 1, true) if c == 0 => CircleRange::empty(),
            (OpCode::IntLess, 1, true) => arc(0, c),
            (OpCode::IntLess, 1, false) if c == 0 => CircleRange::full(size),
            (OpCode::IntLess, 1, false) => arc(c, 0),
            // c < x / x <= c
            (OpCode::IntLess, 0, true) if c == mask => CircleRange::empty(),
            (OpCode::IntLess, 0, true) => arc(c.wrapping_add(1), 0),
            (OpCode::IntLess, 0, false) if c == mask => CircleRange::full(size),
            (OpCode::IntLess, 0, false) => arc(0, c.wrapping_add(1)),

            // x <= c / x > c
            (OpCode::IntLessEqual, 1, true) if c == mask => CircleRange::full(size),
            (OpCode::IntLessEqual, 1, true) => arc(0, c.wrapping_add(1)),
            (OpCode::IntLessEqual, 1, false) if c == mask => CircleRange::empty(),
            (OpCode::IntLessEqual, 1, false) => arc(c.wrapping_add(1), 0),
            // c <= x / x < c
            (OpCode::IntLessEqual, 0, true) if c == 0 => CircleRange::full(size),
            (OpCode::IntLessEqual, 0, true) => arc(c, 0),
            (OpCode::IntLessEqual, 0, false) if c == 0 => CircleRange::empty(),
            (OpCode::IntLessEqual, 0, false) => arc(0, c),

            // x <s c / x >=s c
            (OpCode::IntSLess, 1, true) if c == half => CircleRange::empty(),
            (OpCode::IntSLess, 1, true) => arc(half, c),
            (OpCode::IntSLess, 1, false) if c == half => CircleRange::full(size),
            (OpCode::IntSLess, 1, false) => arc(c, half),
            // c <s x / x <=s c
            (OpCode::IntSLess, 0, true) if c == half.wrapping_sub(1) => CircleRange::empty(),
            (OpCode::IntSLess, 0, true) => arc(c.wrapping_add(1) & mask, half),
            (OpCode::IntSLess, 0, false) if c == half.wrapping_sub(1) => CircleRange::full(size),
            (OpCode::IntSLess, 0, false) => arc(half, c.wrapping_add(1) & mask),

            // x <=s c / x >s c
            (OpCode::IntSLessEqual, 1, true) if c == half.wrapping_sub(1) => {
                CircleRange::full(size)
            }
            (OpCode::IntSLessEqual, 1, true) => arc(half, c.wrapping_add(1) & mask),
            (OpCode::IntSLessEqual, 1, false) if c == half.wrapping_sub(1) => CircleRange::empty(),
            (OpCode::IntSLessEqual, 1, false) => arc(c.wrapping_add(1) & mask, half),
            // c <=s x / x <s c
            (OpCode::IntSLessEqual, 0, true) if c == half => CircleRange::full(size),
            (OpCode::IntSLessEqual, 0, true) => arc(c, half),
            (OpCode::IntSLessEqual, 0, false) if c == half => CircleRange::empty(),
            (OpCode::IntSLessEqual, 0, false) => arc(half, c),

            _ => CircleRange::full(size),
        }
    }

    // -- Pull-back ----------------------------------------------------------

    /// Pull `self` (a range on the output of a unary `opc`) back to the
    /// exact set of inputs producing it. Returns false, leaving `self`
    /// unchanged, when the pre-image is not representable.
    pub fn pull_back_unary(&mut self, opc: OpCode, in_size: usize, out_size: usize) -> bool {
        if self.empty {
            return true;
        }
        match opc {
            OpCode::Copy => true,
            OpCode::SubPiece => self.pull_back_subpiece(0, in_size, out_size),
            OpCode::IntNeg => {
                *self = self.reflected(0);
                true
            }
            OpCode::IntNot => {
                *self = self.reflected(self.mask);
                true
            }
            OpCode::IntZext => {
                let small_mask = byte_mask(in_size);
                debug_assert!(in_size < out_size);
                let image = CircleRange::raw(0, small_mask.wrapping_add(1), self.mask, 1);
                self.intersect(&image);
                if self.empty {
                    return true;
                }
                if !image.contains_all(self) {
                    self.set_full(in_size);
                    return true;
                }
                self.left &= small_mask;
                self.right &= small_mask;
                self.mask = small_mask;
                self.normalize();
                true
            }
            OpCode::IntSext => {
                let small_mask = byte_mask(in_size);
                let small_half = 1u64 << (bits_of(in_size) - 1);
                debug_assert!(in_size < out_size);
                let image = CircleRange::raw(
                    self.mask.wrapping_sub(small_half).wrapping_add(1),
                    small_half,
                    self.mask,
                    1,
                );
                self.intersect(&image);
                if self.empty {
                    return true;
                }
                if !image.contains_all(self) {
                    self.set_full(in_size);
                    return true;
                }
                self.left &= small_mask;
                self.right &= small_mask;
                self.mask = small_mask;
                self.normalize();
                true
            }
            _ => false,
        }
    }

    /// Pull back through a truncation dropping `offset` low bytes.
    /// Only the aligned case has representable pre-images.
    fn pull_back_subpiece(&mut self, offset: u64, in_size: usize, out_size: usize) -> bool {
        if self.empty {
            return true;
        }
        if offset != 0 || out_size >= in_size {
            return false;
        }
        let big_mask = byte_mask(in_size);
        let small_modulus = 1u64 << bits_of(out_size);
        if self.is_full() {
            self.set_full(in_size);
            true
        } else if self.is_single() {
            let v = self.left;
            *self = CircleRange {
                left: v,
                right: v,
                mask: big_mask,
                step: small_modulus,
                empty: false,
            };
            self.normalize();
            true
        } else if self.left == self.right {
            // A whole stride class keeps its congruence in the wide domain.
            let step = self.step;
            *self = CircleRange {
                left: self.left,
                right: self.left,
                mask: big_mask,
                step,
                empty: false,
            };
            self.normalize();
            true
        } else {
            false
        }
    }

    /// Pull back through `out = in << sc` with a constant shift.
    fn pull_back_shl(&mut self, sc: u32, in_size: usize) -> bool {
        if self.empty {
            return true;
        }
        let bits = bits_of(in_size);
        if sc == 0 {
            return true;
        }
        if sc >= bits {
            if self.contains(0) {
                self.set_full(in_size);
                return true;
            }
            self.set_empty();
            return true;
        }
        let grid = 1u64 << sc;
        if self.step < grid {
            self.set_stride(grid, 0);
        } else if self.left & (grid - 1) != 0 {
            self.set_empty();
        }
        if self.empty {
            return true;
        }
        if self.is_single() {
            let u = self.left >> sc;
            let step = 1u64 << (bits - sc);
            *self = CircleRange {
                left: u,
                right: u,
                mask: self.mask,
                step,
                empty: false,
            };
            self.normalize();
            true
        } else if self.left == self.right {
            let step = self.step >> sc;
            let phase = self.left >> sc;
            *self = CircleRange {
                left: phase,
                right: phase,
                mask: self.mask,
                step: step.max(1),
                empty: false,
            };
            self.normalize();
            true
        } else {
            false
        }
    }

    /// Pull back through multiplication by an odd constant: a bijection
    /// on the domain, exact for singles and whole stride classes.
    fn pull_back_mult_odd(&mut self, odd: u64, size: usize) -> bool {
        if self.empty || odd == 1 {
            return true;
        }
        let inv = odd_inverse(odd);
        if self.is_single() {
            let v = self.left.wrapping_mul(inv) & self.mask;
            self.set_single(v, size);
            true
        } else if self.left == self.right {
            let phase = self.left.wrapping_mul(inv) & self.mask;
            self.left = phase;
            self.right = phase;
            self.normalize();
            true
        } else {
            false
        }
    }

    /// Pull `self` (a range on the output of binary `opc` with constant
    /// `const_val` in `const_slot`) back onto the other input. Returns
    /// false, leaving `self` unchanged, when no representation exists.
    pub fn pull_back_binary(
        &mut self,
        opc: OpCode,
        const_val: u64,
        const_slot: usize,
        in_size: usize,
        out_size: usize,
    ) -> bool {
        if self.empty {
            return true;
        }
        let bits = bits_of(in_size);
        let c = const_val & byte_mask(in_size);
        match opc {
            OpCode::IntAdd => {
                self.left = self.left.wrapping_sub(c) & self.mask;
                self.right = self.right.wrapping_sub(c) & self.mask;
                self.normalize();
                true
            }
            OpCode::IntSub => {
                if const_slot == 1 {
                    self.left = self.left.wrapping_add(c) & self.mask;
                    self.right = self.right.wrapping_add(c) & self.mask;
                    self.normalize();
                } else {
                    *self = self.reflected(c);
                }
                true
            }
            OpCode::IntXor => {
                if self.is_single() {
                    let v = (self.left ^ c) & self.mask;
                    self.set_single(v, in_size);
                    true
                } else if self.left == self.right {
                    let phase = (self.left ^ c) & (self.step - 1);
                    self.left = phase;
                    self.right = phase;
                    true
                } else {
                    false
                }
            }
            OpCode::IntMult => {
                if c == 0 {
                    if self.contains(0) {
                        self.set_full(in_size);
                    } else {
                        self.set_empty();
                    }
                    return true;
                }
                let t = c.trailing_zeros();
                let odd = c >> t;
                let mut work = *self;
                if !work.pull_back_shl(t, in_size) {
                    return false;
                }
                if !work.pull_back_mult_odd(odd, in_size) {
                    return false;
                }
                *self = work;
                true
            }
            OpCode::IntShl => {
                if const_slot != 1 {
                    return false;
                }
                if c >= bits as u64 {
                    if self.contains(0) {
                        self.set_full(in_size);
                    } else {
                        self.set_empty();
                    }
                    return true;
                }
                self.pull_back_shl(c as u32, in_size)
            }
            OpCode::IntShr => {
                if const_slot != 1 {
                    return false;
                }
                if c == 0 {
                    return true;
                }
                if c >= bits as u64 {
                    if self.contains(0) {
                        self.set_full(in_size);
                    } else {
                        self.set_empty();
                    }
                    return true;
                }
                let valid = CircleRange::raw(0, 1u64 << (bits as u64 - c), self.mask, 1);
                self.intersect(&valid);
                if self.empty {
                    return true;
                }
                if !valid.contains_all(self) {
                    // The intersection was a pair of arcs; give up precision.
                    self.set_full(in_size);
                    return true;
                }
                let (l, r) = (self.left, self.right);
                *self = CircleRange::raw(
                    l.wrapping_shl(c as u32),
                    r.wrapping_shl(c as u32),
                    self.mask,
                    1,
                );
                true
            }
            OpCode::IntSar => {
                if const_slot != 1 {
                    return false;
                }
                if c == 0 {
                    return true;
                }
                if c >= bits as u64 {
                    if self.contains(0) || self.contains(self.mask) {
                        self.set_full(in_size);
                    } else {
                        self.set_empty();
                    }
                    return true;
                }
                let reach = 1u64 << (bits as u64 - c - 1);
                let valid = CircleRange::raw(
                    self.mask.wrapping_sub(reach).wrapping_add(1),
                    reach,
                    self.mask,
                    1,
                );
                self.intersect(&valid);
                if self.empty {
                    return true;
                }
                if !valid.contains_all(self) {
                    self.set_full(in_size);
                    return true;
                }
                let (l, r) = (self.left, self.right);
                *self = CircleRange::raw(
                    l.wrapping_shl(c as u32),
                    r.wrapping_shl(c as u32),
                    self.mask,
                    1,
                );
                true
            }
            OpCode::IntAnd => self.pull_back_and(c, in_size),
            OpCode::IntOr => self.pull_back_or(c),
            OpCode::SubPiece => {
                if const_slot != 1 {
                    return false;
                }
                self.pull_back_subpiece(c, in_size, out_size)
            }
            _ if opc.is_comparison() => {
                let mut bool_range = *self;
                bool_range.convert_to_boolean();
                if bool_range.is_empty() {
                    self.set_empty();
                    return true;
                }
                let has_false = bool_range.contains(0);
                let has_true = bool_range.contains(1);
                *self = if has_false && has_true {
                    CircleRange::full(in_size)
                } else {
                    CircleRange::comparison_range(opc, c, const_slot, in_size, has_true)
                };
                true
            }
            _ => false,
        }
    }

    fn pull_back_and(&mut self, c: u64, size: usize) -> bool {
        let bits = bits_of(size);
        if c == 0 {
            if self.contains(0) {
                self.set_full(size);
            } else {
                self.set_empty();
            }
            return true;
        }
        let tz = c.trailing_zeros();
        let body = c >> tz;
        if body & body.wrapping_add(1) != 0 {
            return false; // scattered mask
        }
        let len = 64 - body.leading_zeros();
        let top_reached = tz + len == bits;
        if self.is_single() {
            let v = self.left;
            if v & !c & self.mask != 0 {
                self.set_empty();
                return true;
            }
            if top_reached {
                let grid = 1u64 << tz;
                *self = CircleRange::raw(v, v.wrapping_add(grid), self.mask, 1);
                true
            } else if tz == 0 {
                let step = 1u64 << len;
                *self = CircleRange {
                    left: v,
                    right: v,
                    mask: self.mask,
                    step,
                    empty: false,
                };
                self.normalize();
                true
            } else {
                false
            }
        } else if top_reached {
            // Rounding down to the 2^tz grid; every full block pre-images.
            let grid = 1u64 << tz;
            if self.step < grid {
                self.set_stride(grid, 0);
            } else if self.left & (grid - 1) != 0 {
                self.set_empty();
            }
            if self.empty {
                return true;
            }
            let last = self.max();
            let left = self.left;
            *self = CircleRange::raw(left, last.wrapping_add(grid), self.mask, 1);
            true
        } else {
            false
        }
    }

    fn pull_back_or(&mut self, c: u64) -> bool {
        if c == 0 {
            return true;
        }
        if !self.is_single() {
            return false;
        }
        if c & c.wrapping_add(1) != 0 {
            return false; // only a low mask frees a contiguous block
        }
        let v = self.left;
        if v & c != c {
            self.set_empty();
            return true;
        }
        let low = v & !c;
        *self = CircleRange::raw(low, v.wrapping_add(1) & self.mask, self.mask, 1);
        true
    }

    /// Pull `self` back through a full operation: locate the unique
    /// non-constant input, dispatch to the unary/binary pull-backs, and
    /// report which input the refined range applies to.
    pub fn pull_back(&mut self, func: &Function, op: Op, use_nzmask: bool) -> PullBackResult {
        let info = func.op(op);
        let opc = info.opcode();
        let out_size = info
            .output()
            .map(|v| func.var(v).size())
            .unwrap_or(1);

        let mut constant: Option<(usize, Var, u64)> = None;
        let mut variable: Option<Var> = None;
        for (slot, &v) in info.inputs().iter().enumerate() {
            match func.var(v).constant() {
                Some(val) => {
                    if constant.is_some() {
                        return PullBackResult::default();
                    }
                    constant = Some((slot, v, val));
                }
                None => {
                    if variable.is_some() {
                        return PullBackResult::default();
                    }
                    variable = Some(v);
                }
            }
        }
        let Some(target) = variable else {
            return PullBackResult::default();
        };
        let in_size = func.var(target).size();

        match (info.num_inputs(), constant) {
            (1, None) => {
                if self.pull_back_unary(opc, in_size, out_size) {
                    PullBackResult {
                        constrained: Some(target),
                        const_markup: None,
                    }
                } else {
                    PullBackResult::default()
                }
            }
            (2, Some((cslot, cvar, cval))) => {
                if use_nzmask
                    && opc == OpCode::IntAnd
                    && func.var(target).nzmask() & !cval & byte_mask(in_size) == 0
                {
                    // Masking off bits that can never be set: a copy.
                    return PullBackResult {
                        constrained: Some(target),
                        const_markup: Some(cvar),
                    };
                }
                if self.pull_back_binary(opc, cval, cslot, in_size, out_size) {
                    PullBackResult {
                        constrained: Some(target),
                        const_markup: Some(cvar),
                    }
                } else {
                    PullBackResult::default()
                }
            }
            _ => PullBackResult::default(),
        }
    }

    // -- Push-forward -------------------------------------------------------

    /// Forward image of `input` through unary `opc`.
    pub fn push_forward_unary(
        opc: OpCode,
        input: &CircleRange,
        in_size: usize,
        out_size: usize,
    ) -> CircleRange {
        if input.empty {
            return CircleRange::empty();
        }
        match opc {
            OpCode::Copy => *input,
            OpCode::IntNeg => input.reflected(0),
            OpCode::IntNot => input.reflected(input.mask),
            OpCode::IntZext => {
                let out_mask = byte_mask(out_size);
                if input.left < input.right {
                    CircleRange::raw(input.left, input.right, out_mask, input.step)
                } else {
                    let phase = input.left % input.step;
                    CircleRange::raw(
                        phase,
                        phase.wrapping_add(input.mask).wrapping_add(1),
                        out_mask,
                        input.step,
                    )
                }
            }
            OpCode::IntSext => {
                let out_mask = byte_mask(out_size);
                let half = 1u64 << (bits_of(in_size) - 1);
                let offset = out_mask.wrapping_sub(input.mask);
                let crossing = {
                    let pos = half.wrapping_sub(input.left) & input.mask;
                    pos != 0 && (pos as u128) < input.span()
                };
                if crossing {
                    let phase = input.left % input.step;
                    CircleRange {
                        left: phase,
                        right: phase,
                        mask: out_mask,
                        step: input.step,
                        empty: false,
                    }
                } else {
                    let l = if input.left < half {
                        input.left
                    } else {
                        input.left.wrapping_add(offset)
                    };
                    let r = if input.right <= half {
                        input.right
                    } else {
                        input.right.wrapping_add(offset)
                    };
                    CircleRange::raw(l, r & out_mask, out_mask, input.step)
                }
            }
            OpCode::PopCount => {
                CircleRange::raw(0, 8 * in_size as u64 + 1, byte_mask(out_size), 1)
            }
            _ => CircleRange::full(out_size),
        }
    }

    /// Forward image of `(in1, in2)` through binary `opc`. Never fails:
    /// falls back to the full output range, with stride growth bounded
    /// by `max_step`.
    pub fn push_forward_binary(
        opc: OpCode,
        in1: &CircleRange,
        in2: &CircleRange,
        in_size: usize,
        out_size: usize,
        max_step: u64,
    ) -> CircleRange {
        if in1.empty || in2.empty {
            return CircleRange::empty();
        }
        match opc {
            OpCode::IntAdd => add_arcs(in1, in2),
            OpCode::IntSub => add_arcs(in1, &in2.reflected(0)),
            OpCode::IntMult => push_mult(in1, in2, out_size, max_step),
            OpCode::IntAnd | OpCode::IntOr | OpCode::IntXor => push_bitwise(opc, in1, in2, out_size),
            OpCode::IntShl => {
                if in2.is_single() {
                    push_shl(in1, in2.min(), out_size, max_step)
                } else {
                    CircleRange::full(out_size)
                }
            }
            OpCode::IntShr => {
                if in2.is_single() {
                    push_shr(in1, in2.min(), out_size)
                } else {
                    CircleRange::full(out_size)
                }
            }
            OpCode::IntSar => {
                if in2.is_single() {
                    push_sar(in1, in2.min(), in_size, out_size)
                } else {
                    CircleRange::full(out_size)
                }
            }
            OpCode::SubPiece => {
                if in2.is_single() {
                    push_subpiece(in1, in2.min(), in_size, out_size)
                } else {
                    CircleRange::full(out_size)
                }
            }
            _ if opc.is_comparison() => push_comparison(opc, in1, in2, in_size),
            _ => CircleRange::full(out_size),
        }
    }
}

/// Sum of two arcs, stride preserved where a single value merely shifts
/// the other operand.
fn add_arcs(a: &CircleRange, b: &CircleRange) -> CircleRange {
    debug_assert_eq!(a.mask, b.mask);
    let step = if a.is_single() {
        b.step
    } else if b.is_single() {
        a.step
    } else {
        a.step.min(b.step)
    };
    let left = a.left.wrapping_add(b.left) & a.mask;
    let new_span =
        (a.span() - a.step as u128) + (b.span() - b.step as u128) + step as u128;
    if new_span >= a.modulus() {
        let mut out = CircleRange {
            left,
            right: left,
            mask: a.mask,
            step,
            empty: false,
        };
        out.normalize();
        out
    } else {
        CircleRange::raw(left, (left as u128 + new_span) as u64 & a.mask, a.mask, step)
    }
}

fn push_mult(a: &CircleRange, b: &CircleRange, out_size: usize, max_step: u64) -> CircleRange {
    let modulus = byte_mask(out_size) as u128 + 1;
    if a.is_single() && b.is_single() {
        return CircleRange::single(a.min().wrapping_mul(b.min()), out_size);
    }
    let (c, arc) = if a.is_single() {
        (a.min(), b)
    } else if b.is_single() {
        (b.min(), a)
    } else {
        // Product of two genuine ranges.
        if a.left < a.right && b.left < b.right {
            let hi = a.max() as u128 * b.max() as u128;
            if hi < modulus {
                let lo = a.min() as u128 * b.min() as u128;
                return CircleRange::raw(lo as u64, (hi + 1) as u64, byte_mask(out_size), 1);
            }
        }
        return CircleRange::full(out_size);
    };
    if c == 0 {
        return CircleRange::single(0, out_size);
    }
    let step = ((arc.step as u128) << c.trailing_zeros())
        .min(max_step as u128)
        .min(modulus >> 1)
        .max(1) as u64;
    let left = arc.left.wrapping_mul(c) & byte_mask(out_size);
    let new_span = (arc.span() - arc.step as u128) * c as u128 + step as u128;
    if new_span >= modulus {
        let mut out = CircleRange {
            left,
            right: left,
            mask: byte_mask(out_size),
            step,
            empty: false,
        };
        out.normalize();
        out
    } else {
        CircleRange::raw(
            left,
            (left as u128 + new_span) as u64 & byte_mask(out_size),
            byte_mask(out_size),
            step,
        )
    }
}

fn push_bitwise(opc: OpCode, a: &CircleRange, b: &CircleRange, out_size: usize) -> CircleRange {
    let mask = byte_mask(out_size);
    let (_, max1) = a.unsigned_bounds();
    let (_, max2) = b.unsigned_bounds();
    match opc {
        // The result cannot exceed either operand.
        OpCode::IntAnd => CircleRange::raw(0, max1.min(max2).wrapping_add(1) & mask, mask, 1),
        // Bounded by the widest bit position either operand can set.
        _ => {
            let top = max1.max(max2);
            let bl = 64 - top.leading_zeros();
            if bl as usize >= 8 * out_size {
                CircleRange::full(out_size)
            } else {
                CircleRange::raw(0, 1u64 << bl, mask, 1)
            }
        }
    }
}

fn push_shl(a: &CircleRange, sc: u64, out_size: usize, max_step: u64) -> CircleRange {
    let bits = 8 * out_size as u64;
    if sc >= bits {
        return CircleRange::single(0, out_size);
    }
    let mask = byte_mask(out_size);
    let modulus = mask as u128 + 1;
    let step = ((a.step as u128) << sc)
        .min(max_step as u128)
        .min(modulus >> 1)
        .max(1) as u64;
    let left = a.left.wrapping_shl(sc as u32) & mask;
    let new_span = a.span() << sc;
    if new_span >= modulus {
        let mut out = CircleRange {
            left,
            right: left,
            mask,
            step,
            empty: false,
        };
        out.normalize();
        out
    } else {
        CircleRange::raw(left, (left as u128 + new_span) as u64 & mask, mask, step)
    }
}

fn push_shr(a: &CircleRange, sc: u64, out_size: usize) -> CircleRange {
    let bits = 8 * out_size as u64;
    if sc >= bits {
        return CircleRange::single(0, out_size);
    }
    let (lo, hi) = a.unsigned_bounds();
    CircleRange::raw(lo >> sc, (hi >> sc).wrapping_add(1), byte_mask(out_size), 1)
}

fn push_sar(a: &CircleRange, sc: u64, in_size: usize, out_size: usize) -> CircleRange {
    let bits = 8 * in_size as u64;
    let mask = byte_mask(out_size);
    if sc >= bits {
        sc_saturated(a, in_size, out_size)
    } else {
        let (smin, smax) = a.signed_bounds(in_size);
        let lo = (smin >> sc) as u64 & mask;
        let hi = (smax >> sc) as u64 & mask;
        CircleRange::raw(lo, hi.wrapping_add(1) & mask, mask, 1)
    }
}

/// An arithmetic shift that consumes every value bit leaves only the
/// sign: 0 or all-ones.
fn sc_saturated(a: &CircleRange, in_size: usize, out_size: usize) -> CircleRange {
    let (smin, smax) = a.signed_bounds(in_size);
    match (smin < 0, smax >= 0) {
        (true, true) => CircleRange::full(out_size),
        (true, false) => CircleRange::single(byte_mask(out_size), out_size),
        (false, _) => CircleRange::single(0, out_size),
    }
}

fn push_subpiece(a: &CircleRange, offset: u64, in_size: usize, out_size: usize) -> CircleRange {
    // Drop `offset` low bytes, then truncate to the output size.
    let shifted = if offset == 0 {
        *a
    } else {
        push_shr(a, 8 * offset, in_size)
    };
    let out_mask = byte_mask(out_size);
    if shifted.step as u128 >= out_mask as u128 + 1 {
        return CircleRange::single(shifted.left & out_mask, out_size);
    }
    if shifted.span() <= out_mask as u128 + 1 {
        CircleRange::raw(
            shifted.left & out_mask,
            shifted.right & out_mask,
            out_mask,
            shifted.step,
        )
    } else {
        // Too wide to survive truncation; only the congruence remains.
        let mut out = CircleRange {
            left: shifted.left & out_mask,
            right: shifted.left & out_mask,
            mask: out_mask,
            step: shifted.step,
            empty: false,
        };
        out.normalize();
        out
    }
}

fn push_comparison(
    opc: OpCode,
    a: &CircleRange,
    b: &CircleRange,
    in_size: usize,
) -> CircleRange {
    let (can_false, can_true) = match opc {
        OpCode::IntEqual | OpCode::IntNotEqual => {
            let mut meet = *a;
            let disjoint = meet.intersect(b) == crate::IntersectStatus::Disjoint;
            let must_equal = a.is_single() && b.is_single() && a.min() == b.min();
            let (ne, eq) = (!must_equal, !disjoint);
            if opc == OpCode::IntEqual {
                (ne, eq)
            } else {
                (eq, ne)
            }
        }
        OpCode::IntLess | OpCode::IntLessEqual => {
            let (min1, max1) = a.unsigned_bounds();
            let (min2, max2) = b.unsigned_bounds();
            if opc == OpCode::IntLess {
                (max1 >= min2, min1 < max2)
            } else {
                (max1 > min2, min1 <= max2)
            }
        }
        OpCode::IntSLess | OpCode::IntSLessEqual => {
            let (min1, max1) = a.signed_bounds(in_size);
            let (min2, max2) = b.signed_bounds(in_size);
            if opc == OpCode::IntSLess {
                (max1 >= min2, min1 < max2)
            } else {
                (max1 > min2, min1 <= max2)
            }
        }
        _ => (true, true),
    };
    match (can_false, can_true) {
        (true, true) => CircleRange::raw(0, 2, 0xFF, 1),
        (false, true) => CircleRange::bool_range(true),
        (true, false) => CircleRange::bool_range(false),
        (false, false) => CircleRange::empty(),
    }
}

impl CircleRange {
    /// Render the range as the simplest equivalent comparison of the
    /// variable against a constant: `(opcode, constant, constant slot)`.
    /// Returns `None` when no single comparison captures the set.
    pub fn translate_to_comparison(&self) -> Option<(OpCode, u64, usize)> {
        if self.empty || self.is_full() || self.step != 1 {
            return None;
        }
        let bits = 64 - self.mask.leading_zeros() as u64;
        let half = 1u64 << (bits - 1);
        if self.is_single() {
            return Some((OpCode::IntEqual, self.left, 1));
        }
        if self.left == self.right.wrapping_add(1) & self.mask {
            // Everything except one value.
            return Some((OpCode::IntNotEqual, self.right, 1));
        }
        if self.left == 0 {
            // x < right
            return Some((OpCode::IntLess, self.right, 1));
        }
        if self.right == 0 {
            // left <= x
            return Some((OpCode::IntLessEqual, self.left, 0));
        }
        if self.left == half {
            // x <s right
            return Some((OpCode::IntSLess, self.right, 1));
        }
        if self.right == half {
            // left <=s x
            return Some((OpCode::IntSLessEqual, self.left, 0));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IntersectStatus;

    fn rng(left: u64, right: u64, size: usize, step: u64) -> CircleRange {
        CircleRange::with_bounds(left, right, size, step)
    }

    #[test]
    fn comparison_ranges_from_guards() {
        // x < 2, 4 bytes.
        let r = CircleRange::comparison_range(OpCode::IntLess, 2, 1, 4, true);
        assert_eq!(r, rng(0, 2, 4, 1));
        assert_eq!(r.min(), 0);
        assert_eq!(r.max(), 1);
        assert_eq!(r.cardinality(), 2);

        // 5 <= x, 4 bytes.
        let r = CircleRange::comparison_range(OpCode::IntLessEqual, 5, 0, 4, true);
        assert_eq!(r, rng(5, 0, 4, 1));
        assert_eq!(r.cardinality(), 0x1_0000_0000 - 5);

        // x <s 0 over 1 byte: the negative half.
        let r = CircleRange::comparison_range(OpCode::IntSLess, 0, 1, 1, true);
        assert_eq!(r, rng(0x80, 0, 1, 1));
        assert!(r.contains(0xFF));
        assert!(!r.contains(0));
    }

    #[test]
    fn comparison_range_and_negation_partition_the_domain() {
        let cases = [
            (OpCode::IntLess, 7u64, 1usize),
            (OpCode::IntLess, 0, 1),
            (OpCode::IntLess, 0xFF, 0),
            (OpCode::IntLessEqual, 0xFF, 1),
            (OpCode::IntSLess, 0x80, 1),
            (OpCode::IntSLessEqual, 0x13, 0),
            (OpCode::IntEqual, 9, 1),
            (OpCode::IntNotEqual, 9, 1),
        ];
        for (opc, c, cslot) in cases {
            let t = CircleRange::comparison_range(opc, c, cslot, 1, true);
            let f = CircleRange::comparison_range(opc, c, cslot, 1, false);
            for v in 0..=0xFFu64 {
                let int = t.contains(v) as u32 + f.contains(v) as u32;
                assert_eq!(int, 1, "{opc:?} c={c} slot={cslot} v={v}");
            }
        }
    }

    #[test]
    fn pull_back_add_shifts() {
        let mut r = rng(10, 20, 4, 1);
        assert!(r.pull_back_binary(OpCode::IntAdd, 10, 1, 4, 4));
        assert_eq!(r, rng(0, 10, 4, 1));

        // Wrapping below zero.
        let mut r = rng(0, 4, 4, 1);
        assert!(r.pull_back_binary(OpCode::IntAdd, 1, 0, 4, 4));
        assert_eq!(r, rng(0xFFFF_FFFF, 3, 4, 1));
    }

    #[test]
    fn pull_back_sub_both_slots() {
        // out = in - 3 and out in [0, 5): in in [3, 8).
        let mut r = rng(0, 5, 4, 1);
        assert!(r.pull_back_binary(OpCode::IntSub, 3, 1, 4, 4));
        assert_eq!(r, rng(3, 8, 4, 1));

        // out = 10 - in and out in {4}: in = {6}.
        let mut r = CircleRange::single(4, 4);
        assert!(r.pull_back_binary(OpCode::IntSub, 10, 0, 4, 4));
        assert_eq!(r, CircleRange::single(6, 4));
    }

    #[test]
    fn pull_back_neg_and_not_are_reflections() {
        let mut r = rng(1, 5, 1, 1);
        assert!(r.pull_back_unary(OpCode::IntNeg, 1, 1));
        // -(in) in [1,5) means in in {0xFC..0xFF}.
        assert_eq!(r, rng(0xFC, 0x100 & 0xFF, 1, 1));
        for v in [0xFCu64, 0xFD, 0xFE, 0xFF] {
            assert!(r.contains(v));
        }

        let mut r = CircleRange::single(0, 1);
        assert!(r.pull_back_unary(OpCode::IntNot, 1, 1));
        assert_eq!(r, CircleRange::single(0xFF, 1));
    }

    #[test]
    fn pull_back_zext_narrows_domain() {
        let mut r = rng(0x80, 0x300, 4, 1);
        assert!(r.pull_back_unary(OpCode::IntZext, 1, 4));
        assert_eq!(r.mask(), 0xFF);
        assert_eq!(r, rng(0x80, 0, 1, 1));

        // Entirely above the small domain: no inputs at all.
        let mut r = rng(0x200, 0x300, 4, 1);
        assert!(r.pull_back_unary(OpCode::IntZext, 1, 4));
        assert!(r.is_empty());
    }

    #[test]
    fn pull_back_sext_keeps_sign_band() {
        // Outputs must look sign-extended; [0xFFFFFFF0, 0x10) qualifies.
        let mut r = rng(0xFFFF_FFF0, 0x10, 4, 1);
        assert!(r.pull_back_unary(OpCode::IntSext, 1, 4));
        assert_eq!(r.mask(), 0xFF);
        assert_eq!(r, rng(0xF0, 0x10, 1, 1));
    }

    #[test]
    fn pull_back_mult_odd_single() {
        // out = in * 3, out = {21}: in = {7}.
        let mut r = CircleRange::single(21, 4);
        assert!(r.pull_back_binary(OpCode::IntMult, 3, 1, 4, 4));
        assert_eq!(r, CircleRange::single(7, 4));
    }

    #[test]
    fn pull_back_shl_single() {
        // out = in << 4, out = {0x50}: in = 5 + k*2^28.
        let mut r = CircleRange::single(0x50, 4);
        assert!(r.pull_back_binary(OpCode::IntShl, 4, 1, 4, 4));
        assert!(r.contains(5));
        assert!(r.contains(5 + (1 << 28)));
        assert_eq!(r.step(), 1 << 28);
        assert_eq!(r.cardinality(), 16);

        // An output with low bits set has no pre-image.
        let mut r = CircleRange::single(0x51, 4);
        assert!(r.pull_back_binary(OpCode::IntShl, 4, 1, 4, 4));
        assert!(r.is_empty());
    }

    #[test]
    fn pull_back_shr_scales_up() {
        let mut r = rng(1, 4, 4, 1);
        assert!(r.pull_back_binary(OpCode::IntShr, 8, 1, 4, 4));
        assert_eq!(r, rng(0x100, 0x400, 4, 1));
    }

    #[test]
    fn pull_back_and_with_masks() {
        // Low mask: out = in & 0xFF, out = {0x12}: in = 0x12 + k*0x100.
        let mut r = CircleRange::single(0x12, 4);
        assert!(r.pull_back_binary(OpCode::IntAnd, 0xFF, 1, 4, 4));
        assert!(r.contains(0x12));
        assert!(r.contains(0x112));
        assert_eq!(r.step(), 0x100);

        // High mask: out = in & 0xFFFFFF00, out = {0x1200}: a block.
        let mut r = CircleRange::single(0x1200, 4);
        assert!(r.pull_back_binary(OpCode::IntAnd, 0xFFFF_FF00, 1, 4, 4));
        assert_eq!(r, rng(0x1200, 0x1300, 4, 1));

        // Impossible output bits.
        let mut r = CircleRange::single(0x12, 4);
        assert!(r.pull_back_binary(OpCode::IntAnd, 0xFF00, 1, 4, 4));
        assert!(r.is_empty());
    }

    #[test]
    fn pull_back_or_low_mask() {
        // out = in | 0xF, out = {0x1F}: in = [0x10, 0x20).
        let mut r = CircleRange::single(0x1F, 4);
        assert!(r.pull_back_binary(OpCode::IntOr, 0xF, 1, 4, 4));
        assert_eq!(r, rng(0x10, 0x20, 4, 1));
    }

    #[test]
    fn pull_back_comparison_half_planes() {
        // (x < 100) == true.
        let mut r = CircleRange::bool_range(true);
        assert!(r.pull_back_binary(OpCode::IntLess, 100, 1, 4, 1));
        assert_eq!(r, rng(0, 100, 4, 1));

        // (x < 100) == false.
        let mut r = CircleRange::bool_range(false);
        assert!(r.pull_back_binary(OpCode::IntLess, 100, 1, 4, 1));
        assert_eq!(r, rng(100, 0, 4, 1));

        // Undetermined boolean: no constraint.
        let mut r = rng(0, 2, 1, 1);
        assert!(r.pull_back_binary(OpCode::IntLess, 100, 1, 4, 1));
        assert!(r.is_full());
    }

    #[test]
    fn push_forward_scales_stride() {
        // [0, 10) * {2}: [0, 20) step 2.
        let a = rng(0, 10, 4, 1);
        let two = CircleRange::single(2, 4);
        let out = CircleRange::push_forward_binary(OpCode::IntMult, &a, &two, 4, 4, 8);
        assert_eq!(out, rng(0, 20, 4, 2));
    }

    #[test]
    fn push_forward_add_preserves_stride() {
        let a = rng(0, 100, 4, 4);
        let four = CircleRange::single(4, 4);
        let out = CircleRange::push_forward_binary(OpCode::IntAdd, &a, &four, 4, 4, 8);
        assert_eq!(out, rng(4, 104, 4, 4));
    }

    #[test]
    fn push_forward_sub_wraps() {
        let a = CircleRange::single(2, 4);
        let b = CircleRange::single(5, 4);
        let out = CircleRange::push_forward_binary(OpCode::IntSub, &a, &b, 4, 4, 8);
        assert_eq!(out, CircleRange::single(0xFFFF_FFFD, 4));
    }

    #[test]
    fn push_forward_bitwise_bounds() {
        let a = rng(0, 16, 4, 1);
        let b = rng(0, 16, 4, 1);
        let or = CircleRange::push_forward_binary(OpCode::IntOr, &a, &b, 4, 4, 8);
        assert_eq!(or, rng(0, 16, 4, 1));

        let c = rng(0, 10, 4, 1);
        let and = CircleRange::push_forward_binary(OpCode::IntAnd, &a, &c, 4, 4, 8);
        assert_eq!(and, rng(0, 10, 4, 1));
    }

    #[test]
    fn push_forward_zext_and_sext() {
        let a = rng(0x10, 0x20, 1, 1);
        let z = CircleRange::push_forward_unary(OpCode::IntZext, &a, 1, 4);
        assert_eq!(z, rng(0x10, 0x20, 4, 1));

        let neg = rng(0xF0, 0, 1, 1);
        let s = CircleRange::push_forward_unary(OpCode::IntSext, &neg, 1, 4);
        assert_eq!(s, rng(0xFFFF_FFF0, 0, 4, 1));

        // Crossing the sign boundary degrades to the whole wide domain.
        let cross = rng(0x70, 0x90, 1, 1);
        let s = CircleRange::push_forward_unary(OpCode::IntSext, &cross, 1, 4);
        assert!(s.is_full());
    }

    #[test]
    fn push_forward_comparison_outcomes() {
        let low = rng(0, 10, 4, 1);
        let high = rng(20, 30, 4, 1);
        let t = CircleRange::push_forward_binary(OpCode::IntLess, &low, &high, 4, 1, 8);
        assert_eq!(t, CircleRange::bool_range(true));

        let f = CircleRange::push_forward_binary(OpCode::IntLess, &high, &low, 4, 1, 8);
        assert_eq!(f, CircleRange::bool_range(false));

        let e = CircleRange::push_forward_binary(OpCode::IntEqual, &low, &high, 4, 1, 8);
        assert_eq!(e, CircleRange::bool_range(false));

        let maybe = CircleRange::push_forward_binary(OpCode::IntLess, &low, &low, 4, 1, 8);
        assert_eq!(maybe.cardinality(), 2);
    }

    #[test]
    fn push_then_pull_is_superset() {
        // Invertible unaries: pulling the pushed image back recovers at
        // least the original set.
        let samples = [
            rng(0, 10, 1, 1),
            rng(0xF0, 8, 1, 1),
            rng(0, 64, 1, 4),
            CircleRange::single(0x7F, 1),
        ];
        for opc in [OpCode::IntNeg, OpCode::IntNot] {
            for r in samples {
                let pushed = CircleRange::push_forward_unary(opc, &r, 1, 1);
                let mut back = pushed;
                assert!(back.pull_back_unary(opc, 1, 1));
                for v in r.iter() {
                    assert!(back.contains(v), "{opc:?} lost {v:#x} from {r}");
                }
            }
        }
    }

    #[test]
    fn boolean_conversion() {
        let mut r = rng(0, 10, 4, 1);
        r.convert_to_boolean();
        assert_eq!(r.cardinality(), 2);

        let mut r = CircleRange::single(0, 4);
        r.convert_to_boolean();
        assert_eq!(r, CircleRange::bool_range(false));

        let mut r = rng(3, 10, 4, 1);
        r.convert_to_boolean();
        assert_eq!(r, CircleRange::bool_range(true));
    }

    #[test]
    fn translate_round_trips_guards() {
        let cases = [
            rng(0, 100, 4, 1),
            rng(5, 0, 4, 1),
            CircleRange::single(42, 4),
            rng(0x8000_0000, 10, 4, 1),
        ];
        for r in cases {
            let (opc, c, cslot) = r.translate_to_comparison().expect("translatable");
            let again = CircleRange::comparison_range(opc, c, cslot, 4, true);
            assert_eq!(again, r, "{r} -> {opc:?} {c:#x} slot {cslot}");
        }
        assert!(CircleRange::full(4).translate_to_comparison().is_none());
        assert!(rng(3, 9, 4, 1).translate_to_comparison().is_none());
        let _ = IntersectStatus::Produced;
    }
}
