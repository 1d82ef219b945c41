//! End-to-end solver tests: systems built through the IR builder,
//! covering acyclic convergence, branch constraints, loop widening, and
//! the stack-relative classification.

use wyvern_ir::{Function, FunctionBuilder, OpCode, Var};
use wyvern_range::CircleRange;
use wyvern_vsa::{SolveOutcome, SolverConfig, TypeCode, ValueSetSolver};

fn rng(left: u64, right: u64, size: usize, step: u64) -> CircleRange {
    CircleRange::with_bounds(left, right, size, step)
}

#[test]
fn acyclic_flow_converges_in_one_sweep() {
    // y = (x * 2) + 1
    let mut fb = FunctionBuilder::new();
    let b0 = fb.block();
    let x = fb.input(4).unwrap();
    let c2 = fb.constant(2, 4).unwrap();
    let c1 = fb.constant(1, 4).unwrap();
    let double = fb.op(b0, OpCode::IntMult, &[x, c2], 4).unwrap();
    let y = fb.op(b0, OpCode::IntAdd, &[double, c1], 4).unwrap();
    let func = fb.finish().unwrap();

    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[y], None).unwrap();
    let outcome = solver.solve(100);

    assert_eq!(outcome, SolveOutcome::Converged);
    // One iteration per node, nothing revisited.
    assert_eq!(solver.num_iterations(), 3);
    assert!(solver.value_set(x).unwrap().range().is_full());
    // Doubling keeps only the even residues; the add shifts them odd.
    assert_eq!(solver.value_set(double).unwrap().range(), &rng(0, 0, 4, 2));
    assert_eq!(solver.value_set(y).unwrap().range(), &rng(1, 1, 4, 2));
}

#[test]
fn constant_sink_is_singleton() {
    let mut fb = FunctionBuilder::new();
    let _b0 = fb.block();
    let c = fb.constant(42, 4).unwrap();
    let func = fb.finish().unwrap();

    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[c], None).unwrap();
    solver.solve(10);
    assert_eq!(
        solver.value_set(c).unwrap().range(),
        &CircleRange::single(42, 4)
    );
}

#[test]
fn empty_sinks_is_an_error() {
    let mut fb = FunctionBuilder::new();
    let _ = fb.block();
    let func = fb.finish().unwrap();
    let mut solver = ValueSetSolver::new(&func);
    assert!(solver.establish_value_sets(&[], None).is_err());
}

#[test]
fn merge_of_constants_becomes_strided_pair() {
    let mut fb = FunctionBuilder::new();
    let b0 = fb.block();
    let c4 = fb.constant(4, 4).unwrap();
    let c8 = fb.constant(8, 4).unwrap();
    let merged = fb.op(b0, OpCode::MultiEqual, &[c4, c8], 4).unwrap();
    let func = fb.finish().unwrap();

    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[merged], None).unwrap();
    assert_eq!(solver.solve(100), SolveOutcome::Converged);
    assert_eq!(solver.value_set(merged).unwrap().range(), &rng(4, 12, 4, 4));
}

/// Build a function whose entry branches on `x < 10`, with one add in
/// each arm. Returns (func, x, true-arm output, false-arm output).
fn guarded_function() -> (Function, Var, Var, Var) {
    let mut fb = FunctionBuilder::new();
    let b0 = fb.block();
    let bt = fb.block();
    let bf = fb.block();
    let x = fb.input(4).unwrap();
    let c10 = fb.constant(10, 4).unwrap();
    let c0 = fb.constant(0, 4).unwrap();
    let c1 = fb.constant(1, 4).unwrap();
    let cond = fb.op(b0, OpCode::IntLess, &[x, c10], 1).unwrap();
    fb.cbranch(b0, cond, bt, bf).unwrap();
    let z = fb.op(bt, OpCode::IntAdd, &[x, c0], 4).unwrap();
    let w = fb.op(bf, OpCode::IntAdd, &[x, c1], 4).unwrap();
    (fb.finish().unwrap(), x, z, w)
}

#[test]
fn branch_constraints_split_the_domain() {
    let (func, x, z, w) = guarded_function();
    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[z, w], None).unwrap();
    assert_eq!(solver.solve(100), SolveOutcome::Converged);

    // x itself is unconstrained; the reads in each arm are refined.
    assert!(solver.value_set(x).unwrap().range().is_full());
    assert_eq!(solver.value_set(z).unwrap().range(), &rng(0, 10, 4, 1));
    assert_eq!(solver.value_set(w).unwrap().range(), &rng(11, 1, 4, 1));

    // The guard range is recorded as x's widening landmark.
    assert_eq!(
        solver.value_set(x).unwrap().landmark(),
        Some(&rng(0, 10, 4, 1))
    );

    // And the refined arm translates back to the comparison it came from.
    assert_eq!(
        solver.value_set(z).unwrap().range().translate_to_comparison(),
        Some((OpCode::IntLess, 10, 1))
    );
}

/// The counting loop: `i = 0; while (i < 100) i += 4;` with the phi for
/// `i` in the header, the increment in the body.
fn counting_loop() -> (Function, Var) {
    let mut fb = FunctionBuilder::new();
    let entry = fb.block();
    let header = fb.block();
    let body = fb.block();
    let exit = fb.block();
    fb.branch(entry, header).unwrap();

    let c0 = fb.constant(0, 4).unwrap();
    let c4 = fb.constant(4, 4).unwrap();
    let c100 = fb.constant(100, 4).unwrap();

    // The phi reads the increment defined later in the body; build the
    // increment against a placeholder input first, then the phi.
    let i_next_seed = fb.input(4).unwrap();
    let i = fb
        .op(header, OpCode::MultiEqual, &[c0, i_next_seed], 4)
        .unwrap();
    let cond = fb.op(header, OpCode::IntLess, &[i, c100], 1).unwrap();
    fb.cbranch(header, cond, body, exit).unwrap();
    let i_next = fb.op(body, OpCode::IntAdd, &[i, c4], 4).unwrap();
    fb.branch(body, header).unwrap();
    fb.redirect_input(i_next_seed, i_next);
    (fb.finish().unwrap(), i)
}

#[test]
fn loop_widens_to_exact_strided_range() {
    let (func, i) = counting_loop();
    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[i], None).unwrap();
    let outcome = solver.solve(1000);

    assert_eq!(outcome, SolveOutcome::Converged);
    assert!(solver.num_iterations() < 1000);
    // {0, 4, 8, ..., 100}: the guard bound plus one final increment.
    assert_eq!(solver.value_set(i).unwrap().range(), &rng(0, 104, 4, 4));
}

#[test]
fn widening_threshold_sensitivity() {
    for threshold in 1..=6u32 {
        let (func, i) = counting_loop();
        let mut solver = ValueSetSolver::new(&func).with_config(
            SolverConfig::builder()
                .widening_threshold(threshold)
                .build(),
        );
        solver.establish_value_sets(&[i], None).unwrap();
        assert_eq!(
            solver.solve(1000),
            SolveOutcome::Converged,
            "threshold {threshold}"
        );
        let range = solver.value_set(i).unwrap().range();
        for v in (0..=100).step_by(4) {
            assert!(range.contains(v), "threshold {threshold}: {range} misses {v}");
        }
        if threshold >= 2 {
            assert_eq!(range, &rng(0, 104, 4, 4), "threshold {threshold}");
        }
    }
}

#[test]
fn iteration_ceiling_is_a_normal_outcome() {
    let (func, i) = counting_loop();
    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[i], None).unwrap();
    assert_eq!(solver.solve(3), SolveOutcome::IterationLimit);
    assert_eq!(solver.num_iterations(), 4);
}

#[test]
fn stack_relative_offsets_propagate() {
    let mut fb = FunctionBuilder::new();
    let b0 = fb.block();
    let sp = fb.input(8).unwrap();
    let c8 = fb.constant(8, 8).unwrap();
    let c16 = fb.constant(16, 8).unwrap();
    let local = fb.op(b0, OpCode::IntSub, &[sp, c8], 8).unwrap();
    let deeper = fb.op(b0, OpCode::IntSub, &[local, c16], 8).unwrap();
    let diff = fb.op(b0, OpCode::IntSub, &[local, deeper], 8).unwrap();
    let func = fb.finish().unwrap();

    let mut solver = ValueSetSolver::new(&func);
    solver
        .establish_value_sets(&[deeper, diff], Some(sp))
        .unwrap();
    assert_eq!(solver.solve(100), SolveOutcome::Converged);

    let sp_set = solver.value_set(sp).unwrap();
    assert_eq!(sp_set.type_code(), TypeCode::StackRelative);
    assert_eq!(sp_set.range(), &CircleRange::single(0, 8));

    let local_set = solver.value_set(local).unwrap();
    assert_eq!(local_set.type_code(), TypeCode::StackRelative);
    assert_eq!(
        local_set.range(),
        &CircleRange::single(8u64.wrapping_neg(), 8)
    );

    let deeper_set = solver.value_set(deeper).unwrap();
    assert_eq!(deeper_set.type_code(), TypeCode::StackRelative);
    assert_eq!(
        deeper_set.range(),
        &CircleRange::single(24u64.wrapping_neg(), 8)
    );

    // Subtracting two stack offsets yields an absolute distance.
    let diff_set = solver.value_set(diff).unwrap();
    assert_eq!(diff_set.type_code(), TypeCode::Absolute);
    assert_eq!(diff_set.range(), &CircleRange::single(16, 8));
}

#[test]
fn results_remain_sound_under_nested_loops() {
    // Outer loop carrying i, inner self-looping on j; the inner result
    // feeds the outer phi, nesting one component inside the other.
    let mut fb = FunctionBuilder::new();
    let entry = fb.block();
    let outer = fb.block();
    let inner = fb.block();
    let exit = fb.block();
    fb.branch(entry, outer).unwrap();

    let c0 = fb.constant(0, 4).unwrap();
    let c1 = fb.constant(1, 4).unwrap();
    let c50 = fb.constant(50, 4).unwrap();

    let back_seed = fb.input(4).unwrap();
    let inner_seed = fb.input(4).unwrap();
    let i = fb
        .op(outer, OpCode::MultiEqual, &[c0, back_seed], 4)
        .unwrap();
    let cond_outer = fb.op(outer, OpCode::IntLess, &[i, c50], 1).unwrap();
    fb.cbranch(outer, cond_outer, inner, exit).unwrap();

    let j = fb
        .op(inner, OpCode::MultiEqual, &[i, inner_seed], 4)
        .unwrap();
    let j_next = fb.op(inner, OpCode::IntAdd, &[j, c1], 4).unwrap();
    let cond_inner = fb.op(inner, OpCode::IntLess, &[j_next, c50], 1).unwrap();
    fb.cbranch(inner, cond_inner, inner, outer).unwrap();
    fb.redirect_input(back_seed, j_next);
    fb.redirect_input(inner_seed, j_next);
    let func = fb.finish().unwrap();

    let mut solver = ValueSetSolver::new(&func);
    solver.establish_value_sets(&[i, j_next], None).unwrap();
    let outcome = solver.solve(10_000);
    assert_eq!(outcome, SolveOutcome::Converged);

    // Soundness: every value the loops concretely produce is covered.
    let i_range = solver.value_set(i).unwrap().range();
    assert!(i_range.contains(0));
    assert!(i_range.contains(50));
    let j_range = solver.value_set(j_next).unwrap().range();
    assert!(j_range.contains(1));
    assert!(j_range.contains(50));
}
