/// Partial-order seam shared by the abstract domains layered on this IR.
pub trait Lattice {
    fn join(&self, other: &Self) -> Self;
    fn meet(&self, other: &Self) -> Self;
    fn is_subseteq(&self, other: &Self) -> bool;
}

pub trait HasBottom: Lattice {
    fn bottom() -> Self;
}

pub trait HasTop: Lattice {
    fn top() -> Self;
}
