//! Graph-level optimization passes over a set of tensors.
//!
//! A pass never mutates tensors itself. It inspects the current set through
//! [`OptimizationPass::plan`] and returns a list of [`PassEdit`]s, which
//! [`TensorSet`] applies in order. Keeping the set as the sole owner means a
//! pass cannot leave a dangling reference behind when it removes or replaces
//! an entry.
//!
//! Passes are looked up by name through a [`PassRegistry`]. The process-wide
//! registry holds the built-ins and is read-only:
//!
//! ```rust
//! use annof::passes::{TensorSet, create_pass};
//! use annof::tensors::Tensor;
//!
//! let mut set = TensorSet::from(vec![Tensor::zeros(vec![100])]);
//! let pass = create_pass("workgroup_size").unwrap();
//! set.apply_pass(pass.as_ref());
//! assert_eq!(set.tensors()[0].len(), 128);
//! ```

mod latency;
mod memory;
mod workgroup;

pub use latency::LatencyReductionPass;
pub use memory::MemoryReductionPass;
pub use workgroup::{DEFAULT_ALIGNMENT, WorkGroupSizeOptimization};

use crate::tensors::Tensor;
use std::collections::BTreeMap;

/// One change to a [`TensorSet`], expressed against the set as it is when the
/// edit is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum PassEdit {
    /// Put a new tensor in slot `idx`.
    Replace(usize, Tensor),
    /// Drop slot `idx`, shifting later slots down by one.
    Remove(usize),
    /// New slot `j` takes the tensor from old slot `order[j]`. Must be a
    /// permutation of `0..len`.
    Reorder(Vec<usize>),
}

/// A transform over a tensor set.
pub trait OptimizationPass: Send + Sync {
    /// Registry name of the pass.
    fn name(&self) -> &'static str;

    /// Edits that turn `tensors` into the optimized set; empty when there is
    /// nothing to do.
    fn plan(&self, tensors: &[Tensor]) -> Vec<PassEdit>;
}

/// Zero-argument constructor stored in a [`PassRegistry`].
pub type PassFactory = fn() -> Box<dyn OptimizationPass>;

/// Name → factory mapping. Entries are only ever added.
#[derive(Debug, Clone, Default)]
pub struct PassRegistry {
    factories: BTreeMap<&'static str, PassFactory>,
}

const BUILTINS: &[(&str, PassFactory)] = &[
    ("memory_reduction", || Box::new(MemoryReductionPass)),
    ("latency_reduction", || Box::new(LatencyReductionPass)),
    ("workgroup_size", || Box::new(WorkGroupSizeOptimization::default())),
];

impl PassRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in pass.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for &(name, factory) in BUILTINS {
            registry.register(name, factory);
        }
        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register(&mut self, name: &'static str, factory: PassFactory) {
        if self.factories.insert(name, factory).is_some() {
            log::debug!("pass {name} re-registered");
        }
    }

    /// A fresh pass instance, or `None` if `name` is unknown.
    pub fn create(&self, name: &str) -> Option<Box<dyn OptimizationPass>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_REGISTRY: PassRegistry = PassRegistry::with_builtins();
}

/// The process-wide registry of built-in passes.
pub fn global_registry() -> &'static PassRegistry {
    &GLOBAL_REGISTRY
}

/// Creates a built-in pass by name.
pub fn create_pass(name: &str) -> Option<Box<dyn OptimizationPass>> {
    GLOBAL_REGISTRY.create(name)
}

/// Owns the tensors a pass pipeline works on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorSet {
    tensors: Vec<Tensor>,
}

impl From<Vec<Tensor>> for TensorSet {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self { tensors }
    }
}

impl TensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tensor: Tensor) {
        self.tensors.push(tensor);
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn into_tensors(self) -> Vec<Tensor> {
        self.tensors
    }

    /// Plans `pass` against the current set and applies the edits in order.
    ///
    /// Returns the number of edits applied.
    ///
    /// # Panics
    /// Panics if the pass emits an out-of-range index or a `Reorder` that is
    /// not a permutation.
    pub fn apply_pass(&mut self, pass: &dyn OptimizationPass) -> usize {
        let edits = pass.plan(&self.tensors);
        log::trace!("{}: {} edit(s) on {} tensor(s)", pass.name(), edits.len(), self.len());
        let count = edits.len();
        for edit in edits {
            self.apply_edit(edit);
        }
        count
    }

    /// Runs the pass registered as `name`. Unknown names are skipped with a
    /// warning and return `false`.
    pub fn apply_named(&mut self, registry: &PassRegistry, name: &str) -> bool {
        match registry.create(name) {
            Some(pass) => {
                self.apply_pass(pass.as_ref());
                true
            }
            None => {
                log::warn!("skipping unknown optimization pass {name:?}");
                false
            }
        }
    }

    /// Runs each named pass in order, returning how many were found.
    pub fn run_pipeline<'a>(
        &mut self,
        registry: &PassRegistry,
        names: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        names
            .into_iter()
            .filter(|name| self.apply_named(registry, name))
            .count()
    }

    fn apply_edit(&mut self, edit: PassEdit) {
        match edit {
            PassEdit::Replace(idx, tensor) => self.tensors[idx] = tensor,
            PassEdit::Remove(idx) => {
                self.tensors.remove(idx);
            }
            PassEdit::Reorder(order) => {
                assert_eq!(order.len(), self.tensors.len(), "reorder length mismatch");
                let mut slots: Vec<Option<Tensor>> =
                    self.tensors.drain(..).map(Some).collect();
                self.tensors = order
                    .into_iter()
                    .map(|i| match slots[i].take() {
                        Some(t) => t,
                        None => panic!("reorder repeats slot {i}"),
                    })
                    .collect();
            }
        }
    }
}
