//! Graph tensors and the registry operators resolve them through
//!
//! A tensor here carries no data: only its shape, the operator that produces
//! it and the DRAM region the allocator assigned to it.

use crate::allocator::CompileContext;
use crate::error::{Error, Result};
use npusim_isa::Addr;
use std::collections::{BTreeMap, HashMap};

/// Structural id of a tensor (shares the counter with operator ids)
pub type TensorId = u32;

/// Named, shaped DRAM region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    id: TensorId,
    name: String,
    shape: Vec<u32>,
    producer: Option<u32>,
    address: Addr,
    size_bytes: u64,
}

impl Tensor {
    pub fn id(&self) -> TensorId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimensions, outermost first
    pub fn shape(&self) -> &[u32] {
        &self.shape
    }

    /// Operator that writes this tensor, `None` for graph inputs and weights
    pub fn producer(&self) -> Option<u32> {
        self.producer
    }

    /// DRAM base address
    pub fn address(&self) -> Addr {
        self.address
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn numel(&self) -> u64 {
        numel(&self.shape)
    }

    /// Shape as (N, C, H, W), for rank-4 activations only
    pub fn dims4(&self) -> Option<[u32; 4]> {
        <[u32; 4]>::try_from(self.shape.as_slice()).ok()
    }
}

pub(crate) fn numel(shape: &[u32]) -> u64 {
    shape.iter().map(|&d| u64::from(d)).product()
}

/// Name and id lookup of tensors, plus output registration for operators
///
/// Ids and DRAM regions are drawn from the [`CompileContext`] of the pass
/// that declares the tensor.
pub trait TensorRegistry {
    /// Look a tensor up by graph name
    fn find_tensor(&self, name: &str) -> Option<&Tensor>;

    /// Look a tensor up by id
    fn tensor(&self, id: TensorId) -> Option<&Tensor>;

    /// Register a new tensor and allocate its DRAM region
    fn add_tensor(
        &mut self,
        ctx: &mut CompileContext,
        producer: Option<u32>,
        name: &str,
        shape: Vec<u32>,
    ) -> Result<TensorId>;

    /// Replace shape and producer of an existing tensor, keeping its id
    fn redefine_tensor(
        &mut self,
        ctx: &mut CompileContext,
        id: TensorId,
        producer: u32,
        shape: Vec<u32>,
    ) -> Result<()>;

    /// Make `name` resolve to the existing tensor `id`
    fn alias(&mut self, name: &str, id: TensorId) -> Result<()>;

    /// Register `name` as the output of `producer`, redefining a placeholder
    /// of the same name if one was declared earlier
    fn define_output(
        &mut self,
        ctx: &mut CompileContext,
        producer: u32,
        name: &str,
        shape: Vec<u32>,
    ) -> Result<TensorId> {
        match self.find_tensor(name).map(Tensor::id) {
            Some(id) => {
                self.redefine_tensor(ctx, id, producer, shape)?;
                Ok(id)
            }
            None => self.add_tensor(ctx, Some(producer), name, shape),
        }
    }

    /// Look a tensor up by name, failing if it is unknown
    fn require_tensor(&self, name: &str) -> Result<&Tensor> {
        self.find_tensor(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    /// Look a tensor up by id, failing if it is unknown
    fn require_id(&self, id: TensorId) -> Result<&Tensor> {
        self.tensor(id).ok_or_else(|| Error::UnknownTensor(format!("#{id}")))
    }
}

/// In-memory tensor registry for one model
#[derive(Debug, Clone)]
pub struct Model {
    precision: u32,
    tensors: BTreeMap<TensorId, Tensor>,
    names: HashMap<String, TensorId>,
}

impl Model {
    /// Empty model whose tensors hold `precision`-byte elements
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            tensors: BTreeMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Tensors in id order
    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.values()
    }

    fn region_bytes(&self, shape: &[u32]) -> u64 {
        numel(shape) * u64::from(self.precision)
    }
}

impl TensorRegistry for Model {
    fn find_tensor(&self, name: &str) -> Option<&Tensor> {
        self.names.get(name).and_then(|id| self.tensors.get(id))
    }

    fn tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    fn add_tensor(
        &mut self,
        ctx: &mut CompileContext,
        producer: Option<u32>,
        name: &str,
        shape: Vec<u32>,
    ) -> Result<TensorId> {
        let size_bytes = self.region_bytes(&shape);
        let address = ctx.allocator.allocate(size_bytes)?;
        let id = ctx.ids.generate_id();

        tracing::trace!(id, name, ?shape, address, size_bytes, "registered tensor");

        self.names.insert(name.to_string(), id);
        self.tensors.insert(
            id,
            Tensor {
                id,
                name: name.to_string(),
                shape,
                producer,
                address,
                size_bytes,
            },
        );
        Ok(id)
    }

    fn redefine_tensor(
        &mut self,
        ctx: &mut CompileContext,
        id: TensorId,
        producer: u32,
        shape: Vec<u32>,
    ) -> Result<()> {
        let size_bytes = self.region_bytes(&shape);
        let tensor = self
            .tensors
            .get_mut(&id)
            .ok_or_else(|| Error::UnknownTensor(format!("#{id}")))?;

        // A region only moves when the tensor outgrows it
        if size_bytes > tensor.size_bytes {
            tensor.address = ctx.allocator.allocate(size_bytes)?;
        }
        tracing::trace!(id, name = %tensor.name, ?shape, producer, "redefined tensor");

        tensor.size_bytes = size_bytes;
        tensor.shape = shape;
        tensor.producer = Some(producer);
        Ok(())
    }

    fn alias(&mut self, name: &str, id: TensorId) -> Result<()> {
        if !self.tensors.contains_key(&id) {
            return Err(Error::UnknownTensor(format!("#{id}")));
        }
        self.names.insert(name.to_string(), id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_find() {
        let mut ctx = CompileContext::new();
        let mut model = Model::new(2);
        let id = model.add_tensor(&mut ctx, None, "x", vec![1, 3, 8, 8]).unwrap();

        let tensor = model.find_tensor("x").unwrap();
        assert_eq!(tensor.id(), id);
        assert_eq!(tensor.dims4(), Some([1, 3, 8, 8]));
        assert_eq!(tensor.size_bytes(), 384);
        assert_eq!(tensor.producer(), None);
        assert_eq!(model.tensor(id).map(Tensor::name), Some("x"));
        assert!(model.find_tensor("y").is_none());
    }

    #[test]
    fn test_tensor_regions_do_not_overlap() {
        let mut ctx = CompileContext::new();
        let mut model = Model::new(4);
        let a = model.add_tensor(&mut ctx, None, "a", vec![100]).unwrap();
        let b = model.add_tensor(&mut ctx, None, "b", vec![3]).unwrap();
        let (a, b) = (model.tensor(a).unwrap(), model.tensor(b).unwrap());
        assert!(a.address() + a.size_bytes() <= b.address());
        assert_eq!(b.address() % 256, 0);
    }

    #[test]
    fn test_define_output_redefines_placeholder() {
        let mut ctx = CompileContext::new();
        let mut model = Model::new(1);
        let placeholder = model.add_tensor(&mut ctx, None, "y", vec![1]).unwrap();
        let first_address = model.tensor(placeholder).unwrap().address();

        let id = model.define_output(&mut ctx, 42, "y", vec![4, 4]).unwrap();
        assert_eq!(id, placeholder);

        let tensor = model.tensor(id).unwrap();
        assert_eq!(tensor.shape(), &[4, 4]);
        assert_eq!(tensor.producer(), Some(42));
        assert_ne!(tensor.address(), first_address);
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn test_shrinking_redefinition_keeps_region() {
        let mut ctx = CompileContext::new();
        let mut model = Model::new(1);
        let id = model.add_tensor(&mut ctx, None, "y", vec![64]).unwrap();
        let address = model.tensor(id).unwrap().address();
        model.redefine_tensor(&mut ctx, id, 7, vec![8]).unwrap();
        assert_eq!(model.tensor(id).unwrap().address(), address);
    }

    #[test]
    fn test_alias_and_unknown_lookups() {
        let mut ctx = CompileContext::new();
        let mut model = Model::new(1);
        let id = model.add_tensor(&mut ctx, None, "x", vec![2]).unwrap();
        model.alias("x_pooled", id).unwrap();
        assert_eq!(model.require_tensor("x_pooled").unwrap().id(), id);

        assert!(matches!(model.alias("z", id + 100), Err(Error::UnknownTensor(_))));
        assert!(matches!(model.require_tensor("missing"), Err(Error::UnknownTensor(name)) if name == "missing"));
    }
}
