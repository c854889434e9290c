//! The host framework's operator contract: definitions, the runtime
//! operator trait, and the type-name keyed registry node dispatch goes
//! through.

use std::collections::BTreeMap;

use crate::backend::PoolBackend;
use crate::dtypes::Dtype;
use crate::ops::PoolOp;
use crate::tensor::Tensor;
use crate::Error;

/// An attribute value in an operator definition.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Str(String),
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(v: Vec<i64>) -> Self {
        AttrValue::Ints(v)
    }
}

/// A graph node's operator definition: the operator type name plus its
/// static attributes.
#[derive(Debug, Clone, Default)]
pub struct OpDef {
    type_name: String,
    attrs: BTreeMap<String, AttrValue>,
}

impl OpDef {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Integer attribute, or `None` when absent. A present attribute of
    /// another kind is a configuration error, not a silent default.
    pub fn int_attr(&self, name: &str) -> Result<Option<i64>, Error> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(AttrValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(Error::InvalidConfig(format!(
                "attribute {name} should be an int, got {other:?}"
            ))),
        }
    }

    /// Integer-list attribute, the vector form of the conv/pool schema
    /// (`kernels`, `strides`, `pads`, `dilations`).
    pub fn ints_attr(&self, name: &str) -> Result<Option<&[i64]>, Error> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(AttrValue::Ints(v)) => Ok(Some(v)),
            Some(other) => Err(Error::InvalidConfig(format!(
                "attribute {name} should be an int list, got {other:?}"
            ))),
        }
    }

    pub fn str_attr(&self, name: &str) -> Result<Option<&str>, Error> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(AttrValue::Str(v)) => Ok(Some(v)),
            Some(other) => Err(Error::InvalidConfig(format!(
                "attribute {name} should be a string, got {other:?}"
            ))),
        }
    }
}

/// A constructed graph operator, ready to run once per forward pass.
///
/// Inputs and outputs are bound by slot; this crate's operators consume
/// exactly one input at slot 0 and produce exactly one output at slot 0.
pub trait Operator<E: Dtype> {
    fn run(
        &mut self,
        inputs: &[&Tensor<E>],
        outputs: &mut [&mut Tensor<E>],
    ) -> Result<(), Error>;
}

type Factory<E, D> = Box<dyn Fn(&OpDef, &D) -> Result<Box<dyn Operator<E>>, Error>>;

/// Maps operator type names to constructors for one backend.
///
/// The backend type parameter is the dispatch selector: a registry built
/// over [crate::backend::Cpu] constructs operators that plan and execute
/// on the host.
pub struct OpRegistry<E, D> {
    factories: BTreeMap<String, Factory<E, D>>,
}

impl<E: Dtype, D> OpRegistry<E, D> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    pub fn register(
        &mut self,
        type_name: &str,
        f: impl Fn(&OpDef, &D) -> Result<Box<dyn Operator<E>>, Error> + 'static,
    ) {
        self.factories.insert(type_name.to_string(), Box::new(f));
    }

    /// Constructs the operator for a node definition.
    pub fn create(&self, def: &OpDef, dev: &D) -> Result<Box<dyn Operator<E>>, Error> {
        match self.factories.get(def.type_name()) {
            Some(f) => f(def, dev),
            None => Err(Error::InvalidConfig(format!(
                "no operator registered for type {:?}",
                def.type_name()
            ))),
        }
    }
}

/// Registers the pooling adapter under both of its operator types.
pub fn register_pool_ops<E, D>(reg: &mut OpRegistry<E, D>)
where
    E: Dtype,
    D: PoolBackend<E> + 'static,
    D::Plan: 'static,
    D::Workspace: 'static,
{
    for name in ["AveragePool", "MaxPool"] {
        reg.register(name, |def, dev| {
            Ok(Box::new(PoolOp::new(def, dev.clone())?))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Cpu;
    use crate::tests::TestDtype;

    #[test]
    fn test_attr_kind_mismatch() {
        let def = OpDef::new("MaxPool").with_attr("kernel", "two");
        assert!(matches!(def.int_attr("kernel"), Err(Error::InvalidConfig(_))));
        assert_eq!(def.int_attr("stride").unwrap(), None);

        let def = OpDef::new("MaxPool").with_attr("kernels", 2);
        assert!(matches!(def.ints_attr("kernels"), Err(Error::InvalidConfig(_))));
        let def = OpDef::new("MaxPool").with_attr("kernels", vec![2i64, 3]);
        assert_eq!(def.ints_attr("kernels").unwrap(), Some(&[2i64, 3][..]));
    }

    #[test]
    fn test_registry_unknown_type() {
        let mut reg: OpRegistry<TestDtype, Cpu> = OpRegistry::new();
        register_pool_ops(&mut reg);
        let err = reg.create(&OpDef::new("SoftmaxPool"), &Cpu);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_registry_creates_both_pool_kinds() {
        let mut reg: OpRegistry<TestDtype, Cpu> = OpRegistry::new();
        register_pool_ops(&mut reg);
        let def = OpDef::new("MaxPool").with_attr("kernel", 2);
        assert!(reg.create(&def, &Cpu).is_ok());
        let def = OpDef::new("AveragePool").with_attr("kernel", 2);
        assert!(reg.create(&def, &Cpu).is_ok());
    }
}
