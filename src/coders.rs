use std::collections::HashMap;

use semver::Version;

use crate::bits::{BitReader, BitWriter};
use crate::checksum::ChecksumRegistry;
use crate::expr::{Evaluator, Scope};
use crate::registry::TemplateRegistry;
use crate::result::{Error, Result};
use crate::template::{BindingDescriptor, DescriptorKind, SizeExpr, Template};
use crate::value::Value;

mod checksum;
mod composite;
mod numeric;
mod text;

// Shared collaborators handed to every coder call. The registry
// reference lets composite coders recurse into nested decodes.
#[derive(Clone, Copy)]
pub struct CoderCtx<'a> {
    pub coders: &'a CoderRegistry,
    pub templates: &'a TemplateRegistry,
    pub evaluator: &'a Evaluator,
    pub checksums: &'a ChecksumRegistry,
    pub vars: &'a HashMap<String, Value>,
    pub version: Option<&'a Version>,
}

pub trait FieldCoder: Send + Sync {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value>;

    fn encode(
        &self,
        ctx: &CoderCtx,
        writer: &mut BitWriter,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
        value: &Value,
    ) -> Result<()>;
}

pub struct CoderRegistry {
    coders: HashMap<DescriptorKind, Box<dyn FieldCoder>>,
}

impl CoderRegistry {
    pub fn register(&mut self, kind: DescriptorKind, coder: Box<dyn FieldCoder>) -> Result<()> {
        if self.coders.contains_key(&kind) {
            return Err(Error::config(
                "coder registry",
                format!("a coder for {:?} is already registered", kind),
            ));
        }
        self.coders.insert(kind, coder);
        Ok(())
    }

    pub fn get(&self, kind: DescriptorKind) -> Result<&dyn FieldCoder> {
        self.coders
            .get(&kind)
            .map(Box::as_ref)
            .ok_or(Error::CoderMissing(kind))
    }
}

impl Default for CoderRegistry {
    fn default() -> Self {
        let mut coders: HashMap<DescriptorKind, Box<dyn FieldCoder>> = HashMap::new();
        coders.insert(DescriptorKind::Integer, Box::new(numeric::IntegerCoder));
        coders.insert(DescriptorKind::Float, Box::new(numeric::FloatCoder));
        coders.insert(DescriptorKind::Bits, Box::new(numeric::BitsCoder));
        coders.insert(DescriptorKind::StringFixed, Box::new(text::StringFixedCoder));
        coders.insert(
            DescriptorKind::StringTerminated,
            Box::new(text::StringTerminatedCoder),
        );
        coders.insert(
            DescriptorKind::ArrayPrimitive,
            Box::new(composite::ArrayPrimitiveCoder),
        );
        coders.insert(
            DescriptorKind::ArrayObject,
            Box::new(composite::ArrayObjectCoder),
        );
        coders.insert(DescriptorKind::Object, Box::new(composite::ObjectCoder));
        coders.insert(DescriptorKind::Checksum, Box::new(checksum::ChecksumCoder));
        Self { coders }
    }
}

impl std::fmt::Debug for CoderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoderRegistry")
            .field("kinds", &self.coders.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub(crate) fn eval_size(
    ctx: &CoderCtx,
    template: &Template,
    size: &SizeExpr,
    scope: &Scope,
) -> Result<usize> {
    match size {
        SizeExpr::Const(size) => Ok(*size),
        SizeExpr::Expr(source) => ctx.evaluator.eval_size(template.expr(source)?, scope),
    }
}

pub(crate) fn mismatch(bind: &BindingDescriptor) -> Error {
    Error::Value(format!(
        "descriptor {:?} handed to the wrong coder",
        bind.kind()
    ))
}
