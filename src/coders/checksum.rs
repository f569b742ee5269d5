use super::{mismatch, CoderCtx, FieldCoder};
use crate::bits::{BitReader, BitWriter};
use crate::expr::Scope;
use crate::result::Result;
use crate::template::{BindingDescriptor, Template};
use crate::value::Value;

// Reads the transmitted value; verification is deferred to the parser
// once the whole message range is known. Encode reserves placeholder
// bytes for the parser to patch after the pass.
pub(crate) struct ChecksumCoder;

impl FieldCoder for ChecksumCoder {
    fn decode(
        &self,
        _ctx: &CoderCtx,
        reader: &mut BitReader,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::Checksum { bits, byte_order, .. } = bind else {
            return Err(mismatch(bind));
        };
        Ok(Value::from_u64(reader.get_uint(*bits, *byte_order)?))
    }

    fn encode(
        &self,
        _ctx: &CoderCtx,
        writer: &mut BitWriter,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
        _value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::Checksum { bits, .. } = bind else {
            return Err(mismatch(bind));
        };
        writer.reserve((*bits / 8) as usize)?;
        Ok(())
    }
}
