use super::{eval_size, mismatch, CoderCtx, FieldCoder};
use crate::bits::{BitReader, BitWriter};
use crate::charset::Charset;
use crate::expr::Scope;
use crate::result::{Error, Result};
use crate::template::{BindingDescriptor, Template};
use crate::value::Value;

pub(crate) struct StringFixedCoder;

impl FieldCoder for StringFixedCoder {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::StringFixed { size, charset } = bind else {
            return Err(mismatch(bind));
        };
        let size = eval_size(ctx, template, size, scope)?;
        let charset = Charset::lookup(charset)?;
        Ok(Value::Str(reader.get_text(size, charset)?))
    }

    fn encode(
        &self,
        ctx: &CoderCtx,
        writer: &mut BitWriter,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::StringFixed { size, charset } = bind else {
            return Err(mismatch(bind));
        };
        let size = eval_size(ctx, template, size, scope)?;
        let charset = Charset::lookup(charset)?;
        let bytes = charset.encode(value.as_str()?)?;
        if bytes.len() != size {
            return Err(Error::Value(format!(
                "string occupies {} bytes, the field holds {}",
                bytes.len(),
                size
            )));
        }
        writer.put_bytes(&bytes);
        Ok(())
    }
}

pub(crate) struct StringTerminatedCoder;

impl FieldCoder for StringTerminatedCoder {
    fn decode(
        &self,
        _ctx: &CoderCtx,
        reader: &mut BitReader,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::StringTerminated { terminator, consume, charset } = bind else {
            return Err(mismatch(bind));
        };
        let charset = Charset::lookup(charset)?;
        Ok(Value::Str(reader.get_text_until(*terminator, *consume, charset)?))
    }

    // The terminator is appended only when decode consumed it; with
    // consume off the surrounding template owns the delimiter.
    fn encode(
        &self,
        _ctx: &CoderCtx,
        writer: &mut BitWriter,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::StringTerminated { terminator, consume, charset } = bind else {
            return Err(mismatch(bind));
        };
        let charset = Charset::lookup(charset)?;
        writer.put_text(value.as_str()?, charset)?;
        if *consume {
            writer.put_u8(*terminator);
        }
        Ok(())
    }
}
