use num_bigint::BigInt;

use super::{eval_size, mismatch, CoderCtx, FieldCoder};
use crate::bits::{BitReader, BitWriter};
use crate::expr::Scope;
use crate::result::{Error, Result};
use crate::template::{BindingDescriptor, Template};
use crate::value::Value;

pub(crate) struct IntegerCoder;

impl FieldCoder for IntegerCoder {
    fn decode(
        &self,
        _ctx: &CoderCtx,
        reader: &mut BitReader,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::Integer { bits, byte_order, signed } = bind else {
            return Err(mismatch(bind));
        };
        if *bits > 64 {
            let value = if *signed {
                reader.get_big_int(*bits, *byte_order)?
            } else {
                reader.get_big_uint(*bits, *byte_order)?
            };
            return Ok(Value::Big(value));
        }
        if *signed {
            Ok(Value::Int(reader.get_int(*bits, *byte_order)?))
        } else {
            Ok(Value::from_u64(reader.get_uint(*bits, *byte_order)?))
        }
    }

    fn encode(
        &self,
        _ctx: &CoderCtx,
        writer: &mut BitWriter,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::Integer { bits, byte_order, signed } = bind else {
            return Err(mismatch(bind));
        };
        if *bits > 64 {
            let big = match value {
                Value::Big(big) => big.clone(),
                Value::Int(i) => BigInt::from(*i),
                other => return Err(Error::Value(format!("expected an integer, got {}", other.kind()))),
            };
            return writer.put_big_int(&big, *bits, *byte_order);
        }
        if *signed {
            return writer.put_int(value.as_int()?, *bits, *byte_order);
        }
        let raw = match value {
            // Unsigned 64-bit values above i64::MAX decode as bigints.
            Value::Big(big) => u64::try_from(big.clone())
                .map_err(|_| Error::Overflow { bits: *bits })?,
            _ => {
                let int = value.as_int()?;
                if int < 0 {
                    return Err(Error::Value(format!(
                        "negative value {} for an unsigned field",
                        int
                    )));
                }
                int as u64
            }
        };
        writer.put_uint(raw, *bits, *byte_order)
    }
}

pub(crate) struct FloatCoder;

impl FieldCoder for FloatCoder {
    fn decode(
        &self,
        _ctx: &CoderCtx,
        reader: &mut BitReader,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::Float { bits, byte_order } = bind else {
            return Err(mismatch(bind));
        };
        let value = match *bits {
            32 => reader.get_f32(*byte_order)? as f64,
            _ => reader.get_f64(*byte_order)?,
        };
        Ok(Value::Float(value))
    }

    fn encode(
        &self,
        _ctx: &CoderCtx,
        writer: &mut BitWriter,
        _template: &Template,
        bind: &BindingDescriptor,
        _scope: &Scope,
        value: &Value,
    ) -> Result<()> {
        let BindingDescriptor::Float { bits, byte_order } = bind else {
            return Err(mismatch(bind));
        };
        let Value::Float(value) = value else {
            return Err(Error::Value(format!("expected a float, got {}", value.kind())));
        };
        match *bits {
            32 => writer.put_f32(*value as f32, *byte_order),
            _ => writer.put_f64(*value, *byte_order),
        }
        Ok(())
    }
}

pub(crate) struct BitsCoder;

impl FieldCoder for BitsCoder {
    fn decode(
        &self,
        ctx: &CoderCtx,
        reader: &mut BitReader,
        template: &Template,
        bind: &BindingDescriptor,
        scope: &Scope,
    ) -> Result<Value> {
        let BindingDescriptor::Bits { size, bit_order } = bind else {
            return Err(mismatch(bind));
        };
        let count = eval_size(ctx, template, size, scope)?;
        Ok(Value::Bits(reader.get_bits(count, *bit_order)?))
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
        let BindingDescriptor::Bits { size, bit_order } = bind else {
            return Err(mismatch(bind));
        };
        let Value::Bits(set) = value else {
            return Err(Error::Value(format!("expected a bit set, got {}", value.kind())));
        };
        let count = eval_size(ctx, template, size, scope)?;
        writer.put_bits(set, count, *bit_order);
        Ok(())
    }
}
