use log::{debug, trace};

use crate::bits::{BitOrder, BitReader, BitSet, BitWriter, ByteOrder};
use crate::coders::CoderCtx;
use crate::expr::Scope;
use crate::result::{Error, Result};
use crate::template::{
    version_admits, BindingDescriptor, DescriptorKind, FieldPlan, SkipAmount, Template,
};
use crate::value::{ObjectValue, Value};

pub(crate) fn decode_message(
    ctx: &CoderCtx,
    reader: &mut BitReader,
    template: &Template,
) -> Result<(ObjectValue, usize)> {
    let header = template
        .header()
        .ok_or_else(|| Error::Value(format!("{} is not a message template", template.context())))?;
    if !version_admits(ctx.version, header.min_version.as_ref(), header.max_version.as_ref()) {
        return Err(Error::Version(format!(
            "template {} is outside the active protocol version",
            template.context()
        )));
    }

    let start_offset = reader.position();
    consume_start_marker(reader, template)?;
    let obj = decode_struct(ctx, reader, template, None)?;

    if let Some(index) = *template.checksum() {
        let plan = &template.fields()[index];
        if version_admits(ctx.version, plan.min_version.as_ref(), plan.max_version.as_ref()) {
            verify_checksum(ctx, reader, template, &obj, plan, start_offset)?;
        }
    }
    if let Some(end) = &header.end {
        let offset = reader.position();
        let bytes = reader
            .get_bytes(end.len())
            .map_err(|e| e.in_decode(template.context(), "<end marker>", offset))?;
        if bytes != *end {
            return Err(Error::Decoding {
                template: template.context().clone(),
                field: "<end marker>".into(),
                offset,
                reason: "end marker mismatch".into(),
            });
        }
    }

    let consumed = reader.position() - start_offset;
    debug!("decoded {} ({} bytes)", template.context(), consumed);
    Ok((obj, consumed))
}

fn consume_start_marker(reader: &mut BitReader, template: &Template) -> Result<()> {
    let header = match template.header() {
        Some(header) => header,
        None => return Ok(()),
    };
    let offset = reader.position();
    let window = header
        .start
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .min(reader.len().saturating_sub(offset));
    reader.mark();
    let peeked = reader.get_bytes(window);
    reader.restore();
    let peeked = peeked?;
    let marker = header
        .start
        .iter()
        .filter(|m| m.len() <= peeked.len() && peeked[..m.len()] == m[..])
        .max_by_key(|m| m.len())
        .ok_or_else(|| Error::Decoding {
            template: template.context().clone(),
            field: "<start marker>".into(),
            offset,
            reason: "start marker mismatch".into(),
        })?;
    reader.get_bytes(marker.len())?;
    Ok(())
}

// Decodes the plan's fields and the post-decode evaluated fields into a
// fresh object. `outer_root` is set for nested decodes so expressions
// keep seeing the message root.
pub(crate) fn decode_struct(
    ctx: &CoderCtx,
    reader: &mut BitReader,
    template: &Template,
    outer_root: Option<&ObjectValue>,
) -> Result<ObjectValue> {
    let mut obj = ObjectValue::new(template.context().clone());
    for plan in template.fields() {
        if !version_admits(ctx.version, plan.min_version.as_ref(), plan.max_version.as_ref()) {
            continue;
        }
        let decoded = decode_field(ctx, reader, template, plan, &obj, outer_root)
            .map_err(|e| e.in_decode(template.context(), &plan.name, reader.position()))?;
        if let Some(value) = decoded {
            obj.set(plan.name.clone(), value);
        }
    }
    for evaluated in template.evaluated() {
        let value = {
            let scope = Scope {
                root: outer_root.unwrap_or(&obj),
                current: &obj,
                vars: ctx.vars,
                prefix: None,
            };
            ctx.evaluator.eval(template.expr(&evaluated.expression)?, &scope)
        }
        .map_err(|e| e.in_decode(template.context(), &evaluated.name, reader.position()))?;
        obj.set(evaluated.name.clone(), value);
    }
    Ok(obj)
}

fn decode_field(
    ctx: &CoderCtx,
    reader: &mut BitReader,
    template: &Template,
    plan: &FieldPlan,
    obj: &ObjectValue,
    outer_root: Option<&ObjectValue>,
) -> Result<Option<Value>> {
    let scope = Scope {
        root: outer_root.unwrap_or(obj),
        current: obj,
        vars: ctx.vars,
        prefix: None,
    };
    if let Some(condition) = &plan.condition {
        if !ctx.evaluator.eval_bool(template.expr(condition)?, &scope)? {
            trace!("condition skips field {}", plan.name);
            return Ok(None);
        }
    }
    for skip in &plan.skips {
        if let Some(condition) = &skip.condition {
            if !ctx.evaluator.eval_bool(template.expr(condition)?, &scope)? {
                continue;
            }
        }
        match skip.amount {
            SkipAmount::Bits(count) => {
                reader.get_bits(count as usize, BitOrder::Little)?;
            }
            SkipAmount::UntilTerminator { terminator } => loop {
                match reader.get_u8() {
                    Ok(byte) if byte == terminator => break,
                    Ok(_) => {}
                    Err(Error::BufferExhausted(_)) => break,
                    Err(e) => return Err(e),
                }
            },
        }
    }
    let coder = ctx.coders.get(plan.bind.kind())?;
    trace!("decoding field {}", plan.name);
    let raw = coder.decode(ctx, reader, template, &plan.bind, &scope)?;
    let user = match &plan.converter {
        Some(converter) => converter.decode(raw)?,
        None => raw,
    };
    if let Some(validator) = &plan.validator {
        validator.validate(&user)?;
    }
    Ok(Some(user))
}

fn verify_checksum(
    ctx: &CoderCtx,
    reader: &BitReader,
    template: &Template,
    obj: &ObjectValue,
    plan: &FieldPlan,
    start_offset: usize,
) -> Result<()> {
    let BindingDescriptor::Checksum { skip_start, skip_end, algorithm, start_value, .. } = &plan.bind
    else {
        return Err(Error::Value("checksum plan without a checksum descriptor".into()));
    };
    // A checksum gated off by its own condition was never read.
    let Some(transmitted) = obj.get(&plan.name) else {
        return Ok(());
    };
    let end_len = template
        .header()
        .and_then(|h| h.end.as_ref())
        .map_or(0, Vec::len);
    let total = reader.position() - start_offset + end_len;
    let offset = reader.position();
    let fail = |reason: String| Error::Decoding {
        template: template.context().clone(),
        field: plan.name.clone(),
        offset,
        reason,
    };

    if skip_start + skip_end > total || start_offset + total > reader.len() {
        return Err(fail("checksum range reaches outside the message".into()));
    }
    let algorithm_fn = ctx
        .checksums
        .get(algorithm)
        .map_err(|e| fail(e.to_string()))?;
    let computed = algorithm_fn(
        reader.bytes(),
        start_offset + skip_start,
        start_offset + total - skip_end,
        *start_value,
    );
    let transmitted = match transmitted {
        Value::Int(i) => *i as u64,
        Value::Big(big) => u64::try_from(big.clone())
            .map_err(|_| fail("checksum value out of range".into()))?,
        other => return Err(fail(format!("checksum field holds a {}", other.kind()))),
    };
    if computed != transmitted {
        debug!(
            "checksum mismatch on {}: computed 0x{:x}, transmitted 0x{:x}",
            template.context(),
            computed,
            transmitted
        );
        return Err(fail(format!(
            "checksum mismatch: computed 0x{:x}, transmitted 0x{:x}",
            computed, transmitted
        )));
    }
    Ok(())
}

pub(crate) fn encode_message(
    ctx: &CoderCtx,
    template: &Template,
    obj: &ObjectValue,
) -> Result<Vec<u8>> {
    let header = template
        .header()
        .ok_or_else(|| Error::Value(format!("{} is not a message template", template.context())))?;
    if !version_admits(ctx.version, header.min_version.as_ref(), header.max_version.as_ref()) {
        return Err(Error::Version(format!(
            "template {} is outside the active protocol version",
            template.context()
        )));
    }

    let mut writer = BitWriter::new();
    writer.put_bytes(&header.start[0]);
    let checksum_offset = encode_fields(ctx, &mut writer, template, obj, None)?;
    if let Some(end) = &header.end {
        writer.put_bytes(end);
    }
    writer.flush();

    if let (Some(offset), Some(index)) = (checksum_offset, *template.checksum()) {
        let plan = &template.fields()[index];
        let BindingDescriptor::Checksum { bits, byte_order, skip_start, skip_end, algorithm, start_value } =
            &plan.bind
        else {
            return Err(Error::Value("checksum plan without a checksum descriptor".into()));
        };
        let total = writer.position();
        if skip_start + skip_end > total {
            return Err(Error::Encoding {
                template: template.context().clone(),
                field: plan.name.clone(),
                reason: "checksum range reaches outside the message".into(),
            });
        }
        let algorithm_fn = ctx
            .checksums
            .get(algorithm)
            .map_err(|e| e.in_encode(template.context(), &plan.name))?;
        let computed = algorithm_fn(writer.written(), *skip_start, total - *skip_end, *start_value);
        let count = (*bits / 8) as usize;
        let mut bytes = vec![0u8; count];
        for (j, slot) in bytes.iter_mut().enumerate() {
            *slot = match byte_order {
                ByteOrder::Big => (computed >> (8 * (count - 1 - j))) as u8,
                ByteOrder::Little => (computed >> (8 * j)) as u8,
            };
        }
        writer
            .patch(offset, &bytes)
            .map_err(|e| e.in_encode(template.context(), &plan.name))?;
    }

    let out = writer.into_bytes();
    debug!("encoded {} ({} bytes)", template.context(), out.len());
    Ok(out)
}

pub(crate) fn encode_struct(
    ctx: &CoderCtx,
    writer: &mut BitWriter,
    template: &Template,
    obj: &ObjectValue,
    outer_root: Option<&ObjectValue>,
) -> Result<()> {
    encode_fields(ctx, writer, template, obj, outer_root).map(|_| ())
}

fn encode_fields(
    ctx: &CoderCtx,
    writer: &mut BitWriter,
    template: &Template,
    obj: &ObjectValue,
    outer_root: Option<&ObjectValue>,
) -> Result<Option<usize>> {
    let mut checksum_offset = None;
    for plan in template.fields() {
        if !version_admits(ctx.version, plan.min_version.as_ref(), plan.max_version.as_ref()) {
            continue;
        }
        encode_field(ctx, writer, template, plan, obj, outer_root, &mut checksum_offset)
            .map_err(|e| e.in_encode(template.context(), &plan.name))?;
    }
    Ok(checksum_offset)
}

fn encode_field(
    ctx: &CoderCtx,
    writer: &mut BitWriter,
    template: &Template,
    plan: &FieldPlan,
    obj: &ObjectValue,
    outer_root: Option<&ObjectValue>,
    checksum_offset: &mut Option<usize>,
) -> Result<()> {
    let scope = Scope {
        root: outer_root.unwrap_or(obj),
        current: obj,
        vars: ctx.vars,
        prefix: None,
    };
    if let Some(condition) = &plan.condition {
        if !ctx.evaluator.eval_bool(template.expr(condition)?, &scope)? {
            return Ok(());
        }
    }
    for skip in &plan.skips {
        if let Some(condition) = &skip.condition {
            if !ctx.evaluator.eval_bool(template.expr(condition)?, &scope)? {
                continue;
            }
        }
        match skip.amount {
            SkipAmount::Bits(count) => {
                writer.put_bits(&BitSet::new(count as usize), count as usize, BitOrder::Little);
            }
            SkipAmount::UntilTerminator { terminator } => writer.put_u8(terminator),
        }
    }
    let coder = ctx.coders.get(plan.bind.kind())?;
    if plan.bind.kind() == DescriptorKind::Checksum {
        *checksum_offset = Some(writer.position());
        return coder.encode(ctx, writer, template, &plan.bind, &scope, &Value::Null);
    }
    let value = obj
        .get(&plan.name)
        .ok_or_else(|| Error::Value(format!("object carries no `{}` field", plan.name)))?;
    if let Some(validator) = &plan.validator {
        validator.validate(value)?;
    }
    let raw = match &plan.converter {
        Some(converter) => converter.encode(value.clone())?,
        None => value.clone(),
    };
    trace!("encoding field {}", plan.name);
    coder.encode(ctx, writer, template, &plan.bind, &scope, &raw)
}
