use std::sync::Arc;

use anyhow::Result;
use assert_matches::assert_matches;
use wirebind::bits::{BitOrder, BitReader, BitSet, ByteOrder};
use wirebind::checksum::CRC16_CCITT;
use wirebind::convert::{Converter, Validator};
use wirebind::result::Error;
use wirebind::template::{
    BindingDescriptor, Choice, ConfigSpec, FieldDef, Header, SkipDef, TemplateBuilder,
};
use wirebind::value::{ObjectValue, Value};
use wirebind::Codec;

fn hex(s: &str) -> Vec<u8> {
    let digits: Vec<u32> = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).unwrap())
        .collect();
    digits.chunks(2).map(|p| (p[0] << 4 | p[1]) as u8).collect()
}

const ACK: &str = "2b41434b066f2446010a0311235e40035110420600abcd07e30405083639001256080d0a";

fn ack_codec() -> Result<Codec> {
    let mut codec = Codec::new();
    let mut ack = TemplateBuilder::message("AckMessage");
    ack.header(
        Header::new(&["+ACK"])
            .with_charset("US-ASCII")
            .with_end("\r\n"),
    );
    ack.field(FieldDef::new("messageHeader", BindingDescriptor::uint(8, ByteOrder::Big)));
    ack.field(FieldDef::new("messageType", BindingDescriptor::uint(8, ByteOrder::Big)));
    ack.field(FieldDef::new("mask", BindingDescriptor::bit_set(8usize, BitOrder::Little)));
    ack.field(
        FieldDef::new("length", BindingDescriptor::uint(8, ByteOrder::Big)).with_condition("mask[2]"),
    );
    ack.field(
        FieldDef::new("deviceType", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_condition("mask[2]"),
    );
    ack.field(
        FieldDef::new(
            "protocolVersion",
            BindingDescriptor::array(2usize, BindingDescriptor::uint(8, ByteOrder::Big)),
        )
        .with_condition("mask[5]"),
    );
    ack.field(
        FieldDef::new(
            "firmwareVersion",
            BindingDescriptor::array(2usize, BindingDescriptor::uint(8, ByteOrder::Big)),
        )
        .with_condition("mask[6]"),
    );
    ack.field(FieldDef::new(
        "imei",
        BindingDescriptor::array(8usize, BindingDescriptor::uint(8, ByteOrder::Big)),
    ));
    ack.field(FieldDef::new("id", BindingDescriptor::uint(16, ByteOrder::Big)));
    ack.field(FieldDef::new("correlationId", BindingDescriptor::uint(16, ByteOrder::Big)));
    ack.field(FieldDef::new(
        "eventTime",
        BindingDescriptor::array(7usize, BindingDescriptor::uint(8, ByteOrder::Big)),
    ));
    ack.field(FieldDef::new("messageId", BindingDescriptor::uint(16, ByteOrder::Big)));
    ack.field(FieldDef::new("checksum", BindingDescriptor::Checksum {
        bits: 16,
        byte_order: ByteOrder::Big,
        skip_start: 4,
        skip_end: 4,
        algorithm: CRC16_CCITT.to_owned(),
        start_value: 0xFFFF,
    }));
    codec.register(ack)?;
    Ok(codec)
}

#[test]
fn ack_round_trip() -> Result<()> {
    let codec = ack_codec()?;
    let bytes = hex(ACK);

    let decoded = codec.decode(&bytes)?;
    assert_eq!(decoded.consumed, bytes.len());
    let obj = &decoded.value;
    assert_eq!(obj.context(), "AckMessage");
    assert_eq!(obj.get("messageType"), Some(&Value::Int(0x6f)));
    assert_eq!(obj.get("mask"), Some(&Value::Bits(BitSet::from_indices(8, &[2, 5]))));
    assert_eq!(obj.get("length"), Some(&Value::Int(0x46)));
    assert_eq!(obj.get("deviceType"), Some(&Value::Int(0x01)));
    assert_eq!(
        obj.get("protocolVersion"),
        Some(&Value::List(vec![Value::Int(0x0a), Value::Int(0x03)]))
    );
    assert_eq!(obj.get("firmwareVersion"), None);
    assert_eq!(obj.get("id"), Some(&Value::Int(0x0600)));
    assert_eq!(obj.get("correlationId"), Some(&Value::Int(0xabcd)));
    assert_eq!(obj.get("messageId"), Some(&Value::Int(0x0012)));
    assert_eq!(obj.get("checksum"), Some(&Value::Int(0x5608)));

    let encoded = codec.encode(obj)?;
    assert_eq!(encoded, bytes);
    assert_eq!(codec.encode(obj)?, encoded);
    Ok(())
}

#[test]
fn ack_checksum_rejects_corruption() -> Result<()> {
    let codec = ack_codec()?;
    let mut bytes = hex(ACK);
    bytes[12] ^= 0x01; // inside the covered range

    let err = codec.decode(&bytes).unwrap_err();
    assert_matches!(err, Error::Decoding { ref reason, .. } if reason.contains("checksum mismatch"));
    Ok(())
}

#[test]
fn ack_conditions_follow_the_mask() -> Result<()> {
    let codec = ack_codec()?;
    // Same message with bit 2 cleared and length/deviceType absent.
    let mut obj = ObjectValue::new("AckMessage");
    obj.set("messageHeader", Value::Int(0x06));
    obj.set("messageType", Value::Int(0x6f));
    obj.set("mask", Value::Bits(BitSet::from_indices(8, &[5])));
    obj.set(
        "protocolVersion",
        Value::List(vec![Value::Int(0x0a), Value::Int(0x03)]),
    );
    obj.set(
        "imei",
        Value::List((0..8).map(Value::Int).collect()),
    );
    obj.set("id", Value::Int(1));
    obj.set("correlationId", Value::Int(2));
    obj.set("eventTime", Value::List((1..=7).map(Value::Int).collect()));
    obj.set("messageId", Value::Int(3));

    let encoded = codec.encode(&obj)?;
    // marker + 3 + 2 + 8 + 2 + 2 + 7 + 2 + checksum + end
    assert_eq!(encoded.len(), 4 + 26 + 2 + 2);
    let decoded = codec.decode(&encoded)?;
    assert_eq!(decoded.value.get("length"), None);
    assert_eq!(decoded.value.get("deviceType"), None);
    assert_eq!(codec.encode(&decoded.value)?, encoded);
    Ok(())
}

fn choice_codec() -> Result<Codec> {
    let mut codec = Codec::new();

    let mut type1 = TemplateBuilder::structure("TestType1");
    type1.field(FieldDef::new("value", BindingDescriptor::uint(16, ByteOrder::Big)));
    codec.register(type1)?;

    let mut type2 = TemplateBuilder::structure("TestType2");
    type2.field(FieldDef::new("value", BindingDescriptor::uint(32, ByteOrder::Big)));
    codec.register(type2)?;

    let mut tc1 = TemplateBuilder::message("Tc1");
    tc1.header(Header::new(&["tc1"]).with_charset("US-ASCII"));
    tc1.field(FieldDef::new(
        "payload",
        BindingDescriptor::object_with(
            Choice::by_prefix(8)
                .alternative_prefixed(0x01, "#prefix == 0x01", "TestType1")
                .alternative_prefixed(0x02, "#prefix == 0x02", "TestType2"),
        ),
    ));
    codec.register(tc1)?;

    let mut tc2 = TemplateBuilder::message("Tc2");
    tc2.header(Header::new(&["tc2"]).with_charset("US-ASCII"));
    tc2.field(FieldDef::new(
        "index",
        BindingDescriptor::array(2usize, BindingDescriptor::uint(8, ByteOrder::Big)),
    ));
    tc2.field(FieldDef::new(
        "payload",
        BindingDescriptor::object_with(
            Choice::by_prefix(8)
                .alternative_prefixed(0, "index[#prefix] == 5", "TestType1")
                .alternative_prefixed(1, "index[#prefix] == 6", "TestType2"),
        ),
    ));
    codec.register(tc2)?;

    Ok(codec)
}

#[test]
fn choice_by_peeked_prefix() -> Result<()> {
    let codec = choice_codec()?;

    let bytes = hex("746331011234");
    let decoded = codec.decode(&bytes)?;
    let payload = decoded.value.get("payload").unwrap().as_object()?;
    assert_eq!(payload.context(), "TestType1");
    assert_eq!(payload.get("value"), Some(&Value::Int(0x1234)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);

    let bytes = hex("74633102 11223344");
    let decoded = codec.decode(&bytes)?;
    let payload = decoded.value.get("payload").unwrap().as_object()?;
    assert_eq!(payload.context(), "TestType2");
    assert_eq!(payload.get("value"), Some(&Value::Int(0x11223344)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);
    Ok(())
}

#[test]
fn choice_by_expression_over_array() -> Result<()> {
    let codec = choice_codec()?;

    let bytes = hex("746332 0506 00 1234");
    let decoded = codec.decode(&bytes)?;
    let payload = decoded.value.get("payload").unwrap().as_object()?;
    assert_eq!(payload.context(), "TestType1");
    assert_eq!(payload.get("value"), Some(&Value::Int(0x1234)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);

    let bytes = hex("746332 0506 01 11223344");
    let decoded = codec.decode(&bytes)?;
    let payload = decoded.value.get("payload").unwrap().as_object()?;
    assert_eq!(payload.context(), "TestType2");
    assert_eq!(payload.get("value"), Some(&Value::Int(0x11223344)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);
    Ok(())
}

#[test]
fn choice_without_match_fails_single_objects() -> Result<()> {
    let codec = choice_codec()?;
    let err = codec.decode(&hex("746331031234")).unwrap_err();
    assert_matches!(err, Error::Decoding { ref reason, .. } if reason.contains("no matching choice"));
    Ok(())
}

#[test]
fn object_array_stops_at_unmatched_discriminator() -> Result<()> {
    let mut codec = Codec::new();
    let mut item = TemplateBuilder::structure("Item");
    item.field(FieldDef::new("value", BindingDescriptor::uint(8, ByteOrder::Big)));
    codec.register(item)?;

    let mut list = TemplateBuilder::message("ItemList");
    list.header(Header::new(&["L:"]).with_charset("US-ASCII"));
    list.field(FieldDef::new(
        "items",
        BindingDescriptor::objects_with(
            4usize,
            Choice::by_prefix(8).alternative_prefixed(0xAA, "#prefix == 0xAA", "Item"),
        ),
    ));
    list.field(FieldDef::new("trailer", BindingDescriptor::uint(8, ByteOrder::Big)));
    codec.register(list)?;

    // Two AA-prefixed items, then 0x00 ends the list early.
    let bytes = hex("4c3a aa07 aa09 00");
    let decoded = codec.decode(&bytes)?;
    let items = decoded.value.get("items").unwrap().as_list()?;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_object()?.get("value"), Some(&Value::Int(7)));
    assert_eq!(items[1].as_object()?.get("value"), Some(&Value::Int(9)));
    assert_eq!(decoded.value.get("trailer"), Some(&Value::Int(0)));
    Ok(())
}

#[test]
fn terminated_strings_in_a_template() -> Result<()> {
    let mut codec = Codec::new();
    let mut msg = TemplateBuilder::message("Term");
    msg.header(Header::new(&["T:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new(
        "name",
        BindingDescriptor::text_until(0x00, true).with_charset("US-ASCII"),
    ));
    msg.field(FieldDef::new("value", BindingDescriptor::uint(8, ByteOrder::Big)));
    codec.register(msg)?;

    let bytes = hex("543a 68690042");
    let decoded = codec.decode(&bytes)?;
    assert_eq!(decoded.value.get("name"), Some(&Value::Str("hi".into())));
    assert_eq!(decoded.value.get("value"), Some(&Value::Int(0x42)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);
    Ok(())
}

#[test]
fn fixed_strings_read_exactly_the_declared_size() -> Result<()> {
    let mut codec = Codec::new();
    let mut msg = TemplateBuilder::message("Fixed");
    msg.header(Header::new(&["F:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new(
        "tag",
        BindingDescriptor::text(3usize).with_charset("US-ASCII"),
    ));
    msg.field(FieldDef::new("len", BindingDescriptor::uint(8, ByteOrder::Big)));
    msg.field(FieldDef::new(
        "body",
        BindingDescriptor::text("len").with_charset("US-ASCII"),
    ));
    codec.register(msg)?;

    let bytes = hex("463a 414243 02 4849");
    let decoded = codec.decode(&bytes)?;
    assert_eq!(decoded.value.get("tag"), Some(&Value::Str("ABC".into())));
    assert_eq!(decoded.value.get("body"), Some(&Value::Str("HI".into())));
    assert_eq!(decoded.consumed, bytes.len());
    assert_eq!(codec.encode(&decoded.value)?, bytes);

    // The outgoing string must occupy exactly the evaluated size.
    let mut long = decoded.value.clone();
    long.set("body", Value::Str("HI!".into()));
    let err = codec.encode(&long).unwrap_err();
    assert_matches!(err, Error::Encoding { ref field, .. } if field == "body");

    // A buffer shorter than the declared size fails the decode.
    let err = codec.decode(&hex("463a 4142")).unwrap_err();
    assert_matches!(err, Error::Decoding { ref field, .. } if field == "tag");
    Ok(())
}

#[test]
fn evaluated_fields_are_computed_after_decode() -> Result<()> {
    let mut codec = Codec::new();
    let mut msg = TemplateBuilder::message("Sum");
    msg.header(Header::new(&["S:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new("a", BindingDescriptor::uint(8, ByteOrder::Big)));
    msg.field(FieldDef::new("b", BindingDescriptor::uint(8, ByteOrder::Big)));
    msg.evaluated("sum", "a + b");
    msg.evaluated("label", "'total ' + 'of two'");
    codec.register(msg)?;

    let decoded = codec.decode(&hex("533a 0304"))?;
    assert_eq!(decoded.value.get("sum"), Some(&Value::Int(7)));
    assert_eq!(decoded.value.get("label"), Some(&Value::Str("total of two".into())));
    // Computed fields never consume bytes.
    assert_eq!(decoded.consumed, 4);
    assert_eq!(codec.encode(&decoded.value)?, hex("533a 0304"));
    Ok(())
}

#[test]
fn native_functions_drive_conditions() -> Result<()> {
    let mut codec = Codec::new();
    codec.register_function("gt.Mask", "bit", |args| match args {
        [Value::Int(mask), Value::Int(bit)] => Ok(Value::Bool(mask >> bit & 1 == 1)),
        _ => Err(Error::Expression("bit(mask, index) expects integers".into())),
    });

    let mut msg = TemplateBuilder::message("Masked");
    msg.header(Header::new(&["M:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new("mask", BindingDescriptor::uint(8, ByteOrder::Big)));
    msg.field(
        FieldDef::new("extra", BindingDescriptor::uint(16, ByteOrder::Big))
            .with_condition("T(gt.Mask).bit(mask, 0)"),
    );
    codec.register(msg)?;

    let with_extra = codec.decode(&hex("4d3a 01 beef"))?;
    assert_eq!(with_extra.value.get("extra"), Some(&Value::Int(0xbeef)));
    let without = codec.decode(&hex("4d3a 02"))?;
    assert_eq!(without.value.get("extra"), None);
    Ok(())
}

struct CenturyOffset;

impl Converter for CenturyOffset {
    fn decode(&self, raw: Value) -> wirebind::result::Result<Value> {
        Ok(Value::Int(raw.as_int()? + 2000))
    }

    fn encode(&self, user: Value) -> wirebind::result::Result<Value> {
        Ok(Value::Int(user.as_int()? - 2000))
    }
}

struct SmallYear;

impl Validator for SmallYear {
    fn validate(&self, value: &Value) -> wirebind::result::Result<()> {
        if value.as_int()? > 2100 {
            return Err(Error::Value("year out of range".into()));
        }
        Ok(())
    }
}

#[test]
fn converters_and_validators_wrap_the_raw_value() -> Result<()> {
    let mut codec = Codec::new();
    codec.register_converter("century", Arc::new(CenturyOffset))?;
    codec.register_validator("smallYear", Arc::new(SmallYear))?;

    let mut msg = TemplateBuilder::message("Year");
    msg.header(Header::new(&["Y:"]).with_charset("US-ASCII"));
    msg.field(
        FieldDef::new("year", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_converter("century")
            .with_validator("smallYear"),
    );
    codec.register(msg)?;

    let bytes = hex("593a 19");
    let decoded = codec.decode(&bytes)?;
    assert_eq!(decoded.value.get("year"), Some(&Value::Int(2025)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);

    let err = codec.decode(&hex("593a 80")).unwrap_err();
    assert_matches!(err, Error::Decoding { ref field, .. } if field == "year");
    Ok(())
}

#[test]
fn protocol_versions_gate_fields() -> Result<()> {
    let mut codec = Codec::new();
    codec.set_protocol_version("1.2.0")?;

    let mut msg = TemplateBuilder::message("Versioned");
    msg.header(Header::new(&["V:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new("always", BindingDescriptor::uint(8, ByteOrder::Big)));
    msg.field(
        FieldDef::new("legacy", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_max_protocol("1.0.0"),
    );
    msg.field(
        FieldDef::new("modern", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_min_protocol("1.1.0"),
    );
    codec.register(msg)?;

    let template = codec.template("Versioned").unwrap();
    let boundaries: Vec<String> = template
        .version_boundaries()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(boundaries, vec!["1.0.0", "1.1.0"]);

    let decoded = codec.decode(&hex("563a 0102"))?;
    assert_eq!(decoded.value.get("always"), Some(&Value::Int(1)));
    assert_eq!(decoded.value.get("legacy"), None);
    assert_eq!(decoded.value.get("modern"), Some(&Value::Int(2)));
    assert_eq!(codec.encode(&decoded.value)?, hex("563a 0102"));
    Ok(())
}

#[test]
fn versioned_header_refuses_excluded_templates() -> Result<()> {
    let mut codec = Codec::new();
    codec.set_protocol_version("3.0.0")?;

    let mut msg = TemplateBuilder::message("Old");
    msg.header(
        Header::new(&["O:"])
            .with_charset("US-ASCII")
            .with_min_protocol("1.0.0")
            .with_max_protocol("2.0.0"),
    );
    msg.field(FieldDef::new("value", BindingDescriptor::uint(8, ByteOrder::Big)));
    codec.register(msg)?;

    assert_matches!(codec.decode(&hex("4f3a 01")), Err(Error::Version(_)));
    Ok(())
}

#[test]
fn skips_discard_wire_bits() -> Result<()> {
    let mut codec = Codec::new();
    let mut msg = TemplateBuilder::message("Skippy");
    msg.header(Header::new(&["K:"]).with_charset("US-ASCII"));
    msg.field(
        FieldDef::new("value", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_skip(SkipDef::bits(8)),
    );
    codec.register(msg)?;

    let decoded = codec.decode(&hex("4b3a ff 42"))?;
    assert_eq!(decoded.value.get("value"), Some(&Value::Int(0x42)));
    // Encode regenerates the skipped region as zeros.
    assert_eq!(codec.encode(&decoded.value)?, hex("4b3a 00 42"));
    Ok(())
}

#[test]
fn wide_integers_round_trip_as_bigints() -> Result<()> {
    let mut codec = Codec::new();
    let mut msg = TemplateBuilder::message("Wide");
    msg.header(Header::new(&["W:"]).with_charset("US-ASCII"));
    msg.field(FieldDef::new("value", BindingDescriptor::uint(80, ByteOrder::Big)));
    codec.register(msg)?;

    let bytes = hex("573a 0102030405060708090a");
    let decoded = codec.decode(&bytes)?;
    assert_matches!(decoded.value.get("value"), Some(Value::Big(_)));
    assert_eq!(codec.encode(&decoded.value)?, bytes);
    Ok(())
}

#[test]
fn decode_all_resyncs_between_messages() -> Result<()> {
    let codec = choice_codec()?;
    let mut stream = hex("746331011234");
    stream.extend(hex("ffff"));
    stream.extend(hex("7463310211223344"));
    stream.extend(hex("746331ff")); // matches tc1 but has no alternative

    let all = codec.decode_all(&stream);
    assert_eq!(all.messages.len(), 2);
    assert_eq!(all.messages[0].offset, 0);
    assert_eq!(all.messages[1].offset, 8);
    assert_eq!(all.messages[1].consumed, 8);
    assert_eq!(all.errors.len(), 1);
    assert_eq!(all.errors[0].0, 16);
    Ok(())
}

#[test]
fn find_next_reports_the_marker_offset() -> Result<()> {
    let codec = choice_codec()?;
    let stream = hex("0000 746331011234");
    let mut reader = BitReader::new(&stream);
    assert_eq!(codec.find_next(&mut reader), Some(2));

    let stream2 = hex("00000000");
    let mut reader = BitReader::new(&stream2);
    assert_eq!(codec.find_next(&mut reader), None);
    Ok(())
}

#[test]
fn describe_renders_the_plan() -> Result<()> {
    let codec = ack_codec()?;
    let description = codec.describe("AckMessage")?;
    assert!(description.contains("message AckMessage"));
    assert!(description.contains("mask"));
    assert!(description.contains("if `mask[2]`"));
    Ok(())
}

#[test]
fn compile_rejects_malformed_templates() {
    let mut codec = Codec::new();

    // No header on a message template.
    let no_header = TemplateBuilder::message("Broken");
    assert_matches!(codec.register(no_header), Err(Error::Configuration { .. }));

    // Checksum not in last position.
    let mut checksum_first = TemplateBuilder::message("Broken");
    checksum_first.header(Header::new(&["B:"]));
    checksum_first.field(FieldDef::new("crc", BindingDescriptor::Checksum {
        bits: 16,
        byte_order: ByteOrder::Big,
        skip_start: 0,
        skip_end: 0,
        algorithm: CRC16_CCITT.to_owned(),
        start_value: 0xFFFF,
    }));
    checksum_first.field(FieldDef::new("tail", BindingDescriptor::uint(8, ByteOrder::Big)));
    assert_matches!(codec.register(checksum_first), Err(Error::Configuration { .. }));

    // Unsupported float width.
    let mut bad_float = TemplateBuilder::message("Broken");
    bad_float.header(Header::new(&["B:"]));
    bad_float.field(FieldDef::new("f", BindingDescriptor::Float {
        bits: 16,
        byte_order: ByteOrder::Big,
    }));
    assert_matches!(codec.register(bad_float), Err(Error::Configuration { .. }));

    // Malformed condition expression.
    let mut bad_expr = TemplateBuilder::message("Broken");
    bad_expr.header(Header::new(&["B:"]));
    bad_expr.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big)).with_condition("a +"),
    );
    assert_matches!(codec.register(bad_expr), Err(Error::Configuration { .. }));

    // Inverted protocol range.
    let mut bad_range = TemplateBuilder::message("Broken");
    bad_range.header(
        Header::new(&["B:"])
            .with_min_protocol("2.0.0")
            .with_max_protocol("1.0.0"),
    );
    assert_matches!(codec.register(bad_range), Err(Error::Configuration { .. }));

    // Unknown converter id.
    let mut bad_converter = TemplateBuilder::message("Broken");
    bad_converter.header(Header::new(&["B:"]));
    bad_converter.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big)).with_converter("missing"),
    );
    assert_matches!(codec.register(bad_converter), Err(Error::Configuration { .. }));
}

#[test]
fn compile_checks_config_value_shapes() {
    let mut codec = Codec::new();

    let mut inverted = TemplateBuilder::message("Cfg");
    inverted.header(Header::new(&["C:"]));
    inverted.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_config(ConfigSpec::new().with_min(10).with_max(5)),
    );
    assert_matches!(codec.register(inverted), Err(Error::Configuration { .. }));

    let mut stray_default = TemplateBuilder::message("Cfg");
    stray_default.header(Header::new(&["C:"]));
    stray_default.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_config(ConfigSpec::new().with_min(0).with_max(5).with_default(9)),
    );
    assert_matches!(codec.register(stray_default), Err(Error::Configuration { .. }));

    let mut pattern_on_int = TemplateBuilder::message("Cfg");
    pattern_on_int.header(Header::new(&["C:"]));
    pattern_on_int.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_config(ConfigSpec::new().with_pattern("[0-9]+")),
    );
    assert_matches!(codec.register(pattern_on_int), Err(Error::Configuration { .. }));

    let mut empty_enum = TemplateBuilder::message("Cfg");
    empty_enum.header(Header::new(&["C:"]));
    empty_enum.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_config(ConfigSpec::new().with_enumeration(vec![])),
    );
    assert_matches!(codec.register(empty_enum), Err(Error::Configuration { .. }));

    let mut bounded_array = TemplateBuilder::message("Cfg");
    bounded_array.header(Header::new(&["C:"]));
    bounded_array.field(
        FieldDef::new(
            "v",
            BindingDescriptor::array(2usize, BindingDescriptor::uint(8, ByteOrder::Big)),
        )
        .with_config(ConfigSpec::new().with_min(0)),
    );
    assert_matches!(codec.register(bounded_array), Err(Error::Configuration { .. }));

    // A coherent config compiles.
    let mut fine = TemplateBuilder::message("Cfg");
    fine.header(Header::new(&["C:"]));
    fine.field(
        FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big))
            .with_config(ConfigSpec::new().with_min(0).with_max(10).with_default(5)),
    );
    assert_matches!(codec.register(fine), Ok(()));
}

#[test]
fn registries_refuse_duplicates() -> Result<()> {
    let mut codec = Codec::new();

    let mut first = TemplateBuilder::message("Dup");
    first.header(Header::new(&["D:"]));
    first.field(FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big)));
    codec.register(first)?;

    let mut second = TemplateBuilder::message("Dup");
    second.header(Header::new(&["E:"]));
    second.field(FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big)));
    assert_matches!(codec.register(second), Err(Error::Configuration { .. }));

    let mut marker_clash = TemplateBuilder::message("Other");
    marker_clash.header(Header::new(&["D:"]));
    marker_clash.field(FieldDef::new("v", BindingDescriptor::uint(8, ByteOrder::Big)));
    assert_matches!(codec.register(marker_clash), Err(Error::Configuration { .. }));

    use wirebind::coders::FieldCoder;
    struct Nope;
    impl FieldCoder for Nope {
        fn decode(
            &self,
            _: &wirebind::coders::CoderCtx,
            _: &mut BitReader,
            _: &wirebind::template::Template,
            _: &BindingDescriptor,
            _: &wirebind::expr::Scope,
        ) -> wirebind::result::Result<Value> {
            Ok(Value::Null)
        }
        fn encode(
            &self,
            _: &wirebind::coders::CoderCtx,
            _: &mut wirebind::bits::BitWriter,
            _: &wirebind::template::Template,
            _: &BindingDescriptor,
            _: &wirebind::expr::Scope,
            _: &Value,
        ) -> wirebind::result::Result<()> {
            Ok(())
        }
    }
    assert_matches!(
        codec.register_coder(wirebind::template::DescriptorKind::Integer, Box::new(Nope)),
        Err(Error::Configuration { .. })
    );
    Ok(())
}

#[test]
fn encode_rejects_length_mismatches() -> Result<()> {
    let codec = ack_codec()?;
    let bytes = hex(ACK);
    let mut obj = codec.decode(&bytes)?.value;
    obj.set("imei", Value::List(vec![Value::Int(1)]));

    let err = codec.encode(&obj).unwrap_err();
    assert_matches!(err, Error::Encoding { ref field, .. } if field == "imei");
    Ok(())
}
