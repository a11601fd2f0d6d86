use offcanvas_wire::{
    decode_frame, decode_values, encode_frame, encode_values, DecodeError, Instruction,
    InstructionReader, MutationFrame, StringTable, Value,
};
use proptest::prelude::*;

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<u16>().prop_map(Value::SmallInt),
        // NaN never compares equal; the codec itself carries it bit-exactly.
        any::<f32>()
            .prop_filter("NaN", |v| !v.is_nan())
            .prop_map(Value::Float32),
        "[a-z#()0-9 ,.-]{0,12}".prop_map(Value::Str),
        Just(Value::OpaqueRef),
    ]
}

/// Values with arrays nested up to depth 3.
fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 48, 6, |inner| {
        prop::collection::vec(inner, 0..6).prop_map(Value::Array)
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode(values in prop::collection::vec(value_strategy(), 0..8)) {
        let mut strings = StringTable::new();
        let mut units = Vec::new();
        encode_values(&values, &mut strings, &mut units).unwrap();

        let expected_len: usize = values.iter().map(Value::encoded_units).sum();
        prop_assert_eq!(units.len(), expected_len);

        let (decoded, end) = decode_values(&units, 0, values.len(), &strings).unwrap();
        prop_assert_eq!(decoded, values);
        prop_assert_eq!(end, units.len());
    }

    #[test]
    fn floats_survive_bit_exact(bits in any::<u32>()) {
        let value = f32::from_bits(bits);
        let mut strings = StringTable::new();
        let mut units = Vec::new();
        encode_values(&[Value::Float32(value)], &mut strings, &mut units).unwrap();
        let (decoded, _) = decode_values(&units, 0, 1, &strings).unwrap();
        match &decoded[0] {
            Value::Float32(out) => prop_assert_eq!(out.to_bits(), bits),
            other => prop_assert!(false, "expected float, got {:?}", other),
        }
    }

    #[test]
    fn interning_is_idempotent(words in prop::collection::vec("[a-z]{1,6}", 1..32)) {
        let mut strings = StringTable::new();
        let first: Vec<u16> = words.iter().map(|w| strings.store(w).unwrap()).collect();
        let second: Vec<u16> = words.iter().map(|w| strings.store(w).unwrap()).collect();
        prop_assert_eq!(&first, &second);
        for (i, a) in words.iter().enumerate() {
            for (j, b) in words.iter().enumerate() {
                prop_assert_eq!(a == b, first[i] == first[j]);
            }
        }
    }

    /// Arbitrary unit soup either decodes or fails cleanly; it never panics or
    /// claims to have consumed units past the end.
    #[test]
    fn garbage_units_never_overrun(
        units in prop::collection::vec(0u16..8, 0..64),
        count in 0usize..16,
    ) {
        let mut strings = StringTable::new();
        strings.store("only").unwrap();
        if let Ok((_, end)) = decode_values(&units, 0, count, &strings) {
            prop_assert!(end <= units.len());
        }
        for instr in InstructionReader::new(&units, &strings) {
            if instr.is_err() {
                break;
            }
        }
    }

    #[test]
    fn oversized_array_count_is_rejected(extra in 1u16..1000, present in 0usize..4) {
        let strings = StringTable::new();
        let mut units = vec![3, present as u16 + extra];
        for _ in 0..present {
            units.extend_from_slice(&[0, 1]);
        }
        let err = decode_values(&units, 0, 1, &strings).unwrap_err();
        let is_rejection = matches!(
            err,
            DecodeError::ArrayOverrun { .. } | DecodeError::UnexpectedEof
        );
        prop_assert!(is_rejection);
    }

    #[test]
    fn frames_survive_bytes(
        strings in prop::collection::vec(".{0,8}", 0..4),
        units in prop::collection::vec(any::<u16>(), 0..32),
        first in any::<u32>(),
    ) {
        let frame = MutationFrame { first_string_id: first, strings, units };
        prop_assert_eq!(decode_frame(&encode_frame(&frame)).unwrap(), frame);
    }
}

#[test]
fn instruction_stream_references_registered_strings_only() {
    let mut producer = StringTable::new();
    let mut units = Vec::new();
    Instruction::LegacyCall(offcanvas_wire::LegacyCall {
        handle: offcanvas_wire::Handle::from_raw(1),
        method: "fillStyle".into(),
        is_setter: true,
        args: vec![Value::str("red")],
    })
    .encode_into(&mut producer, &mut units)
    .unwrap();

    // A consumer that never saw the registrations cannot parse the call.
    let empty = StringTable::new();
    let mut reader = InstructionReader::new(&units, &empty);
    assert!(matches!(reader.next(), Some(Err(DecodeError::Strings(_)))));

    let mut consumer = StringTable::new();
    let (first, batch) = producer.take_unsent();
    consumer.register_batch(first, batch).unwrap();
    let mut reader = InstructionReader::new(&units, &consumer);
    assert!(matches!(reader.next(), Some(Ok(Instruction::LegacyCall(_)))));
}
