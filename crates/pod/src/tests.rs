use crate::{filter, fixate, Builder, Choice, ChoiceType, Fraction, Rectangle, Type, Value};

#[test]
fn encode_decode_scalars() {
    for value in [
        Value::None,
        Value::Bool(true),
        Value::Id(7),
        Value::Int(-3),
        Value::Long(1 << 40),
        Value::Float(0.5),
        Value::Double(-2.25),
        Value::String(String::from("audio/raw")),
        Value::Bytes(vec![1, 2, 3]),
        Value::Rectangle(Rectangle {
            width: 640,
            height: 480,
        }),
        Value::Fraction(Fraction {
            num: 1,
            denom: 48000,
        }),
        Value::Fd(4),
    ] {
        let bytes = value.encode().unwrap();
        assert_eq!(bytes.len() % 8, 0, "{value:?} must be word padded");
        assert_eq!(Value::decode(&bytes).unwrap(), value);
    }
}

#[test]
fn encode_decode_object() {
    let object = Builder::object(3u32, 1u32)
        .property(1u32, Value::Id(2))
        .property(
            2u32,
            Value::choice(Choice::enumeration(
                Value::Int(48000),
                [Value::Int(44100)],
            )),
        )
        .property(3u32, Value::String(String::from("mono")))
        .build_value();

    let bytes = object.encode().unwrap();
    assert_eq!(Value::decode(&bytes).unwrap(), object);
}

#[test]
fn encode_decode_nested_struct() {
    let value = Value::Struct(vec![
        Value::Int(1),
        Value::Struct(vec![Value::String(String::from("x")), Value::Long(2)]),
        Value::Array(vec![Value::Id(1), Value::Id(2), Value::Id(3)]),
    ]);

    let bytes = value.encode().unwrap();
    assert_eq!(Value::decode(&bytes).unwrap(), value);
}

#[test]
fn mixed_array_rejected() {
    let value = Value::Array(vec![Value::Id(1), Value::Int(2)]);
    assert!(value.encode().is_err());
}

#[test]
fn unsized_array_child_rejected() {
    let value = Value::Array(vec![Value::String(String::from("no"))]);
    assert!(value.encode().is_err());
}

#[test]
fn type_mapping() {
    assert_eq!(Value::None.ty(), Type::NONE);
    assert_eq!(Value::Id(0).ty(), Type::ID);
    assert_eq!(Value::Struct(Vec::new()).ty(), Type::STRUCT);
}

#[test]
fn fixate_collapses_choices() {
    let object = Builder::object(3u32, 1u32)
        .property(
            2u32,
            Value::choice(Choice::enumeration(
                Value::Int(48000),
                [Value::Int(44100), Value::Int(96000)],
            )),
        )
        .property(
            4u32,
            Value::choice(Choice::range(
                Value::Int(2),
                Value::Int(1),
                Value::Int(8),
            )),
        )
        .build_value();

    let fixed = fixate(&object);
    let fixed = fixed.as_object().unwrap();

    assert_eq!(fixed.property(2u32), Some(&Value::Int(48000)));
    assert_eq!(fixed.property(4u32), Some(&Value::Int(2)));
}

#[test]
fn filter_narrows_enum_against_plain() {
    let a = Value::choice(Choice::enumeration(
        Value::Int(48000),
        [Value::Int(44100), Value::Int(96000)],
    ));

    assert_eq!(filter(&a, &Value::Int(96000)), Some(Value::Int(96000)));
    assert_eq!(filter(&a, &Value::Int(22050)), None);
}

#[test]
fn filter_intersects_enums() {
    let a = Value::choice(Choice::enumeration(
        Value::Int(48000),
        [Value::Int(44100), Value::Int(96000)],
    ));
    let b = Value::choice(Choice::enumeration(
        Value::Int(44100),
        [Value::Int(48000)],
    ));

    let out = filter(&a, &b).unwrap();
    let choice = out.as_choice().unwrap();

    assert_eq!(choice.kind, ChoiceType::ENUM);
    assert_eq!(choice.default(), Some(&Value::Int(48000)));
}

#[test]
fn filter_intersects_ranges() {
    let a = Value::choice(Choice::range(
        Value::Int(1024),
        Value::Int(64),
        Value::Int(8192),
    ));
    let b = Value::choice(Choice::range(
        Value::Int(256),
        Value::Int(128),
        Value::Int(2048),
    ));

    let out = filter(&a, &b).unwrap();
    let choice = out.as_choice().unwrap();

    assert_eq!(choice.values[0], Value::Int(1024));
    assert_eq!(choice.values[1], Value::Int(128));
    assert_eq!(choice.values[2], Value::Int(2048));
}

#[test]
fn filter_objects_passes_unmatched_keys() {
    let a = Builder::object(3u32, 1u32)
        .property(1u32, Value::Id(2))
        .property(
            2u32,
            Value::choice(Choice::enumeration(
                Value::Int(48000),
                [Value::Int(44100)],
            )),
        )
        .build_value();

    let b = Builder::object(3u32, 1u32)
        .property(2u32, Value::Int(44100))
        .property(5u32, Value::Int(2))
        .build_value();

    let out = filter(&a, &b).unwrap();
    let out = out.as_object().unwrap();

    assert_eq!(out.property(1u32), Some(&Value::Id(2)));
    assert_eq!(out.property(2u32), Some(&Value::Int(44100)));
    assert_eq!(out.property(5u32), Some(&Value::Int(2)));
}

#[test]
fn filter_objects_type_mismatch_fails() {
    let a = Builder::object(3u32, 1u32).build_value();
    let b = Builder::object(4u32, 1u32).build_value();
    assert!(filter(&a, &b).is_none());
}

#[test]
fn fraction_ordering() {
    let a = Value::choice(Choice::range(
        Value::Fraction(Fraction { num: 1, denom: 4 }),
        Value::Fraction(Fraction { num: 1, denom: 8 }),
        Value::Fraction(Fraction { num: 1, denom: 2 }),
    ));

    let v = Value::Fraction(Fraction { num: 1, denom: 3 });
    assert_eq!(filter(&a, &v), Some(v.clone()));
}
