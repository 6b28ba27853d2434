// tests/codec.rs
use anyhow::Result;
use tablebridge::codec::{
    decode_type, encode_descriptor, encode_type, field_names, TypeDescriptor, WireType,
    NULLABLE_FLAG,
};
use tablebridge::testing::sample_arrays;
use tablebridge::*;


fn roundtrip(ty: &ArrayType) -> Result<ArrayType> {
    Ok(decode_type(&encode_descriptor(ty)?)?)
}

#[test]
fn every_sample_type_decodes_to_itself() -> Result<()> {
    for arr in sample_arrays() {
        let ty = arr.array_type();
        assert_eq!(roundtrip(&ty)?, ty, "descriptor of {ty} did not round-trip");
    }
    Ok(())
}

#[test]
fn deeply_nested_list_of_struct_of_map() -> Result<()> {
    let ty = ArrayType::list(ArrayType::Struct(vec![
        Field::new("id", ArrayType::Primitive(PrimitiveType::Int64)),
        Field::new(
            "attrs",
            ArrayType::map(
                ArrayType::String,
                ArrayType::list(ArrayType::Nullable(PrimitiveType::Float32)),
            ),
        ),
        Field::new(
            "price",
            ArrayType::Decimal {
                precision: 18,
                scale: 4,
            },
        ),
    ]));
    assert_eq!(roundtrip(&ty)?, ty);
    assert_eq!(
        field_names(&ty),
        vec!["id", "attrs", "key", "value", "price"]
    );
    Ok(())
}

#[test]
fn nullable_primitive_is_a_single_flagged_code() -> Result<()> {
    let tags = encode_type(&ArrayType::Nullable(PrimitiveType::Int32))?;
    assert_eq!(tags, vec![WireType::Int32.code() | NULLABLE_FLAG]);
    assert_eq!(encode_type(&ArrayType::Primitive(PrimitiveType::Int32))?, vec![2]);
    Ok(())
}

#[test]
fn struct_tags_carry_field_count() -> Result<()> {
    let ty = ArrayType::Struct(vec![
        Field::new("a", ArrayType::String),
        Field::new("b", ArrayType::Binary),
    ]);
    assert_eq!(encode_type(&ty)?, vec![20, 2, 10, 21]);
    Ok(())
}

#[test]
fn categorical_with_runtime_categories_round_trips() -> Result<()> {
    let ty = ArrayType::Categorical {
        categories: None,
        ordered: false,
    };
    assert_eq!(roundtrip(&ty)?, ty);
    let known = ArrayType::categorical(&["x", "y"], true);
    let desc = encode_descriptor(&known)?;
    assert_eq!(desc.names, vec!["x", "y"]);
    assert_eq!(decode_type(&desc)?, known);
    Ok(())
}

#[test]
fn unsupported_shapes_are_type_errors() -> Result<()> {
    assert_err_kind!(encode_type(&ArrayType::Struct(vec![])), UnsupportedType);
    assert_err_kind!(encode_type(&ArrayType::list(ArrayType::DictString)), UnsupportedType);
    assert_err_kind!(
        encode_type(&ArrayType::Struct(vec![Field::new(
            "span",
            ArrayType::Interval(PrimitiveType::Int64)
        )])),
        UnsupportedType
    );
    assert_err_kind!(
        encode_type(&ArrayType::Decimal {
            precision: 40,
            scale: 2
        }),
        UnsupportedType
    );
    Ok(())
}

#[test]
fn truncated_descriptors_are_shape_mismatches() -> Result<()> {
    let short = TypeDescriptor {
        tags: vec![WireType::List.code()],
        names: vec![],
    };
    assert_err_kind!(decode_type(&short), ShapeMismatch);
    let missing_name = TypeDescriptor {
        tags: vec![20, 1, 4],
        names: vec![],
    };
    assert_err_kind!(decode_type(&missing_name), ShapeMismatch);
    let unknown = TypeDescriptor {
        tags: vec![30],
        names: vec![],
    };
    assert_err_kind!(decode_type(&unknown), UnsupportedType);
    Ok(())
}
