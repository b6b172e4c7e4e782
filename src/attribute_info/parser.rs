use nom::{
    bytes::complete::take,
    combinator::{all_consuming, map, success},
    error::{Error, ErrorKind},
    multi::count,
    number::complete::{be_u16, be_u32, be_u8},
    Err as BaseErr,
};

use crate::attribute_info::*;
use crate::constant_info::ConstantPool;

// Using a type alias here evades a Clippy warning about complex types.
type Err<E> = BaseErr<Error<E>>;

pub fn attribute_parser(input: &[u8]) -> Result<(&[u8], AttributeInfo), Err<&[u8]>> {
    let (input, attribute_name_index) = be_u16(input)?;
    let (input, attribute_length) = be_u32(input)?;
    let (input, info) = take(attribute_length)(input)?;
    Ok((
        input,
        AttributeInfo {
            attribute_name_index,
            attribute_length,
            info: info.to_owned(),
            info_parsed: None,
        },
    ))
}

pub fn exception_entry_parser(input: &[u8]) -> Result<(&[u8], ExceptionEntry), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

pub fn code_attribute_parser(input: &[u8]) -> Result<(&[u8], CodeAttribute), Err<&[u8]>> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(exception_entry_parser, exception_table_length as usize)(input)?;
    let (input, attributes_count) = be_u16(input)?;
    let (input, attributes) = count(attribute_parser, attributes_count as usize)(input)?;
    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code: code.to_owned(),
            exception_table,
            attributes,
        },
    ))
}

pub fn line_number_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], LineNumberTableAttribute), Err<&[u8]>> {
    let (input, line_number_table_length) = be_u16(input)?;
    let (input, line_number_table) = count(
        line_number_table_entry_parser,
        line_number_table_length as usize,
    )(input)?;
    Ok((input, LineNumberTableAttribute { line_number_table }))
}

pub fn line_number_table_entry_parser(
    input: &[u8],
) -> Result<(&[u8], LineNumberTableEntry), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, line_number) = be_u16(input)?;
    Ok((
        input,
        LineNumberTableEntry {
            start_pc,
            line_number,
        },
    ))
}

fn local_variable_table_item_parser(
    input: &[u8],
) -> Result<(&[u8], LocalVariableTableItem), Err<&[u8]>> {
    let (input, start_pc) = be_u16(input)?;
    let (input, length) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, index) = be_u16(input)?;
    Ok((
        input,
        LocalVariableTableItem {
            start_pc,
            length,
            name_index,
            descriptor_index,
            index,
        },
    ))
}

pub fn local_variable_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], LocalVariableTableAttribute), Err<&[u8]>> {
    let (input, length) = be_u16(input)?;
    let (input, items) = count(local_variable_table_item_parser, length as usize)(input)?;
    Ok((input, LocalVariableTableAttribute { items }))
}

pub fn local_variable_type_table_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], LocalVariableTypeTableAttribute), Err<&[u8]>> {
    let (input, length) = be_u16(input)?;
    let (input, items) = count(local_variable_table_item_parser, length as usize)(input)?;
    Ok((input, LocalVariableTypeTableAttribute { items }))
}

pub fn method_parameters_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], MethodParametersAttribute), Err<&[u8]>> {
    let (input, parameters_count) = be_u8(input)?;
    let (input, parameters) = count(parameters_parser, parameters_count as usize)(input)?;
    Ok((input, MethodParametersAttribute { parameters }))
}

pub fn parameters_parser(input: &[u8]) -> Result<(&[u8], ParameterAttribute), Err<&[u8]>> {
    let (input, name_index) = be_u16(input)?;
    let (input, access_flags) = be_u16(input)?;
    Ok((
        input,
        ParameterAttribute {
            name_index,
            access_flags,
        },
    ))
}

pub fn signature_attribute_parser(input: &[u8]) -> Result<(&[u8], SignatureAttribute), Err<&[u8]>> {
    map(be_u16, |signature_index| SignatureAttribute { signature_index })(input)
}

pub fn exceptions_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], ExceptionsAttribute), Err<&[u8]>> {
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) = count(be_u16, exception_table_length as usize)(input)?;
    Ok((input, ExceptionsAttribute { exception_table }))
}

pub fn constant_value_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], ConstantValueAttribute), Err<&[u8]>> {
    map(be_u16, |constant_value_index| ConstantValueAttribute {
        constant_value_index,
    })(input)
}

pub fn sourcefile_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], SourceFileAttribute), Err<&[u8]>> {
    map(be_u16, |sourcefile_index| SourceFileAttribute { sourcefile_index })(input)
}

pub fn runtime_annotations_attribute_parser(
    input: &[u8],
) -> Result<(&[u8], RuntimeAnnotationsAttribute), Err<&[u8]>> {
    let (input, num_annotations) = be_u16(input)?;
    let (input, annotations) = count(annotation_parser, num_annotations as usize)(input)?;
    Ok((input, RuntimeAnnotationsAttribute { annotations }))
}

fn annotation_parser(input: &[u8]) -> Result<(&[u8], RuntimeAnnotation), Err<&[u8]>> {
    let (input, type_index) = be_u16(input)?;
    let (input, num_element_value_pairs) = be_u16(input)?;
    let (input, element_value_pairs) =
        count(element_value_pair_parser, num_element_value_pairs as usize)(input)?;
    Ok((
        input,
        RuntimeAnnotation {
            type_index,
            element_value_pairs,
        },
    ))
}

fn element_value_pair_parser(input: &[u8]) -> Result<(&[u8], ElementValuePair), Err<&[u8]>> {
    let (input, element_name_index) = be_u16(input)?;
    let (input, value) = element_value_parser(input)?;
    Ok((
        input,
        ElementValuePair {
            element_name_index,
            value,
        },
    ))
}

pub fn element_value_parser(input: &[u8]) -> Result<(&[u8], ElementValue), Err<&[u8]>> {
    let (input, tag) = be_u8(input)?;
    match tag as char {
        'B' | 'C' | 'I' | 'S' | 'Z' | 'D' | 'F' | 'J' | 's' => {
            let (input, value) = be_u16(input)?;
            Ok((
                input,
                ElementValue::ConstValueIndex {
                    tag: tag as char,
                    value,
                },
            ))
        }
        'e' => {
            let (input, type_name_index) = be_u16(input)?;
            let (input, const_name_index) = be_u16(input)?;
            Ok((
                input,
                ElementValue::EnumConst(EnumConstValue {
                    type_name_index,
                    const_name_index,
                }),
            ))
        }
        'c' => map(be_u16, ElementValue::ClassInfoIndex)(input),
        '@' => map(annotation_parser, ElementValue::AnnotationValue)(input),
        '[' => {
            let (input, num_values) = be_u16(input)?;
            let (input, values) = count(element_value_parser, num_values as usize)(input)?;
            Ok((input, ElementValue::ElementArray(values)))
        }
        _ => Result::Err(Err::Error(error_position!(input, ErrorKind::NoneOf))),
    }
}

/// Interprets an attribute body given its resolved name. Unknown names are
/// kept as [`AttributeInfoVariant::Unknown`]; bodies that fail to parse or
/// leave bytes behind become [`AttributeInfoVariant::Malformed`].
pub fn interpret_attribute(name: &str, info: &[u8]) -> AttributeInfoVariant {
    use AttributeInfoVariant as V;
    let parsed = match name {
        "Code" => all_consuming(map(code_attribute_parser, V::Code))(info),
        "LineNumberTable" => {
            all_consuming(map(line_number_table_attribute_parser, V::LineNumberTable))(info)
        }
        "LocalVariableTable" => all_consuming(map(
            local_variable_table_attribute_parser,
            V::LocalVariableTable,
        ))(info),
        "LocalVariableTypeTable" => all_consuming(map(
            local_variable_type_table_attribute_parser,
            V::LocalVariableTypeTable,
        ))(info),
        "Exceptions" => all_consuming(map(exceptions_attribute_parser, V::Exceptions))(info),
        "Signature" => all_consuming(map(signature_attribute_parser, V::Signature))(info),
        "Deprecated" => all_consuming(success(V::Deprecated))(info),
        "Synthetic" => all_consuming(success(V::Synthetic))(info),
        "ConstantValue" => {
            all_consuming(map(constant_value_attribute_parser, V::ConstantValue))(info)
        }
        "SourceFile" => all_consuming(map(sourcefile_attribute_parser, V::SourceFile))(info),
        "MethodParameters" => {
            all_consuming(map(method_parameters_attribute_parser, V::MethodParameters))(info)
        }
        "RuntimeVisibleAnnotations" => all_consuming(map(
            runtime_annotations_attribute_parser,
            V::RuntimeVisibleAnnotations,
        ))(info),
        "RuntimeInvisibleAnnotations" => all_consuming(map(
            runtime_annotations_attribute_parser,
            V::RuntimeInvisibleAnnotations,
        ))(info),
        _ => return V::Unknown(name.to_string()),
    };
    match parsed {
        Ok((_, variant)) => variant,
        Err(_) => V::Malformed {
            name: name.to_string(),
        },
    }
}

/// Fills in `info_parsed` for every attribute, recursing into the
/// attributes nested in a Code attribute.
pub fn interpret_attributes(attributes: &mut [AttributeInfo], pool: &ConstantPool) {
    for attribute in attributes.iter_mut() {
        let Some(name) = pool.utf8(attribute.attribute_name_index) else {
            attribute.info_parsed = Some(AttributeInfoVariant::Malformed {
                name: format!("#{}", attribute.attribute_name_index),
            });
            continue;
        };
        let mut variant = interpret_attribute(name, &attribute.info);
        if let AttributeInfoVariant::Code(code) = &mut variant {
            interpret_attributes(&mut code.attributes, pool);
        }
        attribute.info_parsed = Some(variant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceptions_attribute() {
        let bytes = [0x00, 0x02, 0x00, 0x07, 0x00, 0x09];
        let (rest, attr) = exceptions_attribute_parser(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(attr.exception_table, vec![7, 9]);
    }

    #[test]
    fn test_deprecated_must_be_empty() {
        assert_eq!(interpret_attribute("Deprecated", &[]), AttributeInfoVariant::Deprecated);
        assert_eq!(
            interpret_attribute("Deprecated", &[0]),
            AttributeInfoVariant::Malformed {
                name: "Deprecated".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_attribute_is_kept() {
        assert_eq!(
            interpret_attribute("StackMapTable", &[1, 2, 3]),
            AttributeInfoVariant::Unknown("StackMapTable".to_string())
        );
    }

    #[test]
    fn test_nested_annotation_array() {
        // one annotation, type #5, one pair: name #6 = ['I' #7, 'I' #8]
        let bytes = [
            0x00, 0x01, 0x00, 0x05, 0x00, 0x01, 0x00, 0x06, b'[', 0x00, 0x02, b'I', 0x00, 0x07,
            b'I', 0x00, 0x08,
        ];
        let variant = interpret_attribute("RuntimeVisibleAnnotations", &bytes);
        let AttributeInfoVariant::RuntimeVisibleAnnotations(attr) = variant else {
            panic!("unexpected {:?}", variant);
        };
        assert_eq!(attr.annotations[0].type_index, 5);
        assert_eq!(
            attr.annotations[0].element_value_pairs[0].value,
            ElementValue::ElementArray(vec![
                ElementValue::ConstValueIndex { tag: 'I', value: 7 },
                ElementValue::ConstValueIndex { tag: 'I', value: 8 },
            ])
        );
    }

    #[test]
    fn test_truncated_code_is_malformed() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0xb1];
        assert!(matches!(
            interpret_attribute("Code", &bytes),
            AttributeInfoVariant::Malformed { .. }
        ));
    }
}
