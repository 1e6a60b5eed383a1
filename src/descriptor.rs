use crate::error::VmError;
use num_enum::TryFromPrimitive;

/// The eight JVM primitive types, tagged by their descriptor character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 8] = [
        PrimitiveType::Byte,
        PrimitiveType::Char,
        PrimitiveType::Double,
        PrimitiveType::Float,
        PrimitiveType::Int,
        PrimitiveType::Long,
        PrimitiveType::Short,
        PrimitiveType::Boolean,
    ];

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'B' => Some(PrimitiveType::Byte),
            'C' => Some(PrimitiveType::Char),
            'D' => Some(PrimitiveType::Double),
            'F' => Some(PrimitiveType::Float),
            'I' => Some(PrimitiveType::Int),
            'J' => Some(PrimitiveType::Long),
            'S' => Some(PrimitiveType::Short),
            'Z' => Some(PrimitiveType::Boolean),
            _ => None,
        }
    }

    pub const fn tag(self) -> char {
        match self {
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Double => 'D',
            PrimitiveType::Float => 'F',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Short => 'S',
            PrimitiveType::Boolean => 'Z',
        }
    }

    /// Source-level name, used for primitive class mirrors.
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Double => "double",
            PrimitiveType::Float => "float",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Short => "short",
            PrimitiveType::Boolean => "boolean",
        }
    }

    pub const fn allocation_type(self) -> AllocationType {
        match self {
            PrimitiveType::Byte => AllocationType::Byte,
            PrimitiveType::Char => AllocationType::Char,
            PrimitiveType::Double => AllocationType::Double,
            PrimitiveType::Float => AllocationType::Float,
            PrimitiveType::Int => AllocationType::Int,
            PrimitiveType::Long => AllocationType::Long,
            PrimitiveType::Short => AllocationType::Short,
            PrimitiveType::Boolean => AllocationType::Boolean,
        }
    }
}

/// Storage kind of a field or array element. The primitive discriminants match
/// the `newarray` atype codes so the tag byte in array headers round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AllocationType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
    Reference = 12,
}

impl AllocationType {
    /// Bytes per element, i.e. the array index scale.
    pub const fn byte_size(self) -> usize {
        match self {
            AllocationType::Boolean | AllocationType::Byte => 1,
            AllocationType::Char | AllocationType::Short => 2,
            AllocationType::Float | AllocationType::Int => 4,
            AllocationType::Double | AllocationType::Long => 8,
            AllocationType::Reference => size_of::<usize>(),
        }
    }

    /// Storage kind for a field descriptor. Arrays and objects are references.
    pub fn of_descriptor(desc: &str) -> Result<Self, VmError> {
        let tag = desc
            .chars()
            .next()
            .ok_or_else(|| VmError::Panic("empty field descriptor".to_string()))?;
        Ok(match tag {
            '[' | 'L' => AllocationType::Reference,
            other => match PrimitiveType::from_tag(other) {
                Some(primitive) => primitive.allocation_type(),
                None => {
                    return Err(VmError::Panic(format!("bad field descriptor: {desc}")));
                }
            },
        })
    }

    pub const fn is_wide(self) -> bool {
        matches!(self, AllocationType::Long | AllocationType::Double)
    }
}

/// Parsed method descriptor: parameter descriptors plus the return descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<String>,
    pub ret: String,
}

impl MethodDescriptor {
    pub fn parse(desc: &str) -> Result<Self, VmError> {
        let bad = || VmError::Panic(format!("bad method descriptor: {desc}"));
        let inner = desc.strip_prefix('(').ok_or_else(bad)?;
        let close = inner.find(')').ok_or_else(bad)?;
        let (mut rest, ret) = (&inner[..close], &inner[close + 1..]);
        if ret.is_empty() {
            return Err(bad());
        }

        let mut params = Vec::new();
        while !rest.is_empty() {
            let len = Self::descriptor_len(rest).ok_or_else(bad)?;
            params.push(rest[..len].to_string());
            rest = &rest[len..];
        }
        Ok(Self {
            params,
            ret: ret.to_string(),
        })
    }

    fn descriptor_len(s: &str) -> Option<usize> {
        let mut len = 0;
        let bytes = s.as_bytes();
        while bytes.get(len) == Some(&b'[') {
            len += 1;
        }
        match bytes.get(len)? {
            b'L' => {
                let end = s[len..].find(';')?;
                Some(len + end + 1)
            }
            tag if PrimitiveType::from_tag(*tag as char).is_some() => Some(len + 1),
            _ => None,
        }
    }

    /// Number of declared parameters (one per logical value, wide or not).
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn returns_value(&self) -> bool {
        self.ret != "V"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_parameter_lists() {
        let desc = MethodDescriptor::parse("(I[JLjava/lang/String;[[DZ)V").unwrap();
        assert_eq!(
            desc.params,
            vec!["I", "[J", "Ljava/lang/String;", "[[D", "Z"]
        );
        assert_eq!(desc.ret, "V");
        assert!(!desc.returns_value());
    }

    #[test]
    fn parses_empty_parameter_list() {
        let desc = MethodDescriptor::parse("()Ljava/lang/Object;").unwrap();
        assert!(desc.params.is_empty());
        assert!(desc.returns_value());
    }

    #[test]
    fn rejects_truncated_descriptors() {
        assert!(MethodDescriptor::parse("(Ljava/lang/String)V").is_err());
        assert!(MethodDescriptor::parse("(I").is_err());
        assert!(MethodDescriptor::parse("(I)").is_err());
    }

    #[test]
    fn allocation_type_of_descriptor_tags() {
        assert_eq!(
            AllocationType::of_descriptor("Ljava/lang/Object;").unwrap(),
            AllocationType::Reference
        );
        assert_eq!(
            AllocationType::of_descriptor("[I").unwrap(),
            AllocationType::Reference
        );
        assert_eq!(
            AllocationType::of_descriptor("J").unwrap(),
            AllocationType::Long
        );
        assert!(AllocationType::of_descriptor("Q").is_err());
    }
}
