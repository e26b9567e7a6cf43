//! Bit-packed data type codes and their introspection.
//!
//! A `DType` is a 24-bit integer code: component bit width in bits 0-7,
//! type class in bits 8-11, vector-length-minus-one in bits 12-19, and a
//! complex flag at bit 20. Element size follows from the fields, and the
//! canonical display name is derived deterministically so callers can
//! compare names as strings.

pub const NBIT_BITS: u32 = 0x0000FF;
pub const TYPE_BITS: u32 = 0x000F00;
pub const VECTOR_BITS: u32 = 0x0FF000;
pub const VECTOR_BIT0: u32 = 12;
pub const COMPLEX_BIT: u32 = 0x100000;

const INT_TYPE: u32 = 0x000;
const UINT_TYPE: u32 = 0x100;
const FLOAT_TYPE: u32 = 0x200;
const STRING_TYPE: u32 = 0x300;
const STORAGE_TYPE: u32 = 0x400;

/// Type class field of a dtype code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Int,
    Uint,
    Float,
    String,
    Storage,
    /// Class nibble outside the defined set; kept so introspection of an
    /// arbitrary integer code stays total.
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DType(pub u32);

impl DType {
    pub const I1: DType = DType(1 | INT_TYPE);
    pub const I2: DType = DType(2 | INT_TYPE);
    pub const I4: DType = DType(4 | INT_TYPE);
    pub const I8: DType = DType(8 | INT_TYPE);
    pub const I16: DType = DType(16 | INT_TYPE);
    pub const I32: DType = DType(32 | INT_TYPE);
    pub const I64: DType = DType(64 | INT_TYPE);

    pub const U1: DType = DType(1 | UINT_TYPE);
    pub const U2: DType = DType(2 | UINT_TYPE);
    pub const U4: DType = DType(4 | UINT_TYPE);
    pub const U8: DType = DType(8 | UINT_TYPE);
    pub const U16: DType = DType(16 | UINT_TYPE);
    pub const U32: DType = DType(32 | UINT_TYPE);
    pub const U64: DType = DType(64 | UINT_TYPE);

    pub const F16: DType = DType(16 | FLOAT_TYPE);
    pub const F32: DType = DType(32 | FLOAT_TYPE);
    pub const F64: DType = DType(64 | FLOAT_TYPE);

    pub const CI1: DType = DType(1 | INT_TYPE | COMPLEX_BIT);
    pub const CI2: DType = DType(2 | INT_TYPE | COMPLEX_BIT);
    pub const CI4: DType = DType(4 | INT_TYPE | COMPLEX_BIT);
    pub const CI8: DType = DType(8 | INT_TYPE | COMPLEX_BIT);
    pub const CI16: DType = DType(16 | INT_TYPE | COMPLEX_BIT);
    pub const CI32: DType = DType(32 | INT_TYPE | COMPLEX_BIT);
    pub const CI64: DType = DType(64 | INT_TYPE | COMPLEX_BIT);

    pub const CF16: DType = DType(16 | FLOAT_TYPE | COMPLEX_BIT);
    pub const CF32: DType = DType(32 | FLOAT_TYPE | COMPLEX_BIT);
    pub const CF64: DType = DType(64 | FLOAT_TYPE | COMPLEX_BIT);

    pub const STORAGE8: DType = DType(8 | STORAGE_TYPE);
    pub const STORAGE16: DType = DType(16 | STORAGE_TYPE);
    pub const STORAGE32: DType = DType(32 | STORAGE_TYPE);
    pub const STORAGE64: DType = DType(64 | STORAGE_TYPE);

    /// Build a scalar code from a class and component width.
    pub const fn new(class: TypeClass, nbit: u32) -> DType {
        let class_bits = match class {
            TypeClass::Int => INT_TYPE,
            TypeClass::Uint => UINT_TYPE,
            TypeClass::Float => FLOAT_TYPE,
            TypeClass::String => STRING_TYPE,
            TypeClass::Storage => STORAGE_TYPE,
            TypeClass::Unknown(bits) => bits & TYPE_BITS,
        };
        DType((nbit & NBIT_BITS) | class_bits)
    }

    /// Same code with the complex flag set.
    pub const fn complex(self) -> DType {
        DType(self.0 | COMPLEX_BIT)
    }

    /// Same code as a short vector of `len` components (`len >= 1`).
    pub const fn with_vector_len(self, len: u32) -> DType {
        DType((self.0 & !VECTOR_BITS) | (((len - 1) << VECTOR_BIT0) & VECTOR_BITS))
    }

    pub const fn nbit(self) -> u32 {
        self.0 & NBIT_BITS
    }

    pub const fn vector_len(self) -> u32 {
        ((self.0 & VECTOR_BITS) >> VECTOR_BIT0) + 1
    }

    pub const fn is_complex(self) -> bool {
        self.0 & COMPLEX_BIT != 0
    }

    pub fn type_class(self) -> TypeClass {
        match self.0 & TYPE_BITS {
            INT_TYPE => TypeClass::Int,
            UINT_TYPE => TypeClass::Uint,
            FLOAT_TYPE => TypeClass::Float,
            STRING_TYPE => TypeClass::String,
            STORAGE_TYPE => TypeClass::Storage,
            other => TypeClass::Unknown(other),
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self.type_class(), TypeClass::Int | TypeClass::Float)
    }

    pub fn is_floating(self) -> bool {
        self.type_class() == TypeClass::Float
    }

    pub fn is_storage(self) -> bool {
        self.type_class() == TypeClass::Storage
    }

    pub fn is_string(self) -> bool {
        self.type_class() == TypeClass::String
    }

    /// Total element width in bits, including vector and complex factors.
    pub const fn element_bits(self) -> u64 {
        let complex_factor = if self.is_complex() { 2 } else { 1 };
        self.nbit() as u64 * self.vector_len() as u64 * complex_factor
    }

    /// Element size rounded up to whole bytes. Sub-byte types round up to
    /// one byte; bit-packing across elements is the caller's concern.
    pub const fn element_bytes(self) -> usize {
        ((self.element_bits() + 7) / 8) as usize
    }

    /// Canonical name: optional `Vector<`, `c` for complex, one class
    /// letter (`f`/`i`/`u`/`s`, `?` for an unknown class), the decimal
    /// bit width, optional `, N>`, optional ` (storage)`.
    pub fn name(self) -> String {
        let mut out = String::with_capacity(16);
        let vector_len = self.vector_len();
        if vector_len > 1 {
            out.push_str("Vector<");
        }
        if self.is_complex() {
            out.push('c');
        }
        out.push(match self.type_class() {
            TypeClass::Float => 'f',
            TypeClass::String => 's',
            TypeClass::Int => 'i',
            TypeClass::Uint | TypeClass::Storage => 'u',
            TypeClass::Unknown(_) => '?',
        });
        out.push_str(&self.nbit().to_string());
        if vector_len > 1 {
            out.push_str(&format!(", {}>", vector_len));
        }
        if self.is_storage() {
            out.push_str(" (storage)");
        }
        out
    }

    pub fn info(self) -> DTypeInfo {
        DTypeInfo {
            nbit: self.nbit(),
            class: self.type_class(),
            is_signed: self.is_signed(),
            is_floating: self.is_floating(),
            is_complex: self.is_complex(),
            is_storage: self.is_storage(),
            is_string: self.is_string(),
            name: self.name(),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

/// Introspection record for a dtype code. Never fails: unknown class codes
/// produce a `?`-form name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DTypeInfo {
    pub nbit: u32,
    pub class: TypeClass,
    pub is_signed: bool,
    pub is_floating: bool,
    pub is_complex: bool,
    pub is_storage: bool,
    pub is_string: bool,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scalar_names() {
        assert_eq!(DType::I8.name(), "i8");
        assert_eq!(DType::U16.name(), "u16");
        assert_eq!(DType::F32.name(), "f32");
        assert_eq!(DType::CI16.name(), "ci16");
        assert_eq!(DType::CF32.name(), "cf32");
        assert_eq!(DType::CI4.name(), "ci4");
        assert_eq!(DType::U1.name(), "u1");
    }

    #[test]
    fn vector_and_storage_names() {
        assert_eq!(DType::F32.with_vector_len(4).name(), "Vector<f32, 4>");
        assert_eq!(DType::CI8.with_vector_len(2).name(), "Vector<ci8, 2>");
        assert_eq!(DType::STORAGE32.name(), "u32 (storage)");
        assert_eq!(
            DType::STORAGE64.with_vector_len(3).name(),
            "Vector<u64, 3> (storage)"
        );
    }

    #[test]
    fn unknown_class_gets_question_mark() {
        let odd = DType(32 | 0x500);
        assert_eq!(odd.name(), "?32");
        let info = odd.info();
        assert!(!info.is_signed);
        assert!(!info.is_floating);
    }

    #[test]
    fn element_sizes() {
        assert_eq!(DType::F32.element_bytes(), 4);
        assert_eq!(DType::CF32.element_bytes(), 8);
        assert_eq!(DType::CI4.element_bytes(), 1);
        assert_eq!(DType::CI1.element_bits(), 2);
        assert_eq!(DType::CI1.element_bytes(), 1);
        assert_eq!(DType::F32.with_vector_len(4).element_bytes(), 16);
        assert_eq!(DType::CI16.element_bytes(), 4);
    }

    #[test]
    fn info_matches_fields() {
        let info = DType::CF32.info();
        assert_eq!(info.name, "cf32");
        assert!(info.is_complex);
        assert!(info.is_floating);
        assert!(info.is_signed);
        assert_eq!(info.nbit, 32);
        assert!(!info.is_storage);
    }

    fn defined_classes() -> impl Strategy<Value = TypeClass> {
        prop_oneof![
            Just(TypeClass::Int),
            Just(TypeClass::Uint),
            Just(TypeClass::Float),
            Just(TypeClass::String),
            Just(TypeClass::Storage),
        ]
    }

    proptest! {
        // Distinct (class, nbit, vector, complex) tuples must never collide
        // on their canonical names, except that storage and uint
        // deliberately share a class letter and differ by the suffix.
        #[test]
        fn names_are_injective(
            class_a in defined_classes(), class_b in defined_classes(),
            nbit_a in 1u32..=128, nbit_b in 1u32..=128,
            vlen_a in 1u32..=8, vlen_b in 1u32..=8,
            cplx_a in any::<bool>(), cplx_b in any::<bool>(),
        ) {
            let mut a = DType::new(class_a, nbit_a).with_vector_len(vlen_a);
            let mut b = DType::new(class_b, nbit_b).with_vector_len(vlen_b);
            if cplx_a { a = a.complex(); }
            if cplx_b { b = b.complex(); }
            if a != b {
                prop_assert_ne!(a.name(), b.name());
            } else {
                prop_assert_eq!(a.name(), b.name());
            }
        }

        #[test]
        fn element_bytes_round_up(nbit in 1u32..=128, vlen in 1u32..=8, cplx in any::<bool>()) {
            let mut dt = DType::new(TypeClass::Uint, nbit).with_vector_len(vlen);
            if cplx { dt = dt.complex(); }
            let bits = dt.element_bits();
            prop_assert!(dt.element_bytes() as u64 * 8 >= bits);
            prop_assert!((dt.element_bytes() as u64 - 1) * 8 < bits);
        }
    }
}
