use crate::SymbolId;

const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const IMMEDIATE_TAG: u64 = 0b11;

const IMMEDIATE_MASK: u64 = 0x1F;
const SYMBOL_TAG: u64 = 0x13;
const SYMBOL_SHIFT: u64 = 8;

/// A tagged 64-bit value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0` 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01` opaque host pointer (requires 4-byte alignment).
/// - **Immediate**: `...XXXX11` `nil`, `true`, `false`, `undef` and symbols.
///
/// `undef` is the absent marker of a variable slot. It never compares equal
/// to `nil`, so "never set" and "set to nil" stay distinguishable.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const NIL: Self = Self(0x03);
    pub const TRUE: Self = Self(0x07);
    pub const FALSE: Self = Self(0x0B);
    pub const UNDEF: Self = Self(0x0F);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    pub const FIXNUM_MIN: i64 = -(1 << 62);
    pub const FIXNUM_MAX: i64 = (1 << 62) - 1;

    /// # Panics
    ///
    /// Panics if `n` does not fit in 63 bits.
    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        match Self::try_from_i64(n) {
            Some(value) => value,
            None => panic!("fixnum overflow: {n}"),
        }
    }

    #[inline(always)]
    pub const fn try_from_i64(n: i64) -> Option<Self> {
        if n < Self::FIXNUM_MIN || n > Self::FIXNUM_MAX {
            return None;
        }
        Some(Self((n << 1) as u64))
    }

    #[inline(always)]
    pub fn as_i64(self) -> Option<i64> {
        self.is_fixnum().then(|| (self.0 as i64) >> 1)
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as u64;
        debug_assert!(addr & TAG_MASK == 0, "pointer not aligned");
        Self(addr | REF_TAG)
    }

    #[inline(always)]
    pub const fn ref_bits(self) -> u64 {
        self.0 & !TAG_MASK
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & TAG_MASK == IMMEDIATE_TAG
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline(always)]
    pub const fn is_undef(self) -> bool {
        self.0 == Self::UNDEF.0
    }

    /// Everything except `nil` and `false` is truthy.
    #[inline(always)]
    pub const fn is_truthy(self) -> bool {
        self.0 != Self::NIL.0 && self.0 != Self::FALSE.0
    }

    #[inline(always)]
    pub const fn symbol(id: SymbolId) -> Self {
        Self(((id.0 as u64) << SYMBOL_SHIFT) | SYMBOL_TAG)
    }

    #[inline(always)]
    pub const fn is_symbol(self) -> bool {
        self.0 & IMMEDIATE_MASK == SYMBOL_TAG
    }

    #[inline(always)]
    pub fn as_symbol(self) -> Option<SymbolId> {
        self.is_symbol()
            .then(|| SymbolId((self.0 >> SYMBOL_SHIFT) as u32))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::from_i64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::from_bool(b)
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_i64() {
            write!(f, "Fixnum({n})")
        } else if self.is_ref() {
            write!(f, "Ref(0x{:x})", self.ref_bits())
        } else if let Some(sym) = self.as_symbol() {
            write!(f, "Symbol({})", sym.0)
        } else {
            match *self {
                Self::NIL => f.write_str("nil"),
                Self::TRUE => f.write_str("true"),
                Self::FALSE => f.write_str("false"),
                Self::UNDEF => f.write_str("undef"),
                _ => write!(f, "Immediate(0x{:016x})", self.0),
            }
        }
    }
}
