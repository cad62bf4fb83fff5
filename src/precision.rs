/// 16-bit floating element kinds and the packed pair value.
/// Tensor cores consume fp16 and bf16 operands; the same two kinds are the
/// ones whose atomics need the paired fast path.
use half::{bf16, f16};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    F16,
    BF16,
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            ElementKind::F16  => "fp16",
            ElementKind::BF16 => "bf16",
        })
    }
}

/// Size of one element in bytes.
pub const ELEM_BYTES: usize = 2;
/// Size (and natural alignment) of a packed pair in bytes.
pub const PAIR_BYTES: usize = 4;

/// A 16-bit float that can live in a target buffer.
pub trait HalfFloat: Copy + Debug + PartialEq + Send + Sync + 'static {
    const KIND: ElementKind;

    /// Additive identity used for the unused slot of a pair.
    /// Negative zero: `x + (-0.0)` is `x` for every `x`, signed zeros and NaN
    /// payloads included.
    const NEUTRAL: Self;

    fn to_bits(self) -> u16;
    fn from_bits(bits: u16) -> Self;
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;

    /// Sum computed in f32 and rounded once to the element kind.
    /// Adding [`HalfFloat::NEUTRAL`] returns `self` bit for bit, so a
    /// signaling NaN in the identity slot of a pair is not quieted.
    fn add(self, rhs: Self) -> Self {
        if rhs.to_bits() == Self::NEUTRAL.to_bits() {
            return self;
        }
        Self::from_f32(self.to_f32() + rhs.to_f32())
    }
}

impl HalfFloat for f16 {
    const KIND: ElementKind = ElementKind::F16;
    const NEUTRAL: Self = f16::NEG_ZERO;

    fn to_bits(self) -> u16 {
        f16::to_bits(self)
    }
    fn from_bits(bits: u16) -> Self {
        f16::from_bits(bits)
    }
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

impl HalfFloat for bf16 {
    const KIND: ElementKind = ElementKind::BF16;
    const NEUTRAL: Self = bf16::NEG_ZERO;

    fn to_bits(self) -> u16 {
        bf16::to_bits(self)
    }
    fn from_bits(bits: u16) -> Self {
        bf16::from_bits(bits)
    }
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
    fn from_f32(v: f32) -> Self {
        bf16::from_f32(v)
    }
}

/// Two logically adjacent buffer slots packed into one 32-bit word.
/// `lo` is the element at the lower address.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pair<T> {
    pub lo: T,
    pub hi: T,
}

impl<T: HalfFloat> Pair<T> {
    pub fn new(lo: T, hi: T) -> Self {
        Pair { lo, hi }
    }

    /// Contribution in the low slot, identity in the high slot.
    pub fn low(value: T) -> Self {
        Pair { lo: value, hi: T::NEUTRAL }
    }

    /// Identity in the low slot, contribution in the high slot.
    pub fn high(value: T) -> Self {
        Pair { lo: T::NEUTRAL, hi: value }
    }

    /// Reinterpret as the raw word used for atomic exchange.
    pub fn to_bits(self) -> u32 {
        (self.lo.to_bits() as u32) | ((self.hi.to_bits() as u32) << 16)
    }

    /// Reinterpret a raw word as a pair of floats for arithmetic.
    pub fn from_bits(bits: u32) -> Self {
        Pair {
            lo: T::from_bits(bits as u16),
            hi: T::from_bits((bits >> 16) as u16),
        }
    }

    pub fn add(self, rhs: Self) -> Self {
        Pair {
            lo: self.lo.add(rhs.lo),
            hi: self.hi.add(rhs.hi),
        }
    }
}
