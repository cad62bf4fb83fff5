/// Global memory simulation.
/// HBM hands out allocations backed by 32-bit atomic words, the width at
/// which the hardware performs compare-and-swap. A 16-bit element at byte
/// address `a` lives in word `a / 4`: low half when `a % 4 == 0`, high half
/// otherwise.
use crate::error::{Error, Result};
use crate::precision::{ELEM_BYTES, HalfFloat, PAIR_BYTES};
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// cudaMalloc alignment
pub const ALLOC_ALIGN: usize = 256;

/// High Bandwidth Memory, the main GPU memory.
/// Capacity is bookkeeping only; each allocation owns its own words.
#[derive(Debug)]
pub struct HBM {
    pub size_bytes: usize,
    next_addr: AtomicUsize,
}

impl HBM {
    pub fn new(size_bytes: usize) -> Self {
        HBM {
            size_bytes,
            next_addr: AtomicUsize::new(0),
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        self.next_addr.load(Ordering::Relaxed)
    }

    /// Allocate `count` zeroed elements. The base address is 256-byte aligned,
    /// so element 0 of a whole allocation is always the low member of a pair.
    pub fn alloc<T: HalfFloat>(&self, count: usize) -> Result<Allocation<T>> {
        let size = self.size_bytes;
        let bytes = count
            .checked_mul(ELEM_BYTES)
            .and_then(|b| b.max(1).checked_next_multiple_of(ALLOC_ALIGN))
            .ok_or_else(|| Error::OutOfMemory {
                requested: usize::MAX,
                available: size.saturating_sub(self.allocated_bytes()),
            })?;
        let base_addr = self
            .next_addr
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                cur.checked_add(bytes).filter(|&end| end <= size)
            })
            .map_err(|cur| Error::OutOfMemory {
                requested: bytes,
                available: size.saturating_sub(cur),
            })?;

        let words = (0..count.div_ceil(2)).map(|_| AtomicU32::new(0)).collect();
        Ok(Allocation {
            base_addr,
            len: count,
            words,
            _kind: PhantomData,
        })
    }
}

/// Storage for one device allocation of 16-bit elements.
#[derive(Debug)]
pub struct Allocation<T> {
    base_addr: usize,
    len: usize,
    words: Box<[AtomicU32]>,
    _kind: PhantomData<T>,
}

impl<T: HalfFloat> Allocation<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn base_addr(&self) -> usize {
        self.base_addr
    }

    /// The whole allocation as one view.
    pub fn view(&self) -> DeviceBuffer<'_, T> {
        DeviceBuffer::new(self, 0, self.len)
    }

    /// A view starting `offset` elements in, like a tensor with a storage offset.
    pub fn view_range(&self, offset: usize, count: usize) -> Result<DeviceBuffer<'_, T>> {
        match offset.checked_add(count) {
            Some(end) if end <= self.len => Ok(DeviceBuffer::new(self, offset, count)),
            _ => Err(Error::InvalidView { offset, count, len: self.len }),
        }
    }

    pub fn read(&self) -> Vec<T> {
        self.view().read()
    }

    pub fn write(&self, values: &[T]) -> Result<()> {
        self.view().write(values)
    }

    /// The 32-bit word containing byte address `addr`.
    /// Panics if the address lies outside the allocation.
    fn word(&self, addr: usize) -> &AtomicU32 {
        &self.words[(addr - self.base_addr) / PAIR_BYTES]
    }

    fn load_elem(&self, addr: usize) -> T {
        let bits = self.word(addr).load(Ordering::Acquire);
        T::from_bits(half_of(bits, addr))
    }

    fn store_elem(&self, addr: usize, value: T) {
        let _ = self.word(addr).fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some(with_half(bits, addr, value.to_bits()))
        });
    }
}

/// Extract the 16-bit half of `word` that holds the element at `addr`.
pub(crate) fn half_of(word: u32, addr: usize) -> u16 {
    if addr % PAIR_BYTES == 0 {
        word as u16
    } else {
        (word >> 16) as u16
    }
}

/// Replace the 16-bit half of `word` that holds the element at `addr`.
pub(crate) fn with_half(word: u32, addr: usize, bits: u16) -> u32 {
    if addr % PAIR_BYTES == 0 {
        (word & 0xFFFF_0000) | bits as u32
    } else {
        (word & 0x0000_FFFF) | ((bits as u32) << 16)
    }
}

/// Lock-free record of the lowest and highest byte touched by atomics.
#[derive(Debug)]
struct TouchSpan {
    lo: AtomicUsize,
    hi: AtomicUsize,
}

impl TouchSpan {
    fn new() -> Self {
        TouchSpan {
            lo: AtomicUsize::new(usize::MAX),
            hi: AtomicUsize::new(0),
        }
    }

    fn record(&self, addr: usize, bytes: usize) {
        self.lo.fetch_min(addr, Ordering::Relaxed);
        self.hi.fetch_max(addr + bytes, Ordering::Relaxed);
    }

    fn get(&self) -> Option<Range<usize>> {
        let lo = self.lo.load(Ordering::Relaxed);
        let hi = self.hi.load(Ordering::Relaxed);
        (lo < hi).then_some(lo..hi)
    }

    fn reset(&self) {
        self.lo.store(usize::MAX, Ordering::Relaxed);
        self.hi.store(0, Ordering::Relaxed);
    }
}

/// A contiguous run of elements inside an allocation: the target buffer the
/// atomic primitives mutate. Never owns or resizes the storage.
#[derive(Debug)]
pub struct DeviceBuffer<'a, T> {
    alloc: &'a Allocation<T>,
    offset: usize,
    len: usize,
    touched: TouchSpan,
}

impl<'a, T: HalfFloat> DeviceBuffer<'a, T> {
    fn new(alloc: &'a Allocation<T>, offset: usize, len: usize) -> Self {
        DeviceBuffer {
            alloc,
            offset,
            len,
            touched: TouchSpan::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte address of element `index`.
    pub fn addr_of(&self, index: usize) -> usize {
        self.alloc.base_addr + (self.offset + index) * ELEM_BYTES
    }

    /// Bytes owned by this view.
    pub fn byte_range(&self) -> Range<usize> {
        self.addr_of(0)..self.addr_of(self.len)
    }

    pub fn read(&self) -> Vec<T> {
        (0..self.len).map(|i| self.alloc.load_elem(self.addr_of(i))).collect()
    }

    pub fn get(&self, index: usize) -> T {
        self.alloc.load_elem(self.addr_of(index))
    }

    pub fn write(&self, values: &[T]) -> Result<()> {
        if values.len() != self.len {
            return Err(Error::BufferSizeMismatch {
                expected: self.len,
                actual: values.len(),
            });
        }
        for (i, &v) in values.iter().enumerate() {
            self.alloc.store_elem(self.addr_of(i), v);
        }
        Ok(())
    }

    /// Byte span logically touched by atomics issued through this view.
    pub fn touched(&self) -> Option<Range<usize>> {
        self.touched.get()
    }

    pub fn reset_touched(&self) {
        self.touched.reset();
    }

    /// Word holding the single element at `addr`; records a 2-byte access.
    pub(crate) fn elem_word(&self, addr: usize) -> &AtomicU32 {
        self.touched.record(addr, ELEM_BYTES);
        self.alloc.word(addr)
    }

    /// Word holding the pair starting at `addr`; records a 4-byte access.
    pub(crate) fn pair_word(&self, addr: usize) -> &AtomicU32 {
        debug_assert_eq!(addr % PAIR_BYTES, 0, "pair address must be 4-byte aligned");
        self.touched.record(addr, PAIR_BYTES);
        self.alloc.word(addr)
    }
}
