use num_bigint::BigInt;

use crate::charset::Charset;
use crate::result::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    len: usize,
    bytes: Vec<u8>,
}

impl BitSet {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            bytes: vec![0; (len + 7) / 8],
        }
    }

    pub fn from_indices(len: usize, indices: &[usize]) -> Self {
        let mut set = Self::new(len);
        for &i in indices {
            set.set(i, true);
        }
        set
    }

    pub fn from_bytes(bytes: &[u8], len: usize) -> Self {
        let mut set = Self::new(len);
        for i in 0..len {
            if bytes[i / 8] >> (i % 8) & 1 != 0 {
                set.set(i, true);
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.len && self.bytes[index / 8] >> (index % 8) & 1 != 0
    }

    pub fn set(&mut self, index: usize, bit: bool) {
        assert!(index < self.len, "bit index {} out of range {}", index, self.len);
        if bit {
            self.bytes[index / 8] |= 1 << (index % 8);
        } else {
            self.bytes[index / 8] &= !(1 << (index % 8));
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.get(i))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReaderState {
    pos: usize,
    cache: u8,
    remaining: u8,
}

#[derive(Debug)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    pos: usize,
    cache: u8,
    remaining: u8,
    mark: Option<ReaderState>,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            cache: 0,
            remaining: 0,
            mark: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn is_eof(&self) -> bool {
        self.remaining == 0 && self.pos >= self.buf.len()
    }

    pub fn position(&self) -> usize {
        if self.remaining > 0 {
            self.pos - 1
        } else {
            self.pos
        }
    }

    pub fn seek(&mut self, byte_pos: usize) {
        self.pos = byte_pos;
        self.cache = 0;
        self.remaining = 0;
    }

    pub fn mark(&mut self) {
        self.mark = Some(self.state());
    }

    pub fn restore(&mut self) {
        if let Some(state) = self.mark.take() {
            self.restore_state(state);
        }
    }

    pub fn clear_mark(&mut self) {
        self.mark = None;
    }

    pub(crate) fn state(&self) -> ReaderState {
        ReaderState {
            pos: self.pos,
            cache: self.cache,
            remaining: self.remaining,
        }
    }

    pub(crate) fn restore_state(&mut self, state: ReaderState) {
        self.pos = state.pos;
        self.cache = state.cache;
        self.remaining = state.remaining;
    }

    fn take_bit(&mut self, order: BitOrder) -> Result<bool> {
        if self.remaining == 0 {
            if self.pos >= self.buf.len() {
                return Err(Error::BufferExhausted(self.pos));
            }
            self.cache = self.buf[self.pos];
            self.pos += 1;
            self.remaining = 8;
        }
        let consumed = 8 - self.remaining;
        let shift = match order {
            BitOrder::Little => consumed,
            BitOrder::Big => 7 - consumed,
        };
        self.remaining -= 1;
        Ok(self.cache >> shift & 1 != 0)
    }

    pub fn get_bits(&mut self, count: usize, order: BitOrder) -> Result<BitSet> {
        let mut set = BitSet::new(count);
        for i in 0..count {
            if self.take_bit(order)? {
                set.set(i, true);
            }
        }
        Ok(set)
    }

    // Chunks of the value in stream order: full bytes, then a trailing
    // partial chunk when `bits` is not a multiple of eight.
    fn get_chunks(&mut self, bits: u32, chunks: &mut [u8]) -> Result<usize> {
        let n = ((bits + 7) / 8) as usize;
        for (j, chunk) in chunks.iter_mut().enumerate().take(n) {
            let width = if j == n - 1 { bits - 8 * (n as u32 - 1) } else { 8 };
            let mut byte = 0u8;
            for k in 0..width {
                if self.take_bit(BitOrder::Little)? {
                    byte |= 1 << k;
                }
            }
            *chunk = byte;
        }
        Ok(n)
    }

    pub fn get_uint(&mut self, bits: u32, order: ByteOrder) -> Result<u64> {
        debug_assert!(bits >= 1 && bits <= 64);
        let mut chunks = [0u8; 8];
        let n = self.get_chunks(bits, &mut chunks)?;
        let value = match order {
            ByteOrder::Little => chunks[..n]
                .iter()
                .enumerate()
                .fold(0u64, |v, (j, &b)| v | (b as u64) << (8 * j)),
            ByteOrder::Big => {
                let mut v = chunks[0] as u64;
                for (j, &b) in chunks[1..n].iter().enumerate() {
                    let width = if j + 1 == n - 1 { bits - 8 * (n as u32 - 1) } else { 8 };
                    v = v << width | b as u64;
                }
                v
            }
        };
        Ok(value)
    }

    pub fn get_int(&mut self, bits: u32, order: ByteOrder) -> Result<i64> {
        let raw = self.get_uint(bits, order)?;
        if bits < 64 && raw >> (bits - 1) & 1 != 0 {
            Ok((raw | !((1u64 << bits) - 1)) as i64)
        } else {
            Ok(raw as i64)
        }
    }

    pub fn get_big_uint(&mut self, bits: u32, order: ByteOrder) -> Result<BigInt> {
        let n = ((bits + 7) / 8) as usize;
        let mut chunks = vec![0u8; n];
        self.get_chunks(bits, &mut chunks)?;
        let value = match order {
            ByteOrder::Little => BigInt::from_bytes_le(num_bigint::Sign::Plus, &chunks),
            ByteOrder::Big => {
                let mut v = BigInt::from(chunks[0]);
                for (j, &b) in chunks[1..].iter().enumerate() {
                    let width = if j + 1 == n - 1 { bits - 8 * (n as u32 - 1) } else { 8 };
                    v = (v << width) | BigInt::from(b);
                }
                v
            }
        };
        Ok(value)
    }

    pub fn get_big_int(&mut self, bits: u32, order: ByteOrder) -> Result<BigInt> {
        let raw = self.get_big_uint(bits, order)?;
        if (raw.clone() >> (bits - 1)) & BigInt::from(1) == BigInt::from(1) {
            Ok(raw - (BigInt::from(1) << bits))
        } else {
            Ok(raw)
        }
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_uint(8, ByteOrder::Big)? as u8)
    }

    pub fn get_u16(&mut self, order: ByteOrder) -> Result<u16> {
        Ok(self.get_uint(16, order)? as u16)
    }

    pub fn get_u32(&mut self, order: ByteOrder) -> Result<u32> {
        Ok(self.get_uint(32, order)? as u32)
    }

    pub fn get_u64(&mut self, order: ByteOrder) -> Result<u64> {
        self.get_uint(64, order)
    }

    pub fn get_f32(&mut self, order: ByteOrder) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32(order)?))
    }

    pub fn get_f64(&mut self, order: ByteOrder) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64(order)?))
    }

    pub fn get_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        if self.remaining == 0 {
            if self.pos + count > self.buf.len() {
                return Err(Error::BufferExhausted(self.buf.len()));
            }
            let out = self.buf[self.pos..self.pos + count].to_vec();
            self.pos += count;
            return Ok(out);
        }
        (0..count).map(|_| self.get_u8()).collect()
    }

    pub fn get_text(&mut self, count: usize, charset: Charset) -> Result<String> {
        let bytes = self.get_bytes(count)?;
        charset.decode(&bytes)
    }

    pub fn get_text_until(&mut self, terminator: u8, consume: bool, charset: Charset) -> Result<String> {
        let mut bytes = vec![];
        loop {
            let save = self.state();
            match self.get_u8() {
                Err(Error::BufferExhausted(_)) => {
                    self.restore_state(save);
                    break;
                }
                Err(e) => return Err(e),
                Ok(b) if b == terminator => {
                    if !consume {
                        self.restore_state(save);
                    }
                    break;
                }
                Ok(b) => bytes.push(b),
            }
        }
        charset.decode(&bytes)
    }
}

#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    cache: u8,
    cached: u8,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> usize {
        self.out.len()
    }

    pub fn written(&self) -> &[u8] {
        &self.out
    }

    fn put_bit(&mut self, bit: bool, order: BitOrder) {
        let shift = match order {
            BitOrder::Little => self.cached,
            BitOrder::Big => 7 - self.cached,
        };
        if bit {
            self.cache |= 1 << shift;
        }
        self.cached += 1;
        if self.cached == 8 {
            self.out.push(self.cache);
            self.cache = 0;
            self.cached = 0;
        }
    }

    pub fn put_bits(&mut self, set: &BitSet, count: usize, order: BitOrder) {
        for i in 0..count {
            self.put_bit(set.get(i), order);
        }
    }

    fn put_chunk(&mut self, byte: u8, width: u32) {
        for k in 0..width {
            self.put_bit(byte >> k & 1 != 0, BitOrder::Little);
        }
    }

    pub fn put_uint(&mut self, value: u64, bits: u32, order: ByteOrder) -> Result<()> {
        debug_assert!(bits >= 1 && bits <= 64);
        if bits < 64 && value >= 1u64 << bits {
            return Err(Error::Overflow { bits });
        }
        let n = ((bits + 7) / 8) as usize;
        let tail = bits - 8 * (n as u32 - 1);
        match order {
            ByteOrder::Little => {
                for j in 0..n {
                    let width = if j == n - 1 { tail } else { 8 };
                    self.put_chunk((value >> (8 * j)) as u8, width);
                }
            }
            ByteOrder::Big => {
                for j in 0..n {
                    if j == n - 1 {
                        self.put_chunk(value as u8 & ((1u16 << tail) - 1) as u8, tail);
                    } else {
                        self.put_chunk((value >> (bits - 8 * (j as u32 + 1))) as u8, 8);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn put_int(&mut self, value: i64, bits: u32, order: ByteOrder) -> Result<()> {
        if bits < 64 {
            let lo = -(1i64 << (bits - 1));
            let hi = (1i64 << (bits - 1)) - 1;
            if value < lo || value > hi {
                return Err(Error::Overflow { bits });
            }
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let raw = value as u64 & mask;
        let n = ((bits + 7) / 8) as usize;
        let tail = bits - 8 * (n as u32 - 1);
        match order {
            ByteOrder::Little => {
                for j in 0..n {
                    let width = if j == n - 1 { tail } else { 8 };
                    self.put_chunk((raw >> (8 * j)) as u8, width);
                }
            }
            ByteOrder::Big => {
                for j in 0..n {
                    if j == n - 1 {
                        self.put_chunk(raw as u8 & ((1u16 << tail) - 1) as u8, tail);
                    } else {
                        self.put_chunk((raw >> (bits - 8 * (j as u32 + 1))) as u8, 8);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn put_big_int(&mut self, value: &BigInt, bits: u32, order: ByteOrder) -> Result<()> {
        let bound = BigInt::from(1) << bits;
        let raw = if value.sign() == num_bigint::Sign::Minus {
            let raw = value + &bound;
            if raw.sign() == num_bigint::Sign::Minus {
                return Err(Error::Overflow { bits });
            }
            raw
        } else {
            if value >= &bound {
                return Err(Error::Overflow { bits });
            }
            value.clone()
        };
        let n = ((bits + 7) / 8) as usize;
        let tail = bits - 8 * (n as u32 - 1);
        let (_, le) = raw.to_bytes_le();
        let chunk = |j: usize| -> u8 {
            match order {
                ByteOrder::Little => le.get(j).copied().unwrap_or(0),
                ByteOrder::Big => {
                    // chunk j holds value bits [bits - 8*(j+1), ...), except the tail
                    let low = if j == n - 1 { 0 } else { bits - 8 * (j as u32 + 1) };
                    let shifted: BigInt = raw.clone() >> low;
                    let (_, bytes) = shifted.to_bytes_le();
                    bytes.first().copied().unwrap_or(0)
                }
            }
        };
        for j in 0..n {
            let width = if j == n - 1 { tail } else { 8 };
            let byte = chunk(j);
            let masked = if width == 8 { byte } else { byte & (((1u16 << width) - 1) as u8) };
            self.put_chunk(masked, width);
        }
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put_chunk(value, 8);
    }

    pub fn put_u16(&mut self, value: u16, order: ByteOrder) {
        let _ = self.put_uint(value as u64, 16, order);
    }

    pub fn put_u32(&mut self, value: u32, order: ByteOrder) {
        let _ = self.put_uint(value as u64, 32, order);
    }

    pub fn put_u64(&mut self, value: u64, order: ByteOrder) {
        let _ = self.put_uint(value, 64, order);
    }

    pub fn put_f32(&mut self, value: f32, order: ByteOrder) {
        self.put_u32(value.to_bits(), order);
    }

    pub fn put_f64(&mut self, value: f64, order: ByteOrder) {
        self.put_u64(value.to_bits(), order);
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if self.cached == 0 {
            self.out.extend_from_slice(bytes);
        } else {
            for &b in bytes {
                self.put_chunk(b, 8);
            }
        }
    }

    pub fn put_text(&mut self, text: &str, charset: Charset) -> Result<()> {
        let bytes = charset.encode(text)?;
        self.put_bytes(&bytes);
        Ok(())
    }

    pub fn reserve(&mut self, count: usize) -> Result<usize> {
        if self.cached != 0 {
            return Err(Error::Value("reserve on an unaligned writer".into()));
        }
        let offset = self.out.len();
        self.out.resize(offset + count, 0);
        Ok(offset)
    }

    pub fn patch(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        if offset + bytes.len() > self.out.len() {
            return Err(Error::Value("patch past the end of the sink".into()));
        }
        self.out[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn flush(&mut self) {
        if self.cached > 0 {
            self.out.push(self.cache);
            self.cache = 0;
            self.cached = 0;
        }
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}
