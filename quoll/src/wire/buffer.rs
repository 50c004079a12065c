use num_bigint_dig::BigUint;
use thiserror::Error;
use zeroize::Zeroize;

/// Backstop against integer overflow when incrementing cursors.
pub(crate) const BUF_MAX_INCR: usize = 1_000_000_000;

/// Backstop against absurd allocations.
pub(crate) const BUF_MAX_SIZE: usize = 1_000_000_000;

/// Bound on mpint magnitudes, ~8192 bits.
pub(crate) const BUF_MAX_MPINT: usize = 8240 / 8;

/// Bound on a single length-prefixed string.
pub(crate) const MAX_STRING_LEN: usize = super::PACKET_MAX_SIZE;

/// The errors the codec layer can produce; all of them are fatal to the
/// packet being processed.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// A cursor movement or read went past the valid region.
    #[error("buffer bounds exceeded")]
    Bounds,

    /// A single increment went over the backstop limits.
    #[error("buffer increment over limits")]
    Overflow,

    /// A length-prefixed string exceeded [`MAX_STRING_LEN`].
    #[error("string too long")]
    StringTooLong,

    /// An mpint exceeded [`BUF_MAX_MPINT`] bytes.
    #[error("mpint too large")]
    MpIntTooLong,

    /// A negative mpint was read where only non-negatives are valid.
    #[error("negative mpint")]
    NegativeMpInt,

    /// A string field did not hold valid UTF-8.
    #[error("malformed utf-8 string")]
    BadUtf8,

    /// The packet framing itself was inconsistent.
    #[error("malformed packet")]
    BadPacket,

    /// The peer identification line was malformed.
    #[error("malformed identification string")]
    BadId,
}

/// An owned byte region with a read/write cursor and typed SSH accessors.
///
/// The region has a fixed upper `size`; `len` tracks the valid bytes and
/// `pos` the cursor, with `pos <= len <= size` at all times. Readers
/// advance `pos` and fail fast on any out-of-bounds access; writers write
/// at `pos` and may extend `len` up to `size`, never beyond.
pub struct Buffer {
    data: Vec<u8>,
    size: usize,
    len: usize,
    pos: usize,
}

impl Buffer {
    /// Create a buffer bounded at `size` bytes.
    pub fn new(size: usize) -> Result<Self, WireError> {
        if size > BUF_MAX_SIZE {
            return Err(WireError::Overflow);
        }

        Ok(Self {
            data: Vec::new(),
            size,
            len: 0,
            pos: 0,
        })
    }

    /// Wrap an incoming payload for reading, sized to its length.
    pub fn from_payload(data: Vec<u8>) -> Self {
        Self {
            size: data.len(),
            len: data.len(),
            pos: 0,
            data,
        }
    }

    /// Consume the buffer, returning the valid bytes.
    pub fn into_payload(mut self) -> Vec<u8> {
        self.data.truncate(self.len);
        std::mem::take(&mut self.data)
    }

    /// Grow or shrink the bound; cursors are clamped when downsizing.
    pub fn resize(&mut self, newsize: usize) -> Result<(), WireError> {
        if newsize > BUF_MAX_SIZE {
            return Err(WireError::Overflow);
        }

        self.size = newsize;
        self.len = self.len.min(newsize);
        self.pos = self.pos.min(newsize);
        self.data.truncate(newsize);

        Ok(())
    }

    /// Overwrite the contents with zeroes, for buffers that held secrets.
    pub fn burn(&mut self) {
        self.data.zeroize();
    }

    /// A copy of the valid bytes, sized to their length with the cursor
    /// rewound.
    pub fn duplicate(&self) -> Self {
        Self {
            data: self.data[..self.len].to_vec(),
            size: self.len,
            len: self.len,
            pos: 0,
        }
    }

    /// The upper bound of the region.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no valid bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The cursor position.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The count of valid bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.len - self.pos
    }

    /// Set the valid length, clamping the cursor if needed.
    pub fn set_len(&mut self, len: usize) -> Result<(), WireError> {
        if len > self.size {
            return Err(WireError::Bounds);
        }

        self.ensure(len);
        self.len = len;
        self.pos = self.pos.min(self.len);

        Ok(())
    }

    /// Extend the valid length by `incr`.
    pub fn incr_len(&mut self, incr: usize) -> Result<(), WireError> {
        if incr > BUF_MAX_INCR {
            return Err(WireError::Overflow);
        }
        if self.len + incr > self.size {
            return Err(WireError::Bounds);
        }

        self.ensure(self.len + incr);
        self.len += incr;

        Ok(())
    }

    /// Move the cursor to `pos`, within the valid region.
    pub fn set_pos(&mut self, pos: usize) -> Result<(), WireError> {
        if pos > self.len {
            return Err(WireError::Bounds);
        }
        self.pos = pos;

        Ok(())
    }

    /// Advance the cursor over valid bytes.
    pub fn incr_pos(&mut self, incr: usize) -> Result<(), WireError> {
        if incr > BUF_MAX_INCR {
            return Err(WireError::Overflow);
        }
        if self.pos + incr > self.len {
            return Err(WireError::Bounds);
        }
        self.pos += incr;

        Ok(())
    }

    /// Advance the cursor for writing, growing `len` when going past it.
    pub fn incr_write_pos(&mut self, incr: usize) -> Result<(), WireError> {
        if incr > BUF_MAX_INCR {
            return Err(WireError::Overflow);
        }
        if self.pos + incr > self.size {
            return Err(WireError::Bounds);
        }

        self.pos += incr;
        if self.pos > self.len {
            self.ensure(self.pos);
            self.len = self.pos;
        }

        Ok(())
    }

    /// Move the cursor backwards.
    pub fn decr_pos(&mut self, decr: usize) -> Result<(), WireError> {
        if decr > self.pos {
            return Err(WireError::Bounds);
        }
        self.pos -= decr;

        Ok(())
    }

    fn ensure(&mut self, upto: usize) {
        if self.data.len() < upto {
            self.data.resize(upto, 0);
        }
    }

    /// Read a single byte.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        if self.pos >= self.len {
            return Err(WireError::Bounds);
        }

        let byte = self.data[self.pos];
        self.pos += 1;

        Ok(byte)
    }

    /// Read a boolean; any non-zero byte reads as `true`.
    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    /// Read a big-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        if self.pos + 4 > self.len {
            return Err(WireError::Bounds);
        }

        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;

        Ok(u32::from_be_bytes(bytes))
    }

    /// Read `len` raw bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        if len > BUF_MAX_INCR {
            return Err(WireError::Overflow);
        }
        if self.pos + len > self.len {
            return Err(WireError::Bounds);
        }

        let bytes = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;

        Ok(bytes)
    }

    /// Read all remaining valid bytes.
    pub fn get_rest(&mut self) -> Vec<u8> {
        let bytes = self.data[self.pos..self.len].to_vec();
        self.pos = self.len;

        bytes
    }

    /// Read a length-prefixed string as raw bytes.
    pub fn get_string(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.get_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(WireError::StringTooLong);
        }

        self.get_bytes(len)
    }

    /// Read a length-prefixed string as UTF-8.
    pub fn get_string_utf8(&mut self) -> Result<String, WireError> {
        String::from_utf8(self.get_string()?).map_err(|_| WireError::BadUtf8)
    }

    /// Read a comma-separated name-list.
    pub fn get_name_list(&mut self) -> Result<NameList, WireError> {
        let raw = self.get_string_utf8()?;

        Ok(NameList(
            raw.split(',')
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }

    /// Read an mpint; negatives and oversized values are rejected.
    pub fn get_mpint(&mut self) -> Result<MpInt, WireError> {
        let len = self.get_u32()? as usize;

        if len == 0 {
            return Ok(MpInt::default());
        }
        if len > BUF_MAX_MPINT {
            return Err(WireError::MpIntTooLong);
        }

        let bytes = self.get_bytes(len)?;
        if bytes[0] & 0x80 != 0 {
            return Err(WireError::NegativeMpInt);
        }

        Ok(MpInt(bytes))
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, val: u8) -> Result<(), WireError> {
        if self.pos >= self.size {
            return Err(WireError::Bounds);
        }

        self.ensure(self.pos + 1);
        self.data[self.pos] = val;
        self.incr_write_pos(1)
    }

    /// Write a boolean as a single `0`/`1` byte.
    pub fn put_bool(&mut self, val: bool) -> Result<(), WireError> {
        self.put_u8(u8::from(val))
    }

    /// Write a big-endian `u32`.
    pub fn put_u32(&mut self, val: u32) -> Result<(), WireError> {
        self.put_bytes(&val.to_be_bytes())
    }

    /// Write raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if bytes.len() > BUF_MAX_INCR {
            return Err(WireError::Overflow);
        }
        if self.pos + bytes.len() > self.size {
            return Err(WireError::Bounds);
        }

        self.ensure(self.pos + bytes.len());
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.incr_write_pos(bytes.len())
    }

    /// Write a length-prefixed string.
    pub fn put_string(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.put_u32(bytes.len() as u32)?;
        self.put_bytes(bytes)
    }

    /// Write a name-list as a length-prefixed, comma-joined string.
    pub fn put_name_list(&mut self, list: &NameList) -> Result<(), WireError> {
        self.put_string(list.to_string().as_bytes())
    }

    /// Write an mpint with its length prefix.
    pub fn put_mpint(&mut self, mpint: &MpInt) -> Result<(), WireError> {
        self.put_string(mpint.as_bytes())
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

/// A multi-precision integer in SSH wire form: big-endian magnitude with a
/// zero pad byte when the MSB is set, empty for zero. Only non-negative
/// values are representable; contents are wiped on drop since mpints
/// routinely hold key-exchange secrets.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MpInt(Vec<u8>);

impl MpInt {
    /// Normalize a raw big-endian magnitude into wire form.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let stripped = {
            let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
            &raw[start..]
        };

        if stripped.is_empty() {
            return Self::default();
        }

        let mut bytes = Vec::with_capacity(stripped.len() + 1);
        if stripped[0] & 0x80 != 0 {
            bytes.push(0);
        }
        bytes.extend_from_slice(stripped);

        Self(bytes)
    }

    /// Build from a big unsigned integer.
    pub fn from_biguint(value: &BigUint) -> Self {
        Self::from_bytes(&value.to_bytes_be())
    }

    /// Interpret the magnitude as a big unsigned integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// The wire-form magnitude, without the length prefix.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for MpInt {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for MpInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MpInt({} bytes)", self.0.len())
    }
}

/// An ordered list of algorithm names, comma-joined on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameList(pub(crate) Vec<String>);

impl NameList {
    /// The names, in local preference order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// The most preferred name, if any.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Whether `name` appears in the list.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|entry| entry == name)
    }

    /// The first of our names that also appears in `other`, which is the
    /// negotiation primitive of RFC 4253 §7.1.
    pub fn preferred_in(&self, other: &NameList) -> Option<&str> {
        self.0
            .iter()
            .find(|name| other.contains(name))
            .map(String::as_str)
    }
}

impl<T: Into<String>> FromIterator<T> for NameList {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for NameList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_invariants_hold() {
        let mut buf = Buffer::new(16).expect("in bounds");

        buf.put_u32(0xdeadbeef).expect("fits");
        assert_eq!((buf.pos(), buf.len()), (4, 4));

        buf.set_pos(0).expect("in bounds");
        assert_eq!(buf.get_u32().expect("written"), 0xdeadbeef);

        assert_eq!(buf.get_u8(), Err(WireError::Bounds));
        assert_eq!(buf.set_pos(5), Err(WireError::Bounds));
        assert_eq!(buf.incr_len(13), Err(WireError::Bounds));
        assert_eq!(buf.decr_pos(5), Err(WireError::Bounds));
    }

    #[test]
    fn writers_never_extend_past_size() {
        let mut buf = Buffer::new(4).expect("in bounds");

        buf.put_bytes(b"ab").expect("fits");
        assert_eq!(buf.put_bytes(b"cde"), Err(WireError::Bounds));

        // A failed write must not have moved the cursors.
        assert_eq!((buf.pos(), buf.len()), (2, 2));
    }

    #[test]
    fn typed_get_advances_exactly() {
        let mut buf = Buffer::new(64).expect("in bounds");
        buf.put_bool(true).expect("fits");
        buf.put_string(b"hello").expect("fits");
        buf.set_pos(0).expect("in bounds");

        assert!(buf.get_bool().expect("written"));
        assert_eq!(buf.pos(), 1);
        assert_eq!(buf.get_string().expect("written"), b"hello");
        assert_eq!(buf.pos(), 1 + 4 + 5);
    }

    #[test]
    fn duplicate_copies_the_valid_region() {
        let mut buf = Buffer::new(32).expect("in bounds");
        buf.put_string(b"copied").expect("fits");

        let mut copy = buf.duplicate();
        assert_eq!((copy.pos(), copy.len(), copy.size()), (0, 10, 10));
        assert_eq!(copy.get_string().expect("written"), b"copied");
    }

    #[test]
    fn mpint_roundtrip() {
        for raw in [
            &[0x12, 0x34][..],
            &[0x80, 0x00],
            &[0x00, 0x00, 0x7f],
            &[0xff; 32],
        ] {
            let mpint = MpInt::from_bytes(raw);

            let mut buf = Buffer::new(64).expect("in bounds");
            buf.put_mpint(&mpint).expect("fits");
            buf.set_pos(0).expect("in bounds");

            assert_eq!(buf.get_mpint().expect("written"), mpint);
        }
    }

    #[test]
    fn mpint_zero_is_a_bare_length() {
        let mut buf = Buffer::new(8).expect("in bounds");
        buf.put_mpint(&MpInt::default()).expect("fits");

        assert_eq!(buf.len(), 4);

        buf.set_pos(0).expect("in bounds");
        assert!(buf.get_mpint().expect("written").is_zero());
    }

    #[test]
    fn mpint_msb_gains_one_pad_byte() {
        let mpint = MpInt::from_bytes(&[0x80]);
        assert_eq!(mpint.as_bytes(), &[0x00, 0x80]);

        let biguint = num_bigint_dig::BigUint::from(0x80u32);
        assert_eq!(MpInt::from_biguint(&biguint), mpint);
        assert_eq!(mpint.to_biguint(), biguint);
    }

    #[test]
    fn mpint_negative_rejected() {
        let mut buf = Buffer::new(8).expect("in bounds");
        buf.put_string(&[0xff]).expect("fits");
        buf.set_pos(0).expect("in bounds");

        assert_eq!(buf.get_mpint(), Err(WireError::NegativeMpInt));
    }

    #[test]
    fn name_list_negotiation_is_first_of_ours() {
        let ours: NameList = ["aes256-ctr", "aes128-ctr", "3des-cbc"]
            .into_iter()
            .collect();
        let theirs: NameList = ["3des-cbc", "aes128-ctr"].into_iter().collect();

        assert_eq!(ours.preferred_in(&theirs), Some("aes128-ctr"));
        assert_eq!(theirs.preferred_in(&ours), Some("3des-cbc"));

        let disjoint: NameList = ["none"].into_iter().collect();
        assert_eq!(ours.preferred_in(&disjoint), None);
    }

    #[test]
    fn name_list_roundtrip() {
        let list: NameList = ["curve25519-sha256", "ext-info-c"].into_iter().collect();

        let mut buf = Buffer::new(64).expect("in bounds");
        buf.put_name_list(&list).expect("fits");
        buf.set_pos(0).expect("in bounds");

        assert_eq!(buf.get_name_list().expect("written"), list);

        let mut buf = Buffer::new(8).expect("in bounds");
        buf.put_name_list(&NameList::default()).expect("fits");
        buf.set_pos(0).expect("in bounds");
        assert_eq!(buf.get_name_list().expect("written"), NameList::default());
    }
}
