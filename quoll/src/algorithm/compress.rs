use flate2::{Compress as Deflate, Compression, Decompress as Inflate, FlushCompress, FlushDecompress, Status};
use strum::{AsRefStr, EnumString};

use crate::{
    wire::{msg::KexInit, PAYLOAD_MAX_SIZE},
    Error, Result,
};

pub(crate) fn negotiate(clientkex: &KexInit, serverkex: &KexInit) -> Result<(Compress, Compress)> {
    Ok((
        super::pick(
            &clientkex.compression_algorithms_client_to_server,
            &serverkex.compression_algorithms_client_to_server,
            Error::NoCommonCompression,
        )?,
        super::pick(
            &clientkex.compression_algorithms_server_to_client,
            &serverkex.compression_algorithms_server_to_client,
            Error::NoCommonCompression,
        )?,
    ))
}

/// SSH compression algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Compress {
    /// zlib compression, delayed until the session is authenticated.
    #[strum(serialize = "zlib@openssh.com")]
    ZlibOpenssh,

    /// zlib compression.
    Zlib,

    /// No compression algorithm.
    #[default]
    None,
}

/// Outbound deflate stream; the state spans packets for the whole life of
/// the direction, per RFC 4253 §6.2.
pub struct Deflater(Deflate);

/// Inbound inflate stream, the receiving counterpart of [`Deflater`].
pub struct Inflater(Inflate);

impl Compress {
    fn active(&self, authed: bool) -> bool {
        match self {
            Self::Zlib => true,
            Self::ZlibOpenssh => authed,
            Self::None => false,
        }
    }

    pub(crate) fn compress(
        &self,
        state: &mut Option<Deflater>,
        authed: bool,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        if !self.active(authed) {
            return Ok(data.to_vec());
        }

        let Deflater(z) = state.get_or_insert_with(|| Deflater(Deflate::new(Compression::default(), true)));

        let mut out = Vec::with_capacity(data.len() + 64);
        let start_in = z.total_in();

        loop {
            let status = z
                .compress_vec(&data[(z.total_in() - start_in) as usize..], &mut out, FlushCompress::Partial)
                .map_err(|_| Error::Compression)?;

            let consumed = (z.total_in() - start_in) as usize;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if consumed == data.len() && out.len() < out.capacity() {
                        break;
                    }

                    out.reserve(512);
                }
            }
        }

        Ok(out)
    }

    pub(crate) fn decompress(
        &self,
        state: &mut Option<Inflater>,
        authed: bool,
        data: Vec<u8>,
    ) -> Result<Vec<u8>> {
        if !self.active(authed) {
            return Ok(data);
        }

        let Inflater(z) = state.get_or_insert_with(|| Inflater(Inflate::new(true)));

        let mut out = Vec::with_capacity(data.len() * 2 + 64);
        let start_in = z.total_in();

        loop {
            let status = z
                .decompress_vec(&data[(z.total_in() - start_in) as usize..], &mut out, FlushDecompress::Sync)
                .map_err(|_| Error::Compression)?;

            let consumed = (z.total_in() - start_in) as usize;
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    if consumed == data.len() && out.len() < out.capacity() {
                        break;
                    }
                    if out.len() >= PAYLOAD_MAX_SIZE {
                        return Err(Error::Compression);
                    }

                    out.reserve(1024);
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_stream_state() {
        let compress = Compress::Zlib;

        let mut deflater = None;
        let mut inflater = None;

        // Repeated payloads must shrink once the dictionary warms up,
        // which only happens when the stream spans packets.
        let payload = vec![b'q'; 1024];
        let mut sizes = Vec::new();

        for _ in 0..3 {
            let packed = compress
                .compress(&mut deflater, false, &payload)
                .expect("compressible");
            sizes.push(packed.len());

            let unpacked = compress
                .decompress(&mut inflater, false, packed)
                .expect("decompressible");
            assert_eq!(unpacked, payload);
        }

        assert!(sizes[2] <= sizes[0]);
    }

    #[test]
    fn delayed_mode_waits_for_auth() {
        let compress = Compress::ZlibOpenssh;
        let mut state = None;

        let data = b"plaintext before auth".to_vec();
        assert_eq!(
            compress
                .compress(&mut state, false, &data)
                .expect("passthrough"),
            data
        );
        assert!(state.is_none());

        assert_ne!(
            compress
                .compress(&mut state, true, &data)
                .expect("compressible"),
            data
        );
        assert!(state.is_some());
    }
}
