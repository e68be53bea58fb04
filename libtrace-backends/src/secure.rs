//! Framing shared by the network backend and the export server.
//!
//! Each message is deflated, encrypted with AES-128-CBC under a fixed shared
//! key, and sent as `ciphertext_len u32 LE ‖ ciphertext`.
//!
//! Fair encryption key, chosen by random number generator :)
//!     https://xkcd.com/221/
//!
//! Jokes aside, a TLS mechanism should eventually replace this. For now a
//! shared symmetric key works well enough for the few deployments of this
//! toolkit that exist.
use std::io::{Read, Write};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use libtrace_core::errors::*;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

static SOCKET_KEY: [u8; 16] = [
    0xb8, 0xc2, 0xfe, 0x5a, 0x01, 0xe8, 0x4c, 0x5b, 0xf6, 0x9a, 0xe0, 0x59, 0x1f, 0x02, 0x82,
    0x75,
];

static SOCKET_IV: [u8; 16] = [
    0x1a, 0x58, 0x92, 0x4e, 0xfe, 0xf0, 0x2b, 0x6b, 0x7b, 0x3d, 0x95, 0x33, 0x5a, 0x2d, 0x45,
    0x54,
];

/// Deflate, encrypt, and send one message.
pub fn send_frame<W: Write>(stream: &mut W, data: &[u8]) -> Result<()> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
    enc.write_all(data)?;
    let compressed = enc.finish()?;

    let encrypted = Aes128CbcEnc::new(&SOCKET_KEY.into(), &SOCKET_IV.into())
        .encrypt_padded_vec_mut::<Pkcs7>(&compressed);

    stream.write_all(&(encrypted.len() as u32).to_le_bytes())?;
    stream.write_all(&encrypted)?;
    stream.flush()?;
    Ok(())
}

/// Receive, decrypt, and inflate one message.
pub fn recv_frame<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    let mut encrypted = vec![0u8; len];
    stream.read_exact(&mut encrypted)?;

    let compressed = Aes128CbcDec::new(&SOCKET_KEY.into(), &SOCKET_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&encrypted)
        .map_err(|_| LtError::protocol("frame failed to decrypt"))?;

    let mut out = Vec::new();
    ZlibDecoder::new(&compressed[..])
        .read_to_end(&mut out)
        .map_err(|_| LtError::protocol("frame failed to inflate"))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let msg: Vec<u8> = (0..1000u32).flat_map(|v| v.to_le_bytes()).collect();

        let mut wire = Vec::new();
        send_frame(&mut wire, &msg).unwrap();

        // length prefix accounts for every remaining byte
        let len = u32::from_le_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        assert_eq!(len, wire.len() - 4);

        let back = recv_frame(&mut &wire[..]).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let msg = vec![0x41u8; 256];
        let mut wire = Vec::new();
        send_frame(&mut wire, &msg).unwrap();
        assert!(!wire.windows(16).any(|w| w == &msg[..16]));
    }

    #[test]
    fn truncated_frame_is_protocol_error() {
        let mut wire = Vec::new();
        send_frame(&mut wire, b"hello").unwrap();
        wire.truncate(wire.len() - 1);
        assert!(recv_frame(&mut &wire[..]).is_err());
    }
}
