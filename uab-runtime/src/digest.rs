//! Standalone streaming SHA-256, matching `calculateDigest` in the original
//! `uab` entrypoint (there backed by OpenSSL's EVP interface). Reimplemented
//! here rather than pulled from `sha2` so the runtime binary itself has no
//! crypto-library dependency beyond what's already in the workspace; the
//! `sha2` crate is only used in tests, to check this implementation against
//! a trusted one.

use std::fs::File;
use std::io::Read;

use linglong_common::{Error, Result};

const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

const H0: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

const BLOCK_LEN: usize = 64;
pub const READ_CHUNK_LEN: usize = 4096;

/// A streaming SHA-256 hasher. Endianness-explicit (all arithmetic is on
/// native `u32`s fed from big-endian byte reads) so the digest is identical
/// across platforms.
pub struct Sha256 {
    state: [u32; 8],
    buffer: [u8; BLOCK_LEN],
    buffer_len: usize,
    total_len: u64,
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

impl Sha256 {
    pub fn new() -> Self {
        Self { state: H0, buffer: [0u8; BLOCK_LEN], buffer_len: 0, total_len: 0 }
    }

    pub fn update(&mut self, mut input: &[u8]) {
        self.total_len += input.len() as u64;

        if self.buffer_len > 0 {
            let take = (BLOCK_LEN - self.buffer_len).min(input.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&input[..take]);
            self.buffer_len += take;
            input = &input[take..];

            if self.buffer_len == BLOCK_LEN {
                let block = self.buffer;
                Self::compress(&mut self.state, &block);
                self.buffer_len = 0;
            }
        }

        while input.len() >= BLOCK_LEN {
            let (block, rest) = input.split_at(BLOCK_LEN);
            Self::compress(&mut self.state, block.try_into().unwrap());
            input = rest;
        }

        if !input.is_empty() {
            self.buffer[..input.len()].copy_from_slice(input);
            self.buffer_len = input.len();
        }
    }

    pub fn finalize(mut self) -> [u8; 32] {
        let bit_len = self.total_len * 8;

        let mut pad = Vec::with_capacity(BLOCK_LEN * 2);
        pad.push(0x80u8);
        let padded_len = self.buffer_len + 1;
        let zeros = if padded_len % BLOCK_LEN <= 56 {
            56 - padded_len % BLOCK_LEN
        } else {
            56 + BLOCK_LEN - padded_len % BLOCK_LEN
        };
        pad.extend(std::iter::repeat(0u8).take(zeros));
        pad.extend_from_slice(&bit_len.to_be_bytes());

        self.update_no_len_tracking(&pad);

        let mut out = [0u8; 32];
        for (i, word) in self.state.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    fn update_no_len_tracking(&mut self, mut input: &[u8]) {
        if self.buffer_len > 0 {
            let take = (BLOCK_LEN - self.buffer_len).min(input.len());
            self.buffer[self.buffer_len..self.buffer_len + take].copy_from_slice(&input[..take]);
            self.buffer_len += take;
            input = &input[take..];
            if self.buffer_len == BLOCK_LEN {
                let block = self.buffer;
                Self::compress(&mut self.state, &block);
                self.buffer_len = 0;
            }
        }
        while input.len() >= BLOCK_LEN {
            let (block, rest) = input.split_at(BLOCK_LEN);
            Self::compress(&mut self.state, block.try_into().unwrap());
            input = rest;
        }
        debug_assert!(input.is_empty(), "padding must land on a block boundary");
    }

    fn compress(state: &mut [u32; 8], block: &[u8; BLOCK_LEN]) {
        let mut w = [0u32; 64];
        for i in 0..16 {
            w[i] = u32::from_be_bytes(block[i * 4..i * 4 + 4].try_into().unwrap());
        }
        for i in 16..64 {
            let s0 = w[i - 15].rotate_right(7) ^ w[i - 15].rotate_right(18) ^ (w[i - 15] >> 3);
            let s1 = w[i - 2].rotate_right(17) ^ w[i - 2].rotate_right(19) ^ (w[i - 2] >> 10);
            w[i] = w[i - 16].wrapping_add(s0).wrapping_add(w[i - 7]).wrapping_add(s1);
        }

        let [mut a, mut b, mut c, mut d, mut e, mut f, mut g, mut h] = *state;

        for i in 0..64 {
            let s1 = e.rotate_right(6) ^ e.rotate_right(11) ^ e.rotate_right(25);
            let ch = (e & f) ^ ((!e) & g);
            let temp1 = h.wrapping_add(s1).wrapping_add(ch).wrapping_add(K[i]).wrapping_add(w[i]);
            let s0 = a.rotate_right(2) ^ a.rotate_right(13) ^ a.rotate_right(22);
            let maj = (a & b) ^ (a & c) ^ (b & c);
            let temp2 = s0.wrapping_add(maj);

            h = g;
            g = f;
            f = e;
            e = d.wrapping_add(temp1);
            d = c;
            c = b;
            b = a;
            a = temp1.wrapping_add(temp2);
        }

        state[0] = state[0].wrapping_add(a);
        state[1] = state[1].wrapping_add(b);
        state[2] = state[2].wrapping_add(c);
        state[3] = state[3].wrapping_add(d);
        state[4] = state[4].wrapping_add(e);
        state[5] = state[5].wrapping_add(f);
        state[6] = state[6].wrapping_add(g);
        state[7] = state[7].wrapping_add(h);
    }
}

pub fn to_hex(digest: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for byte in digest {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Streams exactly `len` bytes starting at `offset` through SHA-256 in
/// `READ_CHUNK_LEN`-sized chunks, retrying short reads caused by `EINTR`
/// (std already retries `EINTR` internally for `Read::read`, but the loop
/// below also tolerates a short, non-error read by just asking for more).
pub fn digest_file_range(file: &mut File, offset: u64, len: u64) -> Result<String> {
    use std::io::{Seek, SeekFrom};

    file.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::syscall(format!("seek to {offset} failed: {e}")))?;

    let mut hasher = Sha256::new();
    let mut remaining = len;
    let mut chunk = [0u8; READ_CHUNK_LEN];

    while remaining > 0 {
        let want = remaining.min(READ_CHUNK_LEN as u64) as usize;
        let n = file
            .read(&mut chunk[..want])
            .map_err(|e| Error::syscall(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(Error::malformed("unexpected EOF while hashing bundle section"));
        }
        hasher.update(&chunk[..n]);
        remaining -= n as u64;
    }

    Ok(to_hex(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;
    use sha2::Digest;
    use std::io::Write;

    #[test]
    fn matches_known_test_vectors() {
        let mut empty = Sha256::new();
        empty.update(b"");
        assert_eq!(
            to_hex(&empty.finalize()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let mut abc = Sha256::new();
        abc.update(b"abc");
        assert_eq!(
            to_hex(&abc.finalize()),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn matches_sha2_crate_over_random_inputs() {
        let mut rng = rand::rng();
        for _ in 0..64 {
            let len = (rng.next_u32() % 8192) as usize;
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);

            let mut ours = Sha256::new();
            ours.update(&data);
            let ours = ours.finalize();

            let mut reference = sha2::Sha256::new();
            reference.update(&data);
            let reference = reference.finalize();

            assert_eq!(&ours[..], &reference[..], "mismatch for input of length {len}");
        }
    }

    #[test]
    fn streaming_update_is_chunk_size_independent() {
        let data = vec![0x42u8; 10_000];

        let mut whole = Sha256::new();
        whole.update(&data);
        let whole = whole.finalize();

        let mut chunked = Sha256::new();
        for chunk in data.chunks(37) {
            chunked.update(chunk);
        }
        let chunked = chunked.finalize();

        assert_eq!(whole, chunked);
    }

    #[test]
    fn digest_file_range_covers_only_the_requested_window() {
        let mut file = tempfile::tempfile().expect("tmp file");
        file.write_all(b"prefix-garbage").unwrap();
        let offset = file.metadata().unwrap().len();
        file.write_all(b"bundle-bytes-here").unwrap();
        let len = b"bundle-bytes-here".len() as u64;
        file.write_all(b"suffix-garbage").unwrap();

        let got = digest_file_range(&mut file, offset, len).unwrap();

        let mut expected = sha2::Sha256::new();
        expected.update(b"bundle-bytes-here");
        let expected = to_hex(&expected.finalize().into());

        assert_eq!(got, expected);
    }
}
