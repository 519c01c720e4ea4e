//! Payload compression for uploaded archives.
//!
//! All six narinfo compression values are supported in both directions.
//! Buffers go in and come out whole; the store drains archives into
//! memory before compressing anyway.

use std::fmt;
use std::str::FromStr;

use tokio::io::AsyncReadExt;

use crate::BinaryCacheError;
use crate::Result;

/// A supported compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Xz,
    Bzip2,
    Brotli,
    Gzip,
    Zstd,
}

impl Compression {
    /// Name as written in the narinfo `Compression:` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Xz => "xz",
            Compression::Bzip2 => "bzip2",
            Compression::Brotli => "br",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// File extension appended to uploaded archive names.
    pub const fn extension(self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Xz => ".xz",
            Compression::Bzip2 => ".bz2",
            Compression::Brotli => ".br",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = BinaryCacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Compression::None),
            "xz" => Ok(Compression::Xz),
            "bzip2" => Ok(Compression::Bzip2),
            "br" => Ok(Compression::Brotli),
            "gzip" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            other => Err(BinaryCacheError::UnsupportedCompression {
                name: other.to_string(),
            }),
        }
    }
}

/// Compress a buffer.
pub async fn compress(algorithm: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    use async_compression::tokio::bufread as enc;

    let mut out = Vec::with_capacity(data.len() / 2 + 64);
    match algorithm {
        Compression::None => out.extend_from_slice(data),
        Compression::Xz => {
            enc::XzEncoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Bzip2 => {
            enc::BzEncoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Brotli => {
            enc::BrotliEncoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Gzip => {
            enc::GzipEncoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Zstd => {
            enc::ZstdEncoder::new(data).read_to_end(&mut out).await?;
        }
    }
    Ok(out)
}

/// Decompress a buffer.
pub async fn decompress(algorithm: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    use async_compression::tokio::bufread as dec;

    let mut out = Vec::with_capacity(data.len() * 2 + 64);
    match algorithm {
        Compression::None => out.extend_from_slice(data),
        Compression::Xz => {
            dec::XzDecoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Bzip2 => {
            dec::BzDecoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Brotli => {
            dec::BrotliDecoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Gzip => {
            dec::GzipDecoder::new(data).read_to_end(&mut out).await?;
        }
        Compression::Zstd => {
            dec::ZstdDecoder::new(data).read_to_end(&mut out).await?;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Compression; 6] = [
        Compression::None,
        Compression::Xz,
        Compression::Bzip2,
        Compression::Brotli,
        Compression::Gzip,
        Compression::Zstd,
    ];

    #[tokio::test]
    async fn all_algorithms_roundtrip() {
        let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        for algorithm in ALL {
            let compressed = compress(algorithm, &payload).await.unwrap();
            let restored = decompress(algorithm, &compressed).await.unwrap();
            assert_eq!(restored, payload, "algorithm {}", algorithm);
        }
    }

    #[tokio::test]
    async fn none_is_the_identity() {
        let payload = b"not compressed at all";
        assert_eq!(compress(Compression::None, payload).await.unwrap(), payload);
        assert_eq!(decompress(Compression::None, payload).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn compressible_input_shrinks() {
        let payload = vec![b'a'; 64 * 1024];
        for algorithm in [Compression::Xz, Compression::Zstd, Compression::Gzip] {
            let compressed = compress(algorithm, &payload).await.unwrap();
            assert!(compressed.len() < payload.len() / 10, "algorithm {}", algorithm);
        }
    }

    #[tokio::test]
    async fn garbage_fails_to_decompress() {
        for algorithm in [Compression::Xz, Compression::Bzip2, Compression::Gzip, Compression::Zstd] {
            assert!(decompress(algorithm, b"definitely not a valid stream").await.is_err());
        }
    }

    #[test]
    fn names_and_extensions_roundtrip() {
        for algorithm in ALL {
            assert_eq!(algorithm.as_str().parse::<Compression>().unwrap(), algorithm);
        }
        assert_eq!(Compression::Xz.extension(), ".xz");
        assert_eq!(Compression::Bzip2.extension(), ".bz2");
        assert_eq!(Compression::None.extension(), "");
        assert!("lz4".parse::<Compression>().is_err());
    }
}
