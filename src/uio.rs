//! Byte-level helpers for the length-prefixed binary stream encoding:
//! big-endian 4-byte lengths, 8-byte longs, 1-byte booleans. A length of -1
//! marks an absent byte array.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const NULL_LENGTH: i32 = -1;

pub async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_u8(if v { 1 } else { 0 }).await
}

pub async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8().await? == 1)
}

pub async fn write_byte_array<W: AsyncWrite + Unpin>(
    w: &mut W,
    bytes: Option<&[u8]>,
) -> io::Result<()> {
    match bytes {
        None => w.write_i32(NULL_LENGTH).await,
        Some(b) => {
            w.write_i32(b.len() as i32).await?;
            w.write_all(b).await
        }
    }
}

pub async fn read_byte_array<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Option<Vec<u8>>> {
    let length = r.read_i32().await?;
    if length == NULL_LENGTH {
        return Ok(None);
    }
    if length < 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("negative array length: {}", length),
        ));
    }
    let mut buf = vec![0u8; length as usize];
    r.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn read_required_byte_array<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<Vec<u8>> {
    read_byte_array(r).await?.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unexpected null byte array")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_byte_array_round_trip() {
        let mut buf = vec![];
        write_byte_array(&mut buf, Some(b"amza")).await.unwrap();
        write_byte_array(&mut buf, None).await.unwrap();
        write_byte_array(&mut buf, Some(b"")).await.unwrap();
        write_bool(&mut buf, true).await.unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_byte_array(&mut r).await.unwrap(), Some(b"amza".to_vec()));
        assert_eq!(read_byte_array(&mut r).await.unwrap(), None);
        assert_eq!(read_byte_array(&mut r).await.unwrap(), Some(vec![]));
        assert!(read_bool(&mut r).await.unwrap());
    }
}
