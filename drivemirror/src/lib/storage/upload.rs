//! Resumable upload protocol shared by Drive and Cloud Storage.
//!
//! The session URI is obtained by the caller. Content is then sent in chunks
//! of `CHUNK_SZ` bytes. The total length is only announced with the last chunk,
//! so the length of the data doesn't need to be known in advance.
use reqwest::{header, Response, StatusCode, Url};
use tokio::io;

use super::rest::status_error;
use crate::{
    error,
    oauth2::{GetToken, Scope},
};

/// Must be a multiple of 256 KiB
pub const CHUNK_SZ: u64 = 2 * 256 * 1024;

/// Value of the `Content-Range` header for a chunk of `len` bytes starting at `start`.
/// `total` is `Some` for the last chunk only.
pub fn content_range(start: u64, len: u64, total: Option<u64>) -> String {
    match (len, total) {
        (0, Some(total)) => format!("bytes */{total}"),
        (len, Some(total)) => format!("bytes {start}-{}/{total}", start + len - 1),
        (len, None) => format!("bytes {start}-{}/*", start + len - 1),
    }
}

async fn read_chunk<R>(data: &mut R) -> treemirror::Result<Vec<u8>>
where
    R: io::AsyncRead + Unpin,
{
    use io::AsyncReadExt;

    let mut buf = Vec::with_capacity(CHUNK_SZ as _);
    data.take(CHUNK_SZ).read_to_end(&mut buf).await?;
    Ok(buf)
}

#[derive(Debug)]
struct Chunk {
    start: u64,
    data: Vec<u8>,
    /// Total length of the upload, known with the last chunk
    total: Option<u64>,
}

impl Chunk {
    fn content_range(&self) -> String {
        content_range(self.start, self.data.len() as u64, self.total)
    }
}

/// Splits `data` in chunks, reading one chunk ahead to tell which one is the last.
struct Chunker<R> {
    data: R,
    start: u64,
    ahead: Option<Vec<u8>>,
    finished: bool,
}

impl<R> Chunker<R>
where
    R: io::AsyncRead + Unpin,
{
    fn new(data: R) -> Self {
        Self {
            data,
            start: 0,
            ahead: None,
            finished: false,
        }
    }

    async fn next(&mut self) -> treemirror::Result<Option<Chunk>> {
        if self.finished {
            return Ok(None);
        }
        let data = match self.ahead.take() {
            Some(data) => data,
            None => read_chunk(&mut self.data).await?,
        };
        let next = if data.len() as u64 == CHUNK_SZ {
            read_chunk(&mut self.data).await?
        } else {
            Vec::new()
        };

        let start = self.start;
        self.start += data.len() as u64;
        let total = if next.is_empty() {
            self.finished = true;
            Some(self.start)
        } else {
            self.ahead = Some(next);
            None
        };
        Ok(Some(Chunk { start, data, total }))
    }
}

/// Sends `data` to the resumable session `url` and returns the response to the last chunk.
pub async fn send_chunks<A, D>(
    client: &reqwest::Client,
    auth: &A,
    scope: &str,
    user_agent: &str,
    url: Url,
    data: D,
) -> treemirror::Result<Response>
where
    A: GetToken,
    D: io::AsyncRead,
{
    tokio::pin!(data);
    let mut chunks = Chunker::new(data);

    while let Some(chunk) = chunks.next().await? {
        let len = chunk.data.len() as u64;
        let range = chunk.content_range();
        log::trace!("uploading {len} bytes ({range})");

        let token = auth.get_token(vec![Scope::new(scope.to_string())]).await?;
        let res = client
            .put(url.clone())
            .bearer_auth(token.secret())
            .header(header::USER_AGENT, user_agent)
            .header(header::CONTENT_LENGTH, len)
            .header(header::CONTENT_RANGE, range)
            .body(chunk.data)
            .send()
            .await
            .map_err(error::api)?;

        let status = res.status();
        if chunk.total.is_some() {
            if status.is_success() {
                return Ok(res);
            }
            let body = res.text().await.unwrap_or_default();
            return Err(status_error("Upload", status, &body));
        }
        // 308 means "Resume Incomplete", the server awaits the next chunk
        if status != StatusCode::PERMANENT_REDIRECT {
            let body = res.text().await.unwrap_or_default();
            let what = format!("Upload interrupted at {} bytes:", chunk.start + len);
            return Err(status_error(&what, status, &body));
        }
    }
    Err(treemirror::Error::Bug(
        "upload ended without a last chunk".to_string(),
    ))
}

#[test]
fn test_content_range() {
    assert_eq!(content_range(0, 0, Some(0)), "bytes */0");
    assert_eq!(content_range(0, 10, Some(10)), "bytes 0-9/10");
    assert_eq!(content_range(0, CHUNK_SZ, None), "bytes 0-524287/*");
    assert_eq!(
        content_range(CHUNK_SZ, 12, Some(CHUNK_SZ + 12)),
        "bytes 524288-524299/524300"
    );
}

#[cfg(test)]
async fn chunks_of(len: usize) -> Vec<(u64, usize, Option<u64>)> {
    let mut chunker = Chunker::new(std::io::Cursor::new(vec![7u8; len]));
    let mut chunks = Vec::new();
    while let Some(chunk) = chunker.next().await.unwrap() {
        chunks.push((chunk.start, chunk.data.len(), chunk.total));
    }
    chunks
}

#[tokio::test]
async fn test_empty_upload_is_one_chunk() {
    assert_eq!(chunks_of(0).await, vec![(0, 0, Some(0))]);
    let chunk = Chunker::new(std::io::Cursor::new(Vec::new()))
        .next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chunk.content_range(), "bytes */0");
}

#[tokio::test]
async fn test_last_chunk_announces_total() {
    let sz = CHUNK_SZ as usize;
    assert_eq!(chunks_of(10).await, vec![(0, 10, Some(10))]);
    assert_eq!(chunks_of(sz).await, vec![(0, sz, Some(CHUNK_SZ))]);
    assert_eq!(
        chunks_of(2 * sz + 1).await,
        vec![
            (0, sz, None),
            (CHUNK_SZ, sz, None),
            (2 * CHUNK_SZ, 1, Some(2 * CHUNK_SZ + 1)),
        ]
    );
}
