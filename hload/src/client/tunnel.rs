use anyhow::{bail, Error};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper limit for the proxy response head.
const MAX_HEAD_SIZE: usize = 8192;

/// Establishes an HTTP "CONNECT" tunnel to `authority` through an already
/// connected proxy stream.
///
/// On success the stream is positioned right after the proxy response head,
/// ready to carry the tunneled traffic.
pub async fn connect<S>(stream: &mut S, authority: &str) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let req = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n");
    stream.write_all(req.as_bytes()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if stream.read_buf(&mut buf).await? == 0 {
            bail!("proxy closed connection during CONNECT");
        }

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut resp = httparse::Response::new(&mut headers);
        match resp.parse(&buf)? {
            httparse::Status::Complete(..) => {
                let code = resp.code.unwrap_or_default();
                if !(200..300).contains(&code) {
                    bail!("proxy refused CONNECT: {} {}", code, resp.reason.unwrap_or_default());
                }

                log::trace!("tunnel to {authority} established");
                return Ok(());
            }
            httparse::Status::Partial if buf.len() >= MAX_HEAD_SIZE => {
                bail!("proxy response head exceeds {MAX_HEAD_SIZE} bytes");
            }
            httparse::Status::Partial => {}
        }
    }
}
