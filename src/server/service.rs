//! Line service spoken on accepted connections.
//!
//! Every line received is answered with the detected protocol and the line
//! itself, e.g. `tls: hello`. A client that stayed silent through detection
//! is greeted first, so protocols that wait for the server still work. The
//! line `QUIT` ends the session.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

use crate::config::schema::ServiceConfig;
use crate::net::detect::Classification;
use crate::net::listener::DowngradedStream;

/// Serve one connection until the peer leaves, says `QUIT`, idles out, or shutdown fires.
pub async fn serve<C>(
    stream: DowngradedStream<C>,
    config: &ServiceConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let classification = stream.classification();
    let mut stream = BufReader::new(stream);

    if classification == Classification::Indeterminate {
        write_line(&mut stream, &config.greeting).await?;
    }

    let mut line = String::new();
    loop {
        line.clear();
        let read = async {
            match config.idle_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, stream.read_line(&mut line))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout"))?,
                None => stream.read_line(&mut line).await,
            }
        };

        let n = tokio::select! {
            n = read => n?,
            _ = shutdown.recv() => {
                write_line(&mut stream, "BYE").await?;
                break;
            }
        };
        if n == 0 {
            break;
        }

        let request = line.trim_end_matches(['\r', '\n']);
        if request == "QUIT" {
            write_line(&mut stream, "BYE").await?;
            break;
        }
        let reply = format!("{classification}: {request}");
        write_line(&mut stream, &reply).await?;
    }

    stream.shutdown().await
}

async fn write_line<S>(stream: &mut S, line: &str) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}
