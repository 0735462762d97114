//! In-process echo server used by the stress command
//!
//! Answers every command line with the same line, optionally after a random
//! delay, so a client can tell exactly which command a reply belongs to.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};

/// Serve echo replies until the peer goes away
pub async fn serve_echo<T>(io: T, max_jitter: Duration) -> anyhow::Result<u64>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(io, LinesCodec::new());
    let mut served = 0u64;

    while let Some(line) = framed.next().await {
        let line = line?;
        if !max_jitter.is_zero() {
            let micros = rand::thread_rng().gen_range(0..=max_jitter.as_micros() as u64);
            tokio::time::sleep(Duration::from_micros(micros)).await;
        }
        framed.send(line).await?;
        served += 1;
    }

    tracing::debug!("Echo server done after {} replies", served);
    Ok(served)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_core::{Command, Connection, LineConnection, Reply};

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let server = tokio::spawn(serve_echo(server, Duration::ZERO));

        let conn = LineConnection::new(client);
        let reply = conn.execute(&Command::new("SET").arg("a").arg("1")).await.unwrap();
        assert_eq!(reply, Reply::status("SET a 1"));

        conn.close().await.unwrap();
        drop(conn);
        assert_eq!(server.await.unwrap().unwrap(), 1);
    }
}
