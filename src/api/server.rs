use crate::api::handler::{malformed_request, CommandHandler};
use crate::api::schemas::{Request, Response};
use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RESPONSE_QUEUE_DEPTH: usize = 256;

/// Serves newline-delimited JSON requests from `input`, writing one response line per request.
///
/// Requests run concurrently, so responses can come back out of order. Returns
/// when `input` reaches EOF and every in-flight request has been answered.
pub async fn serve<R, W>(handler: CommandHandler, input: R, output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Response>(RESPONSE_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_vec(&response).context("Failed to encode response")?;
            line.push(b'\n');
            output.write_all(&line).await.context("Failed to write response")?;
            output.flush().await.context("Failed to flush response")?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => {
                let handler = handler.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request).await;
                    if tx.send(response).await.is_err() {
                        warn!("Response writer closed; dropping response");
                    }
                });
            }
            Err(e) => {
                if tx.send(malformed_request(trimmed, &e)).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Request stream closed; waiting for in-flight responses");
    drop(tx);
    writer.await.context("Response writer panicked")??;
    info!("Command server finished");
    Ok(())
}

/// [`serve`] over the process's stdin and stdout.
pub async fn serve_stdio(handler: CommandHandler) -> Result<()> {
    serve(handler, tokio::io::stdin(), tokio::io::stdout()).await
}
