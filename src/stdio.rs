//! Newline-delimited JSON transport for running the worker out of process.
//!
//! The host writes one [`CommandEnvelope`] per line to the worker's stdin and
//! reads one [`ResponseEnvelope`] per line from its stdout. The bootstrap
//! envelope is always the first line. Logs go to stderr.

use crate::config::WorkerConfig;
use crate::dispatcher::{Dispatcher, Outcome};
use crate::protocol::{CommandEnvelope, ResponseEnvelope};
use anyhow::Context;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Serve commands from stdin until `shutdown` or end of input.
pub async fn serve(config: &WorkerConfig) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut dispatcher = match crate::worker::bootstrap(config).await {
        Ok((dispatcher, ready)) => {
            write_line(&mut stdout, &ready).await?;
            dispatcher
        }
        Err(failure) => {
            write_line(&mut stdout, &failure).await?;
            anyhow::bail!("device connection failed: {}", failure.message());
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let result = async {
        while let Some(line) = lines.next_line().await.context("reading stdin")? {
            if line.trim().is_empty() {
                continue;
            }
            let outcome = handle_line(&mut dispatcher, &line).await;
            let stop = outcome.is_shutdown();
            write_line(&mut stdout, outcome.response()).await?;
            if stop {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    dispatcher.close().await;
    tracing::info!("Stdio worker stopped");
    result
}

/// Decode one input line and dispatch it.
///
/// A line that is not a valid command envelope yields an error response,
/// carrying the request id when the line is JSON with a numeric `id`.
pub async fn handle_line(dispatcher: &mut Dispatcher, line: &str) -> Outcome {
    match serde_json::from_str::<CommandEnvelope>(line) {
        Ok(envelope) => dispatcher.dispatch(envelope).await,
        Err(err) => {
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|value| value.get("id").and_then(Value::as_u64));
            tracing::warn!(?id, error = %err, "Malformed command line");
            Outcome::Continue(ResponseEnvelope::error(
                id,
                format!("malformed command envelope: {err}"),
            ))
        }
    }
}

async fn write_line<W>(writer: &mut W, response: &ResponseEnvelope) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response).context("encoding response")?;
    line.push(b'\n');
    writer.write_all(&line).await.context("writing stdout")?;
    writer.flush().await.context("flushing stdout")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PONG;
    use daq_driver_red_pitaya::MockRedPitaya;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(MockRedPitaya::new(Some(3))))
    }

    #[test]
    fn test_valid_line_is_dispatched() {
        let mut dispatcher = dispatcher();
        let outcome = tokio_test::block_on(handle_line(
            &mut dispatcher,
            r#"{"id": 12, "command": "ping", "params": {}}"#,
        ));
        assert_eq!(outcome.response(), &ResponseEnvelope::ok(Some(12), json!(PONG)));
    }

    #[test]
    fn test_malformed_line_keeps_recoverable_id() {
        let mut dispatcher = dispatcher();
        let outcome = tokio_test::block_on(handle_line(
            &mut dispatcher,
            r#"{"id": 4, "params": {}}"#,
        ));
        let response = outcome.into_response();
        assert_eq!(response.id, Some(4));
        assert!(response.message().starts_with("malformed command envelope"));

        let outcome = tokio_test::block_on(handle_line(&mut dispatcher, "not json"));
        assert_eq!(outcome.response().id, None);
        assert!(!outcome.is_shutdown());
    }

    #[test]
    fn test_shutdown_line_stops() {
        let mut dispatcher = dispatcher();
        let outcome = tokio_test::block_on(handle_line(
            &mut dispatcher,
            r#"{"id": 1, "command": "shutdown"}"#,
        ));
        assert!(outcome.is_shutdown());
    }

    #[test]
    fn test_write_line_appends_newline() {
        let mut buffer = Vec::new();
        tokio_test::block_on(write_line(
            &mut buffer,
            &ResponseEnvelope::ok(Some(1), json!(null)),
        ))
        .unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "{\"id\":1,\"status\":\"ok\",\"data\":null}\n"
        );
    }
}
