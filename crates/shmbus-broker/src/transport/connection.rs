//! Per-connection loop.
//!
//! Read one envelope, execute it, write one response, repeat. Notifications
//! for channels this connection subscribed to arrive on an outbound queue and
//! are written between requests, never in the middle of a response.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::Instrument;

use shmbus_core::error::{BrokerError, Result};
use shmbus_core::protocol::{Codec, Envelope};

use crate::app_state::BrokerState;
use crate::dispatch::{execute, ConnCtx};
use crate::pubsub::{ConnectionSink, ConnId};
use crate::transport::framing::{encode_bounded, framed};
use crate::transport::Locality;

/// Notifications buffered per connection before delivery starts waiting.
const OUTBOUND_QUEUE: usize = 1024;

/// Serve one accepted connection until the peer closes, a frame fails to
/// decode, or the broker shuts down.
pub async fn serve_connection(state: BrokerState, stream: TcpStream, peer: SocketAddr, locality: Locality) {
    let conn_id = state.next_conn_id();
    let span = tracing::info_span!("conn", conn_id, %peer, locality = locality.as_str());

    async move {
        tracing::info!("client connected");
        if let Err(e) = run_connection(&state, conn_id, stream, locality).await {
            tracing::warn!(error = %e, "connection terminated");
        }
        let dropped = state.registry().unsubscribe_all(conn_id);
        tracing::info!(subscriptions_dropped = dropped, "client disconnected");
    }
    .instrument(span)
    .await
}

async fn run_connection(state: &BrokerState, conn_id: ConnId, stream: TcpStream, locality: Locality) -> Result<()> {
    let codec: &'static dyn Codec = locality.codec_kind().codec();
    let broker_cfg = &state.cfg().broker;

    let (mut tx, mut rx) = framed(stream, broker_cfg.max_frame_bytes).split::<Bytes>();

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    let sink = ConnectionSink::new(
        conn_id,
        out_tx,
        codec,
        broker_cfg.max_frame_bytes,
        Duration::from_millis(broker_cfg.delivery_timeout_ms),
    );
    let ctx = ConnCtx::new(conn_id, locality, Arc::new(sink));
    let shutdown = state.shutdown_token();

    loop {
        tokio::select! {
            biased;

            // finish the current exchange, then stop
            _ = shutdown.cancelled() => break,

            // outbound notifications, already encoded and size-checked
            maybe_out = out_rx.recv() => {
                let Some(frame) = maybe_out else { break; };
                tx.send(frame).await?;
            }

            // inbound requests
            incoming = rx.next() => {
                let Some(incoming) = incoming else { break; };
                let frame = incoming?;
                let req = codec.decode(&frame)?;
                tracing::debug!(action = %req.action, channel = req.channel().unwrap_or("-"), "request");

                let resp = execute(state, &ctx, req).await;
                tx.send(encode_response(codec, &resp, broker_cfg.max_frame_bytes)?).await?;
            }
        }
    }

    Ok(())
}

/// Encode a response; one too large for a frame is replaced by a
/// `PAYLOAD_TOO_LARGE` error so the request is still answered.
fn encode_response(codec: &dyn Codec, resp: &Envelope, max_frame_bytes: usize) -> Result<Bytes> {
    match encode_bounded(codec, resp, max_frame_bytes) {
        Err(e @ BrokerError::PayloadTooLarge { .. }) => {
            tracing::warn!(action = %resp.action, error = %e, "response does not fit in a frame");
            encode_bounded(codec, &Envelope::error_response(resp.channel(), &e), max_frame_bytes)
        }
        other => other,
    }
}
