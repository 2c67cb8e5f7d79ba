use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bss_types::{
    protocol::{InboundMessage, OutboundMessage},
    BssError, Result,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;

use crate::transport::{Connector, Link};

#[derive(Default)]
struct LocalState {
    log: Vec<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
    refusal: Option<String>,
    opened: usize,
}

impl LocalState {
    fn drain(&mut self) {
        if let Some(rx) = self.outbound_rx.as_mut() {
            while let Ok(message) = rx.try_recv() {
                self.log.push(message);
            }
        }
    }
}

/// In-process backend stand-in: records every outbound command and lets the
/// caller push inbound messages. Used for offline runs and tests.
#[derive(Clone, Default)]
pub struct LocalConnector {
    state: Arc<Mutex<LocalState>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make subsequent `open` calls fail with the given reason.
    pub fn refuse_with(&self, reason: impl Into<String>) {
        self.lock().refusal = Some(reason.into());
    }

    /// Deliver a message as if the backend pushed it. Returns false when no link is open.
    pub fn inject(&self, message: InboundMessage) -> bool {
        self.lock()
            .inbound_tx
            .as_ref()
            .map(|tx| tx.send(message).is_ok())
            .unwrap_or(false)
    }

    /// Every command written so far, in send order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        let mut state = self.lock();
        state.drain();
        state.log.clone()
    }

    /// Like [`sent`](Self::sent) but clears the log.
    pub fn take_sent(&self) -> Vec<OutboundMessage> {
        let mut state = self.lock();
        state.drain();
        std::mem::take(&mut state.log)
    }

    /// Simulate the backend dropping the connection.
    pub fn close_from_server(&self) {
        self.lock().inbound_tx = None;
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn open(&self, _token: &str) -> Result<Link> {
        let mut state = self.lock();
        state.opened += 1;
        if let Some(reason) = state.refusal.clone() {
            return Err(BssError::Transport(reason));
        }

        state.drain();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        state.outbound_rx = Some(out_rx);
        state.inbound_tx = Some(in_tx);
        info!("Local backend link opened (#{})", state.opened);

        Ok(Link {
            outbound: out_tx,
            inbound: UnboundedReceiverStream::new(in_rx).boxed(),
        })
    }
}
