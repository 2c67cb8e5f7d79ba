//! Operational helpers: logging setup and the operator notice board.

use std::{collections::VecDeque, sync::Arc};

use bss_types::{
    config::OpsConfig,
    events::{Notice, NoticeLevel},
    BssError, Result,
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| BssError::Ops(format!("failed to create log filter: {err}")))?;

    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| BssError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Bounded history of transient operator-visible messages, newest last.
#[derive(Clone)]
pub struct NoticeBoard {
    notices: Arc<Mutex<VecDeque<Notice>>>,
    capacity: usize,
}

impl NoticeBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            notices: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    pub async fn post(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Info => info!(message = %notice.message, "operator notice"),
            NoticeLevel::Warning => warn!(message = %notice.message, "operator notice"),
            NoticeLevel::Error => error!(message = %notice.message, "operator notice"),
        }
        let mut notices = self.notices.lock().await;
        if notices.len() == self.capacity {
            notices.pop_front();
        }
        notices.push_back(notice);
    }

    pub async fn latest(&self) -> Option<Notice> {
        self.notices.lock().await.back().cloned()
    }

    pub async fn snapshot(&self) -> Vec<Notice> {
        self.notices.lock().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.notices.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notice_board_keeps_most_recent_entries() {
        let board = NoticeBoard::new(2);
        board.post(Notice::info("connected")).await;
        board.post(Notice::warning("fallback model in use")).await;
        board.post(Notice::error("RGB video not found")).await;

        let notices = board.snapshot().await;
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].message, "fallback model in use");
        assert_eq!(
            board.latest().await.map(|n| n.level),
            Some(NoticeLevel::Error)
        );

        board.clear().await;
        assert!(board.latest().await.is_none());
    }
}
