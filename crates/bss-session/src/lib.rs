//! Dashboard session logic: the live stream state machine, test-mode analysis
//! and the root session that owns the backend connection.

mod analysis;
mod dashboard;
mod stream;

pub use analysis::{OverlayFrames, TestAnalysisController};
pub use dashboard::{DashboardSession, OperatorCommand};
pub use stream::{SessionCommand, SessionEffect, StreamSessionController};

use bss_types::BssError;

pub fn session_error(message: impl Into<String>) -> BssError {
    BssError::Session(message.into())
}
