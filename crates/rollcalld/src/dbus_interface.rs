use crate::engine::{EngineError, SessionHandle};
use rollcall_core::types::EnrolledPerson;
use zbus::interface;

/// D-Bus interface for the attendance session daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    session: SessionHandle,
    roster: Vec<EnrolledPerson>,
}

impl AttendanceService {
    pub fn new(session: SessionHandle, roster: Vec<EnrolledPerson>) -> Self {
        Self { session, roster }
    }
}

fn failed(e: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Session status as JSON: session id, gallery size, seen people,
    /// tick count, and the current display overlay.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.session.status().await.map_err(failed)?;
        let mut value = serde_json::to_value(&status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        value["version"] = serde_json::json!(env!("CARGO_PKG_VERSION"));
        Ok(value.to_string())
    }

    /// The session's attendance log entries, oldest first.
    async fn log(&self) -> zbus::fdo::Result<Vec<String>> {
        self.session.log().await.map_err(failed)
    }

    /// The enrollment roster as JSON.
    async fn roster(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.roster).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Recent persisted attendance records as JSON, newest first.
    async fn history(&self, limit: u32) -> zbus::fdo::Result<String> {
        let records = self.session.history(limit as usize).await.map_err(failed)?;
        serde_json::to_string(&records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// End the running session. Returns true once the capture loop has
    /// stopped and the camera is released.
    async fn stop_session(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop requested over D-Bus");
        self.session.stop().await.map_err(failed)?;
        Ok(true)
    }
}
