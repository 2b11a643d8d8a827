use std::time::Duration;

use bot_core::{BotEvent, SyncError, SyncStatus, decode_sync_response, process_sync_response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{client::MatrixBot, executor::ApiRequest};

const SYNC_REQUEST_MARGIN: Duration = Duration::from_secs(10);

impl MatrixBot {
    /// One `/sync` cycle: fetch, decode, dispatch. Returns the next cursor.
    ///
    /// Rooms and events that fail to decode are skipped; only request failures
    /// and an unusable top-level body are errors.
    pub async fn sync_once(
        &self,
        since: Option<&str>,
        timeout_ms: u64,
        full_state: bool,
    ) -> Result<String, SyncError> {
        let request = sync_request(since, timeout_ms, full_state);
        let body = self.executor.execute(&request).await?;
        let response = decode_sync_response(&body)?;
        let report = process_sync_response(&self.listeners, &response);
        debug!(
            next_batch = %response.next_batch,
            joined = response.rooms.join.len(),
            invited = response.rooms.invite.len(),
            dispatched = report.dispatched,
            skipped = report.skipped,
            decode_failures = report.decode_failures,
            listener_failures = report.listener_failures,
            "sync cycle done"
        );
        Ok(response.next_batch)
    }

    /// Run the sync loop until a request fails for good.
    pub async fn run(&self, full_sync: bool) -> Result<(), SyncError> {
        self.run_until_cancelled(full_sync, CancellationToken::new())
            .await
    }

    /// Run the sync loop until a request fails or `cancel` fires.
    ///
    /// Cancellation is checked between cycles, so an in-flight long-poll is
    /// allowed to finish. Returns `Ok(())` only when cancelled.
    pub async fn run_until_cancelled(
        &self,
        full_sync: bool,
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        let event = self.lifecycle.lock().await.start_sync()?;
        self.status.emit(event);
        self.status.emit(BotEvent::SyncStatus(SyncStatus {
            running: true,
            cursor: None,
        }));
        info!(user_id = %self.user_id, full_sync, "sync loop started");

        let result = self.sync_loop(full_sync, &cancel).await;

        let (stopped, cursor) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (lifecycle.stop(), lifecycle.cursor().map(str::to_owned))
        };
        match stopped {
            Ok(event) => self.status.emit(event),
            Err(err) => warn!(%err, "sync loop ended outside of syncing state"),
        }
        self.status.emit(BotEvent::SyncStatus(SyncStatus {
            running: false,
            cursor: cursor.clone(),
        }));

        match &result {
            Ok(()) => {
                info!(?cursor, "sync loop cancelled");
                self.status.emit(BotEvent::SyncStopped {
                    error_code: None,
                    message: None,
                });
            }
            Err(err) => {
                warn!(code = err.code(), category = ?err.category(), ?cursor, "sync loop stopped: {err}");
                self.status.emit(BotEvent::SyncStopped {
                    error_code: Some(err.code().to_owned()),
                    message: Some(err.to_string()),
                });
            }
        }
        result
    }

    async fn sync_loop(&self, full_sync: bool, cancel: &CancellationToken) -> Result<(), SyncError> {
        let settings = self.sync_settings;
        let mut cursor = self
            .sync_once(None, settings.initial_timeout_ms, full_sync)
            .await?;

        loop {
            self.lifecycle.lock().await.advance(cursor.clone())?;
            self.status.emit(BotEvent::SyncStatus(SyncStatus {
                running: true,
                cursor: Some(cursor.clone()),
            }));

            if cancel.is_cancelled() {
                return Ok(());
            }
            cursor = self
                .sync_once(Some(&cursor), settings.timeout_ms, false)
                .await?;
        }
    }
}

/// The client-side limit is the server-side long-poll timeout plus
/// [`SYNC_REQUEST_MARGIN`], so a stalled connection cannot block the loop forever.
fn sync_request(since: Option<&str>, timeout_ms: u64, full_state: bool) -> ApiRequest {
    let mut request = ApiRequest::get("client/v3/sync")
        .query("timeout", timeout_ms.to_string())
        .timeout(Duration::from_millis(timeout_ms).saturating_add(SYNC_REQUEST_MARGIN));
    if let Some(since) = since {
        request = request.query("since", since);
    }
    if full_state {
        request = request.query("full_state", "true");
    }
    request
}
