use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::SessionManager;

/// Background task collecting expired sessions on a fixed interval.
#[derive(Debug)]
pub struct SessionGc {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SessionGc {
    /// Must be called from within a tokio runtime.
    pub fn start(manager: Arc<dyn SessionManager>, every: Duration) -> Self {
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.gc();
                        if removed > 0 {
                            debug!(removed, "Expired sessions collected");
                        }
                    }
                    _ = &mut stop => break,
                }
            }
        });

        info!(interval_secs = every.as_secs(), "Session GC started");
        Self { shutdown, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            debug!(error = %err, "Session GC task ended abnormally");
        }
        info!("Session GC stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionManager;
    use crate::writer::ResponseWriter;

    #[tokio::test]
    async fn test_gc_collects_and_stops() {
        let manager = MemorySessionManager::new("session", Duration::from_millis(1), "test-secret");
        let mut writer = ResponseWriter::detached();
        let request = crate::context::Request::default();
        let mut session = manager.start(&request, &mut writer).unwrap();
        session.release(&mut writer).unwrap();
        assert_eq!(manager.len(), 1);

        let gc = SessionGc::start(Arc::new(manager.clone()), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        gc.stop().await;

        assert!(manager.is_empty());
    }
}
