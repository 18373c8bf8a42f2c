// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Async runtime for the fetch controller.
//!
//! The controller is owned by a single background task. Hosts feed it
//! [`MapEvent`]s through a [`ControllerHandle`]; every fetch the controller
//! asks for runs in its own task and reports back to the loop, so no state is
//! shared between tasks.

use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::{ControllerConfig, FetchCompletion, FetchController, MapEvent};
use crate::protocol::FetchRequest;
use crate::sink::RenderSink;
use crate::source::OverlaySource;

/// Errors reported by [`ControllerHandle`].
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("controller task has stopped")]
    Stopped,

    #[error("controller task failed: {0}")]
    Join(String),
}

/// Configuration for a spawned controller.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub controller: ControllerConfig,
    /// Capacity of the map event channel.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            event_buffer: 64,
        }
    }
}

/// Handle to a controller running in a background task.
///
/// Dropping the handle stops the task. Fetches already issued run to
/// completion, their results are discarded.
pub struct ControllerHandle<R> {
    event_tx: mpsc::Sender<MapEvent>,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<R>>,
}

impl<R> std::fmt::Debug for ControllerHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerHandle")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl<R: RenderSink + Send + 'static> ControllerHandle<R> {
    /// Spawn the controller loop on the current tokio runtime.
    #[must_use]
    pub fn spawn<S: OverlaySource>(config: RuntimeConfig, source: S, sink: R) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let cancel_token = CancellationToken::new();

        let controller = FetchController::new(config.controller, sink);
        let task_cancel = cancel_token.clone();
        let task = tokio::spawn(async move {
            controller_loop(controller, Arc::new(source), event_rx, task_cancel).await
        });

        Self {
            event_tx,
            cancel_token,
            task: Some(task),
        }
    }

    /// Queue a map event for the controller.
    pub async fn send(&self, event: MapEvent) -> Result<(), RuntimeError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| {
                debug!("Dropping {:?}: controller stopped", e.0);
                RuntimeError::Stopped
            })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.event_tx.is_closed()
    }

    /// Ask the loop to stop once queued events are handled.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Stop the loop and hand back the sink.
    pub async fn join(mut self) -> Result<R, RuntimeError> {
        self.cancel_token.cancel();
        let task = self.task.take().ok_or(RuntimeError::Stopped)?;
        task.await.map_err(|e| RuntimeError::Join(e.to_string()))
    }
}

impl<R> Drop for ControllerHandle<R> {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

async fn controller_loop<S: OverlaySource, R: RenderSink>(
    mut controller: FetchController<R>,
    source: Arc<S>,
    mut event_rx: mpsc::Receiver<MapEvent>,
    cancel_token: CancellationToken,
) -> R {
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
    info!("Controller started");

    loop {
        let requests = tokio::select! {
            biased;

            Some(completion) = completion_rx.recv() => controller.on_fetch_completed(completion),
            event = event_rx.recv() => match event {
                Some(event) => {
                    debug!("Map event: {event:?}");
                    controller.handle(event)
                }
                None => {
                    info!("All controller handles dropped, stopping");
                    break;
                }
            },
            () = cancel_token.cancelled() => {
                info!("Controller cancelled");
                break;
            }
        };

        for request in requests {
            dispatch(&source, request, &completion_tx);
        }
    }

    controller.into_sink()
}

fn dispatch<S: OverlaySource>(
    source: &Arc<S>,
    request: FetchRequest,
    completion_tx: &mpsc::UnboundedSender<FetchCompletion>,
) {
    let source = Arc::clone(source);
    let completion_tx = completion_tx.clone();

    tokio::spawn(async move {
        let result = source.fetch(&request).await;
        if completion_tx
            .send(FetchCompletion { request, result })
            .is_err()
        {
            debug!("Controller stopped, dropping fetch result");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::geo::{BoundingBox, Viewport};
    use crate::protocol::{FetchError, LayerKind, LayerPayload, TileDescriptor};
    use crate::sink::{ChannelSink, MapControl, SinkEvent};

    #[derive(Debug, Default)]
    struct FakeSource {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl OverlaySource for FakeSource {
        async fn fetch(&self, _request: &FetchRequest) -> Result<LayerPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(FetchError::Transport("connection reset".to_string()));
            }
            Ok(LayerPayload::raster(
                BoundingBox::new(52.0, 7.0, 53.0, 8.0),
                vec![TileDescriptor {
                    raster_image: "/tiles/32_390_5816.png".to_string(),
                    bounds: [390_000.0, 5_816_000.0, 391_000.0, 5_817_000.0],
                    crs: "EPSG:25832".to_string(),
                }],
            ))
        }
    }

    fn show_terrain() -> MapEvent {
        MapEvent::LayerVisibilityChanged {
            layer: LayerKind::Terrain,
            visible: true,
        }
    }

    fn moved_to(min_lat: f64, min_lon: f64) -> MapEvent {
        MapEvent::ViewportChanged {
            viewport: Viewport::new(
                BoundingBox::new(min_lat, min_lon, min_lat + 0.01, min_lon + 0.02),
                15,
            ),
        }
    }

    async fn next_replacement(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> SinkEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for sink event")
                .expect("sink channel closed");
            if matches!(event, SinkEvent::LayerReplaced { .. }) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_event_fetches_and_renders() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            calls: Arc::clone(&calls),
            ..FakeSource::default()
        };
        let (sink, mut rx) = ChannelSink::channel();
        let handle = ControllerHandle::spawn(RuntimeConfig::default(), source, sink);

        handle.send(show_terrain()).await.unwrap();
        handle.send(moved_to(52.5, 7.3)).await.unwrap();

        let SinkEvent::LayerReplaced { layer, content } = next_replacement(&mut rx).await else {
            unreachable!();
        };
        assert_eq!(layer, LayerKind::Terrain);
        assert_eq!(content.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggers_during_fetch_are_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(200),
            fail: false,
        };
        let (sink, mut rx) = ChannelSink::channel();
        let handle = ControllerHandle::spawn(RuntimeConfig::default(), source, sink);

        handle.send(show_terrain()).await.unwrap();
        handle.send(moved_to(52.5, 7.3)).await.unwrap();
        handle.send(moved_to(52.6, 7.4)).await.unwrap();
        handle.send(moved_to(52.7, 7.5)).await.unwrap();

        next_replacement(&mut rx).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        // Triggers that arrive during the fetch are not replayed afterwards
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_renders_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FakeSource {
            calls: Arc::clone(&calls),
            fail: true,
            ..FakeSource::default()
        };
        let (sink, mut rx) = ChannelSink::channel();
        let handle = ControllerHandle::spawn(RuntimeConfig::default(), source, sink);

        handle.send(show_terrain()).await.unwrap();
        handle.send(moved_to(52.5, 7.3)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.join().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events, vec![SinkEvent::ControlAttached(MapControl::ColorScale)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let (sink, _rx) = ChannelSink::channel();
        let handle = ControllerHandle::spawn(RuntimeConfig::default(), FakeSource::default(), sink);
        assert!(handle.is_running());

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!handle.is_running());
        assert!(matches!(
            handle.send(show_terrain()).await,
            Err(RuntimeError::Stopped)
        ));
    }
}
