use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::{self, ControlFrame};
use crate::transport::ChannelHandle;

/// Delay before measuring after a layout-driven trigger, so the surface box
/// has settled before geometry is derived from it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

/// Fixed monospace character cell, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellMetric {
    pub width: f32,
    pub height: f32,
}

impl Default for CellMetric {
    fn default() -> Self {
        Self {
            width: 9.0,
            height: 17.0,
        }
    }
}

/// Rendered box of the emulator surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBox {
    pub width: f32,
    pub height: f32,
}

impl SurfaceBox {
    /// Box occupied by a host terminal of `cols` x `rows` cells.
    pub fn from_cells(cols: u16, rows: u16, cell: CellMetric) -> Self {
        Self {
            width: cols as f32 * cell.width,
            height: rows as f32 * cell.height,
        }
    }
}

/// Full recomputation of (cols, rows) from the surface box; each result
/// supersedes the last, nothing is diffed. One column is held back from the
/// raw fit to avoid edge-wrapping artifacts, and the result never drops
/// below 1x1.
pub fn fit(surface: SurfaceBox, cell: CellMetric) -> Geometry {
    if !(cell.width > 0.0) || !(cell.height > 0.0) {
        return Geometry { cols: 1, rows: 1 };
    }
    let raw_cols = (surface.width / cell.width).floor() as i64;
    let raw_rows = (surface.height / cell.height).floor() as i64;
    Geometry {
        cols: (raw_cols - 1).clamp(1, u16::MAX as i64) as u16,
        rows: raw_rows.clamp(1, u16::MAX as i64) as u16,
    }
}

/// What prompted a geometry recomputation. Layout-mode switches and
/// activation changes are measured after a settle delay; everything else
/// emits immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeometryTrigger {
    ChannelOpened,
    SurfaceResized(SurfaceBox),
    ViewportResized(SurfaceBox),
    LayoutChanged(SurfaceBox),
    ActivationChanged(SurfaceBox),
}

impl GeometryTrigger {
    fn surface(self) -> Option<SurfaceBox> {
        match self {
            GeometryTrigger::ChannelOpened => None,
            GeometryTrigger::SurfaceResized(surface)
            | GeometryTrigger::ViewportResized(surface)
            | GeometryTrigger::LayoutChanged(surface)
            | GeometryTrigger::ActivationChanged(surface) => Some(surface),
        }
    }

    fn is_debounced(self) -> bool {
        matches!(
            self,
            GeometryTrigger::LayoutChanged(_) | GeometryTrigger::ActivationChanged(_)
        )
    }
}

/// Keeps the backend-visible terminal size in sync with the surface box.
/// Owns a single task; dropping or shutting it down cancels any pending
/// debounced recomputation, which session teardown relies on.
pub struct GeometryCoordinator {
    triggers: mpsc::UnboundedSender<GeometryTrigger>,
    task: JoinHandle<()>,
}

impl GeometryCoordinator {
    pub fn spawn(handle: ChannelHandle, cell: CellMetric, initial: SurfaceBox) -> Self {
        let (triggers, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(handle, cell, initial, rx));
        Self { triggers, task }
    }

    pub fn notify(&self, trigger: GeometryTrigger) {
        let _ = self.triggers.send(trigger);
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for GeometryCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    handle: ChannelHandle,
    cell: CellMetric,
    initial: SurfaceBox,
    mut rx: mpsc::UnboundedReceiver<GeometryTrigger>,
) {
    let mut last_box = initial;
    let mut pending: Option<Geometry> = None;
    loop {
        let next = if pending.is_some() {
            match tokio::time::timeout(SETTLE_DELAY, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if let Some(geometry) = pending.take() {
                        emit(&handle, geometry);
                    }
                    continue;
                }
            }
        } else {
            rx.recv().await
        };
        let Some(trigger) = next else { break };
        if let Some(surface) = trigger.surface() {
            last_box = surface;
        }
        let geometry = fit(last_box, cell);
        if trigger.is_debounced() {
            // Last value wins; an earlier unsent geometry is superseded.
            pending = Some(geometry);
        } else {
            pending = None;
            emit(&handle, geometry);
        }
    }
}

fn emit(handle: &ChannelHandle, geometry: Geometry) {
    if !handle.is_open() {
        return;
    }
    let frame = ControlFrame::Resize {
        cols: geometry.cols,
        rows: geometry.rows,
    };
    if let Some(encoded) = protocol::encode_control(&frame) {
        debug!(
            target: "terminal::geometry",
            cols = geometry.cols,
            rows = geometry.rows,
            "resize emitted"
        );
        handle.send_text(encoded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{WireMessage, pair};

    #[test]
    fn fit_reserves_one_column_and_floors_partial_cells() {
        let cell = CellMetric {
            width: 8.0,
            height: 16.0,
        };
        let geometry = fit(
            SurfaceBox {
                width: 807.0,
                height: 600.0,
            },
            cell,
        );
        // 807 / 8 = 100.875 -> 100 raw columns, minus the margin.
        assert_eq!(geometry.cols, 99);
        assert_eq!(geometry.rows, 37);
    }

    #[test]
    fn fit_never_reports_below_one_by_one() {
        let cell = CellMetric::default();
        let geometry = fit(
            SurfaceBox {
                width: 3.0,
                height: 2.0,
            },
            cell,
        );
        assert_eq!(geometry, Geometry { cols: 1, rows: 1 });

        let degenerate = fit(
            SurfaceBox {
                width: 100.0,
                height: 100.0,
            },
            CellMetric {
                width: 0.0,
                height: 0.0,
            },
        );
        assert_eq!(degenerate, Geometry { cols: 1, rows: 1 });
    }

    fn resize_payload(message: WireMessage) -> (u16, u16) {
        match message {
            WireMessage::Text(text) => match serde_json::from_str(&text) {
                Ok(ControlFrame::Resize { cols, rows }) => (cols, rows),
                other => panic!("unexpected control frame: {other:?}"),
            },
            WireMessage::Binary(_) => panic!("resize must be a text frame"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_triggers_emit_without_delay() {
        let (handle, mut sent) = pair();
        let cell = CellMetric {
            width: 10.0,
            height: 20.0,
        };
        let coordinator = GeometryCoordinator::spawn(
            handle,
            cell,
            SurfaceBox {
                width: 810.0,
                height: 480.0,
            },
        );
        coordinator.notify(GeometryTrigger::ChannelOpened);
        let message = sent.recv().await.expect("resize frame");
        assert_eq!(resize_payload(message), (80, 24));
    }

    #[tokio::test(start_paused = true)]
    async fn layout_triggers_are_debounced_last_value_wins() {
        let (handle, mut sent) = pair();
        let cell = CellMetric {
            width: 10.0,
            height: 20.0,
        };
        let coordinator = GeometryCoordinator::spawn(
            handle,
            cell,
            SurfaceBox {
                width: 810.0,
                height: 480.0,
            },
        );
        // Two layout changes in quick succession: only the second geometry
        // may go out, once the settle delay passes.
        coordinator.notify(GeometryTrigger::LayoutChanged(SurfaceBox {
            width: 410.0,
            height: 480.0,
        }));
        coordinator.notify(GeometryTrigger::LayoutChanged(SurfaceBox {
            width: 610.0,
            height: 480.0,
        }));
        let message = sent.recv().await.expect("debounced resize frame");
        assert_eq!(resize_payload(message), (60, 24));
        tokio::time::sleep(SETTLE_DELAY * 2).await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_debounced_resize() {
        let (handle, mut sent) = pair();
        let coordinator =
            GeometryCoordinator::spawn(handle, CellMetric::default(), SurfaceBox {
                width: 900.0,
                height: 510.0,
            });
        coordinator.notify(GeometryTrigger::LayoutChanged(SurfaceBox {
            width: 450.0,
            height: 510.0,
        }));
        coordinator.shutdown();
        tokio::time::sleep(SETTLE_DELAY * 2).await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_coordinator_cancels_pending_work() {
        let (handle, mut sent) = pair();
        let coordinator =
            GeometryCoordinator::spawn(handle, CellMetric::default(), SurfaceBox {
                width: 900.0,
                height: 510.0,
            });
        coordinator.notify(GeometryTrigger::ActivationChanged(SurfaceBox {
            width: 450.0,
            height: 510.0,
        }));
        drop(coordinator);
        tokio::time::sleep(SETTLE_DELAY * 2).await;
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_emitted_while_the_channel_is_closed() {
        let (handle, mut sent) = pair();
        handle.close();
        let coordinator =
            GeometryCoordinator::spawn(handle, CellMetric::default(), SurfaceBox {
                width: 900.0,
                height: 510.0,
            });
        coordinator.notify(GeometryTrigger::SurfaceResized(SurfaceBox {
            width: 450.0,
            height: 510.0,
        }));
        tokio::time::sleep(SETTLE_DELAY * 2).await;
        assert!(sent.try_recv().is_err());
    }
}
