//! Runs a [`ToastController`] against a [`NotificationStore`] on tokio.
//!
//! The driver task wakes on store changes, on manual dismissals, on the
//! controller's next deadline and, while a toast is visible, on a fixed
//! frame interval. After each wake it renders the current frame to the
//! [`ToastView`]. Marking the displayed notification read goes through the
//! store, which requests the unread-count refresh.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::constants::TOAST_FRAME_INTERVAL;
use crate::notifications::NotificationStore;

use super::controller::{ToastController, ToastEffect, ToastFrame, ToastTimings};

/// Where toasts are drawn.
pub trait ToastView: Send + 'static {
    /// Draw `frame`, or clear the slot when `None`.
    fn render(&mut self, frame: Option<&ToastFrame>);

    /// Called for every controller effect before the next render.
    fn on_effect(&mut self, _effect: &ToastEffect) {}
}

/// Handle to a running driver task.
#[derive(Debug)]
pub struct ToastDriver<V> {
    dismiss: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    task: JoinHandle<V>,
}

impl<V: ToastView> ToastDriver<V> {
    /// Spawn a driver with the default timings.
    pub fn spawn(store: NotificationStore, view: V) -> Self {
        Self::spawn_with(store, view, ToastTimings::default())
    }

    /// Spawn a driver with custom `timings`.
    pub fn spawn_with(store: NotificationStore, view: V, timings: ToastTimings) -> Self {
        let (dismiss, dismiss_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            store,
            ToastController::new(timings),
            view,
            dismiss_rx,
            cancel.clone(),
        ));
        Self {
            dismiss,
            cancel,
            task,
        }
    }

    /// Manual dismissal (tap or close control).
    pub fn dismiss(&self) {
        let _ = self.dismiss.send(());
    }

    /// Stop the driver without marking anything read. Returns the view.
    pub async fn unmount(self) -> Option<V> {
        self.cancel.cancel();
        match self.task.await {
            Ok(view) => Some(view),
            Err(e) => {
                log::warn!("[Toast] Driver task failed: {}", e);
                None
            }
        }
    }
}

async fn run<V: ToastView>(
    store: NotificationStore,
    mut controller: ToastController,
    mut view: V,
    mut dismiss_rx: mpsc::UnboundedReceiver<()>,
    cancel: CancellationToken,
) -> V {
    let mut changes = store.subscribe_changes();
    changes.borrow_and_update();
    let mut frames = time::interval(TOAST_FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let initial = controller.observe_latest(store.latest_unread().as_ref(), Instant::now());
    apply(&store, &mut view, initial);
    view.render(controller.frame(Instant::now()).as_ref());

    loop {
        let deadline = controller.next_deadline();
        let animating = controller.is_visible();

        tokio::select! {
            () = cancel.cancelled() => {
                controller.unmount();
                view.render(None);
                log::debug!("[Toast] Unmounted");
                return view;
            }

            changed = changes.changed() => {
                if changed.is_err() {
                    controller.unmount();
                    view.render(None);
                    return view;
                }
                changes.borrow_and_update();
                let effect = controller.observe_latest(store.latest_unread().as_ref(), Instant::now());
                apply(&store, &mut view, effect);
            }

            Some(()) = dismiss_rx.recv() => {
                let effect = controller.dismiss(Instant::now());
                apply(&store, &mut view, effect);
            }

            () = sleep_until_deadline(deadline), if deadline.is_some() => {
                for effect in controller.tick(Instant::now()) {
                    apply(&store, &mut view, Some(effect));
                }
            }

            _ = frames.tick(), if animating => {}
        }

        view.render(controller.frame(Instant::now()).as_ref());
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        time::sleep_until(deadline).await;
    }
}

fn apply<V: ToastView>(store: &NotificationStore, view: &mut V, effect: Option<ToastEffect>) {
    let Some(effect) = effect else {
        return;
    };
    log::debug!("[Toast] {:?}", effect);
    view.on_effect(&effect);
    if let ToastEffect::MarkRead(id) = &effect {
        store.mark_as_read(id);
    }
}
