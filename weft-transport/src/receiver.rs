//! Inbound image queue shared with the fabric's polling thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use weft_core::{Fabric, StreamId};

use crate::error::TransportResult;
use crate::idle::Idler;

/// Recover from mutex poisoning: the queue stays coherent even if a holder
/// panicked mid-push.
fn lock_clean<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queues images delivered by the fabric's availability callback.
///
/// The push side runs on the fabric's own polling thread, the pop side on
/// the event loop; the mutex around the FIFO is the only synchronization
/// between them. The queue is unbounded and never drops an image.
pub struct ImageReceiver<F: Fabric> {
    fabric: F,
    registration: weft_core::RegistrationId,
    queue: Arc<Mutex<VecDeque<F::Image>>>,
}

impl<F: Fabric> ImageReceiver<F> {
    /// Subscribe to `(channel, stream_id)` and start queueing its images.
    pub fn new(fabric: &F, channel: &str, stream_id: StreamId) -> Self {
        let queue: Arc<Mutex<VecDeque<F::Image>>> = Arc::new(Mutex::new(VecDeque::new()));
        let sink = queue.clone();
        let registration = fabric.add_subscription(
            channel,
            stream_id,
            Box::new(move |image| {
                lock_clean(&sink).push_back(image);
            }),
            // End-of-stream is observed on the image itself when reading.
            Box::new(|_session_id| {}),
        );
        Self {
            fabric: fabric.clone(),
            registration,
            queue,
        }
    }

    /// Pop the next queued image without waiting.
    pub fn try_receive(&self) -> Option<F::Image> {
        lock_clean(&self.queue).pop_front()
    }

    /// Wait for the next image, idling between empty checks.
    ///
    /// Propagates [`crate::TransportError::Overloaded`] when a bounded
    /// idler runs out of budget.
    pub async fn receive(&self, idler: &mut dyn Idler) -> TransportResult<F::Image> {
        loop {
            if let Some(image) = self.try_receive() {
                return Ok(image);
            }
            idler.idle().await?;
        }
    }
}

impl<F: Fabric> Drop for ImageReceiver<F> {
    fn drop(&mut self) {
        self.fabric.close_subscription(self.registration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::idle::Yield;
    use weft_core::{Image, Publication};
    use weft_fabric_mem::MemFabric;

    #[tokio::test]
    async fn test_images_arrive_in_order() {
        let fabric = MemFabric::new();
        let receiver = ImageReceiver::new(&fabric, "mem:recv", 5);

        let first = fabric.add_exclusive_publication("mem:recv", 5);
        let second = fabric.add_exclusive_publication("mem:recv", 5);
        let first_session = fabric
            .find_exclusive_publication(first)
            .expect("registered")
            .session_id();
        let second_session = fabric
            .find_exclusive_publication(second)
            .expect("registered")
            .session_id();

        let mut idler = Yield::new();
        let image_a = receiver.receive(&mut idler).await.expect("first image");
        let image_b = receiver.receive(&mut idler).await.expect("second image");
        assert_eq!(image_a.session_id(), first_session);
        assert_eq!(image_b.session_id(), second_session);
    }

    #[tokio::test]
    async fn test_empty_queue_exhausts_bounded_idler() {
        let fabric = MemFabric::new();
        let receiver: ImageReceiver<MemFabric> = ImageReceiver::new(&fabric, "mem:recv", 5);

        let mut idler = Yield::bounded(4);
        let result = receiver.receive(&mut idler).await;
        assert!(matches!(result, Err(TransportError::Overloaded)));
    }

    #[tokio::test]
    async fn test_push_from_foreign_thread() {
        let fabric = MemFabric::new();
        let receiver = ImageReceiver::new(&fabric, "mem:recv", 9);

        let remote = fabric.clone();
        let worker = std::thread::spawn(move || {
            // Registering the publication delivers the image from this
            // thread, the way a fabric polling thread would.
            remote.add_exclusive_publication("mem:recv", 9);
        });
        worker.join().expect("worker");

        let mut idler = Yield::new();
        let image = receiver.receive(&mut idler).await.expect("image");
        assert!(image.source_identity().contains("mem:recv"));
    }

    #[tokio::test]
    async fn test_drop_closes_subscription() {
        let fabric = MemFabric::new();
        {
            let _receiver: ImageReceiver<MemFabric> = ImageReceiver::new(&fabric, "mem:recv", 3);
        }
        // A publication registered after the receiver dropped reaches no
        // subscriber.
        let registration = fabric.add_exclusive_publication("mem:recv", 3);
        let publication = fabric
            .find_exclusive_publication(registration)
            .expect("registered");
        assert_eq!(
            weft_core::Publication::offer(&publication, &[1]),
            weft_core::OfferOutcome::NotConnected
        );
    }
}
