//! Broadcast bus carrying [`ExecutorEvent`]s between the orchestrator, the
//! confirmation monitors and the engine loop.

use executor_types::ExecutorEvent;
use tokio::sync::broadcast;

/// Cloneable handle to the executor's event channel.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<ExecutorEvent>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
		self.sender.subscribe()
	}

	/// Publishes `event` to every current subscriber. Fails when nobody is
	/// subscribed.
	pub fn publish(
		&self,
		event: ExecutorEvent,
	) -> Result<usize, broadcast::error::SendError<ExecutorEvent>> {
		self.sender.send(event)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use executor_types::RequestEvent;

	#[tokio::test]
	async fn test_subscribers_receive_events() {
		let bus = EventBus::new(4);
		let mut receiver = bus.subscribe();

		bus.publish(ExecutorEvent::Request(RequestEvent::SessionDisconnected {
			topic: "abc".to_string(),
		}))
		.unwrap();

		match receiver.recv().await.unwrap() {
			ExecutorEvent::Request(RequestEvent::SessionDisconnected { topic }) => {
				assert_eq!(topic, "abc")
			},
			other => panic!("unexpected event {:?}", other),
		}
	}

	#[test]
	fn test_publish_without_subscribers_fails() {
		let bus = EventBus::new(4);
		assert!(bus
			.publish(ExecutorEvent::Request(RequestEvent::SessionDisconnected {
				topic: "abc".to_string(),
			}))
			.is_err());
	}
}
