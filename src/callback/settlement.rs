//! Exactly-once completion for the login flow.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// Write side of a one-shot outcome shared by every completion path.
///
/// The first [`settle`](Settlement::settle) delivers its value; every later
/// call is a no-op that returns `false`.
pub struct Settlement<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Settlement<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Delivers `value` if nothing was delivered before.
    pub fn settle(&self, value: T) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            // A dropped receiver still counts as settled
            Some(tx) => {
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_settlement_wins() {
        let (settlement, rx) = Settlement::<Result<&str, &str>>::new();

        assert!(!settlement.is_settled());
        assert!(settlement.settle(Ok("token")));
        assert!(settlement.is_settled());

        // Late listener error after the callback already succeeded
        assert!(!settlement.settle(Err("listener died")));

        assert_eq!(rx.await.unwrap(), Ok("token"));
    }

    #[tokio::test]
    async fn test_racing_settlements_deliver_once() {
        let (settlement, rx) = Settlement::<usize>::new();
        let settlement = Arc::new(settlement);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let settlement = Arc::clone(&settlement);
                tokio::spawn(async move { settlement.settle(i) })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }

        assert_eq!(wins, 1);
        assert!(rx.await.unwrap() < 16);
    }

    #[test]
    fn test_settle_after_receiver_dropped() {
        let (settlement, rx) = Settlement::<u8>::new();
        drop(rx);

        assert!(settlement.settle(1));
        assert!(!settlement.settle(2));
    }
}
