//! Short-TTL store of checker outcomes keyed by submission token.
//!
//! An outcome is consumed on its first successful read; tokens the registry
//! does not know yield the `unauthorized` outcome without consuming
//! anything. A periodic sweeper drops entries that were never collected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::checker::CheckOutcome;

#[derive(Default)]
pub struct ResultRegistry {
    results: StdMutex<HashMap<String, (CheckOutcome, Instant)>>,
}

impl ResultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, token: &str, outcome: CheckOutcome) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(token.to_string(), (outcome, Instant::now()));
            trace!("{} submissions are waiting", results.len());
        }
    }

    /// Fetch the outcome for `token`, consuming it. Unknown tokens yield
    /// the `unauthorized` outcome.
    pub fn take(&self, token: &str) -> CheckOutcome {
        match self.results.lock() {
            Ok(mut results) => match results.remove(token) {
                Some((outcome, _)) => outcome,
                None => CheckOutcome::unauthorized(),
            },
            Err(_) => CheckOutcome::unauthorized(),
        }
    }

    pub fn len(&self) -> usize {
        self.results.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose age has reached `ttl`.
    pub fn sweep(&self, ttl: Duration) {
        if let Ok(mut results) = self.results.lock() {
            let before = results.len();
            results.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
            if results.len() != before {
                trace!("cleaned outcomes, {} submissions left", results.len());
            }
        }
    }
}

/// Spawn the periodic result sweeper task.
pub fn spawn_sweeper(
    registry: Arc<ResultRegistry>,
    interval: Duration,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            registry.sweep(ttl);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn outcomes_are_consumed_on_first_read() {
        let registry = ResultRegistry::new();
        let outcome = CheckOutcome {
            percentage: 50.0,
            ..CheckOutcome::default()
        };
        registry.store("tok", outcome.clone());

        assert_eq!(registry.take("tok"), outcome);
        // Second read: gone.
        assert!(registry.take("tok").unauthorized);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_tokens_are_unauthorized_and_nothing_is_consumed() {
        let registry = ResultRegistry::new();
        registry.store("tok", CheckOutcome::default());

        assert!(registry.take("other").unauthorized);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let registry = ResultRegistry::new();
        registry.store("tok", CheckOutcome::default());

        registry.sweep(Duration::from_secs(60));
        assert_eq!(registry.len(), 1);

        registry.sweep(Duration::ZERO);
        assert!(registry.is_empty());
    }
}
