//! Process-wide per-host failure tracker. Grounded on
//! `multi_server_docker.py`'s `_server_failures` dict and its
//! `CIRCUIT_BREAKER_TIMEOUT = 60`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Failure {
  at: Instant,
  message: String,
}

pub struct CircuitBreaker {
  cooldown: Duration,
  failures: Mutex<HashMap<String, Failure>>,
}

impl CircuitBreaker {
  pub fn new(cooldown: Duration) -> Self {
    CircuitBreaker {
      cooldown,
      failures: Mutex::new(HashMap::new()),
    }
  }

  pub async fn is_available(&self, host_id: &str) -> bool {
    let failures = self.failures.lock().await;
    match failures.get(host_id) {
      Some(failure) => failure.at.elapsed() >= self.cooldown,
      None => true,
    }
  }

  pub async fn mark_failed(&self, host_id: &str, message: impl Into<String>) {
    let mut failures = self.failures.lock().await;
    failures.insert(
      host_id.to_string(),
      Failure {
        at: Instant::now(),
        message: message.into(),
      },
    );
  }

  pub async fn mark_healthy(&self, host_id: &str) {
    let mut failures = self.failures.lock().await;
    failures.remove(host_id);
  }

  pub async fn last_error(&self, host_id: &str) -> Option<String> {
    let failures = self.failures.lock().await;
    failures.get(host_id).map(|f| f.message.clone())
  }
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    CircuitBreaker::new(Duration::from_secs(60))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn opens_on_failure_and_closes_after_cooldown() {
    let breaker = CircuitBreaker::new(Duration::from_millis(50));
    assert!(breaker.is_available("host-a").await);
    breaker.mark_failed("host-a", "boom").await;
    assert!(!breaker.is_available("host-a").await);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(breaker.is_available("host-a").await);
  }

  #[tokio::test]
  async fn mark_healthy_clears_failure_immediately() {
    let breaker = CircuitBreaker::new(Duration::from_secs(60));
    breaker.mark_failed("host-a", "boom").await;
    assert!(!breaker.is_available("host-a").await);
    breaker.mark_healthy("host-a").await;
    assert!(breaker.is_available("host-a").await);
  }

  #[tokio::test]
  async fn hosts_are_independent() {
    let breaker = CircuitBreaker::new(Duration::from_secs(60));
    breaker.mark_failed("host-a", "boom").await;
    assert!(breaker.is_available("host-b").await);
  }
}
