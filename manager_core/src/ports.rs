//! Port Allocator (C1). Derived from the registry on load; never writes its
//! own file — the registry is the persistence layer.

use std::collections::HashSet;
use std::net::TcpListener;

use indexmap::IndexMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct PortAllocatorConfig {
  pub start: u16,
  pub end: u16,
  pub reserved: HashSet<u16>,
}

impl Default for PortAllocatorConfig {
  fn default() -> Self {
    PortAllocatorConfig {
      start: 8080,
      end: 8200,
      reserved: [80u16, 443, 3000, 8888].into_iter().collect(),
    }
  }
}

/// Deterministic TCP port assignment/reclamation, scanning `[start, end]` in
/// order and skipping the reserved set, the already-allocated set, and any
/// port currently bound locally.
pub struct PortAllocator {
  config: PortAllocatorConfig,
  allocated: IndexMap<String, u16>,
}

impl PortAllocator {
  pub fn new(config: PortAllocatorConfig) -> Self {
    PortAllocator {
      config,
      allocated: IndexMap::new(),
    }
  }

  /// Rebuilds allocator state from an existing `agent_id -> port` mapping,
  /// e.g. derived from the registry at startup.
  pub fn from_existing(
    config: PortAllocatorConfig,
    existing: IndexMap<String, u16>,
  ) -> Self {
    PortAllocator {
      config,
      allocated: existing,
    }
  }

  pub fn reserve(&mut self, port: u16) {
    self.config.reserved.insert(port);
  }

  pub fn get(&self, agent_id: &str) -> Option<u16> {
    self.allocated.get(agent_id).copied()
  }

  pub fn allocate(&mut self, agent_id: &str) -> Result<u16> {
    if let Some(port) = self.allocated.get(agent_id) {
      return Ok(*port);
    }
    let taken: HashSet<u16> = self.allocated.values().copied().collect();
    for port in self.config.start..=self.config.end {
      if self.config.reserved.contains(&port) || taken.contains(&port) {
        continue;
      }
      if !port_is_free(port) {
        continue;
      }
      self.allocated.insert(agent_id.to_string(), port);
      return Ok(port);
    }
    Err(Error::PortsExhausted {
      start: self.config.start,
      end: self.config.end,
    })
  }

  /// Idempotent; returns the port that was released, or `None` if the agent
  /// held no allocation.
  pub fn release(&mut self, agent_id: &str) -> Option<u16> {
    self.allocated.shift_remove(agent_id)
  }
}

/// Mirrors the original's `_is_port_in_use(port, host="0.0.0.0")`: binding
/// the wildcard address catches a listener on any interface, not just
/// loopback, so a process bound to e.g. a specific LAN interface still
/// shows the port as taken.
fn port_is_free(port: u16) -> bool {
  TcpListener::bind(("0.0.0.0", port)).is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocate_is_stable_across_release_and_reallocate() {
    let mut allocator = PortAllocator::new(PortAllocatorConfig {
      start: 20000,
      end: 20010,
      reserved: HashSet::new(),
    });
    let first = allocator.allocate("agent-a").unwrap();
    assert_eq!(allocator.allocate("agent-a").unwrap(), first);
    assert_eq!(allocator.release("agent-a"), Some(first));
    assert_eq!(allocator.release("agent-a"), None);
    let second = allocator.allocate("agent-a").unwrap();
    assert_eq!(second, first);
  }

  #[test]
  fn distinct_agents_get_distinct_ports() {
    let mut allocator = PortAllocator::new(PortAllocatorConfig {
      start: 21000,
      end: 21010,
      reserved: HashSet::new(),
    });
    let a = allocator.allocate("a").unwrap();
    let b = allocator.allocate("b").unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn reserved_ports_are_never_handed_out() {
    let mut allocator = PortAllocator::new(PortAllocatorConfig {
      start: 22000,
      end: 22001,
      reserved: [22000].into_iter().collect(),
    });
    assert_eq!(allocator.allocate("agent").unwrap(), 22001);
  }

  #[test]
  fn exhausted_range_errors() {
    let mut allocator = PortAllocator::new(PortAllocatorConfig {
      start: 23000,
      end: 23000,
      reserved: HashSet::new(),
    });
    allocator.allocate("first").unwrap();
    assert!(matches!(
      allocator.allocate("second"),
      Err(Error::PortsExhausted { .. })
    ));
  }
}
