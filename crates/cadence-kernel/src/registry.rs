//! Agent registry.
//!
//! The registry maps external agent identifiers (whatever the caller calls an
//! agent, e.g. `"Research Agent"` or `"defi/swap"`) to internal *routable node
//! names* that are safe to use as graph node identifiers (`research_agent`,
//! `defi_swap`).  Two identifiers that sanitize to the same node name are
//! disambiguated by appending a numeric suffix (`defi_swap_1`, `defi_swap_2`).
//!
//! The registry is shared between every run in the process, so registration
//! can race with an in-flight routing decision.  All state lives behind a
//! single [`RwLock`]: lookups take the read lock and proceed in parallel,
//! while registration and unregistration take the write lock so the
//! id→node and node→id maps are always updated together.
//!
//! # Example
//!
//! ```rust
//! # use cadence_kernel::registry::AgentRegistry;
//! let registry: AgentRegistry<&'static str> = AgentRegistry::new();
//! let first = registry.register("Research Agent", "web research", "handle-a").unwrap();
//! let second = registry.register("research-agent", "duplicate name", "handle-b").unwrap();
//!
//! assert_eq!(first, "research_agent");
//! assert_eq!(second, "research_agent_1");
//! assert_eq!(registry.resolve_node("research-agent").unwrap(), "research_agent_1");
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Metadata about a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// External identifier supplied at registration time.
    pub id: String,
    /// Routable node name assigned by the registry.
    pub node_name: String,
    /// Human-readable description shown to the routing model.
    pub description: String,
    /// When the agent was (last) registered.
    pub registered_at: DateTime<Utc>,
}

struct Entry<H> {
    info: AgentInfo,
    handle: H,
}

struct Inner<H> {
    /// External id -> entry.
    by_id: HashMap<String, Entry<H>>,
    /// Node name -> external id.
    by_node: HashMap<String, String>,
    /// Node names that may never be handed out (engine node names etc.).
    reserved: HashSet<String>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent agent registry with single-writer / many-reader discipline.
///
/// `H` is the handle stored alongside each agent (typically an
/// `Arc<dyn SubAgent>`).  The registry is cheaply cloneable (`Arc`-backed);
/// clones share the same underlying maps.
pub struct AgentRegistry<H> {
    inner: Arc<RwLock<Inner<H>>>,
}

impl<H> Clone for AgentRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Clone> AgentRegistry<H> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reserved(std::iter::empty::<String>())
    }

    /// Create an empty registry that will never assign any of `reserved` as a
    /// node name.
    pub fn with_reserved<I, S>(reserved: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                by_id: HashMap::new(),
                by_node: HashMap::new(),
                reserved: reserved.into_iter().map(Into::into).collect(),
            })),
        }
    }

    /// Register an agent and return its routable node name.
    ///
    /// Re-registering an existing id replaces its handle and description but
    /// keeps the node name it was first assigned.
    pub fn register(
        &self,
        id: impl Into<String>,
        description: impl Into<String>,
        handle: H,
    ) -> Result<String> {
        let id = id.into();
        let description = description.into();
        let base = sanitize_node_name(&id)?;

        let mut inner = self.write()?;

        if let Some(entry) = inner.by_id.get_mut(&id) {
            entry.info.description = description;
            entry.info.registered_at = Utc::now();
            entry.handle = handle;
            tracing::info!(agent_id = %id, node = %entry.info.node_name, "agent re-registered");
            return Ok(entry.info.node_name.clone());
        }

        let node_name = next_free_name(&base, &inner);
        inner.by_node.insert(node_name.clone(), id.clone());
        inner.by_id.insert(
            id.clone(),
            Entry {
                info: AgentInfo {
                    id: id.clone(),
                    node_name: node_name.clone(),
                    description,
                    registered_at: Utc::now(),
                },
                handle,
            },
        );

        tracing::info!(agent_id = %id, node = %node_name, "agent registered");
        Ok(node_name)
    }

    /// Remove an agent from the registry.
    ///
    /// Returns the removed [`AgentInfo`] if it existed.  The node name
    /// becomes available for future registrations.
    pub fn unregister(&self, id: &str) -> Result<Option<AgentInfo>> {
        let mut inner = self.write()?;
        let removed = inner.by_id.remove(id).map(|entry| entry.info);
        if let Some(info) = &removed {
            inner.by_node.remove(&info.node_name);
            tracing::info!(agent_id = %id, node = %info.node_name, "agent unregistered");
        }
        Ok(removed)
    }

    /// Resolve an external agent id to its node name.
    pub fn resolve_node(&self, id: &str) -> Result<String> {
        self.read()?
            .by_id
            .get(id)
            .map(|entry| entry.info.node_name.clone())
            .ok_or_else(|| KernelError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    /// Look up an agent by node name, returning its info and handle.
    pub fn get_by_node(&self, node: &str) -> Result<(AgentInfo, H)> {
        let inner = self.read()?;
        inner
            .by_node
            .get(node)
            .and_then(|id| inner.by_id.get(id))
            .map(|entry| (entry.info.clone(), entry.handle.clone()))
            .ok_or_else(|| KernelError::NodeNotFound {
                node: node.to_string(),
            })
    }

    /// Look up an agent by external id, returning its info and handle.
    pub fn get(&self, id: &str) -> Result<(AgentInfo, H)> {
        self.read()?
            .by_id
            .get(id)
            .map(|entry| (entry.info.clone(), entry.handle.clone()))
            .ok_or_else(|| KernelError::AgentNotFound {
                agent_id: id.to_string(),
            })
    }

    /// Return a snapshot of all registered agents, ordered by node name.
    pub fn list(&self) -> Result<Vec<AgentInfo>> {
        let mut all: Vec<AgentInfo> = self
            .read()?
            .by_id
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        all.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        Ok(all)
    }

    /// Return the number of registered agents.
    pub fn count(&self) -> Result<usize> {
        Ok(self.read()?.by_id.len())
    }

    // -- Private helpers ----------------------------------------------------

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner<H>>> {
        self.inner.read().map_err(|_| KernelError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner<H>>> {
        self.inner.write().map_err(|_| KernelError::LockPoisoned)
    }
}

impl<H: Clone> Default for AgentRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Node naming
// ---------------------------------------------------------------------------

/// Turn an arbitrary agent id into a lowercase `[a-z0-9_]` node name.
///
/// Runs of other characters collapse into a single underscore; leading and
/// trailing underscores are trimmed.
pub fn sanitize_node_name(id: &str) -> Result<String> {
    let mut out = String::with_capacity(id.len());
    let mut pending_sep = false;

    for ch in id.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        return Err(KernelError::InvalidAgentId {
            agent_id: id.to_string(),
            reason: "id contains no alphanumeric characters".into(),
        });
    }

    Ok(out)
}

fn next_free_name<H>(base: &str, inner: &Inner<H>) -> String {
    let taken = |name: &str| inner.by_node.contains_key(name) || inner.reserved.contains(name);

    if !taken(base) {
        return base.to_string();
    }

    let mut suffix = 1u32;
    loop {
        let candidate = format!("{base}_{suffix}");
        if !taken(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
