//! Lane Context Manager: per-phase conversation lane storage with byte caps
//! and a cooperative summarization trigger (spec.md §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::collab::ContextManager;
use crate::types::{Lane, LaneKey, LaneMessage, LaneRole};

#[derive(Debug, Clone)]
pub struct LaneLimits {
    pub max_messages: usize,
    pub max_bytes_per_lane: usize,
    pub summarize_enabled: bool,
    pub summarize_threshold_pct: f64,
}

impl Default for LaneLimits {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_bytes_per_lane: 200_000,
            summarize_enabled: true,
            summarize_threshold_pct: 0.9,
        }
    }
}

/// In-memory lane store, one entry per lane id, writes serialized per lane
/// (spec.md §5 "Lane store: writes from a single run are serialized by
/// laneId").
pub struct InMemoryLaneManager {
    lanes: Mutex<HashMap<String, Lane>>,
    limits: LaneLimits,
}

impl InMemoryLaneManager {
    pub fn new(limits: LaneLimits) -> Self {
        Self { lanes: Mutex::new(HashMap::new()), limits }
    }

    pub fn shared(limits: LaneLimits) -> Arc<Self> {
        Arc::new(Self::new(limits))
    }

    fn maybe_summarize(&self, lane: &mut Lane) {
        let cap = self.limits.max_bytes_per_lane as f64;
        if !self.limits.summarize_enabled || cap <= 0.0 {
            return;
        }
        if (lane.bytes as f64) / cap < self.limits.summarize_threshold_pct {
            return;
        }
        if lane.messages.len() < 2 {
            return;
        }
        let drop_count = lane.messages.len() / 2;
        let dropped: Vec<_> = lane.messages.drain(0..drop_count).collect();
        let dropped_bytes: usize = dropped.iter().map(|m| m.bytes).sum();
        let summary = LaneMessage {
            role: "system".to_string(),
            content: format!("[summarized {} earlier message(s)]", dropped.len()),
            bytes: 48,
            ts: Utc::now(),
        };
        lane.bytes = lane.bytes - dropped_bytes + summary.bytes;
        lane.messages.insert(0, summary);
    }
}

#[async_trait]
impl ContextManager for InMemoryLaneManager {
    async fn get_lane(&self, key: LaneKey) -> Lane {
        let id = key.id();
        if key.ephemeral {
            return Lane { lane_id: id, messages: Vec::new(), bytes: 0, role: key.role, ephemeral: true };
        }
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(id.clone())
            .or_insert_with(|| Lane { lane_id: id, messages: Vec::new(), bytes: 0, role: key.role, ephemeral: false })
            .clone()
    }

    async fn append(&self, lane_id: &str, role: &str, content: &str) -> anyhow::Result<()> {
        let mut lanes = self.lanes.lock().await;
        let lane = lanes.entry(lane_id.to_string()).or_insert_with(|| Lane {
            lane_id: lane_id.to_string(),
            messages: Vec::new(),
            bytes: 0,
            role: LaneRole::Architect,
            ephemeral: false,
        });
        let bytes = content.len();
        lane.messages.push(LaneMessage { role: role.to_string(), content: content.to_string(), bytes, ts: Utc::now() });
        lane.bytes += bytes;
        if lane.messages.len() > self.limits.max_messages {
            let extra = lane.messages.len() - self.limits.max_messages;
            let dropped: Vec<_> = lane.messages.drain(0..extra).collect();
            lane.bytes -= dropped.iter().map(|m| m.bytes).sum::<usize>();
        }
        self.maybe_summarize(lane);
        Ok(())
    }
}

impl Clone for Lane {
    fn clone(&self) -> Self {
        Self {
            lane_id: self.lane_id.clone(),
            messages: self.messages.clone(),
            bytes: self.bytes,
            role: self.role,
            ephemeral: self.ephemeral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LaneScope;

    fn scope() -> LaneScope {
        LaneScope { job_id: "job-x".into(), task_id: "task-y".into(), run_id: None }
    }

    #[tokio::test]
    async fn lane_id_follows_convention() {
        let mgr = InMemoryLaneManager::new(LaneLimits::default());
        let key = LaneKey { scope: scope(), role: LaneRole::Builder, attempt: None, ephemeral: false };
        let lane = mgr.get_lane(key).await;
        assert_eq!(lane.lane_id, "job-x:task-y:builder");
    }

    #[tokio::test]
    async fn retry_lane_id_has_attempt_suffix() {
        let mgr = InMemoryLaneManager::new(LaneLimits::default());
        let key = LaneKey { scope: scope(), role: LaneRole::Builder, attempt: Some(2), ephemeral: false };
        let lane = mgr.get_lane(key).await;
        assert_eq!(lane.lane_id, "job-x:task-y:builder:attempt-2");
    }

    #[tokio::test]
    async fn byte_cap_drops_oldest_messages() {
        let mgr = InMemoryLaneManager::new(LaneLimits { max_messages: 2, ..Default::default() });
        mgr.append("lane-1", "user", "one").await.unwrap();
        mgr.append("lane-1", "user", "two").await.unwrap();
        mgr.append("lane-1", "user", "three").await.unwrap();
        let key = LaneKey {
            scope: LaneScope { job_id: "j".into(), task_id: "t".into(), run_id: None },
            role: LaneRole::Builder,
            attempt: None,
            ephemeral: false,
        };
        // get_lane would create a distinct lane id; fetch via append's own store instead.
        let lanes = mgr.lanes.lock().await;
        let lane = lanes.get("lane-1").unwrap();
        assert_eq!(lane.messages.len(), 2);
        assert_eq!(lane.messages[0].content, "two");
        drop(lanes);
        let _ = key; // keep helper constructible for symmetry with other tests
    }

    #[tokio::test]
    async fn ephemeral_lanes_are_not_persisted() {
        let mgr = InMemoryLaneManager::new(LaneLimits::default());
        let key = LaneKey { scope: scope(), role: LaneRole::Research, attempt: None, ephemeral: true };
        let lane = mgr.get_lane(key).await;
        assert!(lane.ephemeral);
        let lanes = mgr.lanes.lock().await;
        assert!(!lanes.contains_key(&lane.lane_id));
    }
}
