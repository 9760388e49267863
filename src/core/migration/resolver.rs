//! Four-tier connection resolution for activity slots.

use crate::core::config::ConnectionsConfig;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// `(pipeline, activity, location)` identifying one connection slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ReferenceKey {
    pub pipeline: String,
    pub activity: String,
    pub location: String,
}

impl ReferenceKey {
    pub fn new(
        pipeline: impl Into<String>,
        activity: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            activity: activity.into(),
            location: location.into(),
        }
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.pipeline, self.activity, self.location)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    DirectReference,
    PropertyMatch,
    ConnectionBridge,
    DeployedTarget,
    Failed,
}

impl ResolutionTier {
    pub fn number(&self) -> Option<u8> {
        match self {
            ResolutionTier::DirectReference => Some(1),
            ResolutionTier::PropertyMatch => Some(2),
            ResolutionTier::ConnectionBridge => Some(3),
            ResolutionTier::DeployedTarget => Some(4),
            ResolutionTier::Failed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConnection {
    pub reference_key: ReferenceKey,
    pub target_connection_id: Option<String>,
    pub resolution_tier: ResolutionTier,
}

/// Everything a strategy may look at for one slot.
#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub key: ReferenceKey,
    pub linked_service: Option<&'a str>,
    pub properties: Option<&'a Value>,
    pub invoked_pipeline: Option<&'a str>,
}

impl<'a> ResolveRequest<'a> {
    pub fn new(key: ReferenceKey) -> Self {
        Self {
            key,
            linked_service: None,
            properties: None,
            invoked_pipeline: None,
        }
    }

    pub fn linked_service(mut self, name: Option<&'a str>) -> Self {
        self.linked_service = name;
        self
    }

    pub fn properties(mut self, properties: &'a Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn invoking(mut self, pipeline: &'a str) -> Self {
        self.invoked_pipeline = Some(pipeline);
        self
    }
}

/// Lookup tables the strategies consult. Populated by configuration and by
/// the deployment as resources are created.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub reference_ids: HashMap<ReferenceKey, String>,
    pub connection_map: HashMap<String, String>,
    pub bridge: HashMap<String, String>,
    pub deployed_pipelines: HashMap<String, String>,
}

impl ResolutionContext {
    /// Seed tiers 1 and 2 from the `[connections]` configuration.
    pub fn from_config(connections: &ConnectionsConfig) -> Self {
        let mut context = Self::default();
        for (name, id) in &connections.map {
            context.connection_map.insert(name.clone(), id.clone());
        }
        for mapping in &connections.references {
            context.reference_ids.insert(
                ReferenceKey::new(&mapping.pipeline, &mapping.activity, &mapping.location),
                mapping.connection_id.clone(),
            );
        }
        context
    }

    pub fn register_connection(&mut self, source_name: &str, target_id: &str) {
        self.bridge
            .insert(source_name.to_string(), target_id.to_string());
    }

    pub fn register_pipeline(&mut self, source_name: &str, target_id: &str) {
        self.deployed_pipelines
            .insert(source_name.to_string(), target_id.to_string());
    }
}

/// One resolution tier.
pub trait ResolutionStrategy: Send + Sync {
    fn tier(&self) -> ResolutionTier;
    fn resolve(&self, request: &ResolveRequest<'_>, context: &ResolutionContext) -> Option<String>;
}

pub struct DirectReferenceStrategy;

impl ResolutionStrategy for DirectReferenceStrategy {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::DirectReference
    }

    fn resolve(&self, request: &ResolveRequest<'_>, context: &ResolutionContext) -> Option<String> {
        context.reference_ids.get(&request.key).cloned()
    }
}

/// Scans the activity's properties for a value naming a mapped connection.
pub struct PropertyMatchStrategy;

impl PropertyMatchStrategy {
    fn scan(value: &Value, map: &HashMap<String, String>) -> Option<String> {
        match value {
            Value::String(text) => map.get(text).cloned(),
            Value::Array(items) => items.iter().find_map(|v| Self::scan(v, map)),
            Value::Object(obj) => obj.values().find_map(|v| Self::scan(v, map)),
            _ => None,
        }
    }
}

impl ResolutionStrategy for PropertyMatchStrategy {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::PropertyMatch
    }

    fn resolve(&self, request: &ResolveRequest<'_>, context: &ResolutionContext) -> Option<String> {
        if context.connection_map.is_empty() {
            return None;
        }
        if let Some(found) = request
            .linked_service
            .and_then(|name| context.connection_map.get(name).cloned())
        {
            return Some(found);
        }
        request
            .properties
            .and_then(|props| Self::scan(props, &context.connection_map))
    }
}

pub struct ConnectionBridgeStrategy;

impl ResolutionStrategy for ConnectionBridgeStrategy {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::ConnectionBridge
    }

    fn resolve(&self, request: &ResolveRequest<'_>, context: &ResolutionContext) -> Option<String> {
        let name = request.linked_service?;
        if let Some(id) = context.bridge.get(name) {
            return Some(id.clone());
        }
        context
            .bridge
            .iter()
            .find(|(source, _)| source.eq_ignore_ascii_case(name))
            .map(|(_, id)| id.clone())
    }
}

pub struct DeployedTargetStrategy;

impl ResolutionStrategy for DeployedTargetStrategy {
    fn tier(&self) -> ResolutionTier {
        ResolutionTier::DeployedTarget
    }

    fn resolve(&self, request: &ResolveRequest<'_>, context: &ResolutionContext) -> Option<String> {
        let pipeline = request.invoked_pipeline?;
        context.deployed_pipelines.get(pipeline).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub direct_reference: usize,
    pub property_match: usize,
    pub connection_bridge: usize,
    pub deployed_target: usize,
    pub failed: usize,
}

impl ResolutionStats {
    fn record(&mut self, tier: ResolutionTier) {
        match tier {
            ResolutionTier::DirectReference => self.direct_reference += 1,
            ResolutionTier::PropertyMatch => self.property_match += 1,
            ResolutionTier::ConnectionBridge => self.connection_bridge += 1,
            ResolutionTier::DeployedTarget => self.deployed_target += 1,
            ResolutionTier::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.direct_reference
            + self.property_match
            + self.connection_bridge
            + self.deployed_target
            + self.failed
    }
}

/// Runs the strategies in tier order; the first hit wins.
pub struct ConnectionResolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
    stats: ResolutionStats,
    seen: HashSet<ReferenceKey>,
    history: Vec<ResolvedConnection>,
}

impl Default for ConnectionResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionResolver {
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(DirectReferenceStrategy),
            Box::new(PropertyMatchStrategy),
            Box::new(ConnectionBridgeStrategy),
            Box::new(DeployedTargetStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self {
            strategies,
            stats: ResolutionStats::default(),
            seen: HashSet::new(),
            history: Vec::new(),
        }
    }

    pub fn resolve(
        &mut self,
        request: &ResolveRequest<'_>,
        context: &ResolutionContext,
        diagnostics: &mut Diagnostics,
    ) -> ResolvedConnection {
        if !self.seen.insert(request.key.clone()) {
            diagnostics.at(
                request.key.to_string(),
                MigrationIssue::DuplicateReferenceKey {
                    key: request.key.to_string(),
                },
            );
        }

        let hit = self.strategies.iter().find_map(|strategy| {
            strategy
                .resolve(request, context)
                .map(|id| (strategy.tier(), id))
        });

        let resolved = match hit {
            Some((tier, id)) => {
                tracing::debug!(
                    key = %request.key,
                    tier = ?tier,
                    connection = %id,
                    "Resolved connection"
                );
                ResolvedConnection {
                    reference_key: request.key.clone(),
                    target_connection_id: Some(id),
                    resolution_tier: tier,
                }
            }
            None => {
                diagnostics.at(
                    request.key.to_string(),
                    MigrationIssue::ConnectionUnresolved {
                        location: request.key.to_string(),
                        linked_service: request.linked_service.map(str::to_string),
                    },
                );
                ResolvedConnection {
                    reference_key: request.key.clone(),
                    target_connection_id: None,
                    resolution_tier: ResolutionTier::Failed,
                }
            }
        };

        self.stats.record(resolved.resolution_tier);
        self.history.push(resolved.clone());
        resolved
    }

    pub fn stats(&self) -> ResolutionStats {
        self.stats
    }

    pub fn resolutions(&self) -> &[ResolvedConnection] {
        &self.history
    }
}
