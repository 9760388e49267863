//! Typed model of the parsed source export.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Component kinds understood by the migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentKind {
    Pipeline,
    Dataset,
    Connection,
    Trigger,
    SharedParameter,
}

impl ComponentKind {
    /// Resource type suffix used in the export (`pipelines`, `datasets` ...).
    pub fn from_type_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "pipelines" => Some(ComponentKind::Pipeline),
            "datasets" => Some(ComponentKind::Dataset),
            "linkedservices" => Some(ComponentKind::Connection),
            "triggers" => Some(ComponentKind::Trigger),
            "globalparameters" => Some(ComponentKind::SharedParameter),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Pipeline => "pipeline",
            ComponentKind::Dataset => "dataset",
            ComponentKind::Connection => "connection",
            ComponentKind::Trigger => "trigger",
            ComponentKind::SharedParameter => "shared_parameter",
        }
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root-scope naming scheme a resource used in the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NamingConvention {
    DataFactory,
    Synapse,
    Plain,
}

/// A parsed export entry. Immutable once parsing finishes.
#[derive(Debug, Clone)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub kind: ComponentKind,
    pub folder_path: Option<String>,
    pub convention: NamingConvention,
    pub raw: Value,
    pub payload: ComponentPayload,
}

#[derive(Debug, Clone)]
pub enum ComponentPayload {
    Pipeline(PipelineDefinition),
    Dataset(DatasetDefinition),
    Connection(ConnectionDefinition),
    Trigger(TriggerDefinition),
    SharedParameter(SharedParameter),
    /// Shape the engine could not type; carried through untouched.
    Opaque(Value),
}

/// `{referenceName, type, parameters}` pointer to another component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub reference_name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub annotations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<Folder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
    #[serde(default)]
    pub user_properties: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_service_name: Option<Reference>,
    #[serde(default)]
    pub inputs: Vec<Reference>,
    #[serde(default)]
    pub outputs: Vec<Reference>,
    #[serde(default)]
    pub type_properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Activity {
    /// Typed property lookup under `typeProperties`.
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.type_properties.get(key)
    }
}

macro_rules! activity_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Activity type discriminator. Unknown types keep their source name.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ActivityKind {
            $($variant,)+
            Other(String),
        }

        impl ActivityKind {
            pub const KNOWN: &'static [ActivityKind] = &[$(ActivityKind::$variant,)+];

            pub fn as_str(&self) -> &str {
                match self {
                    $(ActivityKind::$variant => $name,)+
                    ActivityKind::Other(name) => name.as_str(),
                }
            }
        }

        impl From<String> for ActivityKind {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($name => ActivityKind::$variant,)+
                    _ => ActivityKind::Other(value),
                }
            }
        }
    };
}

activity_kinds! {
    Copy => "Copy",
    Lookup => "Lookup",
    GetMetadata => "GetMetadata",
    Delete => "Delete",
    IfCondition => "IfCondition",
    ForEach => "ForEach",
    Until => "Until",
    Switch => "Switch",
    ExecutePipeline => "ExecutePipeline",
    Wait => "Wait",
    SetVariable => "SetVariable",
    AppendVariable => "AppendVariable",
    Filter => "Filter",
    Fail => "Fail",
    Script => "Script",
    SqlServerStoredProcedure => "SqlServerStoredProcedure",
    Custom => "Custom",
    WebActivity => "WebActivity",
    WebHook => "WebHook",
    AzureFunctionActivity => "AzureFunctionActivity",
    DatabricksNotebook => "DatabricksNotebook",
    DatabricksSparkJar => "DatabricksSparkJar",
    DatabricksSparkPython => "DatabricksSparkPython",
    HDInsightHive => "HDInsightHive",
    HDInsightPig => "HDInsightPig",
    HDInsightSpark => "HDInsightSpark",
    HDInsightMapReduce => "HDInsightMapReduce",
    HDInsightStreaming => "HDInsightStreaming",
    SynapseNotebook => "SynapseNotebook",
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActivityKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(ActivityKind::from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetParameter {
    #[serde(rename = "type", default = "default_parameter_type")]
    pub parameter_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

fn default_parameter_type() -> String {
    "String".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_service_name: Option<Reference>,
    #[serde(rename = "type")]
    pub dataset_type: String,
    #[serde(default)]
    pub type_properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Value>,
    #[serde(default)]
    pub parameters: BTreeMap<String, DatasetParameter>,
    #[serde(default)]
    pub annotations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<Folder>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDefinition {
    #[serde(rename = "type")]
    pub connector_type: String,
    #[serde(default)]
    pub type_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_via: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub annotations: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPipeline {
    pub pipeline_reference: Reference,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_state: Option<String>,
    #[serde(default)]
    pub pipelines: Vec<TriggerPipeline>,
    #[serde(default)]
    pub type_properties: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Factory-level shared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedParameter {
    pub name: String,
    pub declared_type: String,
    pub default_value: Value,
}

/// Output of the template parser.
#[derive(Debug, Clone, Default)]
pub struct ParsedTemplate {
    components: Vec<Component>,
    index: HashMap<(ComponentKind, String), usize>,
    shared_parameters: Vec<SharedParameter>,
}

impl ParsedTemplate {
    /// Insert a component; returns false when the (kind, name) pair already exists.
    pub(crate) fn insert(&mut self, component: Component) -> bool {
        let key = (component.kind, component.name.clone());
        if self.index.contains_key(&key) {
            return false;
        }
        if let ComponentPayload::SharedParameter(param) = &component.payload {
            self.shared_parameters.push(param.clone());
        }
        self.index.insert(key, self.components.len());
        self.components.push(component);
        true
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn get(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.index
            .get(&(kind, name.to_string()))
            .map(|idx| &self.components[*idx])
    }

    pub fn of_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(move |c| c.kind == kind)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDefinition> {
        match &self.get(ComponentKind::Pipeline, name)?.payload {
            ComponentPayload::Pipeline(def) => Some(def),
            _ => None,
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetDefinition> {
        match &self.get(ComponentKind::Dataset, name)?.payload {
            ComponentPayload::Dataset(def) => Some(def),
            _ => None,
        }
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionDefinition> {
        match &self.get(ComponentKind::Connection, name)?.payload {
            ComponentPayload::Connection(def) => Some(def),
            _ => None,
        }
    }

    /// Pipeline names in sorted order.
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .of_kind(ComponentKind::Pipeline)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn shared_parameters(&self) -> &[SharedParameter] {
        &self.shared_parameters
    }

    pub fn shared_parameter(&self, name: &str) -> Option<&SharedParameter> {
        self.shared_parameters.iter().find(|p| p.name == name)
    }

    pub fn counts(&self) -> BTreeMap<ComponentKind, usize> {
        let mut counts = BTreeMap::new();
        for component in &self.components {
            *counts.entry(component.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn convention_counts(&self) -> BTreeMap<NamingConvention, usize> {
        let mut counts = BTreeMap::new();
        for component in &self.components {
            *counts.entry(component.convention).or_insert(0) += 1;
        }
        counts
    }
}
