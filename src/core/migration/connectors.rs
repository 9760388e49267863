//! Connector type and authentication mapping, plus create-connection payloads.

use crate::core::config::loader::ConnectionOverrides;
use crate::core::migration::diagnostics::{Diagnostics, MigrationIssue};
use crate::core::migration::schema::{
    ComponentKind, ComponentPayload, ConnectionDefinition, ParsedTemplate,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Credential kinds accepted by target connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TargetCredential {
    WorkspaceIdentity,
    Key,
    ServicePrincipal,
    Basic,
    Windows,
    SharedAccessSignature,
    Anonymous,
    OAuth2,
}

impl TargetCredential {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetCredential::WorkspaceIdentity => "WorkspaceIdentity",
            TargetCredential::Key => "Key",
            TargetCredential::ServicePrincipal => "ServicePrincipal",
            TargetCredential::Basic => "Basic",
            TargetCredential::Windows => "Windows",
            TargetCredential::SharedAccessSignature => "SharedAccessSignature",
            TargetCredential::Anonymous => "Anonymous",
            TargetCredential::OAuth2 => "OAuth2",
        }
    }
}

/// Authentication mode declared or implied by a source connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SourceAuth {
    ManagedIdentity,
    AccountKey,
    ServicePrincipal,
    Basic,
    Windows,
    SharedAccessSignature,
    Anonymous,
    Unknown(String),
}

impl std::fmt::Display for SourceAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceAuth::Unknown(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MappingConfidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorMapping {
    pub source_type: &'static str,
    pub target_type: &'static str,
    pub supported_auth: &'static [TargetCredential],
    pub requires_gateway: bool,
}

impl ConnectorMapping {
    pub fn supports(&self, credential: TargetCredential) -> bool {
        self.supported_auth.contains(&credential)
    }
}

use TargetCredential::{
    Anonymous as ANON, Basic as BASIC, Key as KEY, OAuth2 as OAUTH, ServicePrincipal as SP,
    SharedAccessSignature as SAS, Windows as WIN, WorkspaceIdentity as WI,
};

const fn cloud(
    source_type: &'static str,
    target_type: &'static str,
    supported_auth: &'static [TargetCredential],
) -> ConnectorMapping {
    ConnectorMapping {
        source_type,
        target_type,
        supported_auth,
        requires_gateway: false,
    }
}

const fn gateway(
    source_type: &'static str,
    target_type: &'static str,
    supported_auth: &'static [TargetCredential],
) -> ConnectorMapping {
    ConnectorMapping {
        source_type,
        target_type,
        supported_auth,
        requires_gateway: true,
    }
}

/// Source connector → target connector table.
pub const CONNECTOR_MAPPINGS: &[ConnectorMapping] = &[
    cloud("AzureBlobStorage", "AzureBlobs", &[WI, KEY, SP, SAS, ANON]),
    cloud("AzureBlobFS", "AzureDataLakeStorage", &[WI, KEY, SP, SAS]),
    cloud("AzureDataLakeStore", "AzureDataLakeStorage", &[WI, SP]),
    cloud("AzureFileStorage", "AzureFiles", &[KEY, SAS]),
    cloud("AzureTableStorage", "AzureTables", &[KEY, SAS]),
    cloud("AzureSqlDatabase", "SQL", &[WI, BASIC, SP, OAUTH]),
    cloud("AzureSqlDW", "AzureSynapseAnalytics", &[WI, BASIC, SP]),
    cloud("AzureSqlMI", "AzureSqlMI", &[WI, BASIC, SP]),
    cloud("AzureDatabricks", "AzureDatabricks", &[KEY, WI, SP]),
    cloud("AzureDatabricksDeltaLake", "AzureDatabricks", &[KEY]),
    cloud("AzureDataExplorer", "AzureDataExplorer", &[WI, SP, OAUTH]),
    cloud("AzurePostgreSql", "AzurePostgreSQL", &[BASIC]),
    cloud("AzureMySql", "AzureMySQL", &[BASIC]),
    cloud("CosmosDb", "CosmosDB", &[KEY, SP, WI]),
    cloud("CosmosDbMongoDbApi", "MongoDBAtlas", &[BASIC]),
    cloud("AzureFunction", "AzureFunction", &[KEY, ANON]),
    cloud("AzureSearch", "AzureAISearch", &[KEY]),
    cloud("RestService", "RestService", &[ANON, BASIC, SP, WI, KEY]),
    cloud("HttpServer", "Web", &[ANON, BASIC, WIN]),
    cloud("OData", "OData", &[ANON, BASIC, SP]),
    cloud("AmazonS3", "AmazonS3", &[KEY]),
    cloud("AmazonRedshift", "AmazonRedshift", &[BASIC]),
    cloud("GoogleCloudStorage", "GoogleCloudStorage", &[KEY]),
    cloud("GoogleBigQuery", "GoogleBigQuery", &[OAUTH, SP]),
    cloud("Snowflake", "Snowflake", &[BASIC, KEY]),
    cloud("Salesforce", "Salesforce", &[OAUTH, BASIC]),
    cloud("DynamicsCrm", "Dynamics365", &[SP, BASIC, OAUTH]),
    cloud("Dynamics", "Dynamics365", &[SP, BASIC, OAUTH]),
    cloud("SharePointOnlineList", "SharePointOnlineList", &[SP, OAUTH]),
    cloud("Office365", "Office365", &[SP]),
    cloud("FtpServer", "FTP", &[BASIC, ANON]),
    cloud("Sftp", "SFTP", &[BASIC, KEY]),
    cloud("MongoDbV2", "MongoDB", &[BASIC]),
    gateway("SqlServer", "SQL", &[BASIC, WIN]),
    gateway("Oracle", "Oracle", &[BASIC]),
    gateway("MySql", "MySql", &[BASIC]),
    gateway("PostgreSql", "PostgreSql", &[BASIC]),
    gateway("Db2", "DB2", &[BASIC, WIN]),
    gateway("Teradata", "Teradata", &[BASIC, WIN]),
    gateway("Sybase", "Sybase", &[BASIC, WIN]),
    gateway("SapHana", "SapHana", &[BASIC, WIN]),
    gateway("Informix", "Informix", &[BASIC, ANON]),
    gateway("Odbc", "Odbc", &[BASIC, WIN, ANON]),
    gateway("FileServer", "FileSystem", &[WIN]),
];

/// Case-insensitive lookup in the mapping table.
pub fn lookup(source_type: &str) -> Option<&'static ConnectorMapping> {
    CONNECTOR_MAPPINGS
        .iter()
        .find(|m| m.source_type.eq_ignore_ascii_case(source_type))
}

/// Result of translating one source connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorTranslation {
    pub source_type: String,
    pub target_type: String,
    pub unmapped: bool,
    pub requires_gateway: bool,
    pub source_auth: SourceAuth,
    pub target_auth: Option<TargetCredential>,
    pub auth_supported: bool,
    #[serde(skip)]
    pub credentials: Map<String, Value>,
    pub confidence: MappingConfidence,
}

/// Determine the source authentication mode, explicit first, then inferred.
pub fn detect_auth(source_type: &str, properties: &Map<String, Value>) -> SourceAuth {
    if let Some(declared) = properties.get("authenticationType").and_then(Value::as_str) {
        return match declared.to_ascii_lowercase().as_str() {
            "managedserviceidentity" | "systemassignedmanagedidentity" | "msi"
            | "managedidentity" | "userassignedmanagedidentity" => SourceAuth::ManagedIdentity,
            "serviceprincipal" | "aadserviceprincipal" => SourceAuth::ServicePrincipal,
            "sql" | "basic" => SourceAuth::Basic,
            "windows" => SourceAuth::Windows,
            "anonymous" => SourceAuth::Anonymous,
            "accountkey" | "key" | "accesskey" => SourceAuth::AccountKey,
            "sasuri" | "sas" => SourceAuth::SharedAccessSignature,
            _ => SourceAuth::Unknown(declared.to_string()),
        };
    }

    if properties.contains_key("servicePrincipalId") {
        SourceAuth::ServicePrincipal
    } else if properties.contains_key("accountKey") || properties.contains_key("accessKey") {
        SourceAuth::AccountKey
    } else if properties.contains_key("sasUri") || properties.contains_key("sasToken") {
        SourceAuth::SharedAccessSignature
    } else if properties.contains_key("userName") || properties.contains_key("username") {
        SourceAuth::Basic
    } else if source_type.starts_with("Azure") {
        SourceAuth::ManagedIdentity
    } else {
        SourceAuth::Anonymous
    }
}

const FIELD_RENAMES: &[(&str, &str)] = &[
    ("accountKey", "key"),
    ("accessKey", "key"),
    ("servicePrincipalId", "servicePrincipalClientId"),
    ("servicePrincipalKey", "servicePrincipalSecret"),
    ("tenant", "tenantId"),
    ("userName", "username"),
    ("password", "password"),
    ("sasUri", "token"),
    ("sasToken", "token"),
];

const CREDENTIAL_FIELDS: &[&str] = &[
    "accountKey",
    "accessKey",
    "servicePrincipalId",
    "servicePrincipalKey",
    "servicePrincipalCredentialType",
    "tenant",
    "userName",
    "username",
    "password",
    "sasUri",
    "sasToken",
    "authenticationType",
    "encryptedCredential",
    "credential",
    "connectionString",
];

/// Map a source auth mode to the target credential kind, renaming fields.
pub fn translate_auth(
    auth: &SourceAuth,
    properties: &Map<String, Value>,
) -> (Option<TargetCredential>, Map<String, Value>) {
    let target = match auth {
        SourceAuth::ManagedIdentity => Some(TargetCredential::WorkspaceIdentity),
        SourceAuth::AccountKey => Some(TargetCredential::Key),
        SourceAuth::ServicePrincipal => Some(TargetCredential::ServicePrincipal),
        SourceAuth::Basic => Some(TargetCredential::Basic),
        SourceAuth::Windows => Some(TargetCredential::Windows),
        SourceAuth::SharedAccessSignature => Some(TargetCredential::SharedAccessSignature),
        SourceAuth::Anonymous => Some(TargetCredential::Anonymous),
        SourceAuth::Unknown(_) => None,
    };

    let mut credentials = Map::new();
    for (from, to) in FIELD_RENAMES {
        if let Some(value) = properties.get(*from) {
            credentials.insert((*to).to_string(), secret_value(value));
        }
    }
    (target, credentials)
}

/// Unwrap `{type: SecureString, value}` secrets; other shapes pass through.
fn secret_value(value: &Value) -> Value {
    match value {
        Value::Object(obj)
            if obj.get("type").and_then(Value::as_str) == Some("SecureString") =>
        {
            obj.get("value").cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

/// Translate a source connector type and its properties.
pub fn translate_connector(
    source_type: &str,
    properties: &Map<String, Value>,
) -> ConnectorTranslation {
    let auth = detect_auth(source_type, properties);
    let (target_auth, credentials) = translate_auth(&auth, properties);

    match lookup(source_type) {
        Some(mapping) => {
            let auth_supported = target_auth.is_some_and(|c| mapping.supports(c));
            ConnectorTranslation {
                source_type: source_type.to_string(),
                target_type: mapping.target_type.to_string(),
                unmapped: false,
                requires_gateway: mapping.requires_gateway,
                source_auth: auth,
                target_auth,
                auth_supported,
                credentials,
                confidence: if auth_supported {
                    MappingConfidence::High
                } else {
                    MappingConfidence::Medium
                },
            }
        }
        None => ConnectorTranslation {
            source_type: source_type.to_string(),
            target_type: source_type.to_string(),
            unmapped: true,
            requires_gateway: false,
            source_auth: auth,
            target_auth,
            auth_supported: false,
            credentials,
            confidence: MappingConfidence::Low,
        },
    }
}

/// Builds create-connection request bodies.
pub struct ConnectionPayloadBuilder<'a> {
    overrides: &'a ConnectionOverrides,
    gateway_id: Option<&'a str>,
}

impl<'a> ConnectionPayloadBuilder<'a> {
    pub fn new(overrides: &'a ConnectionOverrides, gateway_id: Option<&'a str>) -> Self {
        Self {
            overrides,
            gateway_id,
        }
    }

    pub fn has_override(&self, name: &str) -> bool {
        self.overrides.contains_key(name)
    }

    pub fn build(
        &self,
        name: &str,
        definition: &ConnectionDefinition,
        translation: &ConnectorTranslation,
    ) -> Value {
        let parameters: Vec<Value> = definition
            .type_properties
            .iter()
            .filter(|(key, _)| !CREDENTIAL_FIELDS.contains(&key.as_str()))
            .filter_map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => Value::String(s.clone()),
                    Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
                    _ => return None,
                };
                Some(json!({"dataType": "Text", "name": key, "value": rendered}))
            })
            .collect();

        let mut credentials = translation.credentials.clone();
        credentials.insert(
            "credentialType".to_string(),
            Value::String(
                translation
                    .target_auth
                    .map(|c| c.as_str())
                    .unwrap_or("Anonymous")
                    .to_string(),
            ),
        );

        let connectivity = if translation.requires_gateway {
            "OnPremisesGateway"
        } else {
            "ShareableCloud"
        };
        let mut payload = json!({
            "displayName": name,
            "connectivityType": connectivity,
            "privacyLevel": "Organizational",
            "connectionDetails": {
                "type": translation.target_type,
                "creationMethod": format!("{}.Actions", translation.target_type),
                "parameters": parameters,
            },
            "credentialDetails": {
                "singleSignOnType": "None",
                "connectionEncryption": "NotEncrypted",
                "skipTestConnection": false,
                "credentials": credentials,
            },
        });

        if translation.requires_gateway {
            if let (Some(gateway), Some(obj)) = (self.gateway_id, payload.as_object_mut()) {
                obj.insert("gatewayId".to_string(), Value::String(gateway.to_string()));
            }
        }

        if let Some(patch) = self.overrides.get(name) {
            deep_merge(&mut payload, patch);
        }
        payload
    }
}

/// Recursively merge `patch` into `target`; objects merge, everything else replaces.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => {
            *slot = value.clone();
        }
    }
}

/// What the deployment does with one source connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionAction {
    /// Create a new target connection from the inferred payload.
    Create,
    /// Already mapped to an existing target connection by configuration.
    Existing,
    /// Unmapped type without an override; nothing is created.
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionPlan {
    pub name: String,
    pub action: ConnectionAction,
    pub translation: ConnectorTranslation,
    #[serde(skip)]
    pub payload: Option<Value>,
}

/// Translate every typed connection in the template, sorted by name.
pub fn plan_connections(
    template: &ParsedTemplate,
    builder: &ConnectionPayloadBuilder<'_>,
    existing: &BTreeMap<String, String>,
    diagnostics: &mut Diagnostics,
) -> Vec<ConnectionPlan> {
    let mut plans = Vec::new();
    for component in template.of_kind(ComponentKind::Connection) {
        let ComponentPayload::Connection(definition) = &component.payload else {
            continue;
        };
        let translation =
            translate_connector(&definition.connector_type, &definition.type_properties);
        let name = component.name.clone();

        if translation.unmapped {
            diagnostics.at(
                name.clone(),
                MigrationIssue::UnmappedConnector {
                    connector_type: definition.connector_type.clone(),
                },
            );
        } else if !translation.auth_supported {
            diagnostics.at(
                name.clone(),
                MigrationIssue::UnsupportedAuthentication {
                    auth: translation.source_auth.to_string(),
                    target_type: translation.target_type.clone(),
                },
            );
        }

        let action = if existing.contains_key(&name) {
            ConnectionAction::Existing
        } else if translation.unmapped && !builder.has_override(&name) {
            ConnectionAction::Skip
        } else {
            ConnectionAction::Create
        };
        if action == ConnectionAction::Create
            && definition.type_properties.contains_key("connectionString")
            && !builder.has_override(&name)
        {
            diagnostics.at(
                name.clone(),
                MigrationIssue::SuppressedField {
                    field: "typeProperties.connectionString".to_string(),
                },
            );
        }
        let payload = (action == ConnectionAction::Create)
            .then(|| builder.build(&name, definition, &translation));
        plans.push(ConnectionPlan {
            name,
            action,
            translation,
            payload,
        });
    }
    plans.sort_by(|a, b| a.name.cmp(&b.name));
    plans
}
