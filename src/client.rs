//! The Noloco client: session handshake, schema cache, and the CRUD/export
//! operation surface.
//!
//! Every operation reads an immutable schema snapshot, synthesizes its
//! document and variable bindings, executes over the project endpoint, and
//! wraps the result. Schema-lookup failures and query-level rejections are
//! treated as a staleness signal: the schema is refreshed synchronously and
//! the operation retried exactly once.

use std::sync::{Arc, RwLock};

use futures_util::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::config::NolocoConfig;
use crate::document::{
    assemble, Operation, PROJECT_API_KEYS_QUERY, PROJECT_DATA_TYPES_QUERY, VALIDATE_API_KEYS_QUERY,
};
use crate::error::{NolocoError, QueryError};
use crate::mutation::derive_args;
use crate::options::{
    annotate, change_where_to_lookup, flatten, has_upload, variables, CollectionOptions,
    FlattenedArgs, TypedValue,
};
use crate::result::{wrap_result, CollectionResult, PaginationCallback, RecordResult};
use crate::schema::Schema;

/// Builder for a [`NolocoClient`].
#[derive(Debug, Clone)]
pub struct NolocoClientBuilder {
    account_api_key: String,
    portal: String,
    config: NolocoConfig,
}

impl NolocoClientBuilder {
    /// Create a builder from an account API key and portal name.
    #[must_use]
    pub fn new(account_api_key: impl Into<String>, portal: impl Into<String>) -> Self {
        Self {
            account_api_key: account_api_key.into(),
            portal: portal.into(),
            config: NolocoConfig::default(),
        }
    }

    /// Override the platform base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Use a full configuration.
    #[must_use]
    pub fn with_config(mut self, config: NolocoConfig) -> Self {
        self.config = config;
        self
    }

    /// Perform the session handshake and open the client.
    ///
    /// Exchanges the account API key for the project API key, validates it,
    /// and fetches the initial schema description.
    pub async fn connect(self) -> Result<NolocoClient, NolocoError> {
        let account_url = self.config.base_url.trim_end_matches('/').to_string();
        let account_http = http_client(&self.account_api_key, &self.config)?;

        let portal = self.portal.clone();
        let keys = execute_document(
            &account_http,
            &account_url,
            PROJECT_API_KEYS_QUERY,
            json!({ "projectId": portal }),
        )
        .await
        .map_err(|err| match err {
            NolocoError::Query { errors } => NolocoError::AccountApiKey {
                portal: portal.clone(),
                message: first_message(&errors),
            },
            other => other,
        })?;

        let project_token =
            string_at(&keys, "/project/apiKeys/project").ok_or_else(|| {
                NolocoError::AccountApiKey {
                    portal: portal.clone(),
                    message: "project API key missing from response".to_string(),
                }
            })?;
        let project_id = string_at(&keys, "/project/id").ok_or_else(|| NolocoError::Protocol {
            message: "project id missing from response".to_string(),
        })?;

        let validated = execute_document(
            &account_http,
            &account_url,
            VALIDATE_API_KEYS_QUERY,
            json!({ "projectToken": project_token }),
        )
        .await
        .map_err(|err| match err {
            NolocoError::Query { errors } => NolocoError::ProjectApiKey {
                portal: portal.clone(),
                message: first_message(&errors),
            },
            other => other,
        })?;
        let user_id = string_at(&validated, "/validateApiKeys/user/id").ok_or_else(|| {
            NolocoError::ProjectApiKey {
                portal: portal.clone(),
                message: "user id missing from validation response".to_string(),
            }
        })?;

        let project_http = http_client(&project_token, &self.config)?;
        let project_url = format!("{account_url}/data/{portal}");

        let schema = fetch_schema(&account_http, &account_url, &portal).await?;
        debug!(portal = %portal, data_types = schema.data_types.len(), "connected");

        Ok(NolocoClient {
            inner: Arc::new(ClientInner {
                portal,
                project_id,
                user_id,
                account_http,
                account_url,
                project_http,
                project_url,
                schema: RwLock::new(Arc::new(schema)),
            }),
        })
    }
}

/// Client for one Noloco portal.
#[derive(Debug, Clone)]
pub struct NolocoClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    portal: String,
    project_id: String,
    user_id: String,
    account_http: reqwest::Client,
    account_url: String,
    project_http: reqwest::Client,
    project_url: String,
    schema: RwLock<Arc<Schema>>,
}

impl NolocoClient {
    /// Connect with the default configuration.
    pub async fn connect(
        account_api_key: impl Into<String>,
        portal: impl Into<String>,
    ) -> Result<Self, NolocoError> {
        NolocoClientBuilder::new(account_api_key, portal).connect().await
    }

    /// The portal this client is connected to.
    #[must_use]
    pub fn portal(&self) -> &str {
        &self.inner.portal
    }

    /// The project's identifier.
    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// The authenticated user's identifier.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// The current schema snapshot.
    pub fn schema(&self) -> Result<Arc<Schema>, NolocoError> {
        self.inner
            .schema
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| NolocoError::Protocol {
                message: "schema lock poisoned".to_string(),
            })
    }

    /// Re-fetch the schema description, replacing the cached snapshot.
    pub async fn refresh_schema(&self) -> Result<(), NolocoError> {
        let schema = fetch_schema(
            &self.inner.account_http,
            &self.inner.account_url,
            &self.inner.portal,
        )
        .await?;
        let mut guard = self.inner.schema.write().map_err(|_| NolocoError::Protocol {
            message: "schema lock poisoned".to_string(),
        })?;
        *guard = Arc::new(schema);
        Ok(())
    }

    /// Fetch a single record.
    ///
    /// `options.filter` must be a single-field `equals` predicate, which is
    /// rewritten into a direct lookup argument. Returns `None` when no
    /// record matches.
    #[instrument(skip(self, options))]
    pub async fn get(
        &self,
        data_type_name: &str,
        options: CollectionOptions,
    ) -> Result<Option<RecordResult>, NolocoError> {
        let raw = self
            .run(Operation::Get, data_type_name, &options, None, None)
            .await?;
        if raw.is_null() {
            return Ok(None);
        }
        let callback = self.pagination_callback(Operation::Get, data_type_name.to_string());
        Ok(wrap_result(raw, &options, Some(callback))?.into_record())
    }

    /// Query a collection.
    #[instrument(skip(self, options))]
    pub async fn find(
        &self,
        data_type_name: &str,
        options: CollectionOptions,
    ) -> Result<CollectionResult, NolocoError> {
        let raw = self
            .run(Operation::Find, data_type_name, &options, None, None)
            .await?;
        let callback = self.pagination_callback(Operation::Find, data_type_name.to_string());
        wrap_result(raw, &options, Some(callback))?
            .into_collection()
            .ok_or_else(|| NolocoError::Protocol {
                message: format!("{data_type_name} collection result is not a collection"),
            })
    }

    /// Create a record. `value` must be an object mapping field names to
    /// values, `connect` objects, or upload file paths.
    #[instrument(skip(self, value, options))]
    pub async fn create(
        &self,
        data_type_name: &str,
        value: Value,
        options: CollectionOptions,
    ) -> Result<Option<RecordResult>, NolocoError> {
        let value_map = mutation_value(value)?;
        let raw = self
            .run(Operation::Create, data_type_name, &options, Some(&value_map), None)
            .await?;
        self.wrap_mutation(raw, &options)
    }

    /// Update a record by id.
    #[instrument(skip(self, id, value, options))]
    pub async fn update(
        &self,
        data_type_name: &str,
        id: impl Into<Value>,
        value: Value,
        options: CollectionOptions,
    ) -> Result<Option<RecordResult>, NolocoError> {
        let value_map = mutation_value(value)?;
        let id = id.into();
        let raw = self
            .run(
                Operation::Update,
                data_type_name,
                &options,
                Some(&value_map),
                Some(&id),
            )
            .await?;
        self.wrap_mutation(raw, &options)
    }

    /// Delete a record by id.
    #[instrument(skip(self, id, options))]
    pub async fn delete(
        &self,
        data_type_name: &str,
        id: impl Into<Value>,
        options: CollectionOptions,
    ) -> Result<Option<RecordResult>, NolocoError> {
        let id = id.into();
        let raw = self
            .run(Operation::Delete, data_type_name, &options, None, Some(&id))
            .await?;
        self.wrap_mutation(raw, &options)
    }

    /// Export a collection as a base64-encoded CSV.
    #[instrument(skip(self, options))]
    pub async fn export_csv(
        &self,
        data_type_name: &str,
        options: CollectionOptions,
    ) -> Result<String, NolocoError> {
        let raw = self
            .run(Operation::ExportCsv, data_type_name, &options, None, None)
            .await?;
        raw.pointer("/base64")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| NolocoError::Protocol {
                message: format!("{data_type_name} CSV export returned no base64 payload"),
            })
    }

    fn wrap_mutation(
        &self,
        raw: Value,
        options: &CollectionOptions,
    ) -> Result<Option<RecordResult>, NolocoError> {
        if raw.is_null() {
            return Ok(None);
        }
        Ok(wrap_result(raw, options, None)?.into_record())
    }

    fn pagination_callback(&self, operation: Operation, data_type_name: String) -> PaginationCallback {
        let client = self.clone();
        Arc::new(move |options: CollectionOptions| {
            let client = client.clone();
            let data_type_name = data_type_name.clone();
            async move {
                let raw = client
                    .run(operation, &data_type_name, &options, None, None)
                    .await?;
                let callback = client.pagination_callback(operation, data_type_name);
                wrap_result(raw, &options, Some(callback))
            }
            .boxed()
        })
    }

    /// Synthesize and execute, with the one-shot stale-schema retry.
    async fn run(
        &self,
        operation: Operation,
        data_type_name: &str,
        options: &CollectionOptions,
        value: Option<&serde_json::Map<String, Value>>,
        record_id: Option<&Value>,
    ) -> Result<Value, NolocoError> {
        match self
            .run_once(operation, data_type_name, options, value, record_id)
            .await
        {
            Ok(raw) => Ok(raw),
            Err(err) if err.is_schema_stale() => {
                warn!(error = %err, "schema may be stale, refreshing and retrying once");
                self.refresh_schema().await?;
                self.run_once(operation, data_type_name, options, value, record_id)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    async fn run_once(
        &self,
        operation: Operation,
        data_type_name: &str,
        options: &CollectionOptions,
        value: Option<&serde_json::Map<String, Value>>,
        record_id: Option<&Value>,
    ) -> Result<Value, NolocoError> {
        let schema = self.schema()?;
        let synthesized = synthesize(&schema, operation, data_type_name, options, value, record_id)?;
        debug!(
            data_type = data_type_name,
            result_name = %synthesized.result_name,
            "synthesized document"
        );

        let data = if has_upload(&synthesized.flat) {
            execute_upload(
                &self.inner.project_http,
                &self.inner.project_url,
                &synthesized.document,
                &synthesized.flat,
            )
            .await?
        } else {
            execute_document(
                &self.inner.project_http,
                &self.inner.project_url,
                &synthesized.document,
                Value::Object(variables(&synthesized.flat)),
            )
            .await?
        };

        Ok(data.get(&synthesized.result_name).cloned().unwrap_or(Value::Null))
    }
}

#[derive(Debug)]
struct Synthesized {
    document: String,
    flat: FlattenedArgs,
    result_name: String,
}

/// Pure document synthesis for one operation against a schema snapshot.
fn synthesize(
    schema: &Schema,
    operation: Operation,
    data_type_name: &str,
    options: &CollectionOptions,
    value: Option<&serde_json::Map<String, Value>>,
    record_id: Option<&Value>,
) -> Result<Synthesized, NolocoError> {
    let data_type = schema.data_type(data_type_name)?;
    let mut typed = annotate(data_type, schema, options)?;

    if operation == Operation::Get {
        change_where_to_lookup(data_type, &mut typed, "ID")?;
    }
    if let Some(value_map) = value {
        let args = derive_args(data_type, schema, value_map)?;
        typed.args.extend(args);
    }
    if let Some(id) = record_id {
        typed
            .args
            .insert("id".to_string(), TypedValue::new("ID!", id.clone()));
    }

    let result_name = operation.result_name(data_type_name);
    let flat = flatten(&result_name, &typed);
    let document = assemble(operation, data_type, schema, &typed, &flat)?;

    Ok(Synthesized {
        document,
        flat,
        result_name,
    })
}

fn mutation_value(value: Value) -> Result<serde_json::Map<String, Value>, NolocoError> {
    value.as_object().cloned().ok_or_else(|| NolocoError::Protocol {
        message: "mutation value must be an object".to_string(),
    })
}

fn http_client(token: &str, config: &NolocoConfig) -> Result<reqwest::Client, NolocoError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let value = HeaderValue::from_str(token).map_err(|_| NolocoError::Protocol {
        message: "API key is not a valid header value".to_string(),
    })?;
    headers.insert(AUTHORIZATION, value);
    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()?)
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<QueryError>,
}

async fn execute_document(
    http: &reqwest::Client,
    url: &str,
    document: &str,
    variables: Value,
) -> Result<Value, NolocoError> {
    let body = json!({ "query": document, "variables": variables });
    debug!(%url, "executing document");
    let response = http.post(url).json(&body).send().await?;
    parse_response(response).await
}

/// Execute a document whose variables carry uploads, as a multipart form:
/// an `operations` part with upload variables nulled, a `map` part binding
/// file parts into the variables, and one part per file.
async fn execute_upload(
    http: &reqwest::Client,
    url: &str,
    document: &str,
    flat: &FlattenedArgs,
) -> Result<Value, NolocoError> {
    let mut bound = variables(flat);
    let mut map = serde_json::Map::new();
    let mut files = Vec::new();
    for (name, arg) in flat {
        if !arg.gql_type.starts_with("Upload") {
            continue;
        }
        let Some(path) = arg.value.as_str() else {
            return Err(NolocoError::Protocol {
                message: format!("upload argument {name} must be a file path"),
            });
        };
        let index = files.len().to_string();
        bound.insert(name.clone(), Value::Null);
        map.insert(index.clone(), json!([format!("variables.{name}")]));
        files.push((index, path.to_string()));
    }

    let operations = json!({ "query": document, "variables": Value::Object(bound) });
    let mut form = reqwest::multipart::Form::new()
        .text("operations", operations.to_string())
        .text("map", Value::Object(map).to_string());
    for (index, path) in files {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| NolocoError::Upload {
                path: path.clone(),
                message: err.to_string(),
            })?;
        let file_name = std::path::Path::new(&path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();
        form = form.part(index, reqwest::multipart::Part::bytes(bytes).file_name(file_name));
    }

    debug!(%url, "executing upload document");
    let response = http.post(url).multipart(form).send().await?;
    parse_response(response).await
}

async fn parse_response(response: reqwest::Response) -> Result<Value, NolocoError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(NolocoError::HttpStatus {
            status: status.as_u16(),
            body: truncate_body(&bytes),
        });
    }
    let parsed: GraphqlResponse = serde_json::from_slice(&bytes)?;
    if !parsed.errors.is_empty() {
        return Err(NolocoError::Query {
            errors: parsed.errors,
        });
    }
    parsed.data.ok_or_else(|| NolocoError::Protocol {
        message: "response carried no data".to_string(),
    })
}

async fn fetch_schema(
    http: &reqwest::Client,
    url: &str,
    portal: &str,
) -> Result<Schema, NolocoError> {
    let data = execute_document(
        http,
        url,
        PROJECT_DATA_TYPES_QUERY,
        json!({ "projectId": portal }),
    )
    .await?;
    let data_types = data
        .pointer("/project/dataTypes")
        .cloned()
        .ok_or_else(|| NolocoError::Protocol {
            message: "schema response carried no data types".to_string(),
        })?;
    Ok(Schema::new(serde_json::from_value(data_types)?))
}

fn first_message(errors: &[QueryError]) -> String {
    errors
        .first()
        .map_or_else(|| "unknown error".to_string(), |err| err.message.clone())
}

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    const MAX_LEN: usize = 4096;
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if body.len() > MAX_LEN {
        body.truncate(MAX_LEN);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::{DataField, DataType, FieldType, RelationshipKind};

    fn schema() -> Schema {
        Schema::new(vec![
            DataType {
                name: "user".to_string(),
                fields: vec![
                    DataField {
                        name: "id".to_string(),
                        field_type: FieldType::Integer,
                        required: false,
                        unique: true,
                        relationship: None,
                        reverse_name: None,
                    },
                    DataField {
                        name: "email".to_string(),
                        field_type: FieldType::Text,
                        required: true,
                        unique: true,
                        relationship: None,
                        reverse_name: None,
                    },
                    DataField {
                        name: "company".to_string(),
                        field_type: FieldType::DataType("company".to_string()),
                        required: false,
                        unique: false,
                        relationship: Some(RelationshipKind::ManyToOne),
                        reverse_name: Some("employees".to_string()),
                    },
                ],
            },
            DataType {
                name: "company".to_string(),
                fields: vec![DataField {
                    name: "name".to_string(),
                    field_type: FieldType::Text,
                    required: false,
                    unique: false,
                    relationship: None,
                    reverse_name: None,
                }],
            },
        ])
    }

    #[test]
    fn synthesize_get_rewrites_where_into_lookup() {
        let schema = schema();
        let options = CollectionOptions::new().with_filter(json!({"id": {"equals": 7}}));

        let synthesized =
            synthesize(&schema, Operation::Get, "user", &options, None, None).expect("synthesized");

        assert_eq!(synthesized.result_name, "user");
        assert!(synthesized.document.contains("user(id: $user_id)"));
        assert_eq!(synthesized.flat["user_id"].gql_type, "ID");
        assert_eq!(synthesized.flat["user_id"].value, json!(7));
    }

    #[test]
    fn synthesize_update_appends_id_after_value_args() {
        let schema = schema();
        let value = json!({"email": "jane@noloco.io", "company": {"connect": {"id": 2}}});
        let value_map = value.as_object().cloned().expect("object");
        let id = json!(5);

        let synthesized = synthesize(
            &schema,
            Operation::Update,
            "user",
            &CollectionOptions::new(),
            Some(&value_map),
            Some(&id),
        )
        .expect("synthesized");

        let keys: Vec<&String> = synthesized.flat.keys().collect();
        assert_eq!(
            keys,
            ["updateUser_email", "updateUser_companyId", "updateUser_id"]
        );
        assert_eq!(synthesized.flat["updateUser_id"].gql_type, "ID!");
        assert!(synthesized.document.starts_with(
            "mutation($updateUser_email: String!, $updateUser_companyId: ID, $updateUser_id: ID!)"
        ));
    }

    #[test]
    fn synthesize_unknown_data_type_is_stale_class() {
        let schema = schema();
        let err = synthesize(
            &schema,
            Operation::Find,
            "missing",
            &CollectionOptions::new(),
            None,
            None,
        )
        .expect_err("unknown type");
        assert!(err.is_schema_stale());
    }
}
