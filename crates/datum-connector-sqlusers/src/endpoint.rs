//! The SQL Server login/user connector.
//!
//! One engine object maps to up to three native entities: a server login,
//! an optional database user linked to it, and that user's role
//! memberships. Creation runs the sequence login → user → roles →
//! disable; deletion reverses it (user before login). A statement
//! rejected mid-sequence aborts the remainder without becoming an error,
//! so the orchestrator can move on to the next object.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use datum_connector::{
    AttributeDiff, DiffAction, DiffEntry, EndpointAdapter, EndpointConfig, EndpointKind,
    EndpointObject, EndpointType, ObjectStream, TransformedQuery,
};
use datum_core::{Query, SyncError, SyncResult};

use crate::wrapper::SqlWrapper;

/// Attributes this connector manages; everything else in a diff is
/// dropped by [`SqlUserEndpoint::get_diff`].
const MANAGED_ATTRIBUTES: &[&str] = &["loginName", "sqlName", "userRoles", "password", "disabled"];

const LOGIN_QUERY: &str = "SELECT sp.name AS loginName, sp.is_disabled AS disabled, \
     dp.name AS sqlName \
     FROM sys.server_principals sp \
     LEFT JOIN sys.database_principals dp ON sp.sid = dp.sid \
     WHERE sp.type IN ('S', 'U')";

const PRINCIPAL_QUERY: &str = "SELECT principal_id FROM sys.server_principals WHERE name = ?";

/// [`EndpointAdapter`] for SQL Server logins and database users.
pub struct SqlUserEndpoint {
    config: EndpointConfig,
    wrapper: Arc<dyn SqlWrapper>,
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn require_str<'a>(data: &'a Map<String, Value>, attribute: &str) -> SyncResult<&'a str> {
    data.get(attribute)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SyncError::attribute_not_resolvable(
                attribute,
                format!("attribute [{attribute}] is required but could not be resolved"),
            )
        })
}

fn external_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a structured query as a parenthesized SQL filter with
/// positionally ordered values.
fn render_filter(query: &Query, values: &mut Vec<Value>) -> String {
    match query {
        Query::Clause(map) => map
            .iter()
            .map(|(field, value)| {
                values.push(value.clone());
                format!("{field}=?")
            })
            .collect::<Vec<_>>()
            .join(" AND "),
        Query::And(groups) => join_groups(groups, " AND ", values),
        Query::Or(groups) => join_groups(groups, " OR ", values),
    }
}

fn join_groups(groups: &[Query], separator: &str, values: &mut Vec<Value>) -> String {
    groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| format!("({})", render_filter(group, values)))
        .collect::<Vec<_>>()
        .join(separator)
}

impl SqlUserEndpoint {
    pub fn new(config: EndpointConfig, wrapper: Arc<dyn SqlWrapper>) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self { config, wrapper })
    }

    /// Execute one statement of a composite sequence.
    ///
    /// Returns `Ok(false)` when the statement was rejected by the server,
    /// signalling the caller to abort the rest of the sequence.
    async fn guarded(&self, sql: &str) -> SyncResult<bool> {
        match self.wrapper.query(sql).await {
            Ok(()) => Ok(true),
            Err(err @ SyncError::Query { .. }) => {
                warn!(endpoint = %self.config.name, error = %err,
                    "statement rejected, aborting sequence");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// The CREATE LOGIN statement for the requested mechanism.
    fn login_statement(&self, data: &Map<String, Value>) -> SyncResult<String> {
        let login = quote_ident(require_str(data, "loginName")?);

        match require_str(data, "mechanism")? {
            "windows" => Ok(format!("CREATE LOGIN {login} FROM WINDOWS")),
            "local" => {
                let password = quote_literal(require_str(data, "password")?);
                let mut sql = format!("CREATE LOGIN {login} WITH PASSWORD = {password}");
                if data.get("hasToChangePwd").and_then(Value::as_bool) != Some(false) {
                    sql.push_str(" MUST_CHANGE, CHECK_EXPIRATION = ON");
                }
                Ok(sql)
            }
            other => Err(SyncError::attribute_not_resolvable(
                "mechanism",
                format!("unknown login mechanism [{other}]"),
            )),
        }
    }

    async fn select_objects(&self, query: &Query) -> SyncResult<Vec<Map<String, Value>>> {
        let transformed = self.transform_query(query)?;
        let sql = if transformed.filter.is_empty() {
            format!("SELECT * FROM ({LOGIN_QUERY}) AS logins")
        } else {
            format!(
                "SELECT * FROM ({LOGIN_QUERY}) AS logins WHERE {}",
                transformed.filter
            )
        };
        self.wrapper.select(&sql, &transformed.values).await
    }

    async fn lookup_principal(&self, login: &str) -> SyncResult<Option<String>> {
        let rows = match self
            .wrapper
            .select(PRINCIPAL_QUERY, &[Value::String(login.to_string())])
            .await
        {
            Ok(rows) => rows,
            Err(err @ SyncError::Query { .. }) => {
                warn!(endpoint = %self.config.name, error = %err, "principal lookup rejected");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        Ok(rows
            .first()
            .and_then(|row| row.get("principal_id"))
            .map(external_key))
    }
}

#[async_trait]
impl EndpointAdapter for SqlUserEndpoint {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::SqlUsers
    }

    fn endpoint_type(&self) -> EndpointType {
        self.config.endpoint_type
    }

    fn identifier(&self) -> &str {
        &self.config.identifier
    }

    async fn setup(&self, _simulate: bool) -> SyncResult<()> {
        debug!(endpoint = %self.config.name, id = %self.config.id, "connecting");
        self.wrapper.connect().await
    }

    async fn shutdown(&self, _simulate: bool) -> SyncResult<()> {
        self.wrapper.disconnect().await
    }

    async fn count(&self, query: &Query) -> SyncResult<u64> {
        let transformed = self.transform_query(query)?;
        let sql = if transformed.filter.is_empty() {
            format!("SELECT COUNT(*) AS count FROM ({LOGIN_QUERY}) AS logins")
        } else {
            format!(
                "SELECT COUNT(*) AS count FROM ({LOGIN_QUERY}) AS logins WHERE {}",
                transformed.filter
            )
        };
        let rows = self.wrapper.select(&sql, &transformed.values).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn get_one(&self, query: &Query) -> SyncResult<EndpointObject> {
        let mut rows = self.select_objects(query).await?;

        if rows.is_empty() {
            return Err(SyncError::not_found(format!(
                "no login found with filter {} on endpoint [{}]",
                query.to_value(),
                self.config.name
            )));
        }
        if rows.len() > 1 {
            return Err(SyncError::multiple_found(format!(
                "multiple logins found with filter {} on endpoint [{}]",
                query.to_value(),
                self.config.name
            )));
        }

        Ok(EndpointObject::new(rows.remove(0)))
    }

    async fn get_all(&self, query: &Query) -> SyncResult<ObjectStream> {
        let rows = self.select_objects(query).await?;
        let objects: Vec<SyncResult<EndpointObject>> =
            rows.into_iter().map(|row| Ok(EndpointObject::new(row))).collect();
        Ok(Box::pin(stream::iter(objects)))
    }

    fn transform_query(&self, query: &Query) -> SyncResult<TransformedQuery> {
        let mut values = Vec::new();
        let filter = render_filter(query, &mut values);
        Ok(TransformedQuery { filter, values })
    }

    fn get_diff(&self, diff: &AttributeDiff) -> SyncResult<Vec<DiffEntry>> {
        Ok(diff
            .iter()
            .filter(|(attribute, _)| MANAGED_ATTRIBUTES.contains(&attribute.as_str()))
            .map(|(attribute, action)| DiffEntry {
                attribute: attribute.clone(),
                data: action.clone(),
            })
            .collect())
    }

    async fn create(
        &self,
        object: &EndpointObject,
        simulate: bool,
    ) -> SyncResult<Option<String>> {
        let data = &object.data;
        let login = require_str(data, "loginName")?;
        let statement = self.login_statement(data)?;

        debug!(endpoint = %self.config.name, login, "create login");

        if simulate {
            return Ok(None);
        }

        if !self.guarded(&statement).await? {
            return Ok(None);
        }

        let sql_name = data.get("sqlName").and_then(Value::as_str);
        if let Some(user) = sql_name {
            let sql = format!(
                "CREATE USER {} FOR LOGIN {}",
                quote_ident(user),
                quote_ident(login)
            );
            if !self.guarded(&sql).await? {
                return Ok(None);
            }

            if let Some(roles) = data.get("userRoles").and_then(Value::as_array) {
                for role in roles.iter().filter_map(Value::as_str) {
                    let sql = format!("EXEC sp_addrolemember {role}, {}", quote_ident(user));
                    if !self.guarded(&sql).await? {
                        return Ok(None);
                    }
                }
            }
        }

        if data.get("disabled").and_then(Value::as_bool) == Some(true) {
            let sql = format!("ALTER LOGIN {} DISABLE", quote_ident(login));
            if !self.guarded(&sql).await? {
                return Ok(None);
            }
        }

        self.lookup_principal(login).await
    }

    async fn update(
        &self,
        query: &Query,
        diff: Vec<DiffEntry>,
        simulate: bool,
    ) -> SyncResult<()> {
        let current = self.get_one(query).await?;
        let login = require_str(&current.data, "loginName")?.to_string();
        let current_user = current
            .data
            .get("sqlName")
            .and_then(Value::as_str)
            .map(str::to_string);

        for entry in diff {
            let statements: Vec<String> = match (entry.attribute.as_str(), &entry.data) {
                ("loginName", DiffAction::Set(value)) => {
                    let new = value.as_str().ok_or_else(|| {
                        SyncError::validation("loginName must be a string")
                    })?;
                    vec![format!(
                        "ALTER LOGIN {} WITH NAME = {}",
                        quote_ident(&login),
                        quote_ident(new)
                    )]
                }
                ("sqlName", DiffAction::Set(value)) => {
                    let new = value.as_str().ok_or_else(|| {
                        SyncError::validation("sqlName must be a string")
                    })?;
                    match &current_user {
                        Some(old) => vec![format!(
                            "ALTER USER {} WITH NAME = {}",
                            quote_ident(old),
                            quote_ident(new)
                        )],
                        None => vec![format!(
                            "CREATE USER {} FOR LOGIN {}",
                            quote_ident(new),
                            quote_ident(&login)
                        )],
                    }
                }
                ("sqlName", DiffAction::Unset) => match &current_user {
                    Some(old) => vec![format!("DROP USER {}", quote_ident(old))],
                    None => Vec::new(),
                },
                ("userRoles", DiffAction::Set(value)) => {
                    let Some(user) = &current_user else {
                        warn!(endpoint = %self.config.name, login,
                            "cannot assign roles without a database user");
                        continue;
                    };
                    value
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(Value::as_str)
                        .map(|role| format!("EXEC sp_addrolemember {role}, {}", quote_ident(user)))
                        .collect()
                }
                ("password", DiffAction::Set(value)) => {
                    let password = value.as_str().ok_or_else(|| {
                        SyncError::validation("password must be a string")
                    })?;
                    vec![format!(
                        "ALTER LOGIN {} WITH PASSWORD = {}",
                        quote_ident(&login),
                        quote_literal(password)
                    )]
                }
                ("disabled", DiffAction::Set(Value::Bool(true))) => {
                    vec![format!("ALTER LOGIN {} DISABLE", quote_ident(&login))]
                }
                ("disabled", DiffAction::Set(_)) | ("disabled", DiffAction::Unset) => {
                    vec![format!("ALTER LOGIN {} ENABLE", quote_ident(&login))]
                }
                (attribute, _) => {
                    debug!(endpoint = %self.config.name, attribute, "skipping unmanaged attribute");
                    Vec::new()
                }
            };

            for sql in statements {
                if !simulate {
                    self.wrapper.query(&sql).await?;
                }
            }
        }
        Ok(())
    }

    async fn disable(&self, query: &Query, simulate: bool) -> SyncResult<()> {
        let current = self.get_one(query).await?;
        let login = require_str(&current.data, "loginName")?;
        if !simulate {
            self.wrapper
                .query(&format!("ALTER LOGIN {} DISABLE", quote_ident(login)))
                .await?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        _query: &Query,
        object: &EndpointObject,
        simulate: bool,
    ) -> SyncResult<bool> {
        let login = require_str(&object.data, "loginName")?;

        debug!(endpoint = %self.config.name, login, "delete login");

        if simulate {
            return Ok(true);
        }

        // Drop the dependent database user before the login itself.
        if let Some(user) = object.data.get("sqlName").and_then(Value::as_str) {
            if !self.guarded(&format!("DROP USER {}", quote_ident(user))).await? {
                return Ok(false);
            }
        }
        if !self
            .guarded(&format!("DROP LOGIN {}", quote_ident(login)))
            .await?
        {
            return Ok(false);
        }
        Ok(true)
    }
}
