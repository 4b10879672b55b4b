//! Catalog discovery.
//!
//! Read-only introspection of PostgreSQL system catalogs. Each operation
//! opens its own connection through the [`ConnectionProvider`] and returns
//! a fresh snapshot; nothing is cached between calls. The catalog filters
//! below are the compatibility contract with other implementations, so
//! they must stay exactly as written.

use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::Row;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{cancellable, ConnectionProvider, MAINTENANCE_DATABASE};
use crate::error::{PreflightError, Result};
use crate::model::{
    DatabaseInfo, ExtensionInfo, PartitionInfo, RoleInfo, SequenceInfo, SyncStatus, TableInfo,
};

/// What `pg_roles` shows instead of a password hash to non-superusers.
const MASKED_PASSWORD: &str = "********";

/// Catalog reads the conflict and extension checks depend on.
///
/// [`SchemaDiscovery`] implements this against live servers.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// User databases on an instance.
    async fn discover_databases(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>>;

    /// Roles on an instance, without the reserved `pg_` roles.
    async fn discover_roles(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RoleInfo>>;

    /// Extensions installed in one database.
    async fn discover_extensions(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtensionInfo>>;

    /// Extensions the instance could install (`pg_available_extensions`).
    async fn available_extensions(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Backends connected to `database`, not counting the caller.
    async fn count_active_connections(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<i64>;
}

/// Discovers schema objects on live PostgreSQL instances.
#[derive(Clone)]
pub struct SchemaDiscovery {
    connections: ConnectionProvider,
}

impl SchemaDiscovery {
    pub fn new(connections: ConnectionProvider) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &ConnectionProvider {
        &self.connections
    }

    /// User databases with owner and encoding.
    pub async fn discover_databases(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>> {
        info!("Discovering databases on {}", instance);

        let conn = self
            .connections
            .connect(instance, Some(MAINTENANCE_DATABASE), cancel)
            .await?;

        let query = r#"
            SELECT
                d.datname,
                pg_catalog.pg_get_userbyid(d.datdba) as owner,
                pg_catalog.pg_encoding_to_char(d.encoding) as encoding
            FROM pg_catalog.pg_database d
            WHERE d.datistemplate = false
            AND d.datname NOT IN ('postgres', 'template0', 'template1')
            ORDER BY d.datname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let databases = rows
            .iter()
            .map(database_from_row)
            .collect::<Result<Vec<_>>>()?;

        info!("Discovered {} databases on {}", databases.len(), instance);
        Ok(databases)
    }

    /// Regular and partitioned tables outside the system schemas.
    pub async fn discover_tables(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<TableInfo>> {
        info!("Discovering tables in {} on {}", database, instance);

        let conn = self.connections.connect(instance, Some(database), cancel).await?;

        let query = r#"
            SELECT
                n.nspname as schema_name,
                c.relname as table_name,
                c.relkind = 'p' as is_partitioned,
                c.reltuples::bigint as estimated_rows
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
            AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
            ORDER BY n.nspname, c.relname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let tables = rows.iter().map(table_from_row).collect::<Result<Vec<_>>>()?;

        info!("Discovered {} tables in {}", tables.len(), database);
        Ok(tables)
    }

    /// Child partitions of `schema.table`.
    pub async fn discover_partitions(
        &self,
        instance: &str,
        database: &str,
        schema: &str,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PartitionInfo>> {
        debug!(
            "Discovering partitions for {}.{} in {} on {}",
            schema, table, database, instance
        );

        let conn = self.connections.connect(instance, Some(database), cancel).await?;

        let query = r#"
            SELECT
                n.nspname as partition_schema,
                c.relname as partition_name,
                pn.nspname || '.' || pc.relname as parent_table,
                p.partstrat::text as partition_strategy,
                pg_get_expr(c.relpartbound, c.oid) as partition_expression,
                c.reltuples::bigint as estimated_rows
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_inherits i ON i.inhrelid = c.oid
            JOIN pg_catalog.pg_class pc ON pc.oid = i.inhparent
            JOIN pg_catalog.pg_namespace pn ON pn.oid = pc.relnamespace
            LEFT JOIN pg_catalog.pg_partitioned_table p ON p.partrelid = pc.oid
            WHERE pn.nspname = $1
            AND pc.relname = $2
            ORDER BY c.relname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[&schema, &table])).await?;
        let partitions = rows
            .iter()
            .map(partition_from_row)
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Discovered {} partitions for {}.{}",
            partitions.len(),
            schema,
            table
        );
        Ok(partitions)
    }

    /// Sequences outside the system schemas, with their source-side value.
    pub async fn discover_sequences(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SequenceInfo>> {
        info!("Discovering sequences in {} on {}", database, instance);

        let conn = self.connections.connect(instance, Some(database), cancel).await?;
        let rows = cancellable(cancel, conn.query(SEQUENCES_QUERY, &[])).await?;
        let sequences = rows
            .iter()
            .map(sequence_from_row)
            .collect::<Result<Vec<_>>>()?;

        info!("Discovered {} sequences in {}", sequences.len(), database);
        Ok(sequences)
    }

    /// Login and group roles, excluding the reserved `pg_` roles.
    pub async fn discover_roles(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RoleInfo>> {
        info!("Discovering roles on {}", instance);

        let conn = self
            .connections
            .connect(instance, Some(MAINTENANCE_DATABASE), cancel)
            .await?;

        let query = r#"
            SELECT
                rolname,
                rolsuper,
                rolcanlogin,
                rolpassword
            FROM pg_catalog.pg_roles
            WHERE rolname NOT LIKE 'pg_%'
            ORDER BY rolname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let roles = rows.iter().map(role_from_row).collect::<Result<Vec<_>>>()?;

        info!("Discovered {} roles on {}", roles.len(), instance);
        Ok(roles)
    }

    /// Extensions installed in `database`.
    pub async fn discover_extensions(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtensionInfo>> {
        info!("Discovering extensions in {} on {}", database, instance);

        let conn = self.connections.connect(instance, Some(database), cancel).await?;

        let query = r#"
            SELECT
                e.extname,
                e.extversion,
                n.nspname
            FROM pg_catalog.pg_extension e
            JOIN pg_catalog.pg_namespace n ON n.oid = e.extnamespace
            ORDER BY e.extname
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let extensions = rows
            .iter()
            .map(extension_from_row)
            .collect::<Result<Vec<_>>>()?;

        info!("Discovered {} extensions in {}", extensions.len(), database);
        Ok(extensions)
    }

    /// Extension names the instance could install.
    pub async fn available_extensions(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        debug!("Getting available extensions on {}", instance);

        let conn = self
            .connections
            .connect(instance, Some(MAINTENANCE_DATABASE), cancel)
            .await?;

        let query = r#"
            SELECT name
            FROM pg_available_extensions
            ORDER BY name
        "#;

        let rows = cancellable(cancel, conn.query(query, &[])).await?;
        let extensions = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(
            "Found {} available extensions on {}",
            extensions.len(),
            instance
        );
        Ok(extensions)
    }

    /// Other backends connected to `database`.
    pub async fn count_active_connections(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let conn = self
            .connections
            .connect(instance, Some(MAINTENANCE_DATABASE), cancel)
            .await?;

        let query = r#"
            SELECT count(*)
            FROM pg_stat_activity
            WHERE datname = $1
            AND pid <> pg_backend_pid()
        "#;

        let row = cancellable(cancel, conn.query_one(query, &[&database])).await?;
        let count: i64 = row.try_get(0)?;

        debug!(
            "{} active connections to {} on {}",
            count, database, instance
        );
        Ok(count)
    }

    /// Every user database with its tables (partitions included), sequences
    /// and extensions.
    ///
    /// Each nested read is its own query on its own connection, so the tree
    /// is not a consistent snapshot of the instance.
    pub async fn discover_database_tree(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>> {
        let mut databases = self.discover_databases(instance, cancel).await?;
        for database in &mut databases {
            self.populate_database(instance, database, cancel).await?;
        }
        Ok(databases)
    }

    /// One database with its objects.
    pub async fn discover_database(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<DatabaseInfo> {
        let mut found = self
            .discover_databases(instance, cancel)
            .await?
            .into_iter()
            .find(|db| db.name == database)
            .ok_or_else(|| PreflightError::DatabaseNotFound {
                instance: instance.to_string(),
                database: database.to_string(),
            })?;
        self.populate_database(instance, &mut found, cancel).await?;
        Ok(found)
    }

    async fn populate_database(
        &self,
        instance: &str,
        database: &mut DatabaseInfo,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut tables = self.discover_tables(instance, &database.name, cancel).await?;
        for table in tables.iter_mut().filter(|t| t.is_partitioned) {
            table.partitions = self
                .discover_partitions(instance, &database.name, &table.schema, &table.name, cancel)
                .await?;
        }

        database.tables = tables;
        database.sequences = self
            .discover_sequences(instance, &database.name, cancel)
            .await?;
        database.extensions = self
            .discover_extensions(instance, &database.name, cancel)
            .await?;
        database.last_updated = Utc::now();
        Ok(())
    }

    /// Exact row count for one table. Scans the table; use sparingly.
    pub async fn count_table_rows(
        &self,
        instance: &str,
        database: &str,
        table: &mut TableInfo,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let conn = self.connections.connect(instance, Some(database), cancel).await?;

        let query = format!(
            "SELECT count(*) FROM {}.{}",
            quote_ident(&table.schema),
            quote_ident(&table.name)
        );
        let row = cancellable(cancel, conn.query_one(query.as_str(), &[])).await?;
        let count: i64 = row.try_get(0)?;

        debug!("Row count for {}: {}", table.full_name(), count);
        table.actual_row_count = Some(count);
        table.last_updated = Utc::now();
        Ok(count)
    }

    /// Read the destination's current value for sequences discovered on the
    /// source. Sequences missing on the destination keep `None`, and so do
    /// all of them when the database itself is not on the destination yet.
    pub async fn fill_destination_sequence_values(
        &self,
        destination: &str,
        database: &str,
        sequences: &mut [SequenceInfo],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let exists = self
            .discover_databases(destination, cancel)
            .await?
            .iter()
            .any(|db| db.name == database);

        let destination_sequences = if exists {
            self.discover_sequences(destination, database, cancel).await?
        } else {
            debug!(
                "Database {} not on {}, no destination sequence values",
                database, destination
            );
            Vec::new()
        };

        merge_destination_sequence_values(sequences, &destination_sequences);
        Ok(())
    }
}

/// Copy each destination sequence's current value onto the source sequence
/// with the same schema and name.
pub fn merge_destination_sequence_values(
    sequences: &mut [SequenceInfo],
    destination: &[SequenceInfo],
) {
    let now = Utc::now();
    for sequence in sequences.iter_mut() {
        sequence.current_value_destination = destination
            .iter()
            .find(|d| d.schema == sequence.schema && d.name == sequence.name)
            .and_then(|d| d.current_value_source);
        sequence.last_updated = now;
    }
}

#[async_trait]
impl CatalogSource for SchemaDiscovery {
    async fn discover_databases(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatabaseInfo>> {
        SchemaDiscovery::discover_databases(self, instance, cancel).await
    }

    async fn discover_roles(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RoleInfo>> {
        SchemaDiscovery::discover_roles(self, instance, cancel).await
    }

    async fn discover_extensions(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtensionInfo>> {
        SchemaDiscovery::discover_extensions(self, instance, database, cancel).await
    }

    async fn available_extensions(
        &self,
        instance: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        SchemaDiscovery::available_extensions(self, instance, cancel).await
    }

    async fn count_active_connections(
        &self,
        instance: &str,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        SchemaDiscovery::count_active_connections(self, instance, database, cancel).await
    }
}

const SEQUENCES_QUERY: &str = r#"
    SELECT
        n.nspname as schema_name,
        c.relname as sequence_name,
        format_type(s.seqtypid, NULL) as data_type,
        s.seqincrement as increment_by,
        (SELECT last_value FROM pg_catalog.pg_sequences WHERE schemaname = n.nspname AND sequencename = c.relname) as current_value
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_catalog.pg_sequence s ON s.seqrelid = c.oid
    WHERE c.relkind = 'S'
    AND n.nspname NOT IN ('pg_catalog', 'information_schema')
    ORDER BY n.nspname, c.relname
"#;

fn database_from_row(row: &Row) -> Result<DatabaseInfo> {
    let mut database = DatabaseInfo::new(row.try_get::<_, String>(0)?);
    database.owner = row.try_get(1)?;
    database.encoding = row.try_get(2)?;
    Ok(database)
}

fn table_from_row(row: &Row) -> Result<TableInfo> {
    let mut table = TableInfo::new(row.try_get::<_, String>(0)?, row.try_get::<_, String>(1)?);
    table.is_partitioned = row.try_get(2)?;
    table.estimated_row_count = row.try_get(3)?;
    Ok(table)
}

fn partition_from_row(row: &Row) -> Result<PartitionInfo> {
    let strategy: Option<String> = row.try_get(3)?;
    Ok(PartitionInfo {
        schema: row.try_get(0)?,
        name: row.try_get(1)?,
        parent_table: row.try_get(2)?,
        partition_strategy: strategy.map(|s| partition_strategy_name(&s)),
        partition_expression: row.try_get(4)?,
        estimated_row_count: row.try_get(5)?,
        status: SyncStatus::NotStarted,
        last_updated: Utc::now(),
    })
}

fn sequence_from_row(row: &Row) -> Result<SequenceInfo> {
    Ok(SequenceInfo {
        schema: row.try_get(0)?,
        name: row.try_get(1)?,
        data_type: row.try_get(2)?,
        increment_by: row.try_get(3)?,
        current_value_source: row.try_get(4)?,
        current_value_destination: None,
        status: SyncStatus::NotStarted,
        last_updated: Utc::now(),
    })
}

fn role_from_row(row: &Row) -> Result<RoleInfo> {
    let mut role = RoleInfo::new(
        row.try_get::<_, String>(0)?,
        row.try_get(1)?,
        row.try_get(2)?,
    );
    role.password_hash = visible_password(row.try_get(3)?);
    Ok(role)
}

fn extension_from_row(row: &Row) -> Result<ExtensionInfo> {
    let mut extension = ExtensionInfo::new(row.try_get::<_, String>(0)?);
    extension.version = row.try_get(1)?;
    extension.schema = row.try_get(2)?;
    Ok(extension)
}

/// `pg_partitioned_table.partstrat` code to its SQL keyword.
fn partition_strategy_name(code: &str) -> String {
    match code {
        "r" => "RANGE".to_string(),
        "l" => "LIST".to_string(),
        "h" => "HASH".to_string(),
        other => other.to_uppercase(),
    }
}

fn visible_password(raw: Option<String>) -> Option<String> {
    raw.filter(|p| p != MASKED_PASSWORD)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
