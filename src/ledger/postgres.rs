//! Registre PostgreSQL
//!
//! Les tables sont qualifiées par un schéma configurable (`mtm` par défaut).
//! Le nom de schéma est interpolé dans le SQL: il est validé à la construction.

use super::store::{BanStore, LedgerTx};
use crate::error::LedgerError;
use crate::models::{BanRecord, HostIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Postgres, Row, Transaction};
use std::collections::HashSet;
use std::time::Duration;

/// Le nom de schéma doit être un identifiant SQL simple
pub fn is_valid_schema(schema: &str) -> bool {
    let mut chars = schema.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Requêtes préparées une fois par schéma
#[derive(Debug, Clone)]
struct Queries {
    find_host: String,
    find_admin: String,
    insert_host: String,
    ban_exists: String,
    existing_bans: String,
    refresh_ban: String,
    insert_ban: String,
    deactivate_ban: String,
    list_bans: String,
    list_active_bans: String,
}

impl Queries {
    fn new(schema: &str) -> Self {
        let list = format!(
            "SELECT servidor_id::text AS servidor_id, titular::text AS titular, servidor_ip, ip_banido, active, \
             created_at::timestamptz AS created_at, updated_at::timestamptz AS updated_at \
             FROM {s}.banned_ips WHERE servidor_id = $1::uuid",
            s = schema
        );
        Self {
            find_host: format!(
                "SELECT uid::text AS uid, titular::text AS titular, ip, nome FROM {}.servidores WHERE ip = $1 LIMIT 1",
                schema
            ),
            find_admin: format!(
                "SELECT id::text AS id FROM {}.users WHERE role = 'admin' LIMIT 1",
                schema
            ),
            insert_host: format!(
                "INSERT INTO {}.servidores (uid, titular, ip, nome, sistema, created_at) \
                 VALUES ($1::uuid, $2::uuid, $3, $4, 'Linux', NOW()) ON CONFLICT (ip) DO NOTHING",
                schema
            ),
            ban_exists: format!(
                "SELECT EXISTS (SELECT 1 FROM {}.banned_ips WHERE servidor_id = $1::uuid AND ip_banido = $2)",
                schema
            ),
            existing_bans: format!(
                "SELECT ip_banido FROM {}.banned_ips WHERE servidor_id = $1::uuid AND ip_banido = ANY($2)",
                schema
            ),
            refresh_ban: format!(
                "UPDATE {}.banned_ips SET updated_at = NOW(), active = TRUE \
                 WHERE servidor_id = $1::uuid AND ip_banido = $2",
                schema
            ),
            insert_ban: format!(
                "INSERT INTO {}.banned_ips (servidor_id, titular, active, servidor_ip, ip_banido, updated_at) \
                 VALUES ($1::uuid, $2::uuid, TRUE, $3, $4, NOW()) \
                 ON CONFLICT (servidor_id, ip_banido) DO UPDATE SET active = TRUE, updated_at = NOW()",
                schema
            ),
            deactivate_ban: format!(
                "UPDATE {}.banned_ips SET active = FALSE, updated_at = NOW() \
                 WHERE servidor_id = $1::uuid AND ip_banido = $2",
                schema
            ),
            list_active_bans: format!("{} AND active ORDER BY updated_at DESC", list),
            list_bans: format!("{} ORDER BY updated_at DESC", list),
        }
    }
}

fn ban_from_row(row: &PgRow) -> Result<BanRecord, sqlx::Error> {
    Ok(BanRecord {
        host_id: row.try_get("servidor_id")?,
        principal_id: row.try_get("titular")?,
        host_ip: row.try_get("servidor_ip")?,
        address: row.try_get("ip_banido")?,
        active: row.try_get("active")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

async fn refresh<'e, E: PgExecutor<'e>>(
    executor: E,
    sql: &str,
    host_id: &str,
    address: &str,
) -> Result<(), LedgerError> {
    sqlx::query(sql)
        .bind(host_id)
        .bind(address)
        .execute(executor)
        .await
        .map_err(|e| LedgerError::query(format!("mise à jour de l'IP {}", address), e))?;
    Ok(())
}

async fn insert<'e, E: PgExecutor<'e>>(
    executor: E,
    sql: &str,
    host: &HostIdentity,
    address: &str,
) -> Result<(), LedgerError> {
    sqlx::query(sql)
        .bind(&host.host_id)
        .bind(&host.principal_id)
        .bind(&host.outbound_ip)
        .bind(address)
        .execute(executor)
        .await
        .map_err(|e| LedgerError::query(format!("insertion de l'IP {}", address), e))?;
    Ok(())
}

/// Registre adossé à un pool PostgreSQL
#[derive(Debug, Clone)]
pub struct PgBanStore {
    pool: PgPool,
    schema: String,
    queries: Queries,
}

impl PgBanStore {
    /// Ouvre un pool borné: 5 connexions au plus, 2 gardées ouvertes, durée de vie 1 h
    pub async fn connect(dsn: &str, schema: &str) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .min_connections(2)
            .max_lifetime(Duration::from_secs(3600))
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await
            .map_err(LedgerError::Connection)?;
        Self::from_pool(pool, schema)
    }

    pub fn from_pool(pool: PgPool, schema: &str) -> Result<Self, LedgerError> {
        if !is_valid_schema(schema) {
            return Err(LedgerError::Constraint(format!(
                "nom de schéma invalide: {}",
                schema
            )));
        }
        Ok(Self {
            pool,
            schema: schema.to_string(),
            queries: Queries::new(schema),
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Crée les tables manquantes et les contraintes d'unicité dont dépend l'upsert
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        let s = &self.schema;
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", s),
            format!(
                "CREATE TABLE IF NOT EXISTS {}.users (id UUID PRIMARY KEY, role TEXT NOT NULL)",
                s
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.servidores (\
                 uid UUID PRIMARY KEY, titular UUID NOT NULL, ip TEXT NOT NULL, nome TEXT, sistema TEXT, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                s = s
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS servidores_ip_key ON {}.servidores (ip)",
                s
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.banned_ips (\
                 servidor_id UUID NOT NULL REFERENCES {s}.servidores (uid), titular UUID NOT NULL, \
                 active BOOLEAN NOT NULL DEFAULT TRUE, servidor_ip TEXT NOT NULL, ip_banido TEXT NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                s = s
            ),
            format!(
                "ALTER TABLE {}.banned_ips ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()",
                s
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS banned_ips_servidor_ip_key ON {}.banned_ips (servidor_id, ip_banido)",
                s
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| LedgerError::query("création du schéma", e))?;
        }
        info!("Schéma {} prêt", s);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BanStore for PgBanStore {
    async fn find_host(&self, outbound_ip: &str) -> Result<Option<HostIdentity>, LedgerError> {
        let row = sqlx::query(&self.queries.find_host)
            .bind(outbound_ip)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::query("recherche du serveur", e))?;

        row.map(|row| -> Result<HostIdentity, sqlx::Error> {
            let hostname: Option<String> = row.try_get("nome")?;
            Ok(HostIdentity {
                host_id: row.try_get("uid")?,
                principal_id: row.try_get("titular")?,
                outbound_ip: row.try_get("ip")?,
                hostname: hostname.unwrap_or_default(),
            })
        })
        .transpose()
        .map_err(|e| LedgerError::query("lecture du serveur", e))
    }

    async fn find_admin(&self) -> Result<Option<String>, LedgerError> {
        sqlx::query_scalar::<_, String>(&self.queries.find_admin)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LedgerError::query("recherche du titulaire", e))
    }

    async fn insert_host(&self, host: &HostIdentity) -> Result<HostIdentity, LedgerError> {
        sqlx::query(&self.queries.insert_host)
            .bind(&host.host_id)
            .bind(&host.principal_id)
            .bind(&host.outbound_ip)
            .bind(&host.hostname)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::query("création du serveur", e))?;

        self.find_host(&host.outbound_ip).await?.ok_or_else(|| {
            LedgerError::Constraint(format!("serveur {} introuvable après insertion", host.outbound_ip))
        })
    }

    async fn ban_exists(&self, host_id: &str, address: &str) -> Result<bool, LedgerError> {
        sqlx::query_scalar::<_, bool>(&self.queries.ban_exists)
            .bind(host_id)
            .bind(address)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::query(format!("vérification de l'IP {}", address), e))
    }

    async fn refresh_ban(&self, host_id: &str, address: &str) -> Result<(), LedgerError> {
        refresh(&self.pool, &self.queries.refresh_ban, host_id, address).await
    }

    async fn insert_ban(&self, host: &HostIdentity, address: &str) -> Result<(), LedgerError> {
        insert(&self.pool, &self.queries.insert_ban, host, address).await
    }

    async fn deactivate_ban(&self, host_id: &str, address: &str) -> Result<bool, LedgerError> {
        let result = sqlx::query(&self.queries.deactivate_ban)
            .bind(host_id)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::query(format!("désactivation de l'IP {}", address), e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_bans(&self, host_id: &str, only_active: bool) -> Result<Vec<BanRecord>, LedgerError> {
        let sql = if only_active {
            &self.queries.list_active_bans
        } else {
            &self.queries.list_bans
        };
        let rows = sqlx::query(sql)
            .bind(host_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LedgerError::query("liste des IPs bannies", e))?;

        rows.iter()
            .map(ban_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LedgerError::query("lecture des IPs bannies", e))
    }

    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::query("début de transaction", e))?;
        Ok(Box::new(PgLedgerTx {
            tx,
            queries: self.queries.clone(),
        }))
    }
}

/// Les deux requêtes d'écriture sont réutilisées pour toute la transaction:
/// sqlx les prépare une fois sur la connexion.
struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    queries: Queries,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn existing_bans(
        &mut self,
        host_id: &str,
        addresses: &[String],
    ) -> Result<HashSet<String>, LedgerError> {
        let found: Vec<String> = sqlx::query_scalar(&self.queries.existing_bans)
            .bind(host_id)
            .bind(addresses)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| LedgerError::query("vérification des IPs bannies", e))?;
        Ok(found.into_iter().collect())
    }

    async fn refresh_ban(&mut self, host_id: &str, address: &str) -> Result<(), LedgerError> {
        refresh(&mut *self.tx, &self.queries.refresh_ban, host_id, address).await
    }

    async fn insert_ban(&mut self, host: &HostIdentity, address: &str) -> Result<(), LedgerError> {
        insert(&mut *self.tx, &self.queries.insert_ban, host, address).await
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .commit()
            .await
            .map_err(|e| LedgerError::query("validation de la transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| LedgerError::query("annulation de la transaction", e))
    }
}
