//! Postgres-backed [`IdentityStore`].
//!
//! Flow Overview:
//! 1) Every statement runs inside a `db.query` span carrying the SQL text.
//! 2) Write sets run in one transaction; dropping it on error rolls back.
//! 3) Admin-granting write sets take a transaction-scoped advisory lock and
//!    re-check for an existing `ADMIN` grant before writing. The partial
//!    unique index `role_grants_single_admin` is the last line of defence.

use super::{
    store::{IdentityStore, StoreError, WriteSet},
    Identity, ProfileRecord, RefreshSession, Role, SecurityRecord,
};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    PgPool, Postgres, Row, Transaction,
};
use std::time::Duration;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

const ADMIN_BOOTSTRAP_LOCK_ID: i64 = 7_310_204;
const SINGLE_ADMIN_INDEX: &str = "role_grants_single_admin";
const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Map a write failure, turning unique violations into domain errors.
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| code.as_ref() == "23505") {
            return match db_err.constraint() {
                Some(SINGLE_ADMIN_INDEX) => StoreError::AdminExists,
                Some(name) => StoreError::Conflict(name.to_string()),
                None => StoreError::Conflict("unique".to_string()),
            };
        }
    }
    StoreError::Database(err)
}

fn identity_from_row(row: &PgRow) -> Result<Identity, StoreError> {
    Ok(Identity {
        id: row.try_get("id")?,
        email_ciphertext: row.try_get("email_ciphertext")?,
        email_lookup_hash: row.try_get("email_lookup_hash")?,
        password_hash: row.try_get("password_hash")?,
        is_active: row.try_get("is_active")?,
    })
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// # Errors
    /// Returns `Database` if the pool cannot be established.
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await?;
        Ok(Self { pool })
    }

    /// Apply `sql/schema.sql`.
    ///
    /// # Errors
    /// Returns `Database` if any statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .instrument(query_span("DDL", "sql/schema.sql"))
            .await?;
        Ok(())
    }

    async fn admin_in(tx: &mut Transaction<'_, Postgres>) -> Result<Option<Uuid>, StoreError> {
        let query = "SELECT identity_id FROM role_grants WHERE role = 'ADMIN' LIMIT 1";
        let row = sqlx::query(query)
            .fetch_optional(&mut **tx)
            .instrument(query_span("SELECT", query))
            .await?;
        row.map(|row| row.try_get("identity_id"))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn insert_account(
        tx: &mut Transaction<'_, Postgres>,
        identity: &Identity,
        roles: &[Role],
        security: &SecurityRecord,
        profile: &ProfileRecord,
    ) -> Result<(), StoreError> {
        let insert_identity = r"
            INSERT INTO identities (id, email_ciphertext, email_lookup_hash, password_hash, is_active)
            VALUES ($1, $2, $3, $4, $5)
        ";
        sqlx::query(insert_identity)
            .bind(identity.id)
            .bind(&identity.email_ciphertext)
            .bind(&identity.email_lookup_hash)
            .bind(&identity.password_hash)
            .bind(identity.is_active)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", insert_identity))
            .await
            .map_err(map_write_error)?;

        let insert_grant = "INSERT INTO role_grants (identity_id, role) VALUES ($1, $2)";
        for role in roles {
            sqlx::query(insert_grant)
                .bind(identity.id)
                .bind(role.as_str())
                .execute(&mut **tx)
                .instrument(query_span("INSERT", insert_grant))
                .await
                .map_err(map_write_error)?;
        }

        let insert_security = r"
            INSERT INTO security_records (identity_id, email_verified_at, manual_verified_at)
            VALUES ($1, $2, $3)
        ";
        sqlx::query(insert_security)
            .bind(identity.id)
            .bind(security.email_verified_at)
            .bind(security.manual_verified_at)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", insert_security))
            .await
            .map_err(map_write_error)?;

        let insert_profile = r"
            INSERT INTO profiles (identity_id, display_name, country_code)
            VALUES ($1, $2, $3)
        ";
        sqlx::query(insert_profile)
            .bind(identity.id)
            .bind(&profile.display_name)
            .bind(&profile.country_code)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", insert_profile))
            .await
            .map_err(map_write_error)?;

        Ok(())
    }

    async fn promote(
        tx: &mut Transaction<'_, Postgres>,
        identity_id: Uuid,
        password_hash: &str,
        verified_at: OffsetDateTime,
        default_profile: &ProfileRecord,
    ) -> Result<(), StoreError> {
        let update_password = "UPDATE identities SET password_hash = $2 WHERE id = $1";
        let updated = sqlx::query(update_password)
            .bind(identity_id)
            .bind(password_hash)
            .execute(&mut **tx)
            .instrument(query_span("UPDATE", update_password))
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(identity_id));
        }

        let upsert_grant = r"
            INSERT INTO role_grants (identity_id, role)
            VALUES ($1, 'ADMIN')
            ON CONFLICT (identity_id, role) DO NOTHING
        ";
        sqlx::query(upsert_grant)
            .bind(identity_id)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", upsert_grant))
            .await
            .map_err(map_write_error)?;

        let upsert_security = r"
            INSERT INTO security_records (identity_id, email_verified_at, manual_verified_at)
            VALUES ($1, $2, $2)
            ON CONFLICT (identity_id) DO UPDATE
            SET email_verified_at = EXCLUDED.email_verified_at
        ";
        sqlx::query(upsert_security)
            .bind(identity_id)
            .bind(verified_at)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", upsert_security))
            .await?;

        let insert_profile = r"
            INSERT INTO profiles (identity_id, display_name, country_code)
            VALUES ($1, $2, $3)
            ON CONFLICT (identity_id) DO NOTHING
        ";
        sqlx::query(insert_profile)
            .bind(identity_id)
            .bind(&default_profile.display_name)
            .bind(&default_profile.country_code)
            .execute(&mut **tx)
            .instrument(query_span("INSERT", insert_profile))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_admin(&self) -> Result<Option<Uuid>, StoreError> {
        let query = "SELECT identity_id FROM role_grants WHERE role = 'ADMIN' LIMIT 1";
        let row = sqlx::query(query)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(row.map(|row| row.try_get("identity_id")).transpose()?)
    }

    async fn find_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let query = r"
            SELECT id, email_ciphertext, email_lookup_hash, password_hash, is_active
            FROM identities
            WHERE email_lookup_hash = $1
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(lookup_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = r"
            SELECT id, email_ciphertext, email_lookup_hash, password_hash, is_active
            FROM identities
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn roles_for(&self, id: Uuid) -> Result<Vec<Role>, StoreError> {
        let query = "SELECT role FROM role_grants WHERE identity_id = $1 ORDER BY role";
        let rows = sqlx::query(query)
            .bind(id)
            .fetch_all(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;

        let mut roles = rows
            .iter()
            .map(|row| {
                let value: String = row.try_get("role")?;
                value
                    .parse::<Role>()
                    .map_err(|err| StoreError::Decode(err.to_string()))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        roles.sort();
        Ok(roles)
    }

    async fn security_record(&self, id: Uuid) -> Result<Option<SecurityRecord>, StoreError> {
        let query = r"
            SELECT email_verified_at, manual_verified_at
            FROM security_records
            WHERE identity_id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        row.map(|row| -> Result<SecurityRecord, StoreError> {
            Ok(SecurityRecord {
                email_verified_at: row.try_get("email_verified_at")?,
                manual_verified_at: row.try_get("manual_verified_at")?,
            })
        })
        .transpose()
    }

    async fn profile(&self, id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        let query = "SELECT display_name, country_code FROM profiles WHERE identity_id = $1";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        row.map(|row| -> Result<ProfileRecord, StoreError> {
            Ok(ProfileRecord {
                display_name: row.try_get("display_name")?,
                country_code: row.try_get::<String, _>("country_code")?.trim().to_string(),
            })
        })
        .transpose()
    }

    async fn commit(&self, write: WriteSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if write.grants_admin() {
            let lock_query = "SELECT pg_advisory_xact_lock($1)";
            sqlx::query(lock_query)
                .bind(ADMIN_BOOTSTRAP_LOCK_ID)
                .execute(&mut *tx)
                .instrument(query_span("SELECT", lock_query))
                .await?;

            if Self::admin_in(&mut tx).await?.is_some() {
                tx.rollback().await?;
                return Err(StoreError::AdminExists);
            }
        }

        match &write {
            WriteSet::NewAccount {
                identity,
                roles,
                security,
                profile,
            } => Self::insert_account(&mut tx, identity, roles, security, profile).await?,
            WriteSet::Promotion {
                identity_id,
                password_hash,
                verified_at,
                default_profile,
            } => {
                Self::promote(
                    &mut tx,
                    *identity_id,
                    password_hash,
                    *verified_at,
                    default_profile,
                )
                .await?;
            }
        }

        tx.commit().await.map_err(map_write_error)?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), StoreError> {
        let query = "UPDATE identities SET is_active = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn insert_refresh_session(&self, session: RefreshSession) -> Result<(), StoreError> {
        self.purge_expired_refresh_sessions(OffsetDateTime::now_utc())
            .await?;

        let query = r"
            INSERT INTO refresh_sessions (token_hash, identity_id, expires_at)
            VALUES ($1, $2, $3)
        ";
        sqlx::query(query)
            .bind(&session.token_hash)
            .bind(session.identity_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .map_err(map_write_error)?;
        Ok(())
    }

    async fn take_refresh_session(
        &self,
        token_hash: &[u8],
    ) -> Result<Option<RefreshSession>, StoreError> {
        let query = r"
            DELETE FROM refresh_sessions
            WHERE token_hash = $1
            RETURNING token_hash, identity_id, expires_at
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        row.map(|row| -> Result<RefreshSession, StoreError> {
            Ok(RefreshSession {
                token_hash: row.try_get("token_hash")?,
                identity_id: row.try_get("identity_id")?,
                expires_at: row.try_get("expires_at")?,
            })
        })
        .transpose()
    }

    async fn delete_refresh_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = "DELETE FROM refresh_sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(())
    }

    async fn purge_expired_refresh_sessions(
        &self,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let query = "DELETE FROM refresh_sessions WHERE expires_at <= $1";
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(query_span("SELECT", query))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::{borrow::Cow, error::Error as StdError, fmt};

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    fn db_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(TestDbError {
            code: Some(code),
            constraint,
        }))
    }

    #[test]
    fn single_admin_violation_maps_to_admin_exists() {
        let err = map_write_error(db_error("23505", Some(SINGLE_ADMIN_INDEX)));
        assert!(matches!(err, StoreError::AdminExists));
    }

    #[test]
    fn other_unique_violations_name_the_constraint() {
        let err = map_write_error(db_error(
            "23505",
            Some("identities_email_lookup_hash_key"),
        ));
        assert!(
            matches!(err, StoreError::Conflict(ref name) if name == "identities_email_lookup_hash_key")
        );
    }

    #[test]
    fn non_unique_errors_pass_through() {
        assert!(matches!(
            map_write_error(db_error("40001", None)),
            StoreError::Database(_)
        ));
        assert!(matches!(
            map_write_error(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
    }

    #[test]
    fn schema_declares_single_admin_index() {
        assert!(SCHEMA_SQL.contains(SINGLE_ADMIN_INDEX));
        assert!(SCHEMA_SQL.contains("WHERE role = 'ADMIN'"));
    }

    mod postgres {
        use super::super::*;
        use crate::{
            identity::{
                bootstrap::{self, BootstrapInput, BootstrapOutcome},
                password::CredentialVerifier,
                pii::PiiCodec,
                set_account_active,
            },
            keys::KeyRing,
            test_support, Error,
        };
        use secrecy::SecretString;
        use tokio::sync::MutexGuard;

        const ADMIN_EMAIL: &str = "Owner@Example.com";
        const ADMIN_PASSWORD: &str = "correct horse battery staple";

        /// A store on an empty schema, or `None` when no database is reachable.
        async fn fresh_store() -> Option<(PgStore, MutexGuard<'static, ()>)> {
            let guard = test_support::PG_LOCK.lock().await;
            let result = async {
                let dsn = test_support::postgres_dsn().await?;
                let store = PgStore::connect(&dsn).await?;
                store.ensure_schema().await?;
                sqlx::query("TRUNCATE identities CASCADE")
                    .execute(&store.pool)
                    .await?;
                Ok::<_, anyhow::Error>(store)
            }
            .await;

            match result {
                Ok(store) => Some((store, guard)),
                Err(err) => {
                    eprintln!("Skipping Postgres test: {err:#}");
                    None
                }
            }
        }

        async fn count(store: &PgStore, query: &'static str) -> anyhow::Result<i64> {
            Ok(sqlx::query_scalar::<_, i64>(query)
                .fetch_one(&store.pool)
                .await?)
        }

        async fn admin_grants(store: &PgStore) -> anyhow::Result<i64> {
            count(store, "SELECT COUNT(*) FROM role_grants WHERE role = 'ADMIN'").await
        }

        async fn identities(store: &PgStore) -> anyhow::Result<i64> {
            count(store, "SELECT COUNT(*) FROM identities").await
        }

        fn codec() -> crate::Result<PiiCodec> {
            let keys = KeyRing::generate();
            PiiCodec::new(keys.lookup(), keys.encryption())
        }

        fn input() -> BootstrapInput {
            BootstrapInput::new(ADMIN_EMAIL, SecretString::from(ADMIN_PASSWORD))
        }

        async fn register_user(
            store: &PgStore,
            codec: &PiiCodec,
            email: &str,
            profile: ProfileRecord,
        ) -> anyhow::Result<Uuid> {
            let protected = codec.protect(email)?;
            let id = Uuid::now_v7();
            store
                .commit(WriteSet::NewAccount {
                    identity: Identity {
                        id,
                        email_ciphertext: protected.ciphertext,
                        email_lookup_hash: protected.lookup_hash,
                        password_hash: CredentialVerifier::new().hash("old password")?,
                        is_active: true,
                    },
                    roles: vec![Role::User],
                    security: SecurityRecord::unverified(),
                    profile,
                })
                .await?;
            Ok(id)
        }

        #[tokio::test]
        async fn bootstrap_twice_leaves_one_admin() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let verifier = CredentialVerifier::new();

            let first = bootstrap::run(&store, &codec, &verifier, &input()).await?;
            let BootstrapOutcome::Created(admin_id) = first else {
                panic!("expected Created, got {first:?}");
            };
            let second = bootstrap::run(&store, &codec, &verifier, &input()).await?;
            assert!(matches!(second, BootstrapOutcome::AlreadyAdmin(id) if id == admin_id));

            assert_eq!(identities(&store).await?, 1);
            assert_eq!(admin_grants(&store).await?, 1);
            assert_eq!(store.roles_for(admin_id).await?, vec![Role::Admin, Role::User]);
            assert_eq!(
                store.profile(admin_id).await?,
                Some(ProfileRecord::admin_default())
            );
            let security = store.security_record(admin_id).await?;
            assert!(security.is_some_and(|record| record.is_email_verified()
                && record.manual_verified_at.is_some()));
            Ok(())
        }

        #[tokio::test]
        async fn bootstrap_promotes_existing_user_in_place() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let verifier = CredentialVerifier::new();
            let profile = ProfileRecord {
                display_name: "Shop Owner".to_string(),
                country_code: "DE".to_string(),
            };
            let user_id =
                register_user(&store, &codec, " owner@example.COM ", profile.clone()).await?;

            let outcome = bootstrap::run(&store, &codec, &verifier, &input()).await?;
            assert!(matches!(outcome, BootstrapOutcome::Promoted(id) if id == user_id));

            assert_eq!(identities(&store).await?, 1);
            assert_eq!(store.roles_for(user_id).await?, vec![Role::Admin, Role::User]);
            assert_eq!(store.profile(user_id).await?, Some(profile));
            let security = store.security_record(user_id).await?;
            assert!(security.is_some_and(|record| record.is_email_verified()));

            let identity = store
                .find_identity(user_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("promoted identity missing"))?;
            assert!(verifier.verify(ADMIN_PASSWORD, &identity.password_hash)?);
            assert!(!verifier.verify("old password", &identity.password_hash)?);
            Ok(())
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn concurrent_bootstraps_leave_one_admin() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = std::sync::Arc::new(codec()?);

            let tasks = (0..4).map(|_| {
                let store = store.clone();
                let codec = std::sync::Arc::clone(&codec);
                tokio::spawn(async move {
                    bootstrap::run(&store, &codec, &CredentialVerifier::new(), &input()).await
                })
            });

            let mut created = 0;
            for task in tasks.collect::<Vec<_>>() {
                match task.await? {
                    Ok(BootstrapOutcome::Created(_)) => created += 1,
                    Ok(_) | Err(Error::Persistence(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            assert_eq!(created, 1);
            assert_eq!(identities(&store).await?, 1);
            assert_eq!(admin_grants(&store).await?, 1);
            Ok(())
        }

        #[tokio::test]
        async fn second_admin_grant_is_refused() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let first = register_user(&store, &codec, "a@example.com", ProfileRecord::admin_default())
                .await?;
            let second =
                register_user(&store, &codec, "b@example.com", ProfileRecord::admin_default())
                    .await?;

            let grant = "INSERT INTO role_grants (identity_id, role) VALUES ($1, 'ADMIN')";
            sqlx::query(grant).bind(first).execute(&store.pool).await?;
            let refused = sqlx::query(grant)
                .bind(second)
                .execute(&store.pool)
                .await
                .map_err(map_write_error);
            assert!(matches!(refused, Err(StoreError::AdminExists)));

            // The commit path checks under the advisory lock before writing.
            let promotion = store
                .commit(WriteSet::Promotion {
                    identity_id: second,
                    password_hash: "hash".to_string(),
                    verified_at: OffsetDateTime::now_utc(),
                    default_profile: ProfileRecord::admin_default(),
                })
                .await;
            assert!(matches!(promotion, Err(StoreError::AdminExists)));
            assert_eq!(store.find_admin().await?, Some(first));
            assert_eq!(store.roles_for(second).await?, vec![Role::User]);
            Ok(())
        }

        #[tokio::test]
        async fn failed_commit_rolls_back_every_record() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let protected = codec.protect(ADMIN_EMAIL)?;
            let id = Uuid::now_v7();

            // The profile insert runs last and violates the length check.
            let result = store
                .commit(WriteSet::NewAccount {
                    identity: Identity {
                        id,
                        email_ciphertext: protected.ciphertext,
                        email_lookup_hash: protected.lookup_hash,
                        password_hash: "hash".to_string(),
                        is_active: true,
                    },
                    roles: vec![Role::Admin, Role::User],
                    security: SecurityRecord::verified_at(OffsetDateTime::now_utc()),
                    profile: ProfileRecord {
                        display_name: "x".repeat(101),
                        country_code: "US".to_string(),
                    },
                })
                .await;
            assert!(matches!(result, Err(StoreError::Database(_))));

            assert_eq!(identities(&store).await?, 0);
            assert_eq!(count(&store, "SELECT COUNT(*) FROM role_grants").await?, 0);
            assert_eq!(count(&store, "SELECT COUNT(*) FROM security_records").await?, 0);
            assert_eq!(store.find_admin().await?, None);
            Ok(())
        }

        #[tokio::test]
        async fn duplicate_email_is_a_conflict() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            register_user(&store, &codec, "a@example.com", ProfileRecord::admin_default()).await?;
            let again =
                register_user(&store, &codec, "A@Example.com", ProfileRecord::admin_default()).await;

            let err = again
                .err()
                .ok_or_else(|| anyhow::anyhow!("duplicate email was accepted"))?;
            assert!(matches!(
                err.downcast_ref::<StoreError>(),
                Some(StoreError::Conflict(name)) if name == "identities_email_lookup_hash_key"
            ));
            assert_eq!(identities(&store).await?, 1);
            Ok(())
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn refresh_session_is_taken_once() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let user = register_user(&store, &codec, "a@example.com", ProfileRecord::admin_default())
                .await?;
            let token_hash = vec![7_u8; 32];
            store
                .insert_refresh_session(RefreshSession {
                    token_hash: token_hash.clone(),
                    identity_id: user,
                    expires_at: OffsetDateTime::now_utc() + time::Duration::hours(1),
                })
                .await?;

            let tasks = (0..4).map(|_| {
                let store = store.clone();
                let token_hash = token_hash.clone();
                tokio::spawn(async move { store.take_refresh_session(&token_hash).await })
            });

            let mut taken = Vec::new();
            for task in tasks.collect::<Vec<_>>() {
                if let Some(session) = task.await?? {
                    taken.push(session);
                }
            }

            assert_eq!(taken.len(), 1);
            assert_eq!(taken[0].identity_id, user);
            assert_eq!(taken[0].token_hash, token_hash);
            assert_eq!(count(&store, "SELECT COUNT(*) FROM refresh_sessions").await?, 0);

            // Deleting an absent session is not an error.
            store.delete_refresh_session(&token_hash).await?;
            Ok(())
        }

        #[tokio::test]
        async fn insert_sweeps_expired_refresh_sessions() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let user = register_user(&store, &codec, "a@example.com", ProfileRecord::admin_default())
                .await?;
            let now = OffsetDateTime::now_utc();
            let session = |byte: u8, expires_at: OffsetDateTime| RefreshSession {
                token_hash: vec![byte; 32],
                identity_id: user,
                expires_at,
            };

            store
                .insert_refresh_session(session(1, now - time::Duration::hours(1)))
                .await?;
            store
                .insert_refresh_session(session(2, now + time::Duration::hours(1)))
                .await?;
            assert_eq!(count(&store, "SELECT COUNT(*) FROM refresh_sessions").await?, 1);
            assert_eq!(store.take_refresh_session(&[1_u8; 32]).await?, None);

            store
                .insert_refresh_session(session(3, now + time::Duration::hours(3)))
                .await?;
            let purged = store
                .purge_expired_refresh_sessions(now + time::Duration::hours(2))
                .await?;
            assert_eq!(purged, 1);
            let remaining = store.take_refresh_session(&[3_u8; 32]).await?;
            assert!(remaining.is_some_and(|session| session.identity_id == user));
            Ok(())
        }

        #[tokio::test]
        async fn account_can_be_deactivated_by_email() -> anyhow::Result<()> {
            let Some((store, _guard)) = fresh_store().await else {
                return Ok(());
            };
            let codec = codec()?;
            let user = register_user(&store, &codec, "a@example.com", ProfileRecord::admin_default())
                .await?;

            let id = set_account_active(&store, &codec, " A@example.com", false).await?;
            assert_eq!(id, user);
            let identity = store.find_identity(user).await?;
            assert!(identity.is_some_and(|identity| !identity.is_active));

            let missing = store.set_active(Uuid::now_v7(), true).await;
            assert!(matches!(missing, Err(StoreError::NotFound(_))));
            Ok(())
        }
    }
}
