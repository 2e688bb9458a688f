use anyhow::{Context, Result};
use async_trait::async_trait;
use log::error;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::query::{Query, QueryAs};
use sqlx::{Executor, FromRow, MySql};
use tokio::sync::Mutex;

/// A bound value for a parameterized query. Kept deliberately narrow:
/// the daemon only ever writes strings, integers, and NULLs to `ports`
/// and the three cache tables.
#[derive(Debug, Clone)]
pub enum DbValue {
    Text(String),
    Int(i64),
    Null,
}

impl From<&str> for DbValue {
    fn from(s: &str) -> Self {
        DbValue::Text(s.to_string())
    }
}

impl From<String> for DbValue {
    fn from(s: String) -> Self {
        DbValue::Text(s)
    }
}

impl From<i64> for DbValue {
    fn from(i: i64) -> Self {
        DbValue::Int(i)
    }
}

impl From<Option<String>> for DbValue {
    fn from(s: Option<String>) -> Self {
        match s {
            Some(s) => DbValue::Text(s),
            None => DbValue::Null,
        }
    }
}

/// Lets `exec`/`named_exec` and `fetch_one` share one binding loop even
/// though `sqlx::query` and `sqlx::query_as` return distinct builder types.
trait Bindable<'q>: Sized {
    fn bind_value(self, value: &'q DbValue) -> Self;
}

impl<'q> Bindable<'q> for Query<'q, MySql, MySqlArguments> {
    fn bind_value(self, value: &'q DbValue) -> Self {
        match value {
            DbValue::Text(s) => self.bind(s),
            DbValue::Int(i) => self.bind(i),
            DbValue::Null => self.bind(Option::<String>::None),
        }
    }
}

impl<'q, T> Bindable<'q> for QueryAs<'q, MySql, T, MySqlArguments> {
    fn bind_value(self, value: &'q DbValue) -> Self {
        match value {
            DbValue::Text(s) => self.bind(s),
            DbValue::Int(i) => self.bind(i),
            DbValue::Null => self.bind(Option::<String>::None),
        }
    }
}

/// The narrow slice of `Store` that the Flap Assembler's two-phase
/// persistence depends on. Exists so `flap::Flap::save`/`update` can be
/// exercised against an in-memory fake without a live MySQL pool.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn named_exec(&self, query: &str, args: &[(&str, DbValue)]) -> Result<u64>;
}

/// Serialized access to the backing relational database.
///
/// All three operations acquire `lock` for their entire call duration.
/// SNMP trap rates in this domain are low enough that serializing every
/// database round trip costs nothing in practice, and it removes a class
/// of interleaving bugs between the cache's delete-then-insert puts.
pub struct Store {
    pool: MySqlPool,
    lock: Mutex<()>,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("unable to connect to the database")?;

        Ok(Store {
            pool,
            lock: Mutex::new(()),
        })
    }

    /// Named-parameter substitution for queries written with `:name`
    /// placeholders. `sqlx` has no named-parameter support for MySQL, so
    /// this rewrites `:name` tokens into positional `?` placeholders in
    /// the order they appear and looks each one up in `args`.
    fn substitute_named(query: &str, args: &[(&str, DbValue)]) -> Result<(String, Vec<DbValue>)> {
        let mut rewritten = String::with_capacity(query.len());
        let mut positional = Vec::new();
        let bytes = query.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] == b':' && i + 1 < bytes.len() && (bytes[i + 1].is_ascii_alphabetic() || bytes[i + 1] == b'_') {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                let name = &query[start..end];
                let (_, value) = args
                    .iter()
                    .find(|(n, _)| *n == name)
                    .with_context(|| format!("named parameter :{} has no matching argument", name))?;
                positional.push(value.clone());
                rewritten.push('?');
                i = end;
            } else {
                rewritten.push(bytes[i] as char);
                i += 1;
            }
        }

        Ok((rewritten, positional))
    }

    /// Executes `query` with positional `?` placeholders, returning the
    /// number of affected rows.
    pub async fn exec(&self, query: &str, args: &[DbValue]) -> Result<u64> {
        let _guard = self.lock.lock().await;

        let mut q = sqlx::query(query);
        for value in args {
            q = q.bind_value(value);
        }

        let result = self
            .pool
            .execute(q)
            .await
            .inspect_err(|e| error!("store: exec failed: {}", e))?;

        Ok(result.rows_affected())
    }

    /// Executes `query` written with `:name` placeholders, returning the
    /// number of affected rows.
    pub async fn named_exec(&self, query: &str, args: &[(&str, DbValue)]) -> Result<u64> {
        let (rewritten, positional) = Self::substitute_named(query, args)?;

        let _guard = self.lock.lock().await;

        let mut q = sqlx::query(&rewritten);
        for value in &positional {
            q = q.bind_value(value);
        }

        let result = self
            .pool
            .execute(q)
            .await
            .inspect_err(|e| error!("store: named_exec failed: {}", e))?;

        Ok(result.rows_affected())
    }

    /// Fetches a single row, returning `Ok(None)` on a miss (no row) and
    /// only logging genuine query errors — a miss is an expected outcome
    /// for the enrichment cache, not a failure.
    pub async fn fetch_one<T>(&self, query: &str, args: &[DbValue]) -> Result<Option<T>>
    where
        T: for<'r> FromRow<'r, MySqlRow> + Send + Unpin,
    {
        let _guard = self.lock.lock().await;

        let mut q = sqlx::query_as::<_, T>(query);
        for value in args {
            q = q.bind_value(value);
        }

        match q.fetch_optional(&self.pool).await {
            Ok(row) => Ok(row),
            Err(e) => {
                error!("store: fetch_one failed: {}", e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Persistence for Store {
    async fn named_exec(&self, query: &str, args: &[(&str, DbValue)]) -> Result<u64> {
        Store::named_exec(self, query, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_named_rewrites_in_order() {
        let args: Vec<(&str, DbValue)> = vec![
            ("ipaddress", DbValue::from("10.0.0.1")),
            ("ifindex", DbValue::from(3_i64)),
        ];
        let (rewritten, positional) = Store::substitute_named(
            "delete from cache_ifname where ipaddress=:ipaddress and ifIndex=:ifindex",
            &args,
        )
        .unwrap();

        assert_eq!(
            rewritten,
            "delete from cache_ifname where ipaddress=? and ifIndex=?"
        );
        assert_eq!(positional.len(), 2);
        assert!(matches!(positional[0], DbValue::Text(ref s) if s == "10.0.0.1"));
        assert!(matches!(positional[1], DbValue::Int(3)));
    }

    #[test]
    fn substitute_named_repeats_placeholder_for_reused_name() {
        let args: Vec<(&str, DbValue)> = vec![("id", DbValue::from(7_i64))];
        let (rewritten, positional) =
            Store::substitute_named("select * from t where a=:id or b=:id", &args).unwrap();

        assert_eq!(rewritten, "select * from t where a=? or b=?");
        assert_eq!(positional.len(), 2);
    }

    #[test]
    fn substitute_named_rejects_unknown_placeholder() {
        let args: Vec<(&str, DbValue)> = vec![];
        let result = Store::substitute_named("select * from t where a=:missing", &args);
        assert!(result.is_err());
    }
}
