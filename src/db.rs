use async_trait::async_trait;
use serde::Serialize;
use sqlx::{
    mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions},
    FromRow,
};

use crate::config::Config;

/// A row of the `diagnostics` table. `disease_image` holds JSON text.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Diagnostic {
    pub id: i64,
    pub name_disease: String,
    pub disease_label: String,
    pub disease_image: Option<String>,
    pub indication: Option<String>,
    pub cause: Option<String>,
    pub solution: Option<String>,
}

/// A row of the `plants` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Plant {
    pub id: i64,
    pub name: String,
    pub latin_name: Option<String>,
    pub icon_plant: Option<String>,
    pub description: Option<String>,
    pub planting_guide: Option<String>,
    pub fertilizer_type: Option<String>,
    pub fun_fact: Option<String>,
    pub duration_plant: Option<i64>,
}

/// Descriptive records keyed by predicted label.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Exact match on `disease_label`.
    async fn find_diagnostic(&self, label: &str) -> Result<Option<Diagnostic>, sqlx::Error>;

    /// Substring match on `name`.
    async fn find_plant(&self, label: &str) -> Result<Option<Plant>, sqlx::Error>;
}

// Columns are cast so UNSIGNED ids and JSON-typed columns decode into the
// signed/text fields above.
const DIAGNOSTIC_QUERY: &str = "SELECT CAST(id AS SIGNED) AS id, name_disease, disease_label, \
     CAST(disease_image AS CHAR) AS disease_image, indication, cause, solution \
     FROM diagnostics WHERE disease_label = ? LIMIT 1";

const PLANT_QUERY: &str = "SELECT CAST(id AS SIGNED) AS id, name, latin_name, icon_plant, \
     description, planting_guide, fertilizer_type, fun_fact, \
     CAST(duration_plant AS SIGNED) AS duration_plant \
     FROM plants WHERE name LIKE ? LIMIT 1";

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connections are opened on first use, so an unreachable database
    /// surfaces per request instead of at startup.
    pub fn connect_lazy(config: &Config) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.db_host)
            .port(config.db_port)
            .username(&config.db_user)
            .password(&config.db_password)
            .database(&config.db_name);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect_lazy_with(options);

        MySqlStore { pool }
    }
}

#[async_trait]
impl RecordStore for MySqlStore {
    async fn find_diagnostic(&self, label: &str) -> Result<Option<Diagnostic>, sqlx::Error> {
        sqlx::query_as::<_, Diagnostic>(DIAGNOSTIC_QUERY)
            .bind(label)
            .fetch_optional(&self.pool)
            .await
    }

    async fn find_plant(&self, label: &str) -> Result<Option<Plant>, sqlx::Error> {
        sqlx::query_as::<_, Plant>(PLANT_QUERY)
            .bind(like_pattern(label))
            .fetch_optional(&self.pool)
            .await
    }
}

/// `%label%`, with LIKE metacharacters in the label escaped.
fn like_pattern(label: &str) -> String {
    let mut pattern = String::with_capacity(label.len() + 2);
    pattern.push('%');
    for c in label.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
